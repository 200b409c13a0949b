//! Cache Statistics Module
//!
//! Tracks cache performance metrics: hits, misses, fetch rounds and
//! deduplicated waiters, and absorbed persistence failures.

use serde::Serialize;

// == Cache Stats ==
/// Tracks cache performance metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Number of lookups answered with a fresh value
    pub hits: u64,
    /// Number of lookups that found nothing usable
    pub misses: u64,
    /// Number of entries dropped because their TTL elapsed
    pub expired: u64,
    /// Number of entries promoted from the persistent mirror into memory
    pub restored: u64,
    /// Number of upstream fetches started by a leader
    pub fetches: u64,
    /// Number of callers that joined an in-flight fetch instead of starting one
    pub deduplicated: u64,
    /// Number of fetch rounds that ended in an error
    pub fetch_failures: u64,
    /// Number of mirror operations that failed and were absorbed
    pub persistence_errors: u64,
    /// Current number of entries held in memory
    pub total_entries: usize,
    /// Current number of in-flight fetches
    pub in_flight: usize,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_expired(&mut self) {
        self.expired += 1;
    }

    pub fn record_restored(&mut self) {
        self.restored += 1;
    }

    pub fn record_fetch(&mut self) {
        self.fetches += 1;
    }

    pub fn record_deduplicated(&mut self) {
        self.deduplicated += 1;
    }

    pub fn record_fetch_failure(&mut self) {
        self.fetch_failures += 1;
    }

    pub fn record_persistence_error(&mut self) {
        self.persistence_errors += 1;
    }

    // == Update Gauges ==
    /// Updates the total entries count.
    pub fn set_total_entries(&mut self, count: usize) {
        self.total_entries = count;
    }

    /// Updates the in-flight fetch count.
    pub fn set_in_flight(&mut self, count: usize) {
        self.in_flight = count;
    }
}
