//! Cache Store Module
//!
//! Synchronous cache engine: a HashMap of entries with a fixed TTL, lazy
//! expiry on read, and an optional best-effort mirror in a persistence
//! backend. Concurrency and request deduplication live one level up in
//! [`CacheManager`](crate::cache::CacheManager).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::{CacheEntry, CacheStats, Clock, PersistenceBackend, PersistenceError, SystemClock};

// == Mirror ==
/// Persistence backend plus the reserved key prefix of one store.
#[derive(Debug, Clone)]
struct Mirror {
    backend: Arc<dyn PersistenceBackend>,
    prefix: String,
}

// == Cache Store ==
/// Cache storage with TTL expiry and an optional persistent mirror.
#[derive(Debug)]
pub struct CacheStore<V> {
    /// Key-value storage
    entries: HashMap<String, CacheEntry<V>>,
    /// Persistent mirror, if enabled
    mirror: Option<Mirror>,
    /// Performance statistics
    stats: CacheStats,
    /// TTL applied to every entry, in milliseconds
    ttl_ms: u64,
    /// Time source for expiry decisions
    clock: Arc<dyn Clock>,
}

impl<V> CacheStore<V>
where
    V: Clone + Serialize + DeserializeOwned,
{
    // == Constructor ==
    /// Creates a memory-only store whose entries live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            mirror: None,
            stats: CacheStats::new(),
            ttl_ms: ttl.as_millis().min(u64::MAX as u128) as u64,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Mirrors every entry into `backend` under keys starting with `prefix`.
    ///
    /// The prefix is reserved for this store: `clear` and the expiry sweep
    /// remove any backend key carrying it and never touch other keys.
    pub fn with_mirror(mut self, backend: Arc<dyn PersistenceBackend>, prefix: impl Into<String>) -> Self {
        self.mirror = Some(Mirror {
            backend,
            prefix: prefix.into(),
        });
        self
    }

    // == Accessors ==
    /// TTL applied to every entry.
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Reserved storage prefix, if mirroring is enabled.
    pub fn storage_prefix(&self) -> Option<&str> {
        self.mirror.as_ref().map(|m| m.prefix.as_str())
    }

    /// Returns true if entries are mirrored to a backend.
    pub fn is_persistent(&self) -> bool {
        self.mirror.is_some()
    }

    // == Set ==
    /// Stores a value that expires one TTL from now.
    ///
    /// Overwrites any previous value and resets its expiry. Mirror failures
    /// are logged and absorbed; the in-memory copy stays authoritative.
    pub fn set(&mut self, key: &str, value: V) {
        let entry = CacheEntry::new(value, self.clock.now_ms(), self.ttl_ms);

        if let Some(mirror) = &self.mirror {
            let storage_key = format!("{}{}", mirror.prefix, key);
            let written = serde_json::to_string(&entry)
                .map_err(PersistenceError::from)
                .and_then(|payload| mirror.backend.write(&storage_key, &payload));
            if let Err(err) = written {
                warn!(key, error = %err, "Failed to mirror cache entry");
                self.stats.record_persistence_error();
            }
        }

        self.entries.insert(key.to_string(), entry);
        self.stats.set_total_entries(self.entries.len());
        debug!(key, "Cache SET");
    }

    // == Get ==
    /// Retrieves a fresh value by key.
    ///
    /// Falls back to the mirror on a memory miss and promotes what it finds.
    /// Expired entries are removed from memory and mirror. Unknown, expired
    /// and unreadable entries all count as a miss.
    pub fn get(&mut self, key: &str) -> Option<V> {
        match self.fresh_entry(key).map(|entry| entry.data.clone()) {
            Some(value) => {
                self.stats.record_hit();
                debug!(key, "Cache HIT");
                Some(value)
            }
            None => {
                self.stats.record_miss();
                debug!(key, "Cache MISS");
                None
            }
        }
    }

    // == Has ==
    /// Returns true if a fresh value exists, with the same expiry rules as `get`.
    pub fn has(&mut self, key: &str) -> bool {
        self.fresh_entry(key).is_some()
    }

    // == Delete ==
    /// Removes an entry from memory and mirror. Missing keys are a no-op.
    pub fn delete(&mut self, key: &str) {
        self.entries.remove(key);
        self.remove_mirrored(key);
        self.stats.set_total_entries(self.entries.len());
    }

    // == Clear ==
    /// Removes every entry, including all mirrored keys under this store's prefix.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.stats.set_total_entries(0);

        for storage_key in self.mirrored_keys() {
            self.remove_storage_key(&storage_key);
        }
    }

    // == Sweep Expired ==
    /// Removes all expired entries from memory and mirror.
    ///
    /// Unparsable mirror payloads are removed as well. Returns the number of
    /// distinct keys removed.
    pub fn sweep_expired(&mut self) -> usize {
        let now = self.clock.now_ms();

        let mut removed: HashSet<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &removed {
            self.entries.remove(key);
        }

        if let Some(prefix) = self.storage_prefix().map(str::to_string) {
            for storage_key in self.mirrored_keys() {
                let Some(key) = storage_key.strip_prefix(prefix.as_str()).map(str::to_string) else {
                    continue;
                };
                let stale = match self.read_storage_key(&storage_key) {
                    Some(raw) => match serde_json::from_str::<CacheEntry<V>>(&raw) {
                        Ok(entry) => entry.is_expired_at(now),
                        Err(_) => true,
                    },
                    None => false,
                };
                if stale {
                    self.remove_storage_key(&storage_key);
                    removed.insert(key);
                }
            }
        }

        self.stats.expired += removed.len() as u64;
        self.stats.set_total_entries(self.entries.len());
        removed.len()
    }

    // == Length ==
    /// Returns the current number of entries held in memory.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    // == Is Empty ==
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.set_total_entries(self.entries.len());
        stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut CacheStats {
        &mut self.stats
    }

    // == Internal Helpers ==
    /// Resolves a key to a fresh entry held in memory, restoring it from the
    /// mirror if needed and evicting it everywhere if it has expired.
    fn fresh_entry(&mut self, key: &str) -> Option<&CacheEntry<V>> {
        let now = self.clock.now_ms();

        let expired = match self.entries.get(key) {
            Some(entry) => entry.is_expired_at(now),
            None => {
                let restored = self.read_mirrored(key)?;
                if restored.is_expired_at(now) {
                    true
                } else {
                    debug!(key, "Restored cache entry from mirror");
                    self.stats.record_restored();
                    self.entries.insert(key.to_string(), restored);
                    self.stats.set_total_entries(self.entries.len());
                    false
                }
            }
        };

        if expired {
            self.entries.remove(key);
            self.remove_mirrored(key);
            self.stats.record_expired();
            self.stats.set_total_entries(self.entries.len());
            return None;
        }

        self.entries.get(key)
    }

    fn read_mirrored(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let prefix = self.storage_prefix()?;
        let storage_key = format!("{}{}", prefix, key);
        let raw = self.read_storage_key(&storage_key)?;

        match serde_json::from_str(&raw) {
            Ok(entry) => Some(entry),
            Err(err) => {
                debug!(key, error = %err, "Ignoring malformed mirror entry");
                None
            }
        }
    }

    fn read_storage_key(&mut self, storage_key: &str) -> Option<String> {
        let mirror = self.mirror.as_ref()?;
        match mirror.backend.read(storage_key) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(storage_key, error = %err, "Failed to read mirrored cache entry");
                self.stats.record_persistence_error();
                None
            }
        }
    }

    fn remove_mirrored(&mut self, key: &str) {
        if let Some(prefix) = self.storage_prefix() {
            let storage_key = format!("{}{}", prefix, key);
            self.remove_storage_key(&storage_key);
        }
    }

    fn remove_storage_key(&mut self, storage_key: &str) {
        let Some(mirror) = &self.mirror else {
            return;
        };
        if let Err(err) = mirror.backend.remove(storage_key) {
            warn!(storage_key, error = %err, "Failed to remove mirrored cache entry");
            self.stats.record_persistence_error();
        }
    }

    fn mirrored_keys(&mut self) -> Vec<String> {
        let Some(mirror) = &self.mirror else {
            return Vec::new();
        };
        match mirror.backend.list_keys_with_prefix(&mirror.prefix) {
            Ok(mut keys) => {
                keys.retain(|key| key.starts_with(&mirror.prefix));
                keys
            }
            Err(err) => {
                warn!(prefix = %mirror.prefix, error = %err, "Failed to list mirrored cache entries");
                self.stats.record_persistence_error();
                Vec::new()
            }
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ManualClock, MemoryBackend};

    const TTL_MS: u64 = 1_000;

    fn memory_store(clock: &ManualClock) -> CacheStore<String> {
        CacheStore::new(Duration::from_millis(TTL_MS)).with_clock(Arc::new(clock.clone()))
    }

    fn mirrored_store(clock: &ManualClock, backend: &MemoryBackend, prefix: &str) -> CacheStore<String> {
        memory_store(clock).with_mirror(Arc::new(backend.clone()), prefix)
    }

    #[test]
    fn test_store_new() {
        let store: CacheStore<String> = CacheStore::new(Duration::from_secs(300));
        assert_eq!(store.len(), 0);
        assert!(store.is_empty());
        assert!(!store.is_persistent());
        assert_eq!(store.ttl(), Duration::from_secs(300));
    }

    #[test]
    fn test_store_set_and_get() {
        let clock = ManualClock::new(0);
        let mut store = memory_store(&clock);

        store.set("key1", "value1".to_string());

        assert_eq!(store.get("key1").as_deref(), Some("value1"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_get_nonexistent() {
        let clock = ManualClock::new(0);
        let mut store = memory_store(&clock);

        assert!(store.get("nonexistent").is_none());
        assert!(!store.has("nonexistent"));
    }

    #[test]
    fn test_store_overwrite_resets_ttl() {
        let clock = ManualClock::new(0);
        let mut store = memory_store(&clock);

        store.set("key1", "value1".to_string());
        clock.advance(800);
        store.set("key1", "value2".to_string());
        clock.advance(800);

        assert_eq!(store.get("key1").as_deref(), Some("value2"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_ttl_expiration() {
        let clock = ManualClock::new(0);
        let mut store = memory_store(&clock);

        store.set("x", "42".to_string());

        clock.set(500);
        assert_eq!(store.get("x").as_deref(), Some("42"));

        clock.set(1_500);
        assert!(store.get("x").is_none());
        assert!(store.is_empty(), "Expired entry should be removed on read");
    }

    #[test]
    fn test_store_has_expires_lazily() {
        let clock = ManualClock::new(0);
        let mut store = memory_store(&clock);

        store.set("x", "1".to_string());
        assert!(store.has("x"));

        clock.set(TTL_MS);
        assert!(!store.has("x"));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_store_delete_is_idempotent() {
        let clock = ManualClock::new(0);
        let mut store = memory_store(&clock);

        store.set("key1", "value1".to_string());
        store.delete("key1");
        store.delete("key1");
        store.delete("never_set");

        assert!(store.is_empty());
        assert!(store.get("key1").is_none());
    }

    #[test]
    fn test_store_clear_empty() {
        let clock = ManualClock::new(0);
        let mut store = memory_store(&clock);

        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_store_stats() {
        let clock = ManualClock::new(0);
        let mut store = memory_store(&clock);

        store.set("key1", "value1".to_string());
        store.get("key1"); // hit
        store.get("nonexistent"); // miss

        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total_entries, 1);
    }

    #[test]
    fn test_store_sweep_expired() {
        let clock = ManualClock::new(0);
        let mut store = memory_store(&clock);

        store.set("key1", "value1".to_string());
        clock.advance(600);
        store.set("key2", "value2".to_string());
        clock.advance(600);

        let removed = store.sweep_expired();
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 1);
        assert!(store.get("key2").is_some());
    }

    #[test]
    fn test_mirror_written_on_set() {
        let clock = ManualClock::new(10);
        let backend = MemoryBackend::new();
        let mut store = mirrored_store(&clock, &backend, "ns:");

        store.set("k", "v".to_string());

        let raw = backend.read("ns:k").unwrap().expect("mirror entry");
        let entry: CacheEntry<String> = serde_json::from_str(&raw).unwrap();
        assert_eq!(entry.data, "v");
        assert_eq!(entry.expires_at, 10 + TTL_MS);
    }

    #[test]
    fn test_restore_from_mirror_after_restart() {
        let clock = ManualClock::new(0);
        let backend = MemoryBackend::new();

        let mut first = mirrored_store(&clock, &backend, "ns:");
        first.set("k", "v".to_string());
        drop(first);

        clock.advance(400);
        let mut second = mirrored_store(&clock, &backend, "ns:");
        assert!(second.is_empty());
        assert_eq!(second.get("k").as_deref(), Some("v"));
        assert_eq!(second.len(), 1, "Restored entry should be promoted");
        assert_eq!(second.stats().restored, 1);
    }

    #[test]
    fn test_expired_mirror_entry_is_removed() {
        let clock = ManualClock::new(0);
        let backend = MemoryBackend::new();

        mirrored_store(&clock, &backend, "ns:").set("k", "v".to_string());

        clock.advance(TTL_MS + 1);
        let mut restarted = mirrored_store(&clock, &backend, "ns:");
        assert!(restarted.get("k").is_none());
        assert!(backend.read("ns:k").unwrap().is_none());
    }

    #[test]
    fn test_malformed_mirror_entry_is_a_miss() {
        let clock = ManualClock::new(0);
        let backend = MemoryBackend::new();
        backend.write("ns:broken", "{not json").unwrap();

        let mut store = mirrored_store(&clock, &backend, "ns:");
        assert!(store.get("broken").is_none());
        assert!(!store.has("broken"));
        assert_eq!(store.stats().persistence_errors, 0);
    }

    /// Backend whose listing ignores the requested prefix.
    #[derive(Debug)]
    struct UnscopedListing(MemoryBackend);

    impl PersistenceBackend for UnscopedListing {
        fn read(&self, key: &str) -> Result<Option<String>, PersistenceError> {
            self.0.read(key)
        }

        fn write(&self, key: &str, payload: &str) -> Result<(), PersistenceError> {
            self.0.write(key, payload)
        }

        fn remove(&self, key: &str) -> Result<(), PersistenceError> {
            self.0.remove(key)
        }

        fn list_keys_with_prefix(&self, _prefix: &str) -> Result<Vec<String>, PersistenceError> {
            self.0.list_keys_with_prefix("")
        }
    }

    #[test]
    fn test_foreign_keys_from_listing_are_skipped() {
        let clock = ManualClock::new(0);
        let backend = MemoryBackend::new();
        backend.write("x", "{not json").unwrap();
        let mut other = mirrored_store(&clock, &backend, "other:");
        other.set("k", "kept".to_string());

        let mut store = memory_store(&clock).with_mirror(Arc::new(UnscopedListing(backend.clone())), "ns:");
        store.set("k", "v".to_string());
        clock.advance(TTL_MS);

        assert_eq!(store.sweep_expired(), 1);
        store.clear();

        assert!(backend.read("x").unwrap().is_some());
        assert!(backend.read("other:k").unwrap().is_some());
        assert!(backend.read("ns:k").unwrap().is_none());
    }

    #[test]
    fn test_mirror_failures_are_absorbed() {
        let clock = ManualClock::new(0);
        let backend = MemoryBackend::with_quota(0);
        let mut store = mirrored_store(&clock, &backend, "ns:");

        store.set("k", "v".to_string());

        assert_eq!(store.get("k").as_deref(), Some("v"));
        assert_eq!(store.stats().persistence_errors, 1);
        assert!(backend.is_empty());
    }

    #[test]
    fn test_unavailable_backend_is_a_miss() {
        let clock = ManualClock::new(0);
        let backend = MemoryBackend::new();
        let mut store = mirrored_store(&clock, &backend, "ns:");
        backend.set_available(false);

        assert!(store.get("k").is_none());
        store.delete("k");
        store.clear();
        assert_eq!(store.stats().persistence_errors, 3);
    }

    #[test]
    fn test_clear_only_touches_own_prefix() {
        let clock = ManualClock::new(0);
        let backend = MemoryBackend::new();
        let mut a = mirrored_store(&clock, &backend, "app_a:");
        let mut b = mirrored_store(&clock, &backend, "app_b:");
        backend.write("unrelated", "keep me").unwrap();

        a.set("k", "from a".to_string());
        b.set("k", "from b".to_string());

        a.clear();

        assert!(a.get("k").is_none());
        assert_eq!(b.get("k").as_deref(), Some("from b"));
        assert!(backend.read("app_b:k").unwrap().is_some());
        assert_eq!(backend.read("unrelated").unwrap().as_deref(), Some("keep me"));
    }

    #[test]
    fn test_sweep_cleans_mirror() {
        let clock = ManualClock::new(0);
        let backend = MemoryBackend::new();
        backend.write("ns:garbage", "][").unwrap();

        let mut store = mirrored_store(&clock, &backend, "ns:");
        store.set("old", "1".to_string());
        clock.advance(600);
        store.set("new", "2".to_string());
        clock.advance(600);

        // Entry known only to the mirror
        let mut other = mirrored_store(&clock, &backend, "ns:");
        let removed = other.sweep_expired();

        assert_eq!(removed, 2);
        assert!(backend.read("ns:old").unwrap().is_none());
        assert!(backend.read("ns:garbage").unwrap().is_none());
        assert!(backend.read("ns:new").unwrap().is_some());
    }
}
