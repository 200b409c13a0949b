//! Cache Entry Module
//!
//! Defines a single cached value together with its absolute expiry time. The
//! same shape is used in memory and as the persisted mirror payload
//! (`{"data": ..., "expiresAt": ...}`).

use serde::{Deserialize, Serialize};

// == Cache Entry ==
/// Represents a cached value and the instant it stops being valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    /// The stored value
    pub data: V,
    /// Expiration timestamp (Unix milliseconds)
    #[serde(rename = "expiresAt")]
    pub expires_at: u64,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates an entry that expires `ttl_ms` after `now_ms`.
    pub fn new(data: V, now_ms: u64, ttl_ms: u64) -> Self {
        Self {
            data,
            expires_at: now_ms.saturating_add(ttl_ms),
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired at `now_ms`.
    ///
    /// An entry is expired once the current time reaches the expiration
    /// time, so an entry created with TTL `t` is gone exactly `t` ms later.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }
}
