//! Cache Module
//!
//! Deduplicating TTL caching with an optional persistent mirror.

mod backend;
mod clock;
mod entry;
mod manager;
mod stats;
mod store;


// Re-export public types
pub use backend::{FileBackend, MemoryBackend, PersistenceBackend, PersistenceError};
pub use clock::{current_timestamp_ms, Clock, ManualClock, SystemClock};
pub use entry::CacheEntry;
pub use manager::CacheManager;
pub use stats::CacheStats;
pub use store::CacheStore;

// == Public Constants ==
/// Default TTL in seconds for namespaces declared without one
pub const DEFAULT_TTL_SECS: u64 = 60 * 60; // 1 hour

/// Default interval in seconds between expiry sweeps
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 10 * 60; // 10 minutes

/// Default prefix reserved for mirrored keys in a shared storage area
pub const DEFAULT_STORAGE_PREFIX: &str = "dash_cache_";

/// Maximum allowed namespace length in bytes
pub const MAX_NAMESPACE_LENGTH: usize = 64;

/// Maximum allowed key length in bytes for keys written over HTTP
pub const MAX_KEY_LENGTH: usize = 256;
