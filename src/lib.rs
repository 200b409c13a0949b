//! Dash Cache - a deduplicating TTL cache service
//!
//! Caches dashboard data per namespace with a fixed time-to-live, collapses
//! concurrent loads of the same key into one upstream fetch, and can mirror
//! entries to persistent storage so they survive a restart.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod registry;
pub mod tasks;
pub mod upstream;

pub use api::{create_router, AppState};
pub use cache::{CacheManager, CacheStats, CacheStore};
pub use config::Config;
pub use error::{CacheError, FetchError};
pub use registry::{CacheRegistry, JsonCache};
pub use tasks::spawn_cleanup_task;
pub use upstream::{UpstreamClient, UpstreamSource};
