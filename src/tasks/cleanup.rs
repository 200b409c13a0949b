//! Expiry Sweep Task
//!
//! Background task that periodically removes expired cache entries from
//! every namespace, in memory and in the persistent mirror.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::registry::CacheRegistry;

/// Spawns a background task that periodically sweeps expired cache entries.
///
/// The sweep only bounds memory and storage growth; reads already ignore
/// expired entries on their own.
///
/// # Arguments
/// * `registry` - Shared registry whose namespaces are swept
/// * `interval` - Time between sweeps
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
///
/// # Example
/// ```ignore
/// let registry = Arc::new(CacheRegistry::from_config(&config));
/// let cleanup_handle = spawn_cleanup_task(registry.clone(), Duration::from_secs(600));
/// // Later, during shutdown:
/// cleanup_handle.abort();
/// ```
pub fn spawn_cleanup_task(registry: Arc<CacheRegistry>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Starting expiry sweep task with interval of {} seconds",
            interval.as_secs()
        );

        loop {
            // Sleep for the configured interval
            tokio::time::sleep(interval).await;

            let removed = registry.sweep_all().await;

            if removed > 0 {
                info!("Expiry sweep: removed {} expired entries", removed);
            } else {
                debug!("Expiry sweep: no expired entries found");
            }
        }
    })
}
