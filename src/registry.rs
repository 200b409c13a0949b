//! Cache Registry Module
//!
//! Owns the named caches of the service. Each namespace has its own TTL;
//! all of them share one optional persistence backend and one clock, and
//! each mirrors under its own reserved prefix.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use crate::cache::{
    CacheManager, CacheStats, CacheStore, Clock, FileBackend, PersistenceBackend, SystemClock,
    MAX_NAMESPACE_LENGTH,
};
use crate::config::Config;
use crate::error::{CacheError, Result};

/// Cache holding untyped JSON documents
pub type JsonCache = CacheManager<Value>;

// == Cache Registry ==
/// Named caches, each with its own TTL.
#[derive(Debug)]
pub struct CacheRegistry {
    caches: BTreeMap<String, JsonCache>,
    backend: Option<Arc<dyn PersistenceBackend>>,
    storage_prefix: String,
    clock: Arc<dyn Clock>,
}

impl CacheRegistry {
    // == Constructor ==
    /// Creates an empty registry.
    ///
    /// With a `backend`, every registered namespace mirrors into it under
    /// `<storage_prefix><namespace>:`.
    pub fn new(
        backend: Option<Arc<dyn PersistenceBackend>>,
        storage_prefix: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            caches: BTreeMap::new(),
            backend,
            storage_prefix: storage_prefix.into(),
            clock,
        }
    }

    /// Builds the registry described by `config`.
    ///
    /// Invalid namespaces are skipped with a warning. Namespaces referenced
    /// only by upstream sources are created with the default TTL.
    pub fn from_config(config: &Config) -> Self {
        let backend = config
            .persist_dir
            .as_ref()
            .map(|dir| Arc::new(FileBackend::new(dir)) as Arc<dyn PersistenceBackend>);
        let mut registry = Self::new(backend, config.storage_prefix.clone(), Arc::new(SystemClock));

        for namespace in &config.namespaces {
            if let Err(err) = registry.register(&namespace.name, Duration::from_secs(namespace.ttl_secs)) {
                warn!(namespace = %namespace.name, error = %err, "Skipping cache namespace");
            }
        }

        for source in &config.sources {
            if registry.get(&source.namespace).is_ok() {
                continue;
            }
            if let Err(err) = registry.register(&source.namespace, Duration::from_secs(config.default_ttl)) {
                warn!(source = %source.name, error = %err, "Upstream source has no usable namespace");
            }
        }

        registry
    }

    // == Register ==
    /// Creates the namespace `name` with entries living for `ttl`.
    ///
    /// Re-registering an existing name replaces it.
    pub fn register(&mut self, name: &str, ttl: Duration) -> Result<&JsonCache> {
        validate_namespace(name)?;

        let mut store = CacheStore::new(ttl).with_clock(Arc::clone(&self.clock));
        if let Some(backend) = &self.backend {
            store = store.with_mirror(Arc::clone(backend), format!("{}{}:", self.storage_prefix, name));
        }

        info!(
            namespace = name,
            ttl_secs = ttl.as_secs(),
            persistent = store.is_persistent(),
            "Cache namespace registered"
        );
        self.caches.insert(name.to_string(), CacheManager::new(name, store));
        self.get(name)
    }

    // == Lookup ==
    /// Returns the cache registered as `name`.
    pub fn get(&self, name: &str) -> Result<&JsonCache> {
        self.caches
            .get(name)
            .ok_or_else(|| CacheError::UnknownNamespace(name.to_string()))
    }

    /// Registered namespace names, in order.
    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.caches.keys().map(String::as_str)
    }

    // == Maintenance ==
    /// Sweeps expired entries from every namespace. Returns the total removed.
    pub async fn sweep_all(&self) -> usize {
        let mut removed = 0;
        for cache in self.caches.values() {
            removed += cache.sweep_expired().await;
        }
        removed
    }

    /// Clears every namespace.
    pub async fn clear_all(&self) {
        for cache in self.caches.values() {
            cache.clear().await;
        }
    }

    /// Statistics of every namespace.
    pub async fn stats(&self) -> BTreeMap<String, CacheStats> {
        let mut all = BTreeMap::new();
        for (name, cache) in &self.caches {
            all.insert(name.clone(), cache.stats().await);
        }
        all
    }
}

/// Namespaces are 1-64 characters of `[A-Za-z0-9_-]`, so no namespace's
/// storage prefix can be a prefix of another's.
pub fn validate_namespace(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAMESPACE_LENGTH {
        return Err(CacheError::InvalidRequest(format!(
            "Namespace must be 1-{} characters",
            MAX_NAMESPACE_LENGTH
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(CacheError::InvalidRequest(format!(
            "Namespace '{}' may only contain letters, digits, '_' and '-'",
            name
        )));
    }
    Ok(())
}
