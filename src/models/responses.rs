//! Response DTOs for the cache service API
//!
//! Defines the structure of outgoing HTTP response bodies.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::cache::CacheStats;

/// Response body for GET /cache/:namespace/:key
#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    pub namespace: String,
    pub key: String,
    /// The cached value
    pub value: Value,
}

impl GetResponse {
    pub fn new(namespace: impl Into<String>, key: impl Into<String>, value: Value) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
            value,
        }
    }
}

/// Response body for PUT /cache/:namespace/:key
#[derive(Debug, Clone, Serialize)]
pub struct SetResponse {
    /// Success message
    pub message: String,
    pub namespace: String,
    pub key: String,
}

impl SetResponse {
    pub fn new(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let key = key.into();
        Self {
            message: format!("Key '{}' set in '{}'", key, namespace),
            namespace,
            key,
        }
    }
}

/// Response body for DELETE /cache/:namespace/:key
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    /// Success message
    pub message: String,
    pub namespace: String,
    pub key: String,
}

impl DeleteResponse {
    pub fn new(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let key = key.into();
        Self {
            message: format!("Key '{}' deleted from '{}'", key, namespace),
            namespace,
            key,
        }
    }
}

/// Response body for DELETE /cache/:namespace and DELETE /cache
#[derive(Debug, Clone, Serialize)]
pub struct ClearResponse {
    /// Success message
    pub message: String,
    /// Namespaces that were cleared
    pub namespaces: Vec<String>,
}

impl ClearResponse {
    pub fn new(namespaces: Vec<String>) -> Self {
        Self {
            message: format!("Cleared {} namespace(s)", namespaces.len()),
            namespaces,
        }
    }
}

/// Statistics of one namespace
#[derive(Debug, Clone, Serialize)]
pub struct NamespaceStats {
    /// TTL of the namespace's entries in seconds
    pub ttl_secs: u64,
    /// Whether entries are mirrored to persistent storage
    pub persistent: bool,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
    #[serde(flatten)]
    pub counters: CacheStats,
}

impl NamespaceStats {
    pub fn new(ttl_secs: u64, persistent: bool, counters: CacheStats) -> Self {
        Self {
            ttl_secs,
            persistent,
            hit_rate: counters.hit_rate(),
            counters,
        }
    }
}

/// Response body for the stats endpoint (GET /stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub namespaces: BTreeMap<String, NamespaceStats>,
}

/// Response body for GET /feeds/:source
#[derive(Debug, Clone, Serialize)]
pub struct FeedResponse {
    pub source: String,
    pub namespace: String,
    /// The upstream document, possibly served from cache
    pub data: Value,
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
