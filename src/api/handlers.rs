//! API Handlers
//!
//! HTTP request handlers for each cache service endpoint.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::Value;
use tracing::info;

use crate::cache::MAX_KEY_LENGTH;
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::models::{
    ClearResponse, DeleteResponse, FeedQuery, FeedResponse, GetResponse, HealthResponse,
    NamespaceStats, SetResponse, StatsResponse,
};
use crate::registry::CacheRegistry;
use crate::upstream::UpstreamClient;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Named caches
    pub registry: Arc<CacheRegistry>,
    /// Configured upstream feeds
    pub upstream: Arc<UpstreamClient>,
}

impl AppState {
    /// Creates a new AppState from a registry and an upstream client.
    pub fn new(registry: CacheRegistry, upstream: UpstreamClient) -> Self {
        Self {
            registry: Arc::new(registry),
            upstream: Arc::new(upstream),
        }
    }

    /// Creates a new AppState from configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            CacheRegistry::from_config(config),
            UpstreamClient::new(config.sources.iter().cloned()),
        )
    }
}

/// Handler for GET /cache/:namespace/:key
///
/// Returns the cached value, or 404 if it is missing or expired.
pub async fn get_handler(
    State(state): State<AppState>,
    Path((namespace, key)): Path<(String, String)>,
) -> Result<Json<GetResponse>> {
    let cache = state.registry.get(&namespace)?;
    let value = cache
        .get(&key)
        .await
        .ok_or_else(|| CacheError::NotFound(key.clone()))?;

    Ok(Json(GetResponse::new(namespace, key, value)))
}

/// Handler for PUT /cache/:namespace/:key
///
/// Stores the JSON request body under `key` with the namespace's TTL.
pub async fn set_handler(
    State(state): State<AppState>,
    Path((namespace, key)): Path<(String, String)>,
    Json(value): Json<Value>,
) -> Result<Json<SetResponse>> {
    if key.len() > MAX_KEY_LENGTH {
        return Err(CacheError::InvalidRequest(format!(
            "Key exceeds maximum length of {} bytes",
            MAX_KEY_LENGTH
        )));
    }

    let cache = state.registry.get(&namespace)?;
    cache.set(&key, value).await;

    Ok(Json(SetResponse::new(namespace, key)))
}

/// Handler for DELETE /cache/:namespace/:key
///
/// Deleting a missing key succeeds.
pub async fn delete_handler(
    State(state): State<AppState>,
    Path((namespace, key)): Path<(String, String)>,
) -> Result<Json<DeleteResponse>> {
    let cache = state.registry.get(&namespace)?;
    cache.delete(&key).await;

    Ok(Json(DeleteResponse::new(namespace, key)))
}

/// Handler for DELETE /cache/:namespace
pub async fn clear_handler(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
) -> Result<Json<ClearResponse>> {
    let cache = state.registry.get(&namespace)?;
    cache.clear().await;

    Ok(Json(ClearResponse::new(vec![namespace])))
}

/// Handler for DELETE /cache
///
/// Clears every namespace, as the dashboard does when a different wallet
/// address is bound.
pub async fn clear_all_handler(State(state): State<AppState>) -> Json<ClearResponse> {
    state.registry.clear_all().await;
    let namespaces = state.registry.namespaces().map(str::to_string).collect();

    Json(ClearResponse::new(namespaces))
}

/// Handler for GET /feeds/:source
///
/// Serves an upstream document through its namespace's cache. Concurrent
/// requests for the same source share one upstream fetch; `?refresh=true`
/// drops the cached copy first.
pub async fn feed_handler(
    State(state): State<AppState>,
    Path(source): Path<String>,
    Query(query): Query<FeedQuery>,
) -> Result<Json<FeedResponse>> {
    let source = state.upstream.source(&source)?;
    let cache = state.registry.get(&source.namespace)?;

    if query.refresh {
        info!(source = %source.name, "Refreshing upstream feed");
        cache.delete(&source.name).await;
    }

    let data = cache
        .deduplicate(&source.name, || state.upstream.fetch_json(&source.url))
        .await?;

    Ok(Json(FeedResponse {
        source: source.name.clone(),
        namespace: source.namespace.clone(),
        data,
    }))
}

/// Handler for GET /stats
///
/// Returns statistics for every namespace.
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let mut namespaces = std::collections::BTreeMap::new();
    for (name, counters) in state.registry.stats().await {
        let cache = match state.registry.get(&name) {
            Ok(cache) => cache,
            Err(_) => continue,
        };
        namespaces.insert(
            name,
            NamespaceStats::new(cache.ttl().as_secs(), cache.is_persistent(), counters),
        );
    }

    Json(StatsResponse { namespaces })
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
