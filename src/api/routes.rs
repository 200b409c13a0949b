//! API Routes
//!
//! Configures the Axum router with all cache service endpoints.

use axum::{
    routing::{delete, get},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    clear_all_handler, clear_handler, delete_handler, feed_handler, get_handler, health_handler,
    set_handler, stats_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `GET /cache/:namespace/:key` - Retrieve a cached value
/// - `PUT /cache/:namespace/:key` - Store the JSON body under a key
/// - `DELETE /cache/:namespace/:key` - Delete a key
/// - `DELETE /cache/:namespace` - Clear one namespace
/// - `DELETE /cache` - Clear every namespace
/// - `GET /feeds/:source` - Load an upstream feed through its cache
/// - `GET /stats` - Per-namespace statistics
/// - `GET /health` - Health check endpoint
///
/// # Middleware
/// - CORS: Allows any origin (the dashboard is served from elsewhere)
/// - Tracing: Logs all requests
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/cache/:namespace/:key",
            get(get_handler).put(set_handler).delete(delete_handler),
        )
        .route("/cache/:namespace", delete(clear_handler))
        .route("/cache", delete(clear_all_handler))
        .route("/feeds/:source", get(feed_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
