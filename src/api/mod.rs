//! API Module
//!
//! HTTP handlers and routing for the cache service REST API.
//!
//! # Endpoints
//! - `GET|PUT|DELETE /cache/:namespace/:key` - Single entries
//! - `DELETE /cache/:namespace`, `DELETE /cache` - Clearing
//! - `GET /feeds/:source` - Deduplicated upstream loads
//! - `GET /stats` - Per-namespace statistics
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
