//! Request DTOs for the cache service API
//!
//! Defines the structure of incoming query strings.

use serde::Deserialize;

/// Query string of the feed endpoint (GET /feeds/:source)
///
/// # Fields
/// - `refresh`: drop the cached copy before loading, forcing an upstream fetch
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedQuery {
    #[serde(default)]
    pub refresh: bool,
}
