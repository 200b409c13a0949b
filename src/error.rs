//! Error types for the cache service
//!
//! Provides unified error handling using thiserror.

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Fetch Error ==
/// Failure of an upstream fetch function.
///
/// Every caller waiting on the same fetch round receives a clone of the same
/// error, so the underlying `anyhow::Error` is shared rather than copied.
#[derive(Error, Debug, Clone)]
#[error("{0:#}")]
pub struct FetchError(Arc<anyhow::Error>);

impl FetchError {
    /// Wraps the error produced by a fetch function.
    pub fn new(err: anyhow::Error) -> Self {
        Self(Arc::new(err))
    }

    /// Returns true if both errors come from the same fetch round.
    pub fn same_round(&self, other: &FetchError) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<anyhow::Error> for FetchError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(err)
    }
}

// == Cache Error Enum ==
/// Error type surfaced by the HTTP layer.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key not found in cache (or expired)
    #[error("Key not found: {0}")]
    NotFound(String),

    /// No cache is registered under this namespace
    #[error("Unknown namespace: {0}")]
    UnknownNamespace(String),

    /// No upstream feed is configured under this name
    #[error("Unknown upstream source: {0}")]
    UnknownSource(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Upstream fetch failed
    #[error("Upstream fetch failed: {0}")]
    Upstream(#[from] FetchError),
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_)
            | CacheError::UnknownNamespace(_)
            | CacheError::UnknownSource(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CacheError::Upstream(_) => StatusCode::BAD_GATEWAY,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache service.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_fetch_error_clones_share_round() {
        let err = FetchError::new(anyhow!("upstream 503"));
        let copy = err.clone();
        let other = FetchError::new(anyhow!("upstream 503"));

        assert!(err.same_round(&copy));
        assert!(!err.same_round(&other));
        assert_eq!(copy.to_string(), "upstream 503");
    }

    #[test]
    fn test_fetch_error_displays_context_chain() {
        let err = FetchError::new(anyhow!("connection reset").context("fetching leaderboard"));
        assert_eq!(err.to_string(), "fetching leaderboard: connection reset");
    }

    #[test]
    fn test_status_codes() {
        let cases = [
            (CacheError::NotFound("k".into()), StatusCode::NOT_FOUND),
            (CacheError::UnknownNamespace("n".into()), StatusCode::NOT_FOUND),
            (CacheError::UnknownSource("s".into()), StatusCode::NOT_FOUND),
            (CacheError::InvalidRequest("bad".into()), StatusCode::BAD_REQUEST),
            (
                CacheError::Upstream(FetchError::new(anyhow!("boom"))),
                StatusCode::BAD_GATEWAY,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}
