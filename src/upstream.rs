//! Upstream Module
//!
//! HTTP client for the remote JSON feeds (DEX API endpoints, hosted JSON
//! snapshots, article listings) that the cache sits in front of.

use std::collections::BTreeMap;
use std::future::Future;

use anyhow::Context;
use reqwest::Client;
use serde_json::Value;

use crate::error::{CacheError, Result};

// == Upstream Source ==
/// A named remote JSON document and the cache namespace it is stored in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamSource {
    /// Name used in `/feeds/:source` and as the cache key
    pub name: String,
    /// Namespace holding the cached document
    pub namespace: String,
    /// Absolute URL of the document
    pub url: String,
}

impl UpstreamSource {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            url: url.into(),
        }
    }
}

// == Upstream Client ==
/// Fetches configured upstream feeds as untyped JSON.
#[derive(Debug, Clone, Default)]
pub struct UpstreamClient {
    client: Client,
    sources: BTreeMap<String, UpstreamSource>,
}

impl UpstreamClient {
    /// Creates a client serving `sources`. Later duplicates of a name win.
    pub fn new(sources: impl IntoIterator<Item = UpstreamSource>) -> Self {
        Self::with_client(Client::new(), sources)
    }

    /// Creates a client with a custom HTTP client
    pub fn with_client(client: Client, sources: impl IntoIterator<Item = UpstreamSource>) -> Self {
        Self {
            client,
            sources: sources
                .into_iter()
                .map(|source| (source.name.clone(), source))
                .collect(),
        }
    }

    /// Looks up a configured source by name.
    pub fn source(&self, name: &str) -> Result<&UpstreamSource> {
        self.sources
            .get(name)
            .ok_or_else(|| CacheError::UnknownSource(name.to_string()))
    }

    /// All configured sources, ordered by name.
    pub fn sources(&self) -> impl Iterator<Item = &UpstreamSource> {
        self.sources.values()
    }

    /// Fetches `url` and decodes the body as JSON.
    ///
    /// Non-success statuses are errors. The returned future owns everything
    /// it needs, so it can be handed to the cache as a fetch function.
    pub fn fetch_json(&self, url: &str) -> impl Future<Output = anyhow::Result<Value>> + Send + 'static {
        let client = self.client.clone();
        let url = url.to_string();

        async move {
            let response = client
                .get(&url)
                .send()
                .await
                .with_context(|| format!("request to {} failed", url))?
                .error_for_status()
                .with_context(|| format!("upstream {} returned an error status", url))?;

            response
                .json::<Value>()
                .await
                .with_context(|| format!("upstream {} returned invalid JSON", url))
        }
    }
}
