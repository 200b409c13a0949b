//! Configuration Module
//!
//! Handles loading and managing service configuration from environment variables.

use std::env;
use std::path::PathBuf;

use tracing::warn;

use crate::cache::{DEFAULT_STORAGE_PREFIX, DEFAULT_SWEEP_INTERVAL_SECS, DEFAULT_TTL_SECS};
use crate::upstream::UpstreamSource;

/// Namespaces created when `CACHE_NAMESPACES` is unset
const DEFAULT_NAMESPACES: &str = "registry=300,volume=900,leaderboard=3600";

/// A named cache and the TTL of its entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceConfig {
    pub name: String,
    pub ttl_secs: u64,
}

/// Service configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,
    /// TTL in seconds for namespaces declared without one
    pub default_ttl: u64,
    /// Background expiry sweep interval in seconds
    pub cleanup_interval: u64,
    /// Named caches to create at startup
    pub namespaces: Vec<NamespaceConfig>,
    /// Directory of the persistent mirror; `None` keeps caches memory-only
    pub persist_dir: Option<PathBuf>,
    /// Prefix reserved for mirrored keys
    pub storage_prefix: String,
    /// Upstream JSON feeds served through the cache
    pub sources: Vec<UpstreamSource>,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `DEFAULT_TTL` - TTL in seconds for namespaces without one (default: 3600)
    /// - `CLEANUP_INTERVAL` - Expiry sweep frequency in seconds (default: 600)
    /// - `CACHE_NAMESPACES` - `name[=ttl_secs]` list, comma separated
    /// - `PERSIST_DIR` - Enables the file-backed mirror in this directory
    /// - `STORAGE_PREFIX` - Prefix of mirrored keys (default: `dash_cache_`)
    /// - `UPSTREAM_SOURCES` - `name[@namespace]=url` list, semicolon separated
    pub fn from_env() -> Self {
        let default_ttl = env::var("DEFAULT_TTL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TTL_SECS);

        let namespaces = env::var("CACHE_NAMESPACES")
            .unwrap_or_else(|_| DEFAULT_NAMESPACES.to_string());

        Self {
            server_port: env::var("SERVER_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            default_ttl,
            cleanup_interval: env::var("CLEANUP_INTERVAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
            namespaces: parse_namespaces(&namespaces, default_ttl),
            persist_dir: env::var("PERSIST_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            storage_prefix: env::var("STORAGE_PREFIX")
                .unwrap_or_else(|_| DEFAULT_STORAGE_PREFIX.to_string()),
            sources: parse_sources(&env::var("UPSTREAM_SOURCES").unwrap_or_default()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            default_ttl: DEFAULT_TTL_SECS,
            cleanup_interval: DEFAULT_SWEEP_INTERVAL_SECS,
            namespaces: parse_namespaces(DEFAULT_NAMESPACES, DEFAULT_TTL_SECS),
            persist_dir: None,
            storage_prefix: DEFAULT_STORAGE_PREFIX.to_string(),
            sources: Vec::new(),
        }
    }
}

/// Parses `registry=300,volume,leaderboard=3600`.
///
/// Items without a TTL get `default_ttl`; items with an unparsable TTL are
/// skipped with a warning.
pub fn parse_namespaces(raw: &str, default_ttl: u64) -> Vec<NamespaceConfig> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .filter_map(|item| {
            let (name, ttl_secs) = match item.split_once('=') {
                None => (item, default_ttl),
                Some((name, ttl)) => match ttl.trim().parse() {
                    Ok(ttl) => (name, ttl),
                    Err(_) => {
                        warn!(item, "Ignoring namespace with invalid TTL");
                        return None;
                    }
                },
            };
            Some(NamespaceConfig {
                name: name.trim().to_string(),
                ttl_secs,
            })
        })
        .collect()
}

/// Parses `volume@volume=https://...;leaderboard=https://...`.
///
/// Without `@namespace` the source is cached in the namespace of its own name.
/// Items without a URL are skipped with a warning.
pub fn parse_sources(raw: &str) -> Vec<UpstreamSource> {
    raw.split(';')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .filter_map(|item| {
            let Some((label, url)) = item.split_once('=') else {
                warn!(item, "Ignoring upstream source without URL");
                return None;
            };
            let (name, namespace) = match label.split_once('@') {
                Some((name, namespace)) => (name.trim(), namespace.trim()),
                None => (label.trim(), label.trim()),
            };
            let url = url.trim();
            if name.is_empty() || namespace.is_empty() || url.is_empty() {
                warn!(item, "Ignoring incomplete upstream source");
                return None;
            }
            Some(UpstreamSource::new(name, namespace, url))
        })
        .collect()
}
