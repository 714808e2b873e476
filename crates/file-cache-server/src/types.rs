//! Core types for the file cache server

use file_cache::{CacheConfig, CacheStats};
use serde::Serialize;
use std::path::PathBuf;
use tracing::warn;

pub const DEFAULT_PORT: u16 = 3002;
pub const DEFAULT_CACHE_DIR: &str = "./cache/files";

/// Configuration for the server process
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub port: u16,
    /// Base URLs of the other processes sharing the cache directory
    pub peers: Vec<String>,
    pub cache: CacheConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            peers: Vec::new(),
            cache: CacheConfig::new(DEFAULT_CACHE_DIR),
        }
    }
}

impl ServerConfig {
    /// Build the configuration from variables resolved by `lookup`.
    ///
    /// Unparseable values are logged and left at their defaults. Cluster mode
    /// is on when peers are configured or `CACHE_CLUSTER` is set.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = lookup("PORT")
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(DEFAULT_PORT);

        let dir = lookup("CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR));

        let peers = lookup("CLUSTER_PEERS")
            .map(|s| parse_peers(&s))
            .unwrap_or_default();

        let cluster = !peers.is_empty()
            || lookup("CACHE_CLUSTER").is_some_and(|v| matches!(v.as_str(), "1" | "true"));

        let mut cache = CacheConfig::new(dir).with_cluster(cluster);

        if let Some(value) = lookup("CACHE_MAX_FILES") {
            match value.parse::<usize>() {
                Ok(max_files) => cache = cache.with_max_files(max_files),
                Err(_) => warn!(value = %value, "Ignoring invalid CACHE_MAX_FILES"),
            }
        }
        if let Some(value) = lookup("CACHE_MAX_SIZE") {
            cache = cache.with_max_size_str(&value);
        }
        if let Some(value) = lookup("CACHE_MAX_AGE") {
            cache = cache.with_max_age_str(&value);
        }
        if let Some(value) = lookup("CACHE_CHECK_INTERVAL") {
            cache = cache.with_check_interval_str(&value);
        }
        if let Some(value) = lookup("CACHE_PERSIST_INTERVAL") {
            cache = cache.with_persist_interval_str(&value);
        }

        Self { port, peers, cache }
    }
}

fn parse_peers(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|peer| !peer.is_empty())
        .map(|peer| peer.trim_end_matches('/').to_string())
        .collect()
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub cluster: bool,
    pub cache: CacheStats,
}

/// Body returned after a successful PUT
#[derive(Debug, Serialize)]
pub struct StoredResponse {
    pub path: PathBuf,
    pub size: u64,
}
