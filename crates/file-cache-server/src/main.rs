//! File cache server
//!
//! Serves a filesystem-backed object cache over HTTP and keeps the indices
//! of processes sharing the cache directory in step.

mod error;
mod peers;
mod server;
mod types;

use crate::error::Result;
use crate::peers::HttpPeerSink;
use crate::server::{start_server, ServerState, SharedState};
use crate::types::ServerConfig;
use file_cache::{format_size, FileCache};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env()
        .add_directive("file_cache=info".parse()?)
        .add_directive("file_cache_server=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting file cache server...");

    let config = load_config();
    info!("Port: {}", config.port);
    info!("Cache dir: {:?}", config.cache.dir);
    if let Some(max_size) = config.cache.max_size {
        info!("Max cache size: {}", format_size(max_size));
    }
    if let Some(max_files) = config.cache.max_files {
        info!("Max cache files: {}", max_files);
    }
    if let Some(max_age) = config.cache.max_age {
        info!("Max entry age: {} seconds", max_age.as_secs());
    }
    info!(
        "Cluster mode: {} ({} peers)",
        config.cache.cluster,
        config.peers.len()
    );

    let mut cache = FileCache::new(config.cache);
    if !config.peers.is_empty() {
        cache = cache.with_cluster_sink(HttpPeerSink::new(config.peers));
    }
    cache.init().await?;

    // Timers stop when the handle drops at the end of main
    let _maintenance = cache.start_maintenance();

    let state: SharedState = Arc::new(ServerState::new(cache));

    // Start HTTP server (blocking)
    start_server(state, config.port).await?;

    Ok(())
}

fn load_config() -> ServerConfig {
    ServerConfig::from_lookup(|key| std::env::var(key).ok())
}
