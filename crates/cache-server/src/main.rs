//! Cache Server - namespaced blob cache over HTTP
//!
//! Stores binary and text values keyed by (namespace, key) with optional
//! TTL. Small values live in the SQLite index, large ones on disk.

mod error;
mod params;
mod server;
mod types;

use crate::error::{Result, ServerError};
use crate::server::{start_server, ServerState, SharedState};
use crate::types::ServerConfig;
use blob_cache::{spawn_pruner, BlobCache, Namespace};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env()
        .add_directive("cache_server=info".parse()?)
        .add_directive("blob_cache=info".parse()?);

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

    info!("Starting cache server...");

    let config = load_config()?;
    info!("Port: {}", config.port);
    info!("Cache dir: {:?}", config.cache_dir);
    info!("Inline threshold: {} bytes", config.inline_threshold);
    info!("Prune interval: {} seconds", config.prune_interval.as_secs());
    if config.require_namespace {
        info!("Namespace required on every request");
    } else {
        info!("Default namespace: {}", config.default_namespace);
    }

    let cache = Arc::new(BlobCache::open(config.cache_config()).await?);

    let shutdown = CancellationToken::new();
    let pruner = spawn_pruner(cache.clone(), config.prune_interval, shutdown.clone());

    let state: SharedState = Arc::new(ServerState::new(cache.clone(), config.clone()));

    let served = start_server(state, config.port, shutdown.clone()).await;

    shutdown.cancel();
    if let Err(e) = pruner.await {
        warn!(error = %e, "Pruner task ended abnormally");
    }
    cache.close().await;

    served.map_err(|e| ServerError::Config(format!("Server error: {}", e)))
}

fn load_config() -> Result<ServerConfig> {
    config_from(|name| std::env::var(name).ok())
}

/// Build the server configuration from a variable lookup.
/// Unparseable values fall back to their defaults.
fn config_from(lookup: impl Fn(&str) -> Option<String>) -> Result<ServerConfig> {
    let parsed = |name: &str| lookup(name).map(|v| v.trim().to_string());
    fn or_default<T: FromStr>(raw: Option<String>, default: T) -> T {
        raw.and_then(|s| s.parse::<T>().ok()).unwrap_or(default)
    }

    let defaults = ServerConfig::default();

    let port = or_default(parsed("PORT"), defaults.port);

    let cache_dir = lookup("CACHE_DIR")
        .map(PathBuf::from)
        .unwrap_or(defaults.cache_dir);

    let inline_threshold = or_default(parsed("CACHE_INLINE_THRESHOLD"), defaults.inline_threshold);

    let prune_interval = Duration::from_secs(or_default(
        parsed("CACHE_PRUNE_INTERVAL_SECS"),
        defaults.prune_interval.as_secs(),
    ));
    if prune_interval.is_zero() {
        return Err(ServerError::Config(
            "CACHE_PRUNE_INTERVAL_SECS must be greater than zero".to_string(),
        ));
    }

    let default_namespace = lookup("CACHE_DEFAULT_NAMESPACE").unwrap_or(defaults.default_namespace);
    Namespace::parse(&default_namespace).map_err(|e| {
        ServerError::Config(format!("CACHE_DEFAULT_NAMESPACE: {}", e))
    })?;

    let require_namespace = parsed("CACHE_REQUIRE_NAMESPACE")
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(defaults.require_namespace);

    let request_timeout = Duration::from_secs(or_default(
        parsed("REQUEST_TIMEOUT_SECS"),
        defaults.request_timeout.as_secs(),
    ));

    let max_body_bytes = or_default(parsed("MAX_BODY_BYTES"), defaults.max_body_bytes);
    let db_max_connections =
        or_default(parsed("CACHE_DB_MAX_CONNECTIONS"), defaults.db_max_connections);

    Ok(ServerConfig {
        port,
        cache_dir,
        inline_threshold,
        prune_interval,
        default_namespace,
        require_namespace,
        request_timeout,
        max_body_bytes,
        db_max_connections,
    })
}
