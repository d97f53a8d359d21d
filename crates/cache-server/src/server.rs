//! HTTP server for cache endpoints
//!
//! Binary cache: /cache-set, /cache-get, /cache-delete-key,
//! /cache-delete-namespace, /cache-delete-all, /cache-prune.
//! Text cache: /cache-text-set, /cache-text-get, /cache-text-clear,
//! /cache-text-clear-all.
//! Aliases: /cache-clear (delete key), /cache-clear-all (delete all).
//! Plus /health.

use crate::error::{Result, ServerError};
use crate::params::CacheParams;
use crate::types::{
    DeletedResponse, HealthResponse, ServerConfig, SuccessResponse, TextValueResponse,
};
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{header, StatusCode},
    response::{Json, Response},
    routing::{get, post},
    Router,
};
use blob_cache::{BlobCache, CacheError, CachedPayload};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

/// Shared state for the HTTP server
pub struct ServerState {
    pub cache: Arc<BlobCache>,
    pub config: ServerConfig,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(cache: Arc<BlobCache>, config: ServerConfig) -> Self {
        Self {
            cache,
            config,
            started_at: Utc::now(),
        }
    }

    fn namespace_for(&self, params: &CacheParams) -> Result<String> {
        match params.namespace() {
            Some(ns) => Ok(ns.to_string()),
            None if self.config.require_namespace => {
                Err(ServerError::BadRequest("Missing 'namespace'".to_string()))
            }
            None => Ok(self.config.default_namespace.clone()),
        }
    }

    /// Run a cache operation on its own task and wait for it up to the
    /// request timeout. On timeout the request fails with 504 but the
    /// operation runs to completion.
    async fn run_detached<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: Future<Output = std::result::Result<T, CacheError>> + Send + 'static,
    {
        let handle = tokio::spawn(op);
        match tokio::time::timeout(self.config.request_timeout, handle).await {
            Ok(Ok(result)) => result.map_err(ServerError::from),
            Ok(Err(join_err)) => Err(ServerError::Internal(format!(
                "Cache task failed: {}",
                join_err
            ))),
            Err(_) => {
                warn!(
                    timeout_secs = self.config.request_timeout.as_secs(),
                    "Cache operation exceeded request timeout"
                );
                Err(ServerError::Timeout)
            }
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    let body_limit = state.config.max_body_bytes;

    Router::new()
        .route("/health", get(health))
        .route("/cache-set", post(cache_set))
        .route("/cache-get", post(cache_get))
        .route("/cache-delete-key", post(cache_delete_key))
        .route("/cache-delete-namespace", post(cache_delete_namespace))
        .route("/cache-delete-all", post(cache_delete_all))
        .route("/cache-prune", post(cache_prune))
        .route("/cache-text-set", post(cache_text_set))
        .route("/cache-text-get", post(cache_text_get))
        .route("/cache-text-clear", post(cache_text_clear))
        .route("/cache-text-clear-all", post(cache_delete_all))
        // Older names kept for existing clients
        .route("/cache-clear", post(cache_delete_key))
        .route("/cache-clear-all", post(cache_delete_all))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server. Returns once `shutdown` is cancelled or the
/// process receives Ctrl-C / SIGTERM and in-flight requests have drained.
pub async fn start_server(
    state: SharedState,
    port: u16,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let router = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
        _ = shutdown.cancelled() => {}
    }

    shutdown.cancel();
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Result<Json<HealthResponse>> {
    let cache = state.cache.stats().await?;
    let uptime_secs = (Utc::now() - state.started_at).num_seconds().max(0) as u64;

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        cache,
    }))
}

/// Store a binary value
async fn cache_set(
    State(state): State<SharedState>,
    params: CacheParams,
) -> Result<Json<SuccessResponse>> {
    let namespace = state.namespace_for(&params)?;
    let key = params.require_key()?.to_string();
    params.require_value()?;
    let ttl = params.expire_secs()?;
    let value = params.value.unwrap_or_default();

    let cache = state.cache.clone();
    state
        .run_detached(async move { cache.set(&namespace, &key, &value, ttl).await })
        .await?;

    Ok(Json(SuccessResponse::ok()))
}

/// Retrieve a binary value as `application/octet-stream`.
/// Disk-backed payloads are streamed from the open blob file.
async fn cache_get(State(state): State<SharedState>, params: CacheParams) -> Result<Response> {
    let namespace = state.namespace_for(&params)?;
    let key = params.require_key()?.to_string();

    let cache = state.cache.clone();
    let found = state
        .run_detached(async move { cache.fetch(&namespace, &key).await })
        .await?;

    let Some(value) = found else {
        return Err(ServerError::NotFound("Key not found or expired".to_string()));
    };

    let (body, len) = match value.payload {
        CachedPayload::Inline(bytes) => {
            let len = bytes.len() as u64;
            (Body::from(bytes), len)
        }
        CachedPayload::File { file, len } => (Body::from_stream(ReaderStream::new(file)), len),
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, len)
        .header("X-Created-At", value.created_at.to_rfc3339())
        .body(body)
        .map_err(|e| ServerError::Internal(format!("Failed to build response: {}", e)))
}

/// Delete a single key
async fn cache_delete_key(
    State(state): State<SharedState>,
    params: CacheParams,
) -> Result<Json<DeletedResponse<bool>>> {
    let namespace = state.namespace_for(&params)?;
    let key = params.require_key()?.to_string();

    let cache = state.cache.clone();
    let deleted = state
        .run_detached(async move { cache.del(&namespace, &key).await })
        .await?;

    Ok(Json(DeletedResponse::new(deleted)))
}

/// Delete every entry in a namespace. The namespace is always required here.
async fn cache_delete_namespace(
    State(state): State<SharedState>,
    params: CacheParams,
) -> Result<Json<DeletedResponse<u64>>> {
    let namespace = params
        .namespace()
        .ok_or_else(|| ServerError::BadRequest("Missing 'namespace'".to_string()))?
        .to_string();

    let cache = state.cache.clone();
    let deleted = state
        .run_detached(async move { cache.clear_namespace(&namespace).await })
        .await?;

    info!(deleted, "Namespace cleared");
    Ok(Json(DeletedResponse::new(deleted)))
}

/// Delete everything
async fn cache_delete_all(State(state): State<SharedState>) -> Result<Json<SuccessResponse>> {
    let cache = state.cache.clone();
    state
        .run_detached(async move { cache.clear().await })
        .await?;

    info!("Cache cleared");
    Ok(Json(SuccessResponse::ok()))
}

/// Remove expired entries now
async fn cache_prune(State(state): State<SharedState>) -> Result<Json<DeletedResponse<u64>>> {
    let cache = state.cache.clone();
    let deleted = state
        .run_detached(async move { cache.prune().await })
        .await?;

    Ok(Json(DeletedResponse::new(deleted)))
}

/// Store a text value
async fn cache_text_set(
    State(state): State<SharedState>,
    params: CacheParams,
) -> Result<Json<SuccessResponse>> {
    cache_set(State(state), params).await
}

/// Retrieve a text value. Absent keys answer 200 with a null value.
async fn cache_text_get(
    State(state): State<SharedState>,
    params: CacheParams,
) -> Result<Json<TextValueResponse>> {
    let namespace = state.namespace_for(&params)?;
    let key = params.require_key()?.to_string();

    let cache = state.cache.clone();
    let lookup_key = key.clone();
    let found = state
        .run_detached(async move { cache.get(&namespace, &lookup_key).await })
        .await?;

    Ok(Json(TextValueResponse {
        key,
        value: found.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()),
    }))
}

/// Delete a text value
async fn cache_text_clear(
    State(state): State<SharedState>,
    params: CacheParams,
) -> Result<Json<DeletedResponse<bool>>> {
    cache_delete_key(State(state), params).await
}
