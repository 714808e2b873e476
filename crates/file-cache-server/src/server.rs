//! HTTP server for cache endpoints
//!
//! Provides /health, /entries/{*key}, /touch/{*key}, /evict, /purge and the
//! /cluster endpoint peers deliver their mutations to.

use crate::types::{HealthResponse, StoredResponse};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use file_cache::{CacheError, ClusterMessage, EvictionOutcome, FileCache};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

/// Shared state for the HTTP server
pub struct ServerState {
    pub cache: FileCache,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(cache: FileCache) -> Self {
        Self {
            cache,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct ClusterAck {
    applied: bool,
}

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/entries/{*key}",
            get(get_entry)
                .head(check_entry)
                .put(put_entry)
                .delete(delete_entry),
        )
        .route("/touch/{*key}", post(touch_entry))
        .route("/evict", post(evict))
        .route("/purge", post(purge))
        .route("/cluster", post(cluster_message))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(state: SharedState, port: u16) -> std::io::Result<()> {
    let router = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let cache_stats = state.cache.stats().await;
    let uptime_secs = (Utc::now() - state.started_at).num_seconds().max(0) as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        cluster: state.cache.config().cluster,
        cache: cache_stats,
    })
}

/// Serve an entry. A successful read counts as an access.
async fn get_entry(State(state): State<SharedState>, Path(key): Path<String>) -> Response {
    match state.cache.get(&key).await {
        Ok(data) => {
            if let Err(e) = state.cache.touch(&key).await {
                warn!(key = %key, error = %e, "Failed to record access");
            }
            (
                [(header::CONTENT_TYPE, "application/octet-stream")],
                data,
            )
                .into_response()
        }
        Err(e) => error_response(&key, e),
    }
}

async fn check_entry(State(state): State<SharedState>, Path(key): Path<String>) -> Response {
    match state.cache.check(&key).await {
        Ok(true) => StatusCode::OK.into_response(),
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => error_response(&key, e),
    }
}

async fn put_entry(
    State(state): State<SharedState>,
    Path(key): Path<String>,
    body: Bytes,
) -> Response {
    let size = body.len() as u64;
    match state.cache.add(&key, body.to_vec()).await {
        Ok(path) => (StatusCode::CREATED, Json(StoredResponse { path, size })).into_response(),
        Err(e) => error_response(&key, e),
    }
}

async fn delete_entry(State(state): State<SharedState>, Path(key): Path<String>) -> Response {
    match state.cache.remove(&key).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(&key, e),
    }
}

async fn touch_entry(State(state): State<SharedState>, Path(key): Path<String>) -> Response {
    match state.cache.touch(&key).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(&key, e),
    }
}

/// Run one eviction cycle now
async fn evict(State(state): State<SharedState>) -> Json<EvictionOutcome> {
    Json(state.cache.evict().await)
}

async fn purge(State(state): State<SharedState>) -> Response {
    match state.cache.purge().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response("*", e),
    }
}

/// Mutation announced by a peer
async fn cluster_message(
    State(state): State<SharedState>,
    Json(message): Json<ClusterMessage>,
) -> Json<ClusterAck> {
    let applied = state.cache.handle(message).await;
    Json(ClusterAck { applied })
}

fn error_response(key: &str, err: CacheError) -> Response {
    let status = match &err {
        CacheError::NotFound(_) => StatusCode::NOT_FOUND,
        CacheError::InvalidKey(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(key = %key, error = %err, "Cache operation failed");
    }

    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use file_cache::CacheConfig;
    use std::path::Path as FsPath;
    use tempfile::tempdir;
    use tower::ServiceExt;

    async fn create_test_state(cache_dir: &FsPath, mut config: CacheConfig) -> SharedState {
        config.dir = cache_dir.to_path_buf();
        let cache = FileCache::new(config);
        cache.init().await.unwrap();
        Arc::new(ServerState::new(cache))
    }

    fn request(method: Method, uri: &str, body: Body) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(body)
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let dir = tempdir().unwrap();
        let state = create_test_state(dir.path(), CacheConfig::default()).await;
        let router = create_router(state);

        let response = router
            .oneshot(request(Method::GET, "/health", Body::empty()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["cluster"], false);
        assert!(json["uptime_secs"].as_u64().is_some());
        assert_eq!(json["cache"]["file_count"], 0);
    }

    #[tokio::test]
    async fn test_put_get_delete_entry() {
        let dir = tempdir().unwrap();
        let state = create_test_state(dir.path(), CacheConfig::default()).await;
        let router = create_router(state.clone());

        let response = router
            .clone()
            .oneshot(request(
                Method::PUT,
                "/entries/images/cat.jpg",
                Body::from("meow"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        assert_eq!(json["size"], 4);
        assert!(dir.path().join("images/cat.jpg").exists());

        let response = router
            .clone()
            .oneshot(request(Method::GET, "/entries/images/cat.jpg", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"meow");

        let response = router
            .clone()
            .oneshot(request(
                Method::DELETE,
                "/entries/images/cat.jpg",
                Body::empty(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(state.cache.stats().await.file_count, 0);

        let response = router
            .oneshot(request(Method::GET, "/entries/images/cat.jpg", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_head_checks_existence() {
        let dir = tempdir().unwrap();
        let state = create_test_state(dir.path(), CacheConfig::default()).await;
        state.cache.add("present", "x").await.unwrap();
        let router = create_router(state);

        let response = router
            .clone()
            .oneshot(request(Method::HEAD, "/entries/present", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(request(Method::HEAD, "/entries/absent", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_reserved_key_is_rejected() {
        let dir = tempdir().unwrap();
        let state = create_test_state(dir.path(), CacheConfig::default()).await;
        let router = create_router(state);

        let response = router
            .oneshot(request(
                Method::PUT,
                "/entries/.filecache.json",
                Body::from("{}"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_evict_endpoint_applies_limits() {
        let dir = tempdir().unwrap();
        let state =
            create_test_state(dir.path(), CacheConfig::default().with_max_files(1)).await;
        state.cache.add("old", "1").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        state.cache.add("new", "2").await.unwrap();
        let router = create_router(state.clone());

        let response = router
            .oneshot(request(Method::POST, "/evict", Body::empty()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["removed"], 1);
        assert_eq!(json["failed"], 0);
        assert!(!dir.path().join("old").exists());
        assert!(dir.path().join("new").exists());
    }

    #[tokio::test]
    async fn test_purge_endpoint() {
        let dir = tempdir().unwrap();
        let state = create_test_state(dir.path(), CacheConfig::default()).await;
        state.cache.add("a/b", "x").await.unwrap();
        let router = create_router(state.clone());

        let response = router
            .oneshot(request(Method::POST, "/purge", Body::empty()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(state.cache.stats().await.file_count, 0);
        assert!(dir.path().exists());
        assert!(!dir.path().join("a").exists());
    }

    #[tokio::test]
    async fn test_cluster_endpoint_applies_messages() {
        let dir = tempdir().unwrap();
        let state =
            create_test_state(dir.path(), CacheConfig::default().with_cluster(true)).await;
        let router = create_router(state.clone());

        let message = serde_json::json!({
            "action": "add",
            "path": dir.path().join("from-peer"),
            "entry": {"size": 100, "lastAccessTime": 1}
        });
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/cluster")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(message.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["applied"], true);
        assert_eq!(state.cache.stats().await.used_space, 100);

        let response = router
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/cluster")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"action":"reboot"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(response).await["applied"], false);
    }

    #[test]
    fn test_server_state_new() {
        let dir = tempdir().unwrap();
        let state = ServerState::new(FileCache::new(CacheConfig::new(dir.path())));

        // started_at should be close to now
        let diff = (Utc::now() - state.started_at).num_seconds();
        assert!((0..5).contains(&diff));
    }
}
