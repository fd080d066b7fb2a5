//! Embedding service HTTP API
//!
//! Axum server wrapping a single, startup-loaded embedding model.
//!
//! Each endpoint has a thin axum handler that delegates to an inner function
//! returning `(StatusCode, serde_json::Value)`, so the request logic is
//! testable without the dispatch machinery.
//!
//! Endpoints:
//! - GET  /health: liveness and model status
//! - POST /embed : `{"text": ...}` → `{"embedding": [...], "processing_time": secs}`

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use bytes::Bytes;
use serde_json::{json, Value};
use tasklens_core::{EmbeddingBackend, TaskLensConfig};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;

use crate::rate_limit::{self, EmbedRateLimiter};

/// How often idle rate-limiter entries are dropped.
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Shared state for all HTTP handlers
pub struct EmbedState {
    pub backend: Arc<dyn EmbeddingBackend>,
    pub max_text_length: usize,
}

/// Build the Axum router. Only `/embed` is rate limited.
pub fn build_router(state: Arc<EmbedState>, limiter: Arc<EmbedRateLimiter>) -> Router {
    let embed_routes = Router::new()
        .route("/embed", post(embed_handler))
        .route_layer(middleware::from_fn_with_state(limiter, rate_limit::enforce));

    Router::new()
        .route("/health", get(health_handler))
        .merge(embed_routes)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve on the configured address until the shutdown signal fires.
pub async fn start_http_server(
    config: &TaskLensConfig,
    backend: Arc<dyn EmbeddingBackend>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = config.embed_service_addr();
    let state = Arc::new(EmbedState {
        backend,
        max_text_length: config.embed_service.max_text_length,
    });
    let limiter = Arc::new(EmbedRateLimiter::new(&config.embed_service.rate_limit));
    tracing::info!(limits = ?limiter, "Rate limiter configured");

    let housekeeping = tokio::spawn(rate_limit::run_housekeeping(
        Arc::clone(&limiter),
        HOUSEKEEPING_INTERVAL,
    ));

    let app = build_router(state, limiter);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Embedding service listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown.recv().await;
        tracing::info!("Embedding service shutting down...");
    })
    .await?;

    housekeeping.abort();
    Ok(())
}

// ============================================================================
// Inner (directly testable) functions
// ============================================================================

fn unix_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

fn bad_request(msg: impl Into<String>) -> (StatusCode, Value) {
    (StatusCode::BAD_REQUEST, json!({ "error": msg.into() }))
}

/// Health payload. The model is loaded before the router exists, so
/// `model_loaded` is always true here.
pub fn health_inner(backend: &dyn EmbeddingBackend) -> (StatusCode, Value) {
    (
        StatusCode::OK,
        json!({
            "status": "healthy",
            "model_loaded": true,
            "model": backend.name(),
            "dimensions": backend.dimensions(),
            "timestamp": unix_timestamp(),
        }),
    )
}

/// Validate the raw body and embed its `text`.
///
/// Checks, in order: body is a non-empty JSON object, `text` is a non-empty
/// string, `text` is at most `max_text_length` characters.
pub async fn embed_inner(
    backend: &dyn EmbeddingBackend,
    max_text_length: usize,
    body: &[u8],
) -> (StatusCode, Value) {
    let start = Instant::now();

    let payload: Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(_) => return bad_request("No JSON data provided"),
    };
    let text = match payload.as_object() {
        Some(obj) if !obj.is_empty() => obj.get("text"),
        _ => return bad_request("No JSON data provided"),
    };
    let text = match text.and_then(Value::as_str) {
        Some(t) if !t.is_empty() => t,
        _ => return bad_request("Missing 'text' field"),
    };

    let length = text.chars().count();
    if length > max_text_length {
        return bad_request(format!(
            "Input text too long. Maximum length is {max_text_length} characters"
        ));
    }

    match backend.embed(text).await {
        Ok(embedding) => {
            tracing::info!(length, "Successfully generated embedding");
            (
                StatusCode::OK,
                json!({
                    "embedding": embedding,
                    "processing_time": start.elapsed().as_secs_f64(),
                }),
            )
        }
        Err(e) => {
            tracing::error!(error = %e, length, "Error processing embed request");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "error": "Internal server error",
                    "details": e.to_string(),
                }),
            )
        }
    }
}

// ============================================================================
// Axum handler wrappers
// ============================================================================

pub async fn health_handler(State(state): State<Arc<EmbedState>>) -> impl IntoResponse {
    let (status, body) = health_inner(state.backend.as_ref());
    (status, Json(body))
}

pub async fn embed_handler(State(state): State<Arc<EmbedState>>, body: Bytes) -> impl IntoResponse {
    let (status, body) = embed_inner(state.backend.as_ref(), state.max_text_length, &body).await;
    (status, Json(body))
}

// ============================================================================
// Unit Tests
// ============================================================================
