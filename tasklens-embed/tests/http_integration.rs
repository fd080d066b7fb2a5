//! End-to-end router tests for the embedding service.
//!
//! A fixed in-process backend stands in for the ONNX model, so these run
//! without model files. Requests go through the full router (CORS, rate
//! limiter, handlers) via `oneshot`.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use tasklens_core::config::RateLimitConfig;
use tasklens_core::{EmbeddingBackend, EmbeddingError};
use tasklens_embed::http::{build_router, EmbedState};
use tasklens_embed::rate_limit::EmbedRateLimiter;
use tower::ServiceExt;

/// Deterministic 384-dim vectors derived from the input bytes.
struct HashingBackend;

#[async_trait]
impl EmbeddingBackend for HashingBackend {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut v = vec![0.0f32; 384];
        for (i, b) in text.bytes().enumerate() {
            v[(i * 31 + b as usize) % 384] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1.0);
        Ok(v.into_iter().map(|x| x / norm).collect())
    }

    fn dimensions(&self) -> usize {
        384
    }

    fn name(&self) -> &str {
        "hashing"
    }
}

fn client(last: u8) -> SocketAddr {
    SocketAddr::from(([192, 168, 1, last], 40_000))
}

fn app_for(limiter: Arc<EmbedRateLimiter>, addr: SocketAddr) -> Router {
    let state = Arc::new(EmbedState {
        backend: Arc::new(HashingBackend),
        max_text_length: 5000,
    });
    build_router(state, limiter).layer(MockConnectInfo(addr))
}

fn default_app() -> Router {
    let limiter = Arc::new(EmbedRateLimiter::new(&RateLimitConfig::default()));
    app_for(limiter, client(1))
}

fn embed_request(body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/embed")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

async fn json_body(resp: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ===========================================================================
// GET /health
// ===========================================================================
#[tokio::test]
async fn test_health_reports_model_loaded() {
    let resp = default_app()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["model_loaded"], true);
    assert!(body["timestamp"].is_number());
}

#[tokio::test]
async fn test_health_is_not_rate_limited() {
    let app = default_app();
    for _ in 0..25 {
        let resp = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}

// ===========================================================================
// POST /embed
// ===========================================================================
#[tokio::test]
async fn test_embed_returns_384_finite_floats() {
    let resp = default_app()
        .oneshot(embed_request(
            serde_json::json!({ "text": "shopping groceries" }).to_string(),
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    let embedding = body["embedding"].as_array().expect("embedding array");
    assert_eq!(embedding.len(), 384);
    assert!(embedding
        .iter()
        .all(|v| v.as_f64().map(f64::is_finite).unwrap_or(false)));
    assert!(body["processing_time"].is_number());
}

#[tokio::test]
async fn test_embed_too_long_is_rejected_without_embedding() {
    let resp = default_app()
        .oneshot(embed_request(
            serde_json::json!({ "text": "a".repeat(5001) }).to_string(),
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = json_body(resp).await;
    assert_eq!(
        body["error"],
        "Input text too long. Maximum length is 5000 characters"
    );
    assert!(body.get("embedding").is_none());
}

#[tokio::test]
async fn test_embed_missing_and_empty_text_are_400() {
    let limiter = Arc::new(EmbedRateLimiter::new(&RateLimitConfig::default()));
    let app = app_for(limiter, client(2));

    for (raw, message) in [
        ("", "No JSON data provided"),
        ("{}", "No JSON data provided"),
        (r#"{"title": "x"}"#, "Missing 'text' field"),
        (r#"{"text": ""}"#, "Missing 'text' field"),
    ] {
        let resp = app.clone().oneshot(embed_request(raw.to_string())).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "body {raw:?}");
        assert_eq!(json_body(resp).await["error"], message);
    }
}

// ===========================================================================
// Rate limiting
// ===========================================================================
#[tokio::test]
async fn test_more_than_ten_embeds_per_minute_are_throttled() {
    let limiter = Arc::new(EmbedRateLimiter::new(&RateLimitConfig::default()));
    let app = app_for(Arc::clone(&limiter), client(3));

    let mut statuses = Vec::new();
    for i in 0..12 {
        let resp = app
            .clone()
            .oneshot(embed_request(
                serde_json::json!({ "text": format!("request {i}") }).to_string(),
            ))
            .await
            .unwrap();
        statuses.push(resp.status());
        if resp.status() == StatusCode::TOO_MANY_REQUESTS {
            assert!(resp.headers().contains_key(header::RETRY_AFTER));
            let body = json_body(resp).await;
            assert_eq!(body["error"], "Too Many Requests");
        }
    }

    assert!(statuses[..10].iter().all(|s| *s == StatusCode::OK));
    assert!(statuses[10..]
        .iter()
        .all(|s| *s == StatusCode::TOO_MANY_REQUESTS));

    // Another address has its own budget.
    let other = app_for(limiter, client(4));
    let resp = other
        .oneshot(embed_request(r#"{"text": "hello"}"#.to_string()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

// ===========================================================================
// CORS
// ===========================================================================
#[tokio::test]
async fn test_cors_allows_any_origin() {
    let resp = default_app()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header(header::ORIGIN, "http://frontend.example")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(
        resp.headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
}

#[tokio::test]
async fn test_cors_preflight_for_embed() {
    let resp = default_app()
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/embed")
                .header(header::ORIGIN, "http://frontend.example")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(resp.status().is_success());
    assert!(resp
        .headers()
        .contains_key(header::ACCESS_CONTROL_ALLOW_METHODS));
}
