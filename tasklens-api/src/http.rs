//! Task REST API
//!
//! Axum server for task CRUD and semantic search. Task descriptions and
//! search queries are embedded through the embedding service; ranking is
//! delegated to pgvector.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to an
//! inner function returning `(StatusCode, serde_json::Value)`.
//!
//! Endpoints:
//! - GET    /                : banner
//! - GET    /health          : liveness
//! - GET    /tasks           : list tasks, newest first
//! - POST   /tasks           : create a task
//! - DELETE /tasks/:id       : delete a task
//! - GET    /tasks/search?q= : nearest tasks to `q`

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Query, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Json, Router};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use tasklens_core::search::nearest_tasks;
use tasklens_core::{EmbeddingBackend, NewTask, TaskLensConfig};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::tasks;

/// Shared state for all HTTP handlers
pub struct ApiState {
    pub pool: PgPool,
    pub config: TaskLensConfig,
    pub embedder: Arc<dyn EmbeddingBackend>,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/tasks", get(list_tasks_handler).post(create_task_handler))
        .route("/tasks/search", get(search_tasks_handler))
        .route("/tasks/:id", delete(delete_task_handler))
        .layer(middleware::from_fn(log_request))
        .layer(CorsLayer::permissive())
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_XSS_PROTECTION,
            HeaderValue::from_static("1; mode=block"),
        ))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    pool: PgPool,
    config: TaskLensConfig,
    embedder: Arc<dyn EmbeddingBackend>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = config.api_addr();
    let state = Arc::new(ApiState {
        pool,
        config,
        embedder,
    });

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Task API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("Task API shutting down...");
        })
        .await?;

    Ok(())
}

async fn log_request(request: Request, next: Next) -> Response {
    tracing::info!(method = %request.method(), uri = %request.uri(), "Incoming request");
    next.run(request).await
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct SearchParams {
    pub q: Option<String>,
}

fn error_body(status: StatusCode, msg: &str) -> (StatusCode, Value) {
    (status, json!({ "error": msg }))
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

pub fn health_inner() -> (StatusCode, Value) {
    (StatusCode::OK, json!({ "status": "healthy" }))
}

pub async fn list_tasks_inner(pool: &PgPool) -> (StatusCode, Value) {
    match tasks::list_tasks(pool).await {
        Ok(rows) => (StatusCode::OK, json!(rows)),
        Err(e) => {
            tracing::error!(error = %e, "Error fetching tasks");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch tasks")
        }
    }
}

/// Validate, embed the description, insert.
pub async fn create_task_inner(state: &ApiState, new_task: NewTask) -> (StatusCode, Value) {
    let task = match new_task.validate(
        state.config.api.max_title_length,
        state.config.api.max_description_length,
    ) {
        Ok(t) => t,
        Err(e) => return error_body(StatusCode::BAD_REQUEST, &e.to_string()),
    };

    let embedding = match state.embedder.embed(&task.description).await {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(error = %e, backend = state.embedder.name(), "Embedding service error");
            return error_body(
                StatusCode::SERVICE_UNAVAILABLE,
                "Embedding service unavailable",
            );
        }
    };

    match tasks::create_task(
        &state.pool,
        &task,
        &embedding,
        state.config.database.vector_binding,
    )
    .await
    {
        Ok(created) => (StatusCode::CREATED, json!(created)),
        Err(e) => {
            tracing::error!(error = %e, "Error adding task");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "Failed to add task")
        }
    }
}

/// Returns `None` body on success (204).
pub async fn delete_task_inner(pool: &PgPool, raw_id: &str) -> (StatusCode, Option<Value>) {
    let id: i32 = match raw_id.parse() {
        Ok(id) => id,
        Err(_) => {
            let (status, body) = error_body(StatusCode::BAD_REQUEST, "Invalid task ID");
            return (status, Some(body));
        }
    };

    match tasks::delete_task(pool, id).await {
        Ok(removed) => {
            tracing::info!(id, removed, "Task deleted");
            (StatusCode::NO_CONTENT, None)
        }
        Err(e) => {
            tracing::error!(id, error = %e, "Error deleting task");
            let (status, body) =
                error_body(StatusCode::INTERNAL_SERVER_ERROR, "Failed to delete task");
            (status, Some(body))
        }
    }
}

/// Embed `q` and return the nearest `api.search_limit` tasks.
pub async fn search_tasks_inner(state: &ApiState, params: SearchParams) -> (StatusCode, Value) {
    let query = match params.q {
        Some(q) if !q.is_empty() => q,
        _ => {
            return error_body(StatusCode::BAD_REQUEST, r#"Missing query parameter "q""#);
        }
    };

    tracing::info!(query = %query, "Search query received");

    let embedding = match state.embedder.embed(&query).await {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(error = %e, "Search embedding failed");
            return error_body(StatusCode::INTERNAL_SERVER_ERROR, "Search failed");
        }
    };

    match nearest_tasks(
        &state.pool,
        &embedding,
        state.config.api.search_limit,
        state.config.database.vector_binding,
    )
    .await
    {
        Ok(rows) => {
            tracing::info!(count = rows.len(), "Search complete");
            (StatusCode::OK, json!(rows))
        }
        Err(e) => {
            tracing::error!(error = %e, "Search query failed");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "Search failed")
        }
    }
}

// ============================================================================
// Axum handler wrappers
// ============================================================================

pub async fn root_handler() -> &'static str {
    "Task manager backend is running!"
}

pub async fn health_handler() -> impl IntoResponse {
    let (status, body) = health_inner();
    (status, Json(body))
}

pub async fn list_tasks_handler(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let (status, body) = list_tasks_inner(&state.pool).await;
    (status, Json(body))
}

/// Malformed JSON is treated like an empty body so it reports the missing
/// fields instead of an extractor rejection.
pub async fn create_task_handler(
    State(state): State<Arc<ApiState>>,
    body: Bytes,
) -> impl IntoResponse {
    let new_task: NewTask = serde_json::from_slice(&body).unwrap_or_default();
    let (status, body) = create_task_inner(&state, new_task).await;
    (status, Json(body))
}

pub async fn delete_task_handler(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Response {
    match delete_task_inner(&state.pool, &id).await {
        (status, Some(body)) => (status, Json(body)).into_response(),
        (status, None) => status.into_response(),
    }
}

pub async fn search_tasks_handler(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<SearchParams>,
) -> impl IntoResponse {
    let (status, body) = search_tasks_inner(&state, params).await;
    (status, Json(body))
}

// ============================================================================
// Unit tests: validation paths that never reach the database
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sqlx::postgres::PgPoolOptions;
    use tasklens_core::EmbeddingError;

    struct DownEmbedder;

    #[async_trait]
    impl EmbeddingBackend for DownEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Err(EmbeddingError::Api {
                code: 502,
                message: "bad gateway".to_string(),
            })
        }

        fn dimensions(&self) -> usize {
            384
        }

        fn name(&self) -> &str {
            "down"
        }
    }

    /// A pool that never connects unless a query runs.
    fn lazy_state() -> ApiState {
        let pool = PgPoolOptions::new()
            .acquire_timeout(std::time::Duration::from_secs(2))
            .connect_lazy("postgresql://nobody@127.0.0.1:1/none")
            .expect("lazy pool");
        ApiState {
            pool,
            config: TaskLensConfig::default(),
            embedder: Arc::new(DownEmbedder),
        }
    }

    fn new_task(title: Option<&str>, description: Option<&str>, status: Option<&str>) -> NewTask {
        NewTask {
            title: title.map(str::to_string),
            description: description.map(str::to_string),
            status: status.map(str::to_string),
        }
    }

    #[test]
    fn test_health_inner() {
        let (status, body) = health_inner();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_create_missing_fields_is_400() {
        let state = lazy_state();
        let (status, body) =
            create_task_inner(&state, new_task(Some("t"), None, Some("todo"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing required fields");
    }

    #[tokio::test]
    async fn test_create_invalid_status_is_400() {
        let state = lazy_state();
        let (status, body) =
            create_task_inner(&state, new_task(Some("t"), Some("d"), Some("archived"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid status value");
    }

    #[tokio::test]
    async fn test_create_title_too_long_is_400() {
        let state = lazy_state();
        let title = "t".repeat(101);
        let (status, body) =
            create_task_inner(&state, new_task(Some(&title), Some("d"), Some("todo"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Title too long");
    }

    #[tokio::test]
    async fn test_create_with_embedding_down_is_503() {
        let state = lazy_state();
        let (status, body) =
            create_task_inner(&state, new_task(Some("t"), Some("d"), Some("done"))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "Embedding service unavailable");
    }

    #[tokio::test]
    async fn test_delete_invalid_id_is_400() {
        let state = lazy_state();
        for raw in ["abc", "1.5", "", "99999999999"] {
            let (status, body) = delete_task_inner(&state.pool, raw).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "id {raw:?}");
            assert_eq!(body.unwrap()["error"], "Invalid task ID");
        }
    }

    #[tokio::test]
    async fn test_search_missing_query_is_400() {
        let state = lazy_state();
        for params in [SearchParams { q: None }, SearchParams { q: Some(String::new()) }] {
            let (status, body) = search_tasks_inner(&state, params).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["error"], "Missing query parameter \"q\"");
        }
    }

    #[tokio::test]
    async fn test_search_with_embedding_down_is_500() {
        let state = lazy_state();
        let (status, body) = search_tasks_inner(
            &state,
            SearchParams {
                q: Some("groceries".to_string()),
            },
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Search failed");
    }
}
