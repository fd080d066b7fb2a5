//! Embedding backends for tasklens
//!
//! Provides an `EmbeddingBackend` trait with implementations for:
//! - **ONNX**: local embeddings via `all-MiniLM-L6-v2` (384-dim)
//! - **Remote**: the tasklens embedding service over HTTP (`POST /embed`)

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::config::EmbeddingConfig;

/// Default ONNX (all-MiniLM-L6-v2) embedding dimensions
pub const ONNX_DIMENSIONS: usize = 384;

// ============================================================================
// EmbeddingBackend trait
// ============================================================================

/// Abstraction over embedding providers.
///
/// Implementations are shared across request handlers behind an `Arc`, so
/// `embed` takes `&self`.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Returns the embedding dimension (e.g. 384).
    fn dimensions(&self) -> usize;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

/// Embedding generation errors
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Embedding service error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Invalid response: expected {expected} dimensions, got {actual}")]
    InvalidDimensions { expected: usize, actual: usize },

    #[error("All {attempts} attempts failed, last error: {last_error}")]
    RetryExhausted { attempts: usize, last_error: String },

    #[error("ONNX model not found at {path}; download all-MiniLM-L6-v2 or set embedding.onnx_model_path")]
    ModelNotFound { path: String },

    #[error("ONNX inference error: {0}")]
    OnnxInference(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Unknown embedding backend: {0}")]
    UnknownBackend(String),
}

impl EmbeddingError {
    /// Transport failures, rate limiting and 5xx responses are worth retrying;
    /// client errors and malformed responses are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            EmbeddingError::Http(e) => !e.is_decode(),
            EmbeddingError::Api { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

// ============================================================================
// Config types
// ============================================================================

/// ONNX backend configuration
#[derive(Debug, Clone)]
pub struct OnnxConfig {
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub dimensions: usize,
}

/// Remote embedding service client configuration
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Base URL, e.g. `http://embedding-service:6000`.
    pub base_url: String,
    pub dimensions: usize,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub timeout: Duration,
}

impl RemoteConfig {
    /// Client settings for the embedding service named in `[embedding]`.
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            base_url: config.service_url.clone(),
            dimensions: config.dimensions as usize,
            max_retries: config.max_retries as usize,
            retry_delay_ms: config.retry_delay_ms,
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }
}

/// Configuration union for the backend factory.
#[derive(Debug, Clone)]
pub enum BackendConfig {
    Onnx(OnnxConfig),
    Remote(RemoteConfig),
}

impl BackendConfig {
    /// Select a backend from `[embedding] backend`.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        match config.backend.as_str() {
            "onnx" => {
                let (model_path, tokenizer_path) =
                    crate::onnx_embedder::resolve_onnx_paths(&config.onnx_model_path);
                Ok(BackendConfig::Onnx(OnnxConfig {
                    model_path,
                    tokenizer_path,
                    dimensions: config.dimensions as usize,
                }))
            }
            "remote" => Ok(BackendConfig::Remote(RemoteConfig::from_config(config))),
            other => Err(EmbeddingError::UnknownBackend(other.to_string())),
        }
    }
}

/// Create the appropriate backend from configuration.
pub fn create_backend(config: BackendConfig) -> Result<Box<dyn EmbeddingBackend>, EmbeddingError> {
    match config {
        BackendConfig::Onnx(c) => Ok(Box::new(crate::onnx_embedder::OnnxEmbeddingClient::new(c)?)),
        BackendConfig::Remote(c) => Ok(Box::new(RemoteEmbeddingClient::new(c)?)),
    }
}

// ============================================================================
// Embedding service wire structs
// ============================================================================

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
    #[serde(default)]
    processing_time: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct EmbedErrorResponse {
    error: String,
    #[serde(default)]
    details: Option<String>,
}

// ============================================================================
// RemoteEmbeddingClient
// ============================================================================

/// Client for the tasklens embedding service.
#[derive(Debug, Clone)]
pub struct RemoteEmbeddingClient {
    client: Client,
    config: RemoteConfig,
}

impl RemoteEmbeddingClient {
    pub fn new(config: RemoteConfig) -> Result<Self, EmbeddingError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn embed_url(&self) -> String {
        format!("{}/embed", self.config.base_url.trim_end_matches('/'))
    }

    /// Embed with exponential backoff on retryable failures.
    pub async fn embed_raw(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms.max(1))
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        let result = RetryIf::spawn(
            retry_strategy,
            || self.embed_once(text),
            |e: &EmbeddingError| e.is_retryable(),
        )
        .await;

        match result {
            Ok(vec) => Ok(vec),
            Err(e) if e.is_retryable() => {
                let attempts = self.config.max_retries + 1;
                tracing::error!(attempts, error = %e, "All embedding attempts failed");
                Err(EmbeddingError::RetryExhausted {
                    attempts,
                    last_error: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn embed_once(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let response = self
            .client
            .post(self.embed_url())
            .json(&EmbedRequest { text })
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<EmbedErrorResponse>(&error_body)
                .map(|e| match e.details {
                    Some(details) => format!("{}: {}", e.error, details),
                    None => e.error,
                })
                .unwrap_or(error_body);

            tracing::warn!(code = status.as_u16(), message = %message, "Embedding service error");

            return Err(EmbeddingError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let body: EmbedResponse = response.json().await?;

        if body.embedding.len() != self.config.dimensions {
            return Err(EmbeddingError::InvalidDimensions {
                expected: self.config.dimensions,
                actual: body.embedding.len(),
            });
        }

        tracing::debug!(
            processing_time = body.processing_time,
            "Embedding service responded"
        );

        Ok(body.embedding)
    }
}

#[async_trait]
impl EmbeddingBackend for RemoteEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_raw(text).await
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    fn name(&self) -> &str {
        "remote"
    }
}

// ============================================================================
// TESTS
// ============================================================================
