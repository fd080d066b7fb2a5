//! Local sentence embeddings with `all-MiniLM-L6-v2` on ONNX Runtime.
//!
//! Tokenization uses the model's `tokenizer.json`; the sentence vector is the
//! attention-masked mean of the last hidden state, L2-normalized, matching
//! what `sentence-transformers` produces for this model.

use async_trait::async_trait;
use ort::session::Session;
use ort::value::Tensor;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokenizers::TruncationParams;

use crate::embeddings::{EmbeddingBackend, EmbeddingError, OnnxConfig};

const MODEL_FILE: &str = "all-MiniLM-L6-v2.onnx";
const TOKENIZER_FILE: &str = "all-MiniLM-L6-v2-tokenizer.json";

/// Word pieces fed to the model per text, special tokens included.
/// Matches the sentence-transformers `max_seq_length` for this model.
pub const MAX_SEQ_LENGTH: usize = 256;

/// Local ONNX embedding client.
///
/// Loaded once per process and shared by reference. `Session::run` needs
/// `&mut`, so concurrent requests serialize on the session mutex.
pub struct OnnxEmbeddingClient {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<tokenizers::Tokenizer>,
    dimensions: usize,
}

impl std::fmt::Debug for OnnxEmbeddingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmbeddingClient")
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

impl OnnxEmbeddingClient {
    /// Load the model and tokenizer named in `config`.
    ///
    /// Returns `EmbeddingError::ModelNotFound` if either file is missing.
    pub fn new(config: OnnxConfig) -> Result<Self, EmbeddingError> {
        for path in [&config.model_path, &config.tokenizer_path] {
            if !path.exists() {
                return Err(EmbeddingError::ModelNotFound {
                    path: path.display().to_string(),
                });
            }
        }

        let session = Session::builder()
            .and_then(|b| b.with_intra_threads(1))
            .and_then(|b| b.commit_from_file(&config.model_path))
            .map_err(|e| EmbeddingError::OnnxInference(e.to_string()))?;

        let tokenizer = tokenizers::Tokenizer::from_file(&config.tokenizer_path)
            .map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;
        let tokenizer = with_sequence_limit(tokenizer)?;

        tracing::info!(
            model = %config.model_path.display(),
            dimensions = config.dimensions,
            "ONNX embedding model loaded"
        );

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            dimensions: config.dimensions,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OnnxEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        // Inference is CPU-bound; keep it off the async workers.
        let session = Arc::clone(&self.session);
        let tokenizer = Arc::clone(&self.tokenizer);
        let dimensions = self.dimensions;
        let text = text.to_string();

        tokio::task::spawn_blocking(move || {
            let mut session = session
                .lock()
                .map_err(|e| EmbeddingError::OnnxInference(format!("session lock poisoned: {e}")))?;
            run_inference(&mut session, &tokenizer, &text, dimensions)
        })
        .await
        .map_err(|e| EmbeddingError::OnnxInference(format!("spawn_blocking join error: {e}")))?
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "onnx"
    }
}

/// Truncate encodings to `MAX_SEQ_LENGTH` regardless of what the tokenizer
/// file configures.
fn with_sequence_limit(
    mut tokenizer: tokenizers::Tokenizer,
) -> Result<tokenizers::Tokenizer, EmbeddingError> {
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length: MAX_SEQ_LENGTH,
            ..Default::default()
        }))
        .map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;
    Ok(tokenizer)
}

fn to_i64(values: &[u32]) -> Vec<i64> {
    values.iter().map(|&v| v as i64).collect()
}

fn onnx_err(e: impl std::fmt::Display) -> EmbeddingError {
    EmbeddingError::OnnxInference(e.to_string())
}

fn run_inference(
    session: &mut Session,
    tokenizer: &tokenizers::Tokenizer,
    text: &str,
    expected_dims: usize,
) -> Result<Vec<f32>, EmbeddingError> {
    let encoding = tokenizer
        .encode(text, true)
        .map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;

    let input_ids = to_i64(encoding.get_ids());
    let attention_mask = to_i64(encoding.get_attention_mask());
    let token_type_ids = to_i64(encoding.get_type_ids());
    let shape = vec![1i64, input_ids.len() as i64];

    let inputs = ort::inputs! {
        "input_ids" => Tensor::from_array((shape.clone(), input_ids)).map_err(onnx_err)?,
        "attention_mask" => Tensor::from_array((shape.clone(), attention_mask.clone())).map_err(onnx_err)?,
        "token_type_ids" => Tensor::from_array((shape, token_type_ids)).map_err(onnx_err)?,
    };

    let outputs = session.run(inputs).map_err(onnx_err)?;

    // last_hidden_state: [1, seq_len, hidden_dim]
    let (out_shape, hidden) = outputs[0].try_extract_tensor::<f32>().map_err(onnx_err)?;
    if out_shape.len() != 3 {
        return Err(EmbeddingError::OnnxInference(format!(
            "Expected 3D output, got {}D",
            out_shape.len()
        )));
    }
    let hidden_dim = out_shape[2] as usize;

    let mut pooled = mean_pool(hidden, &attention_mask, hidden_dim);
    l2_normalize(&mut pooled);

    if pooled.len() != expected_dims {
        return Err(EmbeddingError::InvalidDimensions {
            expected: expected_dims,
            actual: pooled.len(),
        });
    }

    Ok(pooled)
}

/// Average the token vectors in a flat `[seq_len * hidden_dim]` buffer,
/// counting only tokens whose mask is non-zero.
fn mean_pool(hidden: &[f32], mask: &[i64], hidden_dim: usize) -> Vec<f32> {
    let mut pooled = vec![0.0f32; hidden_dim];
    if hidden_dim == 0 {
        return pooled;
    }

    let mut counted = 0.0f32;
    for (token, row) in hidden.chunks_exact(hidden_dim).enumerate() {
        let weight = mask.get(token).copied().unwrap_or(0) as f32;
        if weight == 0.0 {
            continue;
        }
        counted += weight;
        for (acc, v) in pooled.iter_mut().zip(row) {
            *acc += v * weight;
        }
    }

    if counted > 0.0 {
        pooled.iter_mut().for_each(|v| *v /= counted);
    }
    pooled
}

fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

/// `$XDG_DATA_HOME/tasklens/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    let data_home = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(shellexpand::tilde("~/.local/share").into_owned()));
    data_home.join("tasklens/models")
}

/// Resolve the model and tokenizer paths.
///
/// An empty setting selects the default directory. Otherwise `~` and
/// `$VARS` are expanded and the tokenizer is expected next to the model as
/// `<stem>-tokenizer.json`.
pub fn resolve_onnx_paths(onnx_model_path: &str) -> (PathBuf, PathBuf) {
    if onnx_model_path.is_empty() {
        let dir = default_model_dir();
        return (dir.join(MODEL_FILE), dir.join(TOKENIZER_FILE));
    }

    let expanded = shellexpand::full(onnx_model_path)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| onnx_model_path.to_string());
    let model = PathBuf::from(expanded);
    let stem = model
        .file_stem()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();
    let tokenizer = model.with_file_name(format!("{stem}-tokenizer.json"));
    (model, tokenizer)
}

// ============================================================================
// TESTS
// ============================================================================
