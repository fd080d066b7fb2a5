pub mod config;
pub mod db;
pub mod embeddings;
pub mod error;
pub mod models;
pub mod onnx_embedder;
pub mod search;

pub use config::TaskLensConfig;
pub use embeddings::{
    create_backend, BackendConfig, EmbeddingBackend, EmbeddingError, OnnxConfig, RemoteConfig,
    RemoteEmbeddingClient, ONNX_DIMENSIONS,
};
pub use error::TaskLensError;
pub use models::{NewTask, Task, TaskStatus};
pub use onnx_embedder::OnnxEmbeddingClient;
