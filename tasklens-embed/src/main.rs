use std::sync::Arc;

use clap::Parser;
use tasklens_core::embeddings::{create_backend, BackendConfig, OnnxConfig};
use tasklens_core::{onnx_embedder, EmbeddingBackend, TaskLensConfig};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "tasklens.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = match TaskLensConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // The service always embeds locally; `embedding.backend` only selects
    // the client side for the API and CLI.
    let (model_path, tokenizer_path) =
        onnx_embedder::resolve_onnx_paths(&config.embedding.onnx_model_path);
    let backend: Arc<dyn EmbeddingBackend> = match create_backend(BackendConfig::Onnx(OnnxConfig {
        model_path,
        tokenizer_path,
        dimensions: config.embedding.dimensions as usize,
    })) {
        Ok(b) => Arc::from(b),
        Err(e) => {
            tracing::error!(error = %e, "Failed to load model");
            std::process::exit(1);
        }
    };
    tracing::info!(backend = backend.name(), "Model loaded successfully");

    let (tx, rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = tx.send(());
    });

    tasklens_embed::http::start_http_server(&config, backend, rx).await
}
