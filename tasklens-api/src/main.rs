use std::sync::Arc;

use clap::Parser;
use tasklens_core::{EmbeddingBackend, RemoteConfig, RemoteEmbeddingClient, TaskLensConfig};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "tasklens.toml")]
    config: String,

    /// Check database connectivity and pgvector, then exit
    #[arg(long)]
    health: bool,
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

    let pool = match tasklens_core::db::create_pool(&config.database).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        match tasklens_core::db::health_check(&pool).await {
            Ok(v) => println!("✅ PostgreSQL connected: {}", v),
            Err(e) => {
                println!("❌ PostgreSQL connection failed: {}", e);
                std::process::exit(1);
            }
        }

        match tasklens_core::db::check_pgvector(&pool).await {
            Ok(v) => println!("✅ pgvector version: {}", v),
            Err(e) => {
                println!("❌ pgvector check failed: {}", e);
                std::process::exit(1);
            }
        }

        println!("✅ tasklens DB health check passed");
        return Ok(());
    }

    tasklens_core::db::ensure_schema(&pool, config.embedding.dimensions).await?;

    // Tasks are always embedded through the embedding service.
    let embedder: Arc<dyn EmbeddingBackend> = Arc::new(RemoteEmbeddingClient::new(
        RemoteConfig::from_config(&config.embedding),
    )?);
    tracing::info!(url = %config.embedding.service_url, "Using embedding service");

    let (tx, rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = tx.send(());
    });

    tasklens_api::http::start_http_server(pool, config, embedder, rx).await
}
