//! tasklens-cli: nearest-task lookup and an end-to-end smoke run of the services
//!
//! # Subcommands
//! - `query [TEXT] [-n <limit>]`: embed TEXT (default `query.text`) and print
//!   the closest stored tasks
//! - `smoke`                    : walk the task API and embedding service

mod smoke;

use clap::{Parser, Subcommand};
use tasklens_core::embeddings::{create_backend, BackendConfig};
use tasklens_core::search::nearest_tasks;
use tasklens_core::{EmbeddingBackend, Task, TaskLensConfig};
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_API_URL: &str = "http://localhost:5000";
const DEFAULT_EMBED_URL: &str = "http://localhost:6000";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "tasklens-cli", version, about = "tasklens query tool and API smoke harness")]
struct Cli {
    #[arg(short, long, global = true, default_value = "tasklens.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the stored tasks closest to a query
    Query {
        /// Query text (overrides `query.text`)
        text: Option<String>,

        /// Number of tasks to print (overrides `query.limit`)
        #[arg(short = 'n', long)]
        limit: Option<u32>,
    },

    /// Exercise a running task API and embedding service
    Smoke {
        /// Task API base URL
        #[arg(long, env = "TASKLENS_API_URL", default_value = DEFAULT_API_URL)]
        api_url: String,

        /// Embedding service base URL
        #[arg(long, env = "TASKLENS_EMBED_URL", default_value = DEFAULT_EMBED_URL)]
        embed_url: String,
    },
}

// ============================================================================
// Output formatting
// ============================================================================

pub fn format_header(limit: u32) -> String {
    format!("Top {} similar tasks:", limit)
}

pub fn format_task(task: &Task) -> String {
    format!(
        "ID: {}, Title: {}, Description: {}, Status: {}",
        task.id, task.title, task.description, task.status
    )
}

// ============================================================================
// Query
// ============================================================================

async fn do_query(config: &TaskLensConfig, text: &str, limit: u32) -> anyhow::Result<()> {
    let backend = create_backend(BackendConfig::from_config(&config.embedding)?)?;
    tracing::debug!(backend = backend.name(), "Embedding backend ready");

    let embedding = backend.embed(text).await?;

    let pool = tasklens_core::db::create_pool(&config.database).await?;
    let tasks = nearest_tasks(&pool, &embedding, limit, config.database.vector_binding).await?;
    pool.close().await;

    println!("{}", format_header(limit));
    for task in &tasks {
        println!("{}", format_task(task));
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // stdout carries the results; logs go to stderr and default to warnings.
    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .init();

    let result = match cli.command {
        Commands::Query { text, limit } => run_query(&cli.config, text, limit),
        Commands::Smoke { api_url, embed_url } => {
            smoke::SmokeRun::new(&api_url, &embed_url).and_then(|run| {
                run.run_all(&mut std::io::stdout().lock())?;
                Ok(())
            })
        }
    };

    if let Err(e) = result {
        eprintln!("tasklens-cli: {}", e);
        std::process::exit(1);
    }
}

fn run_query(config_path: &str, text: Option<String>, limit: Option<u32>) -> anyhow::Result<()> {
    let config = TaskLensConfig::load(config_path)?;
    let text = text.unwrap_or_else(|| config.query.text.clone());
    let limit = limit.unwrap_or(config.query.limit);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(do_query(&config, &text, limit))
}

// ============================================================================
// Tests
// ============================================================================
