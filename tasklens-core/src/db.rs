use crate::config::DatabaseConfig;
use crate::error::TaskLensError;
use sqlx::{postgres::PgPoolOptions, PgPool};

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, TaskLensError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await?;
    Ok(pool)
}

pub async fn health_check(pool: &PgPool) -> Result<String, TaskLensError> {
    let row: (String,) = sqlx::query_as("SELECT version()").fetch_one(pool).await?;
    Ok(row.0)
}

pub async fn check_pgvector(pool: &PgPool) -> Result<String, TaskLensError> {
    let row: (String,) =
        sqlx::query_as("SELECT extversion FROM pg_extension WHERE extname = 'vector'")
            .fetch_one(pool)
            .await?;
    Ok(row.0)
}

/// Create the `vector` extension and the `tasks` table if they are missing.
///
/// `dimensions` sizes the embedding column and must match the model width.
pub async fn ensure_schema(pool: &PgPool, dimensions: u32) -> Result<(), TaskLensError> {
    sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
        .execute(pool)
        .await?;

    sqlx::query(&tasks_table_ddl(dimensions))
        .execute(pool)
        .await?;

    tracing::debug!(dimensions, "Task schema ready");
    Ok(())
}

fn tasks_table_ddl(dimensions: u32) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id SERIAL PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'todo',
            embedding vector({dimensions})
        )
        "#
    )
}
