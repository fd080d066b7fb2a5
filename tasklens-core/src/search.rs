//! Nearest-neighbour task lookup over the `tasks.embedding` column.
//!
//! Ranking is done entirely by pgvector's `<->` (Euclidean distance); this
//! module only hands the query vector to PostgreSQL.

use pgvector::Vector;
use sqlx::PgPool;

use crate::config::VectorBinding;
use crate::error::TaskLensError;
use crate::models::Task;

const NEAREST_TASKS_SQL: &str = r#"
    SELECT id, title, description, status
    FROM tasks
    ORDER BY embedding <-> $1::vector
    LIMIT $2
"#;

/// Format an embedding as a pgvector text literal: `[0.1,0.2,0.3]`.
///
/// `f32` `Display` is the shortest representation that round-trips, so the
/// database sees the same values the model produced.
pub fn vector_literal(embedding: &[f32]) -> String {
    let mut out = String::with_capacity(embedding.len() * 12 + 2);
    out.push('[');
    for (i, v) in embedding.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&v.to_string());
    }
    out.push(']');
    out
}

/// Return the `limit` tasks closest to `embedding`, nearest first.
///
/// Dimension mismatches are not checked here; PostgreSQL rejects them.
pub async fn nearest_tasks(
    pool: &PgPool,
    embedding: &[f32],
    limit: u32,
    binding: VectorBinding,
) -> Result<Vec<Task>, TaskLensError> {
    let query = sqlx::query_as::<_, Task>(NEAREST_TASKS_SQL);
    let query = match binding {
        VectorBinding::Native => query.bind(Vector::from(embedding.to_vec())),
        VectorBinding::Literal => query.bind(vector_literal(embedding)),
    };

    let tasks = query.bind(limit as i64).fetch_all(pool).await?;
    tracing::debug!(count = tasks.len(), ?binding, "Nearest-task query complete");
    Ok(tasks)
}
