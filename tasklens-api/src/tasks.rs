//! Task persistence for the `tasks` table and its embedding column.

use pgvector::Vector;
use sqlx::PgPool;
use tasklens_core::config::VectorBinding;
use tasklens_core::models::ValidTask;
use tasklens_core::search::vector_literal;
use tasklens_core::{Task, TaskLensError};

/// All tasks, newest first. Embeddings are not selected.
pub async fn list_tasks(pool: &PgPool) -> Result<Vec<Task>, TaskLensError> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT id, title, description, status FROM tasks ORDER BY id DESC",
    )
    .fetch_all(pool)
    .await?;
    Ok(tasks)
}

/// Insert a validated task together with its description embedding.
pub async fn create_task(
    pool: &PgPool,
    task: &ValidTask,
    embedding: &[f32],
    binding: VectorBinding,
) -> Result<Task, TaskLensError> {
    let query = sqlx::query_as::<_, Task>(
        r#"
        INSERT INTO tasks (title, description, status, embedding)
        VALUES ($1, $2, $3, $4::vector)
        RETURNING id, title, description, status
        "#,
    )
    .bind(&task.title)
    .bind(&task.description)
    .bind(task.status.as_str());

    let query = match binding {
        VectorBinding::Native => query.bind(Vector::from(embedding.to_vec())),
        VectorBinding::Literal => query.bind(vector_literal(embedding)),
    };

    let created = query.fetch_one(pool).await?;
    tracing::info!(id = created.id, "Task created");
    Ok(created)
}

/// Delete by id. Returns the number of rows removed (0 or 1).
pub async fn delete_task(pool: &PgPool, id: i32) -> Result<u64, TaskLensError> {
    let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
