/// Task comments. Cascade-deleted with their task by the schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskComment {
    pub id: i64,
    pub task_id: i64,
    pub user_id: i64,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskComment {
    pub async fn create(
        pool: &PgPool,
        task_id: i64,
        user_id: i64,
        body: &str,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "INSERT INTO task_comments (task_id, user_id, body) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(task_id)
        .bind(user_id)
        .bind(body)
        .fetch_one(pool)
        .await
    }

    pub async fn list_by_task(
        pool: &PgPool,
        task_id: i64,
    ) -> Result<Vec<TaskComment>, sqlx::Error> {
        sqlx::query_as::<_, TaskComment>(
            "SELECT id, task_id, user_id, body, created_at, updated_at
             FROM task_comments
             WHERE task_id = $1
             ORDER BY created_at ASC, id ASC",
        )
        .bind(task_id)
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_id(
        pool: &PgPool,
        comment_id: i64,
    ) -> Result<Option<TaskComment>, sqlx::Error> {
        sqlx::query_as::<_, TaskComment>(
            "SELECT id, task_id, user_id, body, created_at, updated_at
             FROM task_comments WHERE id = $1",
        )
        .bind(comment_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn update(pool: &PgPool, comment_id: i64, body: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE task_comments SET body = $1, updated_at = NOW() WHERE id = $2")
            .bind(body)
            .bind(comment_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn delete(pool: &PgPool, comment_id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM task_comments WHERE id = $1")
            .bind(comment_id)
            .execute(pool)
            .await?;
        Ok(())
    }
}
