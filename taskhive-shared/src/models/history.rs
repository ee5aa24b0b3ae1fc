/// Append-only task audit history.
///
/// One row per changed field per committed update, carrying JSON-encoded
/// old and new values; deleting a task appends one `task_deleted` row whose
/// old value is a full snapshot. Inserts only ever happen inside the same
/// transaction as the task mutation they record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgConnection, PgPool};

/// Field name used for the delete snapshot row.
pub const FIELD_TASK_DELETED: &str = "task_deleted";

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskHistory {
    pub id: i64,
    pub task_id: i64,
    pub changed_by: Option<i64>,
    pub field_name: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTaskHistory {
    pub task_id: i64,
    pub changed_by: Option<i64>,
    pub field_name: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

impl TaskHistory {
    /// Inserts a batch of history rows within the caller's transaction.
    pub async fn create_batch_tx(
        conn: &mut PgConnection,
        entries: &[NewTaskHistory],
    ) -> Result<(), sqlx::Error> {
        for entry in entries {
            sqlx::query(
                "INSERT INTO task_history (task_id, changed_by, field_name, old_value, new_value)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(entry.task_id)
            .bind(entry.changed_by)
            .bind(&entry.field_name)
            .bind(&entry.old_value)
            .bind(&entry.new_value)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    /// Newest-first page plus total count.
    pub async fn list_by_task(
        pool: &PgPool,
        task_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<TaskHistory>, i64), sqlx::Error> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM task_history WHERE task_id = $1")
                .bind(task_id)
                .fetch_one(pool)
                .await?;

        let items = sqlx::query_as::<_, TaskHistory>(
            "SELECT id, task_id, changed_by, field_name, old_value, new_value, created_at
             FROM task_history
             WHERE task_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT $2 OFFSET $3",
        )
        .bind(task_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

        Ok((items, total))
    }
}
