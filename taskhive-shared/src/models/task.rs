/// Tasks.
///
/// The interesting operation is [`Task::apply_fields`]: the task service
/// computes a diff as a list of [`TaskField`] values and this builds the
/// single dynamic UPDATE that applies them (always touching `updated_at`).
/// It only ever runs inside the update transaction, after the row-locked
/// fetch.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "task_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(TaskStatus::Todo),
            "in_progress" => Ok(TaskStatus::InProgress),
            "done" => Ok(TaskStatus::Done),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "task_priority", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
        }
    }
}

impl std::str::FromStr for TaskPriority {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(TaskPriority::Low),
            "medium" => Ok(TaskPriority::Medium),
            "high" => Ok(TaskPriority::High),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
    pub id: i64,
    pub team_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub assignee_id: Option<i64>,
    pub created_by: Option<i64>,
    pub due_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTask {
    pub team_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub assignee_id: Option<i64>,
    pub created_by: Option<i64>,
    pub due_date: Option<NaiveDate>,
}

/// One mutable task column with its new value. The task service produces
/// these from a validated patch; equal-to-current values never make it
/// this far.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskField {
    Title(String),
    Description(Option<String>),
    Status(TaskStatus),
    Priority(TaskPriority),
    AssigneeId(Option<i64>),
    DueDate(Option<NaiveDate>),
}

impl TaskField {
    /// Column / history field name.
    pub fn name(&self) -> &'static str {
        match self {
            TaskField::Title(_) => "title",
            TaskField::Description(_) => "description",
            TaskField::Status(_) => "status",
            TaskField::Priority(_) => "priority",
            TaskField::AssigneeId(_) => "assignee_id",
            TaskField::DueDate(_) => "due_date",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskListFilter {
    pub team_id: i64,
    pub status: Option<TaskStatus>,
    pub assignee_id: Option<i64>,
    pub limit: i64,
    pub offset: i64,
}

const SELECT_COLUMNS: &str = "id, team_id, title, description, status, priority, assignee_id, created_by, due_date, created_at, updated_at";

impl Task {
    pub async fn create(pool: &PgPool, new: &NewTask) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "INSERT INTO tasks (team_id, title, description, status, priority, assignee_id, created_by, due_date)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING id",
        )
        .bind(new.team_id)
        .bind(&new.title)
        .bind(&new.description)
        .bind(new.status)
        .bind(new.priority)
        .bind(new.assignee_id)
        .bind(new.created_by)
        .bind(new.due_date)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, task_id: i64) -> Result<Option<Task>, sqlx::Error> {
        sqlx::query_as::<_, Task>(&format!(
            "SELECT {SELECT_COLUMNS} FROM tasks WHERE id = $1"
        ))
        .bind(task_id)
        .fetch_optional(pool)
        .await
    }

    /// Row-locked fetch; serializes concurrent updates/deletes per task.
    pub async fn find_for_update(
        conn: &mut PgConnection,
        task_id: i64,
    ) -> Result<Option<Task>, sqlx::Error> {
        sqlx::query_as::<_, Task>(&format!(
            "SELECT {SELECT_COLUMNS} FROM tasks WHERE id = $1 FOR UPDATE"
        ))
        .bind(task_id)
        .fetch_optional(conn)
        .await
    }

    /// Page of tasks plus the unpaged total, ordered by
    /// `updated_at DESC, id DESC`.
    pub async fn list(
        pool: &PgPool,
        filter: &TaskListFilter,
    ) -> Result<(Vec<Task>, i64), sqlx::Error> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM tasks WHERE team_id = ");
        count.push_bind(filter.team_id);
        push_filters(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

        let mut query = QueryBuilder::<Postgres>::new(format!(
            "SELECT {SELECT_COLUMNS} FROM tasks WHERE team_id = "
        ));
        query.push_bind(filter.team_id);
        push_filters(&mut query, filter);
        query.push(" ORDER BY updated_at DESC, id DESC LIMIT ");
        query.push_bind(filter.limit);
        query.push(" OFFSET ");
        query.push_bind(filter.offset);

        let tasks = query.build_query_as::<Task>().fetch_all(pool).await?;
        Ok((tasks, total))
    }

    /// Applies the diffed fields in one dynamic UPDATE, bumping
    /// `updated_at`. Callers must not pass an empty slice.
    pub async fn apply_fields(
        conn: &mut PgConnection,
        task_id: i64,
        fields: &[TaskField],
    ) -> Result<(), sqlx::Error> {
        debug_assert!(!fields.is_empty());

        let mut query = QueryBuilder::<Postgres>::new("UPDATE tasks SET ");
        let mut set = query.separated(", ");
        for field in fields {
            match field {
                TaskField::Title(v) => {
                    set.push("title = ").push_bind_unseparated(v.clone());
                }
                TaskField::Description(v) => {
                    set.push("description = ").push_bind_unseparated(v.clone());
                }
                TaskField::Status(v) => {
                    set.push("status = ").push_bind_unseparated(*v);
                }
                TaskField::Priority(v) => {
                    set.push("priority = ").push_bind_unseparated(*v);
                }
                TaskField::AssigneeId(v) => {
                    set.push("assignee_id = ").push_bind_unseparated(*v);
                }
                TaskField::DueDate(v) => {
                    set.push("due_date = ").push_bind_unseparated(*v);
                }
            }
        }
        set.push("updated_at = NOW()");
        query.push(" WHERE id = ");
        query.push_bind(task_id);

        query.build().execute(conn).await?;
        Ok(())
    }

    pub async fn delete_tx(conn: &mut PgConnection, task_id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(task_id)
            .execute(conn)
            .await?;
        Ok(())
    }
}

fn push_filters(query: &mut QueryBuilder<'_, Postgres>, filter: &TaskListFilter) {
    if let Some(status) = filter.status {
        query.push(" AND status = ");
        query.push_bind(status);
    }
    if let Some(assignee_id) = filter.assignee_id {
        query.push(" AND assignee_id = ");
        query.push_bind(assignee_id);
    }
}
