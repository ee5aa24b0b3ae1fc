/// Task service: CRUD with per-role patch rules and transactional audit
/// history, plus comments.
///
/// Updates are the centerpiece. A patch arrives as a JSON mapping from
/// field name to value, is parsed into typed [`TaskField`] values (with
/// absent-vs-null preserved for the nullable fields), filtered through the
/// caller's role allow-list, diffed against the row-locked current state,
/// and applied together with its history rows in one transaction. History
/// is observable iff the task row changed.

use chrono::NaiveDate;
use serde_json::{json, Map, Value};
use sqlx::PgPool;

use taskhive_shared::models::history::FIELD_TASK_DELETED;
use taskhive_shared::models::{
    NewTask, NewTaskHistory, Task, TaskComment, TaskField, TaskHistory, TaskListFilter,
    TaskPriority, TaskStatus, Team, TeamMember, TeamRole,
};
use taskhive_shared::Error;

const MAX_PAGE_SIZE: i64 = 100;

pub struct TaskService {
    pool: PgPool,
}

#[derive(Debug, Clone, Default)]
pub struct CreateTaskInput {
    pub team_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub assignee_id: Option<i64>,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default)]
pub struct ListTasksInput {
    pub team_id: i64,
    pub status: Option<TaskStatus>,
    pub assignee_id: Option<i64>,
    pub limit: i64,
    pub offset: i64,
}

impl TaskService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates a task. Status and priority default to `todo` / `medium`;
    /// an assignee must already belong to the team.
    pub async fn create_task(&self, user_id: i64, input: CreateTaskInput) -> Result<i64, Error> {
        Team::find_by_id(&self.pool, input.team_id)
            .await?
            .ok_or(Error::NotFound)?;
        if !TeamMember::is_member(&self.pool, input.team_id, user_id).await? {
            return Err(Error::Forbidden);
        }

        if let Some(assignee_id) = input.assignee_id {
            if !TeamMember::is_member(&self.pool, input.team_id, assignee_id).await? {
                return Err(Error::BadRequest);
            }
        }

        let new = NewTask {
            team_id: input.team_id,
            title: input.title,
            description: input.description.filter(|d| !d.trim().is_empty()),
            status: input.status.unwrap_or(TaskStatus::Todo),
            priority: input.priority.unwrap_or(TaskPriority::Medium),
            assignee_id: input.assignee_id,
            created_by: Some(user_id),
            due_date: input.due_date,
        };
        Ok(Task::create(&self.pool, &new).await?)
    }

    pub async fn get_task(&self, user_id: i64, task_id: i64) -> Result<Task, Error> {
        let task = Task::find_by_id(&self.pool, task_id)
            .await?
            .ok_or(Error::NotFound)?;
        if !TeamMember::is_member(&self.pool, task.team_id, user_id).await? {
            return Err(Error::Forbidden);
        }
        Ok(task)
    }

    pub async fn list_tasks(
        &self,
        user_id: i64,
        input: ListTasksInput,
    ) -> Result<(Vec<Task>, i64), Error> {
        Team::find_by_id(&self.pool, input.team_id)
            .await?
            .ok_or(Error::NotFound)?;
        if !TeamMember::is_member(&self.pool, input.team_id, user_id).await? {
            return Err(Error::Forbidden);
        }

        let filter = TaskListFilter {
            team_id: input.team_id,
            status: input.status,
            assignee_id: input.assignee_id,
            limit: input.limit.clamp(1, MAX_PAGE_SIZE),
            offset: input.offset.max(0),
        };
        Ok(Task::list(&self.pool, &filter).await?)
    }

    /// Applies a patch transactionally. Returns the task's team id so the
    /// caller can invalidate the list cache.
    ///
    /// The task row is locked for the whole protocol; concurrent patches
    /// of the same task serialize, and the update plus its history rows
    /// commit atomically (or not at all).
    pub async fn update_task(
        &self,
        user_id: i64,
        task_id: i64,
        patch: &Map<String, Value>,
    ) -> Result<i64, Error> {
        if patch.is_empty() {
            return Err(Error::BadRequest);
        }

        let mut tx = self.pool.begin().await?;

        let task = Task::find_for_update(&mut *tx, task_id)
            .await?
            .ok_or(Error::NotFound)?;
        let role = TeamMember::role_tx(&mut *tx, task.team_id, user_id)
            .await?
            .ok_or(Error::Forbidden)?;

        let mut fields = Vec::with_capacity(patch.len());
        for (key, value) in patch {
            let field = parse_patch_field(key, value)?;
            if let TaskField::AssigneeId(Some(assignee_id)) = field {
                if !TeamMember::is_member_tx(&mut *tx, task.team_id, assignee_id).await? {
                    return Err(Error::BadRequest);
                }
            }
            fields.push(field);
        }

        let allowed = allowed_fields(role);
        if fields.iter().any(|f| !allowed.contains(&f.name())) {
            return Err(Error::Forbidden);
        }

        let (changes, history) = compute_diff(&task, fields, user_id);
        if changes.is_empty() {
            // Nothing differs from the current row; commit the no-op.
            tx.commit().await?;
            return Ok(task.team_id);
        }

        Task::apply_fields(&mut *tx, task_id, &changes).await?;
        TaskHistory::create_batch_tx(&mut *tx, &history).await?;
        tx.commit().await?;

        Ok(task.team_id)
    }

    /// Deletes a task, preserving a full snapshot in a single
    /// `task_deleted` history row written in the same transaction.
    /// Comments go with the task via the schema's cascade.
    pub async fn delete_task(&self, user_id: i64, task_id: i64) -> Result<i64, Error> {
        let mut tx = self.pool.begin().await?;

        let task = Task::find_for_update(&mut *tx, task_id)
            .await?
            .ok_or(Error::NotFound)?;
        let role = TeamMember::role_tx(&mut *tx, task.team_id, user_id)
            .await?
            .ok_or(Error::Forbidden)?;
        if !matches!(role, TeamRole::Owner | TeamRole::Admin) {
            return Err(Error::Forbidden);
        }

        let snapshot = task_snapshot(&task);
        TaskHistory::create_batch_tx(
            &mut *tx,
            &[NewTaskHistory {
                task_id,
                changed_by: Some(user_id),
                field_name: FIELD_TASK_DELETED.to_string(),
                old_value: Some(snapshot),
                new_value: None,
            }],
        )
        .await?;
        Task::delete_tx(&mut *tx, task_id).await?;
        tx.commit().await?;

        Ok(task.team_id)
    }

    /// History page for a task; `limit` must be in [1, 100] and `offset`
    /// non-negative.
    pub async fn get_task_history(
        &self,
        user_id: i64,
        task_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<TaskHistory>, i64), Error> {
        if !(1..=MAX_PAGE_SIZE).contains(&limit) || offset < 0 {
            return Err(Error::BadRequest);
        }

        let task = Task::find_by_id(&self.pool, task_id)
            .await?
            .ok_or(Error::NotFound)?;
        if !TeamMember::is_member(&self.pool, task.team_id, user_id).await? {
            return Err(Error::Forbidden);
        }

        Ok(TaskHistory::list_by_task(&self.pool, task_id, limit, offset).await?)
    }

    pub async fn create_comment(
        &self,
        user_id: i64,
        task_id: i64,
        body: &str,
    ) -> Result<i64, Error> {
        let task = Task::find_by_id(&self.pool, task_id)
            .await?
            .ok_or(Error::NotFound)?;
        if !TeamMember::is_member(&self.pool, task.team_id, user_id).await? {
            return Err(Error::Forbidden);
        }
        Ok(TaskComment::create(&self.pool, task_id, user_id, body).await?)
    }

    pub async fn list_comments(
        &self,
        user_id: i64,
        task_id: i64,
    ) -> Result<Vec<TaskComment>, Error> {
        let task = Task::find_by_id(&self.pool, task_id)
            .await?
            .ok_or(Error::NotFound)?;
        if !TeamMember::is_member(&self.pool, task.team_id, user_id).await? {
            return Err(Error::Forbidden);
        }
        Ok(TaskComment::list_by_task(&self.pool, task_id).await?)
    }

    pub async fn update_comment(
        &self,
        user_id: i64,
        comment_id: i64,
        body: &str,
    ) -> Result<(), Error> {
        self.authorize_comment_mutation(user_id, comment_id).await?;
        Ok(TaskComment::update(&self.pool, comment_id, body).await?)
    }

    pub async fn delete_comment(&self, user_id: i64, comment_id: i64) -> Result<(), Error> {
        self.authorize_comment_mutation(user_id, comment_id).await?;
        Ok(TaskComment::delete(&self.pool, comment_id).await?)
    }

    /// Author, owner, or admin may mutate a comment.
    async fn authorize_comment_mutation(&self, user_id: i64, comment_id: i64) -> Result<(), Error> {
        let comment = TaskComment::find_by_id(&self.pool, comment_id)
            .await?
            .ok_or(Error::NotFound)?;
        let task = Task::find_by_id(&self.pool, comment.task_id)
            .await?
            .ok_or(Error::NotFound)?;
        let role = TeamMember::role(&self.pool, task.team_id, user_id)
            .await?
            .ok_or(Error::Forbidden)?;
        if comment.user_id != user_id && !matches!(role, TeamRole::Owner | TeamRole::Admin) {
            return Err(Error::Forbidden);
        }
        Ok(())
    }
}

/// Mutable fields per role. Owners and admins patch everything; members
/// only move tasks along (status) and hand them over (assignee).
fn allowed_fields(role: TeamRole) -> &'static [&'static str] {
    match role {
        TeamRole::Owner | TeamRole::Admin => &[
            "title",
            "description",
            "status",
            "priority",
            "assignee_id",
            "due_date",
        ],
        TeamRole::Member => &["status", "assignee_id"],
    }
}

/// Parses one patch entry into a typed field. Unknown names and malformed
/// values are bad requests; null is meaningful for the nullable fields.
fn parse_patch_field(key: &str, value: &Value) -> Result<TaskField, Error> {
    match key {
        "title" => match value.as_str() {
            Some(title) if !title.trim().is_empty() => Ok(TaskField::Title(title.to_string())),
            _ => Err(Error::BadRequest),
        },
        "description" => match value {
            Value::Null => Ok(TaskField::Description(None)),
            Value::String(s) => Ok(TaskField::Description(Some(s.clone()))),
            _ => Err(Error::BadRequest),
        },
        "status" => serde_json::from_value::<TaskStatus>(value.clone())
            .map(TaskField::Status)
            .map_err(|_| Error::BadRequest),
        "priority" => serde_json::from_value::<TaskPriority>(value.clone())
            .map(TaskField::Priority)
            .map_err(|_| Error::BadRequest),
        "assignee_id" => match value {
            Value::Null => Ok(TaskField::AssigneeId(None)),
            Value::Number(n) => n
                .as_i64()
                .map(|id| TaskField::AssigneeId(Some(id)))
                .ok_or(Error::BadRequest),
            _ => Err(Error::BadRequest),
        },
        "due_date" => match value {
            Value::Null => Ok(TaskField::DueDate(None)),
            Value::String(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(|d| TaskField::DueDate(Some(d)))
                .map_err(|_| Error::BadRequest),
            _ => Err(Error::BadRequest),
        },
        _ => Err(Error::BadRequest),
    }
}

/// Drops fields equal to the current row and pairs every survivor with its
/// history entry (JSON-encoded old and new values, attributed to the
/// caller).
fn compute_diff(
    task: &Task,
    fields: Vec<TaskField>,
    changed_by: i64,
) -> (Vec<TaskField>, Vec<NewTaskHistory>) {
    let mut changes = Vec::new();
    let mut history = Vec::new();

    for field in fields {
        let (old_value, new_value) = match &field {
            TaskField::Title(new) => {
                if *new == task.title {
                    continue;
                }
                (json!(task.title), json!(new))
            }
            TaskField::Description(new) => {
                if *new == task.description {
                    continue;
                }
                (json!(task.description), json!(new))
            }
            TaskField::Status(new) => {
                if *new == task.status {
                    continue;
                }
                (json!(task.status), json!(new))
            }
            TaskField::Priority(new) => {
                if *new == task.priority {
                    continue;
                }
                (json!(task.priority), json!(new))
            }
            TaskField::AssigneeId(new) => {
                if *new == task.assignee_id {
                    continue;
                }
                (json!(task.assignee_id), json!(new))
            }
            TaskField::DueDate(new) => {
                if *new == task.due_date {
                    continue;
                }
                (json!(task.due_date), json!(new))
            }
        };

        history.push(NewTaskHistory {
            task_id: task.id,
            changed_by: Some(changed_by),
            field_name: field.name().to_string(),
            old_value: Some(old_value),
            new_value: Some(new_value),
        });
        changes.push(field);
    }

    (changes, history)
}

/// Snapshot stored in the `task_deleted` history row.
fn task_snapshot(task: &Task) -> Value {
    json!({
        "id": task.id,
        "title": task.title,
        "description": task.description,
        "status": task.status,
        "assignee_id": task.assignee_id,
        "priority": task.priority,
        "due_date": task.due_date,
    })
}
