/// Task endpoints: create, list (cached), get, patch-style update via PUT,
/// delete, history.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use taskhive_shared::models::{Task, TaskHistory, TaskPriority, TaskStatus};

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthUser;
use crate::routes::{decode_json, parse_query_i64};
use crate::services::task::{CreateTaskInput, ListTasksInput};

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateTaskRequest {
    team_id: i64,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    assignee_id: Option<i64>,
    #[serde(default)]
    due_date: Option<String>,
}

#[derive(Debug, Serialize)]
struct TaskResponse {
    id: i64,
    team_id: i64,
    title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    status: TaskStatus,
    priority: TaskPriority,
    #[serde(skip_serializing_if = "Option::is_none")]
    assignee_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    created_by: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    due_date: Option<NaiveDate>,
    created_at: String,
    updated_at: String,
}

impl From<&Task> for TaskResponse {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id,
            team_id: task.team_id,
            title: task.title.clone(),
            description: task.description.clone(),
            status: task.status,
            priority: task.priority,
            assignee_id: task.assignee_id,
            created_by: task.created_by,
            due_date: task.due_date,
            created_at: task.created_at.to_rfc3339(),
            updated_at: task.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ListTasksResponse {
    items: Vec<TaskResponse>,
    total: i64,
    limit: i64,
    offset: i64,
}

#[derive(Debug, Serialize)]
struct HistoryEntryResponse {
    id: i64,
    task_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    changed_by: Option<i64>,
    field_name: String,
    old_value: Option<Value>,
    new_value: Option<Value>,
    created_at: String,
}

impl From<&TaskHistory> for HistoryEntryResponse {
    fn from(entry: &TaskHistory) -> Self {
        Self {
            id: entry.id,
            task_id: entry.task_id,
            changed_by: entry.changed_by,
            field_name: entry.field_name.clone(),
            old_value: entry.old_value.clone(),
            new_value: entry.new_value.clone(),
            created_at: entry.created_at.to_rfc3339(),
        }
    }
}

pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    body: Bytes,
) -> ApiResult<Response> {
    let req: CreateTaskRequest = decode_json(&body)?;
    if req.team_id <= 0 || req.title.trim().is_empty() {
        return Err(ApiError::BadRequest);
    }

    let status = parse_enum::<TaskStatus>(req.status.as_deref())?;
    let priority = parse_enum::<TaskPriority>(req.priority.as_deref())?;
    let due_date = req
        .due_date
        .as_deref()
        .map(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| ApiError::BadRequest))
        .transpose()?;

    let team_id = req.team_id;
    let id = state
        .tasks
        .create_task(
            user.id,
            CreateTaskInput {
                team_id,
                title: req.title.trim().to_string(),
                description: req.description,
                status,
                priority,
                assignee_id: req.assignee_id,
                due_date,
            },
        )
        .await?;

    state.task_cache.invalidate_team(team_id).await;
    Ok((StatusCode::CREATED, Json(json!({ "status": "ok", "id": id }))).into_response())
}

pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult<Response> {
    let team_id = parse_query_i64(query.get("team_id"), 0)?;
    if team_id <= 0 {
        return Err(ApiError::BadRequest);
    }

    let limit = parse_query_i64(query.get("limit"), DEFAULT_PAGE_SIZE)?.clamp(1, MAX_PAGE_SIZE);
    let offset = parse_query_i64(query.get("offset"), 0)?.max(0);
    let status = parse_enum::<TaskStatus>(query.get("status").map(String::as_str))?;
    let assignee_id = match query.get("assignee_id").map(String::as_str) {
        None | Some("") => None,
        Some(raw) => Some(raw.parse::<i64>().map_err(|_| ApiError::BadRequest)?),
    };

    // Membership is checked before the cache so a cached page never leaks
    // across teams.
    state.teams.ensure_member_role(team_id, user.id).await?;

    let mut filters = BTreeMap::new();
    filters.insert("status", query.get("status").cloned().unwrap_or_default());
    filters.insert(
        "assignee_id",
        query.get("assignee_id").cloned().unwrap_or_default(),
    );
    filters.insert("limit", limit.to_string());
    filters.insert("offset", offset.to_string());

    if let Some(cached) = state.task_cache.get_list(team_id, &filters).await {
        return Ok(json_bytes(StatusCode::OK, cached));
    }

    let (tasks, total) = state
        .tasks
        .list_tasks(
            user.id,
            ListTasksInput {
                team_id,
                status,
                assignee_id,
                limit,
                offset,
            },
        )
        .await?;

    let response = ListTasksResponse {
        items: tasks.iter().map(TaskResponse::from).collect(),
        total,
        limit,
        offset,
    };
    let payload = serde_json::to_vec(&response).map_err(|_| ApiError::Internal)?;
    state.task_cache.set_list(team_id, &filters, &payload).await;
    Ok(json_bytes(StatusCode::OK, payload))
}

pub async fn get_one(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(task_id): Path<i64>,
) -> ApiResult<Response> {
    if task_id <= 0 {
        return Err(ApiError::BadRequest);
    }
    let task = state.tasks.get_task(user.id, task_id).await?;
    Ok(Json(TaskResponse::from(&task)).into_response())
}

pub async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(task_id): Path<i64>,
    body: Bytes,
) -> ApiResult<Response> {
    if task_id <= 0 {
        return Err(ApiError::BadRequest);
    }
    let patch: Map<String, Value> = decode_json(&body)?;
    if patch.is_empty() {
        return Err(ApiError::BadRequest);
    }

    let team_id = state.tasks.update_task(user.id, task_id, &patch).await?;
    state.task_cache.invalidate_team(team_id).await;
    Ok(Json(json!({ "status": "ok" })).into_response())
}

pub async fn remove(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(task_id): Path<i64>,
) -> ApiResult<Response> {
    if task_id <= 0 {
        return Err(ApiError::BadRequest);
    }
    let team_id = state.tasks.delete_task(user.id, task_id).await?;
    state.task_cache.invalidate_team(team_id).await;
    Ok(Json(json!({ "status": "ok" })).into_response())
}

pub async fn history(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(task_id): Path<i64>,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult<Response> {
    if task_id <= 0 {
        return Err(ApiError::BadRequest);
    }
    let limit = parse_query_i64(query.get("limit"), DEFAULT_PAGE_SIZE)?;
    let offset = parse_query_i64(query.get("offset"), 0)?;

    let (items, total) = state
        .tasks
        .get_task_history(user.id, task_id, limit, offset)
        .await?;

    Ok(Json(json!({
        "items": items.iter().map(HistoryEntryResponse::from).collect::<Vec<_>>(),
        "total": total,
        "limit": limit,
        "offset": offset,
    }))
    .into_response())
}

/// Optional enum query/body value; empty string means absent.
fn parse_enum<T: FromStr>(raw: Option<&str>) -> Result<Option<T>, ApiError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value.parse::<T>().map(Some).map_err(|_| ApiError::BadRequest),
    }
}

fn json_bytes(status: StatusCode, payload: Vec<u8>) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json; charset=utf-8")],
        payload,
    )
        .into_response()
}
