/// Comment endpoints.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;

use taskhive_shared::models::TaskComment;

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthUser;
use crate::routes::decode_json;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CommentRequest {
    body: String,
}

#[derive(Debug, Serialize)]
struct CommentResponse {
    id: i64,
    task_id: i64,
    user_id: i64,
    body: String,
    created_at: String,
    updated_at: String,
}

impl From<&TaskComment> for CommentResponse {
    fn from(comment: &TaskComment) -> Self {
        Self {
            id: comment.id,
            task_id: comment.task_id,
            user_id: comment.user_id,
            body: comment.body.clone(),
            created_at: comment.created_at.to_rfc3339(),
            updated_at: comment.updated_at.to_rfc3339(),
        }
    }
}

pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(task_id): Path<i64>,
    body: Bytes,
) -> ApiResult<Response> {
    if task_id <= 0 {
        return Err(ApiError::BadRequest);
    }
    let req: CommentRequest = decode_json(&body)?;
    let text = req.body.trim();
    if text.is_empty() {
        return Err(ApiError::BadRequest);
    }

    let id = state.tasks.create_comment(user.id, task_id, text).await?;
    Ok((StatusCode::CREATED, Json(json!({ "status": "ok", "id": id }))).into_response())
}

pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(task_id): Path<i64>,
) -> ApiResult<Response> {
    if task_id <= 0 {
        return Err(ApiError::BadRequest);
    }
    let comments = state.tasks.list_comments(user.id, task_id).await?;
    Ok(Json(json!({
        "items": comments.iter().map(CommentResponse::from).collect::<Vec<_>>(),
    }))
    .into_response())
}

pub async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(comment_id): Path<i64>,
    body: Bytes,
) -> ApiResult<Response> {
    if comment_id <= 0 {
        return Err(ApiError::BadRequest);
    }
    let req: CommentRequest = decode_json(&body)?;
    let text = req.body.trim();
    if text.is_empty() {
        return Err(ApiError::BadRequest);
    }

    state.tasks.update_comment(user.id, comment_id, text).await?;
    Ok(Json(json!({ "status": "ok" })).into_response())
}

pub async fn remove(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(comment_id): Path<i64>,
) -> ApiResult<Response> {
    if comment_id <= 0 {
        return Err(ApiError::BadRequest);
    }
    state.tasks.delete_comment(user.id, comment_id).await?;
    Ok(Json(json!({ "status": "ok" })).into_response())
}
