/// Team endpoints: create (idempotent via header), list, invite.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;

use taskhive_shared::models::TeamRole;

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthUser;
use crate::routes::decode_json;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateTeamRequest {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct InviteRequest {
    email: String,
    #[serde(default)]
    role: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    body: Bytes,
) -> ApiResult<Response> {
    let req: CreateTeamRequest = decode_json(&body)?;
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest);
    }

    let id = state.teams.create_team(user.id, name).await?;
    Ok((StatusCode::CREATED, Json(json!({ "status": "ok", "id": id }))).into_response())
}

pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Response> {
    let teams = state.teams.list_teams(user.id).await?;
    let items: Vec<_> = teams
        .iter()
        .map(|t| json!({ "id": t.id, "name": t.name }))
        .collect();
    Ok(Json(json!({ "teams": items })).into_response())
}

pub async fn invite(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(team_id): Path<i64>,
    body: Bytes,
) -> ApiResult<Response> {
    if team_id <= 0 {
        return Err(ApiError::BadRequest);
    }
    let req: InviteRequest = decode_json(&body)?;
    let email = req.email.trim();
    if email.is_empty() {
        return Err(ApiError::BadRequest);
    }

    // Only member and admin can be granted by invite; ownership is not
    // transferable this way.
    let role = match req.role.as_deref().map(str::trim).unwrap_or("") {
        "" | "member" => TeamRole::Member,
        "admin" => TeamRole::Admin,
        _ => return Err(ApiError::BadRequest),
    };

    state
        .teams
        .invite_by_email(user.id, team_id, email, role)
        .await?;
    Ok(Json(json!({ "status": "ok" })).into_response())
}
