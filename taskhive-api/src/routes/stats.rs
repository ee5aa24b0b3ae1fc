/// Analytics endpoints.
///
/// Window bounds arrive as strict RFC3339 UTC timestamps (`Z` or `+00:00`
/// offsets only); anything else is a 400 before the service runs.

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde_json::json;

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthUser;

pub async fn team_done(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult<Response> {
    let (from, to) = parse_window(&query)?;
    let rows = state.stats.team_done_stats(user.id, from, to).await?;

    let items: Vec<_> = rows
        .iter()
        .map(|row| {
            json!({
                "team_id": row.team_id,
                "team_name": row.team_name,
                "members_count": row.members_count,
                "done_count": row.done_count,
            })
        })
        .collect();
    Ok(Json(json!({ "items": items })).into_response())
}

pub async fn top_creators(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult<Response> {
    let (from, to) = parse_window(&query)?;
    let limit: i64 = query
        .get("limit")
        .ok_or(ApiError::BadRequest)?
        .parse()
        .map_err(|_| ApiError::BadRequest)?;

    let rows = state
        .stats
        .top_creators_by_team(user.id, from, to, limit)
        .await?;

    let items: Vec<_> = rows
        .iter()
        .map(|row| {
            json!({
                "team_id": row.team_id,
                "user_id": row.user_id,
                "created_count": row.created_count,
                "rank": row.rank,
            })
        })
        .collect();
    Ok(Json(json!({ "items": items })).into_response())
}

pub async fn integrity(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Response> {
    let rows = state.stats.tasks_with_assignee_not_member(user.id).await?;

    let items: Vec<_> = rows
        .iter()
        .map(|row| {
            json!({
                "task_id": row.task_id,
                "team_id": row.team_id,
                "assignee_id": row.assignee_id,
            })
        })
        .collect();
    Ok(Json(json!({ "items": items })).into_response())
}

fn parse_window(query: &HashMap<String, String>) -> Result<(DateTime<Utc>, DateTime<Utc>), ApiError> {
    let from = parse_rfc3339_utc(query.get("from").ok_or(ApiError::BadRequest)?)?;
    let to = parse_rfc3339_utc(query.get("to").ok_or(ApiError::BadRequest)?)?;
    Ok((from, to))
}

fn parse_rfc3339_utc(raw: &str) -> Result<DateTime<Utc>, ApiError> {
    let parsed = DateTime::parse_from_rfc3339(raw).map_err(|_| ApiError::BadRequest)?;
    if parsed.offset().local_minus_utc() != 0 {
        return Err(ApiError::BadRequest);
    }
    Ok(parsed.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_parsing_requires_utc() {
        assert!(parse_rfc3339_utc("2026-01-01T00:00:00Z").is_ok());
        assert!(parse_rfc3339_utc("2026-01-01T00:00:00+00:00").is_ok());
        assert!(parse_rfc3339_utc("2026-01-01T00:00:00+02:00").is_err());
        assert!(parse_rfc3339_utc("2026-01-01").is_err());
        assert!(parse_rfc3339_utc("garbage").is_err());
    }
}
