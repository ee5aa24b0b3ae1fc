/// Public auth endpoints: register, login, refresh.
///
/// Login layers three gates before the credential check: the per-IP rate
/// limiter, then the lockout ban, then (on an invalid-credential result)
/// the failure counter that may ban the login. Refresh rate-limits per
/// user id parsed from the (signature-checked) token before touching the
/// store.

use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use taskhive_shared::auth::lockout::retry_after_secs;
use taskhive_shared::Error;

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};
use crate::middleware::client_ip;
use crate::routes::decode_json;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegisterRequest {
    email: String,
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LoginRequest {
    login: String,
    password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RefreshRequest {
    refresh_token: String,
}

pub async fn register(State(state): State<AppState>, body: Bytes) -> ApiResult<Response> {
    let req: RegisterRequest = decode_json(&body)?;

    let id = state
        .auth
        .register(req.email.trim(), req.username.trim(), &req.password)
        .await
        .map_err(|err| match err {
            Error::Conflict => ApiError::Conflict("conflict"),
            Error::BadRequest => ApiError::BadRequest,
            other => ApiError::from(other),
        })?;

    let response = (
        StatusCode::CREATED,
        [(header::LOCATION, format!("/api/v1/users/{id}"))],
        Json(json!({ "status": "ok", "id": id })),
    );
    Ok(response.into_response())
}

pub async fn login(
    State(state): State<AppState>,
    connect_info: Option<Extension<ConnectInfo<SocketAddr>>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let peer = connect_info.map(|Extension(ConnectInfo(addr))| addr);
    let ip = client_ip(&headers, peer);

    let decision = state.login_limiter.allow(&ip).await;
    if !decision.allowed {
        return Err(ApiError::TooManyRequests {
            retry_after_secs: retry_after_secs(decision.retry_after),
        });
    }

    let req: LoginRequest = decode_json(&body)?;
    let normalized = state.lockout.normalize(req.login.trim()).map_err(|_| ApiError::BadRequest)?;

    if let Some(remaining) = state.lockout.is_locked(&normalized).await {
        return Err(ApiError::TooManyRequests {
            retry_after_secs: retry_after_secs(remaining),
        });
    }

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok());

    match state
        .auth
        .login(&normalized, &req.password, Some(&ip), user_agent)
        .await
    {
        Ok(pair) => {
            state.lockout.on_success(&normalized).await;
            Ok(Json(json!({
                "access_token": pair.access_token,
                "refresh_token": pair.refresh_token,
            }))
            .into_response())
        }
        Err(Error::InvalidCredentials) => {
            if let Some(ttl) = state.lockout.on_failure(&normalized).await {
                return Err(ApiError::TooManyRequests {
                    retry_after_secs: retry_after_secs(ttl),
                });
            }
            Err(ApiError::Unauthorized("invalid credentials"))
        }
        // Never leak which arm failed.
        Err(_) => Err(ApiError::Unauthorized("invalid credentials")),
    }
}

pub async fn refresh(
    State(state): State<AppState>,
    connect_info: Option<Extension<ConnectInfo<SocketAddr>>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let req: RefreshRequest = decode_json(&body)?;
    let token = req.refresh_token.trim();
    if token.is_empty() {
        return Err(ApiError::BadRequest);
    }

    let user_id = state
        .auth
        .parse_refresh_user_id(token)
        .map_err(|_| ApiError::Unauthorized("invalid token"))?;

    let decision = state.refresh_limiter.allow(&user_id.to_string()).await;
    if !decision.allowed {
        return Err(ApiError::TooManyRequests {
            retry_after_secs: retry_after_secs(decision.retry_after),
        });
    }

    let peer = connect_info.map(|Extension(ConnectInfo(addr))| addr);
    let ip = client_ip(&headers, peer);
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok());

    let pair = state
        .auth
        .refresh(token, Some(&ip), user_agent)
        .await
        // Reuse, expiry, and store failures all collapse to the same 401.
        .map_err(|_| ApiError::Unauthorized("invalid token"))?;

    Ok(Json(json!({
        "access_token": pair.access_token,
        "refresh_token": pair.refresh_token,
    }))
    .into_response())
}
