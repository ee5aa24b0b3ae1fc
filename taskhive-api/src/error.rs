/// HTTP error mapping.
///
/// Handlers return `ApiResult<T>`; the [`ApiError`] conversion decides the
/// status code and a fixed response string. Domain details never reach the
/// body: unexpected store/KV errors log the cause and answer a generic 500.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use taskhive_shared::auth::lockout::retry_after_secs;
use taskhive_shared::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    /// 400 with "invalid request"
    BadRequest,

    /// 401 with the given fixed string ("unauthorized", "invalid
    /// credentials", "invalid token")
    Unauthorized(&'static str),

    /// 403 with "forbidden"
    Forbidden,

    /// 404 with "not found"
    NotFound,

    /// 409 with a fixed reason string
    Conflict(&'static str),

    /// 429 with `Retry-After`
    TooManyRequests { retry_after_secs: u64 },

    /// 503 with "unavailable"
    Unavailable,

    /// 500 with "internal error"
    Internal,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    status: &'static str,
    error: String,
}

impl ApiError {
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            ApiError::BadRequest => (StatusCode::BAD_REQUEST, "invalid request".to_string()),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, (*msg).to_string()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "forbidden".to_string()),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "not found".to_string()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, (*msg).to_string()),
            ApiError::TooManyRequests { .. } => {
                (StatusCode::TOO_MANY_REQUESTS, "too many requests".to_string())
            }
            ApiError::Unavailable => (StatusCode::SERVICE_UNAVAILABLE, "unavailable".to_string()),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        let mut response = (
            status,
            Json(ErrorBody {
                status: "error",
                error: message,
            }),
        )
            .into_response();

        if let ApiError::TooManyRequests { retry_after_secs } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::BadRequest => ApiError::BadRequest,
            Error::InvalidCredentials => ApiError::Unauthorized("invalid credentials"),
            Error::InvalidToken | Error::TokenReuse => ApiError::Unauthorized("invalid token"),
            Error::Forbidden => ApiError::Forbidden,
            Error::NotFound => ApiError::NotFound,
            Error::Conflict => ApiError::Conflict("conflict"),
            Error::RateLimited { retry_after } => ApiError::TooManyRequests {
                retry_after_secs: retry_after_secs(retry_after),
            },
            Error::Unavailable => ApiError::Unavailable,
            Error::Db(e) => {
                tracing::error!(error = %e, "database error");
                ApiError::Internal
            }
            Error::Kv(e) => {
                tracing::error!(error = %e, "kv error");
                ApiError::Internal
            }
            Error::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                ApiError::Internal
            }
        }
    }
}
