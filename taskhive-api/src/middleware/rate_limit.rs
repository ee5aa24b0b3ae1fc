/// Per-user general rate limit.
///
/// Keys are `rl:user:<uid>:<epoch>` with `epoch = unix_time / window`, so
/// the counter key itself pins the UTC-aligned window and every instance
/// sharing the KV counts the same one. Runs after authentication.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use tracing::error;

use taskhive_shared::auth::lockout::retry_after_secs;

use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::AuthUser;

pub async fn user_rate_limit(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user = req.extensions().get::<AuthUser>().copied().ok_or_else(|| {
        // Layered inside the auth middleware; missing context is a wiring
        // bug, not a client error.
        error!("auth context missing in rate limit middleware");
        ApiError::Internal
    })?;

    let window_secs = state.ratelimit_window.as_secs().max(1) as i64;
    let epoch = Utc::now().timestamp() / window_secs;
    let key = format!("rl:user:{}:{epoch}", user.id);

    let decision = state.user_limiter.allow(&key).await;
    if !decision.allowed {
        return Err(ApiError::TooManyRequests {
            retry_after_secs: retry_after_secs(decision.retry_after),
        });
    }

    Ok(next.run(req).await)
}
