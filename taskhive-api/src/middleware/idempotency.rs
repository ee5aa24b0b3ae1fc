/// Idempotency middleware for mutating requests.
///
/// Applies to POST/PUT/PATCH/DELETE requests that carry an
/// `Idempotency-Key` header from an authenticated user. The request is
/// fingerprinted over method, route pattern, content type, query, and
/// canonical JSON body; the triple (user, route, key) addresses a stored
/// response.
///
/// Protocol:
///
/// 1. Stored response with the same fingerprint → replay it.
/// 2. Stored response with a different fingerprint → 409.
/// 3. Nothing stored → take the in-flight lock; if it is held, 409
///    "in progress". Run the handler, capture its response, and store it
///    when the status is cacheable (2xx, 400, 403, 404, 409).
///
/// Degradation: every KV error bypasses the middleware and runs the
/// handler: guarantees weaken to at-least-once, the request never blocks.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{MatchedPath, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use tracing::warn;

use taskhive_shared::idempotency::{
    build_request_hash, build_route_hash, is_cacheable_status, lock_key, response_key,
    StoredResponse,
};
use taskhive_shared::metrics::DegradedComponent;

use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::AuthUser;

pub async fn idempotency_layer(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if !state.idempotency_enabled {
        return next.run(req).await;
    }
    if !is_mutating(req.method()) {
        return next.run(req).await;
    }

    let idem_key = match req
        .headers()
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        Some(key) => key.to_string(),
        None => return next.run(req).await,
    };

    // Anonymous requests are not idempotency-scoped.
    let Some(user) = req.extensions().get::<AuthUser>().copied() else {
        return next.run(req).await;
    };

    let Some(route_pattern) = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
    else {
        bypass(&state, "empty_route_pattern");
        return next.run(req).await;
    };

    if !state.idem_store.available() {
        bypass(&state, "unavailable");
        return next.run(req).await;
    }

    // Buffer the body for fingerprinting, then rebuild the request.
    let (parts, body) = req.into_parts();
    let body_bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => return ApiError::BadRequest.into_response(),
    };

    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let request_hash = build_request_hash(
        parts.method.as_str(),
        &route_pattern,
        content_type,
        parts.uri.query().unwrap_or(""),
        &body_bytes,
    );
    let route_hash = build_route_hash(&route_pattern);
    let resp_key = response_key(user.id, &route_hash, &idem_key);

    let req = Request::from_parts(parts, Body::from(body_bytes));

    match state.idem_store.get(&resp_key).await {
        Ok(Some(stored)) => {
            if stored.request_hash != request_hash {
                state.metrics.idempotency_conflicts.fetch_add(1, Ordering::Relaxed);
                return ApiError::Conflict("idempotency key reused with different payload")
                    .into_response();
            }
            state.metrics.idempotency_hits.fetch_add(1, Ordering::Relaxed);
            return replay(&stored);
        }
        Ok(None) => {}
        Err(err) => {
            warn!(component = "idempotency", error = %err, "store read failed, bypassing");
            state.metrics.record_redis_degraded(DegradedComponent::Idempotency);
            bypass(&state, "store_get_error");
            return next.run(req).await;
        }
    }

    let in_flight_key = lock_key(user.id, &route_hash, &idem_key);
    let lock_token = match state
        .idem_locker
        .acquire(&in_flight_key, state.idem_lock_ttl)
        .await
    {
        Ok(Some(token)) => token,
        Ok(None) => {
            return ApiError::Conflict("request already in progress").into_response();
        }
        Err(err) => {
            warn!(component = "idempotency", error = %err, "lock acquire failed, bypassing");
            state.metrics.record_redis_degraded(DegradedComponent::Idempotency);
            bypass(&state, "lock_acquire_error");
            return next.run(req).await;
        }
    };

    // Second look under the lock: a concurrent twin may have stored its
    // response between our miss and our acquire. Without this the handler
    // could run twice.
    if let Ok(Some(stored)) = state.idem_store.get(&resp_key).await {
        let locker = Arc::clone(&state.idem_locker);
        let release_key = in_flight_key.clone();
        tokio::spawn(async move {
            locker.release(&release_key, &lock_token).await;
        });
        if stored.request_hash != request_hash {
            state.metrics.idempotency_conflicts.fetch_add(1, Ordering::Relaxed);
            return ApiError::Conflict("idempotency key reused with different payload")
                .into_response();
        }
        state.metrics.idempotency_hits.fetch_add(1, Ordering::Relaxed);
        return replay(&stored);
    }

    let response = next.run(req).await;
    let response = capture_and_store(&state, &resp_key, request_hash, response).await;

    // Detached release: request cancellation must not leak the lock past
    // its TTL.
    let locker = Arc::clone(&state.idem_locker);
    tokio::spawn(async move {
        locker.release(&in_flight_key, &lock_token).await;
    });

    response
}

fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

fn bypass(state: &AppState, reason: &str) {
    warn!(component = "idempotency", reason, "idempotency bypass");
    state.metrics.idempotency_bypasses.fetch_add(1, Ordering::Relaxed);
}

/// Rebuilds a response from its stored form. Only `Location` (and the
/// content type) are replayed among headers.
fn replay(stored: &StoredResponse) -> Response {
    let mut response = Response::new(Body::from(stored.body.clone()));
    *response.status_mut() =
        StatusCode::from_u16(stored.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if !stored.content_type.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&stored.content_type) {
            response.headers_mut().insert(header::CONTENT_TYPE, value);
        }
    }
    for (name, value) in &stored.headers {
        if name.eq_ignore_ascii_case("location") {
            if let Ok(value) = HeaderValue::from_str(value) {
                response.headers_mut().insert(header::LOCATION, value);
            }
        }
    }
    response
}

/// Buffers the handler's response, stores it when cacheable, and returns
/// it to the client unchanged.
async fn capture_and_store(
    state: &AppState,
    resp_key: &str,
    request_hash: String,
    response: Response,
) -> Response {
    let status = response.status();
    let (parts, body) = response.into_parts();
    let body_bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => return ApiError::Internal.into_response(),
    };

    if is_cacheable_status(status.as_u16()) {
        let content_type = parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let mut headers = std::collections::BTreeMap::new();
        if let Some(location) = parts.headers.get(header::LOCATION).and_then(|v| v.to_str().ok()) {
            headers.insert("Location".to_string(), location.to_string());
        }

        let stored = StoredResponse {
            status: status.as_u16(),
            body: body_bytes.to_vec(),
            content_type,
            headers,
            request_hash,
            created_at: Utc::now().timestamp(),
        };
        if let Err(err) = state
            .idem_store
            .set(resp_key, state.idem_response_ttl, &stored)
            .await
        {
            warn!(component = "idempotency", error = %err, "store write failed");
            state.metrics.record_redis_degraded(DegradedComponent::Idempotency);
        }
    }

    Response::from_parts(parts, Body::from(body_bytes))
}
