/// Bearer-token authentication middleware.
///
/// Validates the access token (signature, expiry, type, issuer, plus the
/// jti blacklist when enabled, with its fail-open/closed policy) and adds
/// [`AuthUser`] to the request extensions. Every failure is the same
/// opaque 401.

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::Response;
use std::net::SocketAddr;

use crate::app::AppState;
use crate::error::ApiError;

/// The authenticated caller, available to handlers via `Extension`.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub id: i64,
}

pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header_value = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized("unauthorized"))?;

    let (scheme, token) = header_value
        .split_once(' ')
        .ok_or(ApiError::Unauthorized("unauthorized"))?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
        return Err(ApiError::Unauthorized("unauthorized"));
    }

    let user_id = state
        .auth
        .parse_access_token(token.trim())
        .await
        .map_err(|_| ApiError::Unauthorized("unauthorized"))?;

    req.extensions_mut().insert(AuthUser { id: user_id });
    Ok(next.run(req).await)
}

/// Client IP for rate limiting and session records: the first
/// `X-Forwarded-For` entry when present, otherwise the peer address.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = xff.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarded_for_takes_the_first_entry() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers, None), "203.0.113.9");
    }

    #[test]
    fn falls_back_to_peer_address() {
        let headers = HeaderMap::new();
        let peer: SocketAddr = "192.0.2.4:55011".parse().unwrap();
        assert_eq!(client_ip(&headers, Some(peer)), "192.0.2.4");
        assert_eq!(client_ip(&headers, None), "unknown");
    }
}
