/// HTTP handlers. Thin by design: decode, call the service, map the
/// domain error, encode a fixed-shape response.

use axum::body::Bytes;
use serde::de::DeserializeOwned;

use crate::error::ApiError;

pub mod auth;
pub mod comments;
pub mod health;
pub mod stats;
pub mod tasks;
pub mod teams;

/// Strict JSON decode: malformed bodies and unknown fields are 400s.
pub(crate) fn decode_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|_| ApiError::BadRequest)
}

/// Query-string integer with a default; invalid values are 400s.
pub(crate) fn parse_query_i64(value: Option<&String>, default: i64) -> Result<i64, ApiError> {
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ApiError::BadRequest),
    }
}
