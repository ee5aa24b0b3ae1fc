/// Domain error type shared by all services.
///
/// Services return these tags; the HTTP layer maps them to status codes and
/// fixed response strings. Store and KV failures that are not part of a
/// degradation path surface as `Db` / `Kv` and become 500s.

use std::time::Duration;

use crate::kv::KvError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or invalid input (400)
    #[error("invalid request")]
    BadRequest,

    /// Credentials did not match any user (401).
    ///
    /// Deliberately indistinguishable between unknown login and wrong
    /// password.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Missing, malformed, expired, or revoked token (401)
    #[error("invalid token")]
    InvalidToken,

    /// A revoked refresh token was presented again (401, theft signal)
    #[error("token reuse")]
    TokenReuse,

    /// Caller lacks the required role or membership (403)
    #[error("forbidden")]
    Forbidden,

    /// Referenced entity does not exist (404)
    #[error("not found")]
    NotFound,

    /// Unique-key violation, duplicate member, idempotency mismatch (409)
    #[error("conflict")]
    Conflict,

    /// Too many requests; retry after the given duration (429)
    #[error("rate limited")]
    RateLimited { retry_after: Duration },

    /// An upstream collaborator is down or its circuit is open (503)
    #[error("unavailable")]
    Unavailable,

    /// Unexpected store failure (500)
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    /// Unexpected KV failure outside a degradation path (500)
    #[error("kv error: {0}")]
    Kv(#[from] KvError),

    /// Anything else that should not leak details to clients (500)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Maps a store error to `Conflict` when it is a unique-key violation,
    /// passing everything else through as `Db`.
    pub fn from_db_conflict(err: sqlx::Error) -> Self {
        if crate::db::is_unique_violation(&err) {
            Error::Conflict
        } else {
            Error::Db(err)
        }
    }
}
