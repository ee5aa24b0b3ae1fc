/// Key-value capability used by the resilience layer.
///
/// Rate limiting, login lockout, the JWT blacklist, idempotency replay,
/// distributed locks, and the read-through caches all talk to the KV store
/// through the narrow [`Kv`] trait instead of a concrete Redis handle. This
/// keeps every degradation contract testable: the suite swaps in
/// [`memory::MemoryKv`] or [`memory::FailingKv`] where integration tests
/// would otherwise need a live (or deliberately dead) Redis.
///
/// All operations are atomic per key on the real backend. Errors are always
/// surfaced to the caller; each component decides locally whether an error
/// degrades (fail-open) or denies (fail-closed).

use std::time::Duration;

use async_trait::async_trait;

pub mod memory;
pub mod redis;

pub use self::memory::{FailingKv, MemoryKv};
pub use self::redis::RedisKv;

/// KV operation errors.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    /// No KV backend is configured or reachable.
    #[error("kv unavailable")]
    Unavailable,

    /// The backend returned an error.
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

#[async_trait]
pub trait Kv: Send + Sync {
    /// Fetches the raw value at `key`, if present.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;

    /// Stores `value` at `key`. `ttl = None` means no expiry.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), KvError>;

    /// Stores `value` only if `key` is absent (SET NX EX). Returns whether
    /// the write happened.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError>;

    /// Atomically increments the integer at `key`, creating it at 1.
    async fn incr(&self, key: &str) -> Result<i64, KvError>;

    /// Sets the expiry on an existing key.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), KvError>;

    /// Remaining time to live. `None` when the key is missing or has no
    /// expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, KvError>;

    /// Whether `key` exists.
    async fn exists(&self, key: &str) -> Result<bool, KvError>;

    /// Deletes the given keys.
    async fn del(&self, keys: &[&str]) -> Result<(), KvError>;

    /// Deletes `key` only if its current value equals `expected`, as one
    /// atomic step. Returns whether a delete happened. This is the
    /// compare-and-delete used for owner-token lock release.
    async fn del_if_equals(&self, key: &str, expected: &str) -> Result<bool, KvError>;
}
