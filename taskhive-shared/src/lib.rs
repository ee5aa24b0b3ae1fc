//! # taskhive-shared
//!
//! Shared infrastructure for the taskhive API server.
//!
//! ## Module Organization
//!
//! - `models`: Database models and their sqlx operations
//! - `db`: Connection pool construction
//! - `kv`: Narrow key-value capability over Redis, with an in-memory fake
//! - `auth`: JWT and password primitives, login lockout, token blacklist
//! - `ratelimit`: Fixed-window rate limiters (KV-backed with memory fallback)
//! - `lock`: Distributed lock with owner tokens
//! - `idempotency`: Idempotent-request store and request fingerprinting
//! - `cache`: Read-through caches for stats and task lists
//! - `email`: Invite delivery behind a circuit breaker
//! - `metrics`: Process-local degradation counters
//! - `error`: Domain error tags shared by all services
//!
//! Everything here is transport-agnostic; the HTTP surface lives in
//! `taskhive-api`.

pub mod auth;
pub mod cache;
pub mod db;
pub mod email;
pub mod error;
pub mod idempotency;
pub mod kv;
pub mod lock;
pub mod metrics;
pub mod models;
pub mod ratelimit;

pub use error::Error;
