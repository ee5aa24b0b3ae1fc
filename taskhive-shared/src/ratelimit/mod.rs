/// Fixed-window rate limiting.
///
/// Two implementations behind one trait:
///
/// - [`MemoryLimiter`]: per-process counters with windows aligned to the
///   UTC epoch, plus a background cleanup task
/// - [`RedisLimiter`]: KV-backed counters shared across instances, falling
///   back to a memory limiter call-by-call when the KV errors
///
/// A limiter with `limit <= 0` admits everything; that is how rate limiting
/// is disabled without changing the middleware wiring.

use std::time::Duration;

use async_trait::async_trait;

pub mod memory;
pub mod redis;

pub use self::memory::MemoryLimiter;
pub use self::redis::RedisLimiter;

/// Decision for one request under one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,

    /// How long until the window resets; only meaningful when denied.
    pub retry_after: Duration,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            retry_after: Duration::ZERO,
        }
    }

    pub fn deny(retry_after: Duration) -> Self {
        Self {
            allowed: false,
            retry_after,
        }
    }
}

#[async_trait]
pub trait Limiter: Send + Sync {
    /// Counts one request against `key` and decides whether it may proceed.
    /// Never errors: limiter failures degrade to a local decision.
    async fn allow(&self, key: &str) -> Decision;
}

/// Time left in the current UTC-aligned window of `window` length.
pub(crate) fn remaining_in_window(window: Duration, now_unix: i64) -> Duration {
    let window_secs = window.as_secs().max(1) as i64;
    let rem = window_secs - (now_unix % window_secs);
    Duration::from_secs(rem.max(1) as u64)
}
