/// KV-backed fixed-window limiter shared across instances.
///
/// INCR the key; on the first hit in a window, set the expiry to the window
/// length. Once the count exceeds the limit, the remaining TTL (rounded up
/// to whole seconds by the backend) becomes the retry-after.
///
/// Degradation contract: any KV error answers this one call from the
/// in-memory fallback and records a degradation event. The fallback keeps
/// its own counters, so a Redis outage narrows enforcement to per-instance
/// rather than disabling it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;

use crate::kv::{Kv, KvError};
use crate::metrics::{DegradedComponent, Metrics};

use super::{remaining_in_window, Decision, Limiter, MemoryLimiter};

pub struct RedisLimiter {
    kv: Arc<dyn Kv>,
    limit: i64,
    window: Duration,
    fallback: Arc<MemoryLimiter>,
    metrics: Arc<Metrics>,
}

impl RedisLimiter {
    pub fn new(
        kv: Arc<dyn Kv>,
        limit: i64,
        window: Duration,
        fallback: Arc<MemoryLimiter>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            kv,
            limit,
            window: if window.is_zero() { Duration::from_secs(60) } else { window },
            fallback,
            metrics,
        }
    }

    fn on_kv_error(&self, err: &KvError) {
        warn!(component = "ratelimit", error = %err, "kv error, using in-memory fallback");
        self.metrics.record_redis_degraded(DegradedComponent::RateLimit);
    }
}

#[async_trait]
impl Limiter for RedisLimiter {
    async fn allow(&self, key: &str) -> Decision {
        if key.is_empty() || self.limit <= 0 {
            return Decision::allow();
        }

        let count = match self.kv.incr(key).await {
            Ok(count) => count,
            Err(err) => {
                self.on_kv_error(&err);
                return self.fallback.allow(key).await;
            }
        };

        if count == 1 {
            if let Err(err) = self.kv.expire(key, self.window).await {
                self.on_kv_error(&err);
            }
        }

        if count > self.limit {
            let retry_after = match self.kv.ttl(key).await {
                Ok(Some(ttl)) => ttl,
                Ok(None) => {
                    // Key lost its expiry (or expired between calls); deny
                    // for the remainder of the aligned window.
                    warn!(component = "ratelimit", key, "counter has no ttl");
                    remaining_in_window(self.window, Utc::now().timestamp())
                }
                Err(err) => {
                    self.on_kv_error(&err);
                    remaining_in_window(self.window, Utc::now().timestamp())
                }
            };
            return Decision::deny(retry_after);
        }

        Decision::allow()
    }
}
