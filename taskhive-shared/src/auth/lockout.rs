/// Failed-login lockout backed by the KV store.
///
/// Two keys per normalized login:
///
/// - `auth:fail:<login>`: failure counter, TTL set to the lock TTL when
///   the counter first appears
/// - `auth:lock:<login>`: present (with TTL) once the counter reaches
///   `max_attempts`
///
/// Degradation contract: any KV error bypasses the lockout; a flaky Redis
/// must never lock legitimate users out. A missing KV backend (Redis down
/// at startup) is the same bypass. Every bypass is logged and counted;
/// only a lockout disabled by configuration (zero attempts or TTL) stays
/// silent.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::error::Error;
use crate::kv::{Kv, KvError};
use crate::metrics::{DegradedComponent, Metrics};

pub struct Lockout {
    kv: Option<Arc<dyn Kv>>,
    max_attempts: u32,
    lock_ttl: Duration,
    key_max_len: usize,
    metrics: Arc<Metrics>,
}

impl Lockout {
    pub fn new(
        kv: Option<Arc<dyn Kv>>,
        max_attempts: u32,
        lock_ttl: Duration,
        key_max_len: usize,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            kv,
            max_attempts,
            lock_ttl,
            key_max_len,
            metrics,
        }
    }

    /// Lockout switched off by configuration; not a degradation.
    fn disabled(&self) -> bool {
        self.max_attempts == 0 || self.lock_ttl.is_zero()
    }

    /// The KV handle, or a counted bypass when none was wired.
    fn kv_or_bypass(&self, op: &str) -> Option<&Arc<dyn Kv>> {
        match self.kv.as_ref() {
            Some(kv) => Some(kv),
            None => {
                self.on_kv_error(op, &KvError::Unavailable);
                None
            }
        }
    }

    /// Trims and lowercases the login; empty or oversized logins are
    /// rejected so they can never become unbounded KV keys.
    pub fn normalize(&self, login: &str) -> Result<String, Error> {
        let normalized = login.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(Error::BadRequest);
        }
        let max = if self.key_max_len > 0 { self.key_max_len } else { 128 };
        if normalized.len() > max {
            return Err(Error::BadRequest);
        }
        Ok(normalized)
    }

    /// Returns the remaining lock TTL when the login is currently banned.
    ///
    /// KV errors (and a missing KV) degrade to "not locked".
    pub async fn is_locked(&self, normalized: &str) -> Option<Duration> {
        if self.disabled() {
            return None;
        }
        let kv = self.kv_or_bypass("is_locked")?;
        match kv.ttl(&lock_key(normalized)).await {
            Ok(ttl) => ttl,
            Err(err) => {
                self.on_kv_error("is_locked", &err);
                None
            }
        }
    }

    /// Records a failed login. Returns the lock TTL when this failure
    /// crossed the attempt threshold and the login is now banned.
    pub async fn on_failure(&self, normalized: &str) -> Option<Duration> {
        if self.disabled() {
            return None;
        }
        let kv = self.kv_or_bypass("on_failure")?;

        let fail_key = fail_key(normalized);
        let count = match kv.incr(&fail_key).await {
            Ok(count) => count,
            Err(err) => {
                self.on_kv_error("on_failure", &err);
                return None;
            }
        };
        if count == 1 {
            if let Err(err) = kv.expire(&fail_key, self.lock_ttl).await {
                self.on_kv_error("on_failure", &err);
            }
        }
        if count < i64::from(self.max_attempts) {
            return None;
        }

        if let Err(err) = kv.set(&lock_key(normalized), b"1", Some(self.lock_ttl)).await {
            self.on_kv_error("on_failure", &err);
            return None;
        }
        self.metrics
            .login_lockouts
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Some(self.lock_ttl)
    }

    /// Clears both keys after a successful login.
    pub async fn on_success(&self, normalized: &str) {
        if self.disabled() {
            return;
        }
        let Some(kv) = self.kv_or_bypass("on_success") else {
            return;
        };
        if let Err(err) = kv
            .del(&[fail_key(normalized).as_str(), lock_key(normalized).as_str()])
            .await
        {
            self.on_kv_error("on_success", &err);
        }
    }

    fn on_kv_error(&self, op: &str, err: &KvError) {
        warn!(component = "lockout", op, error = %err, "kv error, bypassing lockout");
        self.metrics.record_redis_degraded(DegradedComponent::Lockout);
    }
}

fn fail_key(login: &str) -> String {
    format!("auth:fail:{login}")
}

fn lock_key(login: &str) -> String {
    format!("auth:lock:{login}")
}

/// Retry-After header value: whole seconds, rounded up, at least 1.
pub fn retry_after_secs(d: Duration) -> u64 {
    let secs = d.as_secs_f64().ceil() as u64;
    secs.max(1)
}
