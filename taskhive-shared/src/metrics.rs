/// Process-local counters for degradation events and resilience outcomes.
///
/// Prometheus export is out of scope for this service, but every fail-open
/// path must stay observable: whenever a component recovers from a KV error
/// locally, it records the event here (and logs it). Tests assert on these
/// counters to verify degradation contracts.
///
/// Constructed once at startup and threaded through as an `Arc<Metrics>`;
/// there is no global registry.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Components that can degrade when the KV store misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradedComponent {
    RateLimit,
    Lockout,
    Blacklist,
    Idempotency,
    Lock,
    StatsCache,
    TaskCache,
}

impl DegradedComponent {
    pub fn as_str(&self) -> &'static str {
        match self {
            DegradedComponent::RateLimit => "ratelimit",
            DegradedComponent::Lockout => "lockout",
            DegradedComponent::Blacklist => "blacklist",
            DegradedComponent::Idempotency => "idempotency",
            DegradedComponent::Lock => "lock",
            DegradedComponent::StatsCache => "stats_cache",
            DegradedComponent::TaskCache => "task_cache",
        }
    }

    fn index(&self) -> usize {
        match self {
            DegradedComponent::RateLimit => 0,
            DegradedComponent::Lockout => 1,
            DegradedComponent::Blacklist => 2,
            DegradedComponent::Idempotency => 3,
            DegradedComponent::Lock => 4,
            DegradedComponent::StatsCache => 5,
            DegradedComponent::TaskCache => 6,
        }
    }
}

/// Circuit breaker state as a gauge value.
pub const CIRCUIT_CLOSED: u8 = 0;
pub const CIRCUIT_HALF_OPEN: u8 = 1;
pub const CIRCUIT_OPEN: u8 = 2;

#[derive(Debug, Default)]
pub struct Metrics {
    redis_degraded: [AtomicU64; 7],

    pub idempotency_hits: AtomicU64,
    pub idempotency_conflicts: AtomicU64,
    pub idempotency_bypasses: AtomicU64,

    pub login_lockouts: AtomicU64,
    pub lock_release_errors: AtomicU64,

    pub email_send_errors: AtomicU64,
    pub email_circuit_open: AtomicU64,
    email_circuit_state: AtomicU8,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `component` hit a KV error and fell back locally.
    pub fn record_redis_degraded(&self, component: DegradedComponent) {
        self.redis_degraded[component.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn redis_degraded_count(&self, component: DegradedComponent) -> u64 {
        self.redis_degraded[component.index()].load(Ordering::Relaxed)
    }

    pub fn set_email_circuit_state(&self, state: u8) {
        self.email_circuit_state.store(state, Ordering::Relaxed);
    }

    pub fn email_circuit_state(&self) -> u8 {
        self.email_circuit_state.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degradation_counters_are_per_component() {
        let m = Metrics::new();
        m.record_redis_degraded(DegradedComponent::RateLimit);
        m.record_redis_degraded(DegradedComponent::RateLimit);
        m.record_redis_degraded(DegradedComponent::Lock);

        assert_eq!(m.redis_degraded_count(DegradedComponent::RateLimit), 2);
        assert_eq!(m.redis_degraded_count(DegradedComponent::Lock), 1);
        assert_eq!(m.redis_degraded_count(DegradedComponent::Blacklist), 0);
    }
}
