/// Circuit breaker around the invite sender.
///
/// State machine:
///
/// ```text
/// closed ──(failure_threshold consecutive failures)──> open
/// open ──(timeout elapsed)──> half_open
/// half_open ──(max_requests consecutive successes)──> closed
/// half_open ──(any failure)──> open
/// ```
///
/// While closed, failure counts reset on success and on every rolling
/// `interval`. While open, calls short-circuit. While half-open, at most
/// `max_requests` probes may be in flight; extra callers are rejected the
/// same as open.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::warn;

use crate::metrics::{Metrics, CIRCUIT_CLOSED, CIRCUIT_HALF_OPEN, CIRCUIT_OPEN};

use super::{EmailError, InviteSender};

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Probes allowed while half-open; also the consecutive successes
    /// needed to close.
    pub max_requests: u32,

    /// Rolling window that clears failure counts while closed.
    pub interval: Duration,

    /// How long the breaker stays open before probing.
    pub timeout: Duration,

    /// Consecutive failures that trip the breaker.
    pub failure_threshold: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    HalfOpen,
    Open,
}

impl BreakerState {
    fn gauge(&self) -> u8 {
        match self {
            BreakerState::Closed => CIRCUIT_CLOSED,
            BreakerState::HalfOpen => CIRCUIT_HALF_OPEN,
            BreakerState::Open => CIRCUIT_OPEN,
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    half_open_in_flight: u32,
    opened_at: Option<Instant>,
    window_start: Instant,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                half_open_in_flight: 0,
                opened_at: None,
                window_start: Instant::now(),
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap().state
    }

    /// Admission check before a call. `Err` means the call must be
    /// short-circuited.
    pub fn try_acquire(&self) -> Result<(), EmailError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed => {
                if !self.config.interval.is_zero()
                    && inner.window_start.elapsed() >= self.config.interval
                {
                    inner.consecutive_failures = 0;
                    inner.window_start = Instant::now();
                }
                Ok(())
            }
            BreakerState::Open => {
                let waited_out = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.timeout)
                    .unwrap_or(true);
                if !waited_out {
                    return Err(EmailError::CircuitOpen);
                }
                inner.state = BreakerState::HalfOpen;
                inner.consecutive_successes = 0;
                inner.half_open_in_flight = 1;
                Ok(())
            }
            BreakerState::HalfOpen => {
                if inner.half_open_in_flight >= self.config.max_requests.max(1) {
                    return Err(EmailError::CircuitOpen);
                }
                inner.half_open_in_flight += 1;
                Ok(())
            }
        }
    }

    pub fn on_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed => inner.consecutive_failures = 0,
            BreakerState::HalfOpen => {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.max_requests.max(1) {
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                    inner.opened_at = None;
                    inner.window_start = Instant::now();
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn on_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold.max(1) {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.half_open_in_flight = 0;
            }
            BreakerState::Open => {}
        }
    }
}

/// Invite sender wrapped in a circuit breaker.
pub struct BreakerSender<S> {
    inner: S,
    breaker: CircuitBreaker,
    metrics: Arc<Metrics>,
}

impl<S> BreakerSender<S> {
    pub fn new(inner: S, config: BreakerConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            inner,
            breaker: CircuitBreaker::new(config),
            metrics,
        }
    }

    fn observe_state(&self) {
        self.metrics.set_email_circuit_state(self.breaker.state().gauge());
    }
}

#[async_trait]
impl<S: InviteSender> InviteSender for BreakerSender<S> {
    async fn send_invite(&self, to_email: &str, team_name: &str) -> Result<(), EmailError> {
        use std::sync::atomic::Ordering;

        if let Err(rejected) = self.breaker.try_acquire() {
            self.metrics.email_send_errors.fetch_add(1, Ordering::Relaxed);
            self.metrics.email_circuit_open.fetch_add(1, Ordering::Relaxed);
            self.observe_state();
            warn!(component = "email", "invite short-circuited, breaker open");
            return Err(rejected);
        }

        let result = self.inner.send_invite(to_email, team_name).await;
        match &result {
            Ok(()) => self.breaker.on_success(),
            Err(err) => {
                self.breaker.on_failure();
                self.metrics.email_send_errors.fetch_add(1, Ordering::Relaxed);
                warn!(component = "email", error = %err, "invite send failed");
            }
        }
        self.observe_state();
        result
    }
}
