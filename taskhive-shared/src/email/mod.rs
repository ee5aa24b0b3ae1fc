/// Outbound invite delivery.
///
/// The team service only knows the [`InviteSender`] trait; production wires
/// an HTTP sender wrapped in a circuit breaker, the tests substitute fakes.

use async_trait::async_trait;

pub mod breaker;
pub mod http;

pub use breaker::{BreakerConfig, BreakerSender, BreakerState, CircuitBreaker};
pub use http::HttpSender;

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    /// The request never produced a response.
    #[error("email transport error: {0}")]
    Transport(String),

    /// The email service answered outside 2xx.
    #[error("email service returned status {0}")]
    Status(u16),

    /// Short-circuited by the breaker (open, or half-open probe budget
    /// exhausted).
    #[error("email circuit open")]
    CircuitOpen,
}

#[async_trait]
pub trait InviteSender: Send + Sync {
    /// Delivers a team invite to `to_email`. Any error means the invite
    /// was not (verifiably) delivered.
    async fn send_invite(&self, to_email: &str, team_name: &str) -> Result<(), EmailError>;
}
