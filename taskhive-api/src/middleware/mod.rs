/// Request middleware, layered (outermost first) as: authentication →
/// per-user rate limit → idempotency. Reads skip the idempotency layer by
/// construction (it only reacts to mutating methods).

pub mod auth;
pub mod idempotency;
pub mod rate_limit;

pub use auth::{client_ip, require_auth, AuthUser};
pub use idempotency::idempotency_layer;
pub use rate_limit::user_rate_limit;
