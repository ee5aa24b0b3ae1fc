/// Domain services.
///
/// Services own the protocol logic between the HTTP surface and the
/// stores: validation, authorization, locking, transactions, and the
/// degradation contracts around the KV-backed collaborators.

pub mod auth;
pub mod stats;
pub mod task;
pub mod team;

pub use auth::{AuthService, TokenPair};
pub use stats::StatsService;
pub use task::TaskService;
pub use team::TeamService;
