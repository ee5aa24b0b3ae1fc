/// Database models and their sqlx operations.
///
/// Each model owns its SQL. Plain reads take a `&PgPool`; anything that
/// participates in a transaction takes a `&mut PgConnection` so callers
/// pass `&mut *tx` and the compiler pins the statement to that transaction.

pub mod analytics;
pub mod comment;
pub mod history;
pub mod session;
pub mod task;
pub mod team;
pub mod user;

pub use comment::TaskComment;
pub use history::{NewTaskHistory, TaskHistory};
pub use session::{NewSession, Session};
pub use task::{NewTask, Task, TaskField, TaskListFilter, TaskPriority, TaskStatus};
pub use team::{Team, TeamMember, TeamRole};
pub use user::User;
