/// Database connection pool management.
///
/// Builds a PostgreSQL pool with sqlx, verifies connectivity with a ping
/// query, and exposes the unique-violation check the services use to map
/// duplicate keys to conflicts.

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

/// Configuration for the database connection pool.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub db: String,
    pub user: String,
    pub pass: String,

    /// Maximum number of connections in the pool.
    pub max_open: u32,

    /// Minimum number of idle connections to keep warm.
    pub max_idle: u32,

    /// Maximum lifetime of a connection before recycling, in seconds.
    pub max_lifetime_secs: u64,
}

impl DatabaseConfig {
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.pass, self.host, self.port, self.db
        )
    }
}

/// Creates the pool and performs a health check before returning it.
///
/// # Errors
///
/// Returns an error if the database is unreachable or the ping fails.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let mut options = PgPoolOptions::new().max_connections(config.max_open);

    if config.max_idle > 0 {
        options = options.min_connections(config.max_idle);
    }
    if config.max_lifetime_secs > 0 {
        options = options.max_lifetime(Duration::from_secs(config.max_lifetime_secs));
    }

    let pool = options.connect(&config.url()).await?;
    health_check(&pool).await?;

    info!(
        max_open = config.max_open,
        max_idle = config.max_idle,
        "database connection pool created"
    );
    Ok(pool)
}

/// Executes a trivial query to verify the database is responding.
pub async fn health_check(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// True when the error is a unique-constraint violation.
///
/// Postgres reports these with SQLSTATE 23505; sqlx exposes the check
/// directly on the database error.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}
