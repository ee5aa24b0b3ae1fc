/// Refresh-token sessions.
///
/// One row per issued refresh token, keyed by the SHA-256 hash of the
/// opaque token string. A session is active iff `revoked_at IS NULL` and
/// `expires_at` is in the future. Rotation revokes the current row and
/// inserts the successor inside one transaction; the row-locked fetch is
/// what linearizes concurrent refreshes of the same token.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Session {
    pub id: i64,
    pub user_id: i64,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: i64,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
}

const INSERT_SQL: &str = "INSERT INTO sessions (user_id, token_hash, expires_at, user_agent, ip)
     VALUES ($1, $2, $3, $4, $5) RETURNING id";

impl Session {
    pub async fn create(pool: &PgPool, new: &NewSession) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(INSERT_SQL)
            .bind(new.user_id)
            .bind(&new.token_hash)
            .bind(new.expires_at)
            .bind(&new.user_agent)
            .bind(&new.ip)
            .fetch_one(pool)
            .await
    }

    pub async fn create_tx(conn: &mut PgConnection, new: &NewSession) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(INSERT_SQL)
            .bind(new.user_id)
            .bind(&new.token_hash)
            .bind(new.expires_at)
            .bind(&new.user_agent)
            .bind(&new.ip)
            .fetch_one(conn)
            .await
    }

    /// Row-locked lookup used by refresh rotation. Blocks concurrent
    /// rotations of the same token until this transaction finishes.
    pub async fn find_by_token_hash_for_update(
        conn: &mut PgConnection,
        token_hash: &str,
    ) -> Result<Option<Session>, sqlx::Error> {
        sqlx::query_as::<_, Session>(
            "SELECT id, user_id, token_hash, expires_at, revoked_at, last_used_at, user_agent, ip, created_at
             FROM sessions WHERE token_hash = $1 FOR UPDATE",
        )
        .bind(token_hash)
        .fetch_optional(conn)
        .await
    }

    pub async fn revoke_tx(
        conn: &mut PgConnection,
        token_hash: &str,
        revoked_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE sessions SET revoked_at = $1 WHERE token_hash = $2")
            .bind(revoked_at)
            .bind(token_hash)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Stamps the moment a refresh token was presented; rotation calls
    /// this in the same transaction just before revoking the row.
    pub async fn update_last_used_tx(
        conn: &mut PgConnection,
        token_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE sessions SET last_used_at = $1 WHERE token_hash = $2")
            .bind(at)
            .bind(token_hash)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Revokes every active session of a user, e.g. on credential reset.
    pub async fn revoke_all_by_user(
        pool: &PgPool,
        user_id: i64,
        revoked_at: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let result =
            sqlx::query("UPDATE sessions SET revoked_at = $1 WHERE user_id = $2 AND revoked_at IS NULL")
                .bind(revoked_at)
                .bind(user_id)
                .execute(pool)
                .await?;
        Ok(result.rows_affected())
    }

    pub async fn list_active_by_user(
        pool: &PgPool,
        user_id: i64,
    ) -> Result<Vec<Session>, sqlx::Error> {
        sqlx::query_as::<_, Session>(
            "SELECT id, user_id, token_hash, expires_at, revoked_at, last_used_at, user_agent, ip, created_at
             FROM sessions WHERE user_id = $1 AND revoked_at IS NULL AND expires_at > NOW()
             ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }
}
