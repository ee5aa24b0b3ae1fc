/// Teams and per-team membership.
///
/// Membership is keyed by (team_id, user_id); the primary key is what
/// ultimately forbids duplicate members even when the invite lock is
/// bypassed during a KV outage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};

/// Per-team role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "team_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TeamRole {
    Owner,
    Admin,
    Member,
}

impl TeamRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TeamRole::Owner => "owner",
            TeamRole::Admin => "admin",
            TeamRole::Member => "member",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Team {
    pub id: i64,
    pub name: String,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl Team {
    /// Transaction-scoped insert; team creation always pairs this with the
    /// owner membership insert under the same transaction.
    pub async fn create_tx(
        conn: &mut PgConnection,
        name: &str,
        created_by: i64,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("INSERT INTO teams (name, created_by) VALUES ($1, $2) RETURNING id")
            .bind(name)
            .bind(created_by)
            .fetch_one(conn)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, team_id: i64) -> Result<Option<Team>, sqlx::Error> {
        sqlx::query_as::<_, Team>(
            "SELECT id, name, created_by, created_at FROM teams WHERE id = $1",
        )
        .bind(team_id)
        .fetch_optional(pool)
        .await
    }

    /// Teams the user belongs to, newest first.
    pub async fn list_by_user(pool: &PgPool, user_id: i64) -> Result<Vec<Team>, sqlx::Error> {
        sqlx::query_as::<_, Team>(
            "SELECT t.id, t.name, t.created_by, t.created_at
             FROM teams t
             JOIN team_members tm ON tm.team_id = t.id
             WHERE tm.user_id = $1
             ORDER BY t.id DESC",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TeamMember {
    pub team_id: i64,
    pub user_id: i64,
    pub role: TeamRole,
    pub created_at: DateTime<Utc>,
}

impl TeamMember {
    pub async fn add(
        pool: &PgPool,
        team_id: i64,
        user_id: i64,
        role: TeamRole,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO team_members (team_id, user_id, role) VALUES ($1, $2, $3)")
            .bind(team_id)
            .bind(user_id)
            .bind(role)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn add_tx(
        conn: &mut PgConnection,
        team_id: i64,
        user_id: i64,
        role: TeamRole,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO team_members (team_id, user_id, role) VALUES ($1, $2, $3)")
            .bind(team_id)
            .bind(user_id)
            .bind(role)
            .execute(conn)
            .await?;
        Ok(())
    }

    pub async fn role(
        pool: &PgPool,
        team_id: i64,
        user_id: i64,
    ) -> Result<Option<TeamRole>, sqlx::Error> {
        sqlx::query_scalar::<_, TeamRole>(
            "SELECT role FROM team_members WHERE team_id = $1 AND user_id = $2",
        )
        .bind(team_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }

    /// Role lookup pinned to a transaction, used inside the task update /
    /// delete critical sections.
    pub async fn role_tx(
        conn: &mut PgConnection,
        team_id: i64,
        user_id: i64,
    ) -> Result<Option<TeamRole>, sqlx::Error> {
        sqlx::query_scalar::<_, TeamRole>(
            "SELECT role FROM team_members WHERE team_id = $1 AND user_id = $2",
        )
        .bind(team_id)
        .bind(user_id)
        .fetch_optional(conn)
        .await
    }

    pub async fn is_member(
        pool: &PgPool,
        team_id: i64,
        user_id: i64,
    ) -> Result<bool, sqlx::Error> {
        let found: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM team_members WHERE team_id = $1 AND user_id = $2",
        )
        .bind(team_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
        Ok(found.is_some())
    }

    pub async fn is_member_tx(
        conn: &mut PgConnection,
        team_id: i64,
        user_id: i64,
    ) -> Result<bool, sqlx::Error> {
        let found: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM team_members WHERE team_id = $1 AND user_id = $2",
        )
        .bind(team_id)
        .bind(user_id)
        .fetch_optional(conn)
        .await?;
        Ok(found.is_some())
    }
}
