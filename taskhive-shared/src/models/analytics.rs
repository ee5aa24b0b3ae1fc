/// Aggregate read queries for the stats endpoints.
///
/// The first two queries are scoped to teams where the caller holds the
/// owner or admin role; the integrity query is global and gated behind the
/// admin allow-list at the service layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TeamDoneStat {
    pub team_id: i64,
    pub team_name: String,
    pub members_count: i64,
    pub done_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TeamTopCreator {
    pub team_id: i64,
    pub user_id: i64,
    pub created_count: i64,
    pub rank: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskIntegrityIssue {
    pub task_id: i64,
    pub team_id: i64,
    pub assignee_id: i64,
}

const TEAM_DONE_STATS_SQL: &str = "
SELECT
  t.id AS team_id,
  t.name AS team_name,
  COALESCE(m.members_count, 0) AS members_count,
  COALESCE(d.done_count, 0) AS done_count
FROM teams t
JOIN team_members me
  ON me.team_id = t.id
 AND me.user_id = $1
 AND me.role IN ('owner', 'admin')
LEFT JOIN (
    SELECT team_id, COUNT(*) AS members_count
    FROM team_members
    GROUP BY team_id
) m ON m.team_id = t.id
LEFT JOIN (
    SELECT team_id, COUNT(*) AS done_count
    FROM tasks
    WHERE status = 'done'
      AND updated_at >= $2
      AND updated_at < $3
    GROUP BY team_id
) d ON d.team_id = t.id
ORDER BY t.id
";

const TOP_CREATORS_SQL: &str = "
SELECT team_id, user_id, created_count, rank
FROM (
  SELECT
    base.team_id,
    base.user_id,
    base.created_count,
    ROW_NUMBER() OVER (
      PARTITION BY base.team_id
      ORDER BY base.created_count DESC, base.user_id ASC
    ) AS rank
  FROM (
      SELECT t.team_id, t.created_by AS user_id, COUNT(*) AS created_count
      FROM tasks t
      JOIN team_members me
        ON me.team_id = t.team_id
       AND me.user_id = $1
       AND me.role IN ('owner', 'admin')
      WHERE t.created_by IS NOT NULL
        AND t.created_at >= $2
        AND t.created_at < $3
      GROUP BY t.team_id, t.created_by
  ) base
) ranked
WHERE rank <= $4
ORDER BY team_id, rank
";

const INTEGRITY_ISSUES_SQL: &str = "
SELECT t.id AS task_id, t.team_id, t.assignee_id
FROM tasks t
LEFT JOIN team_members tm
  ON tm.team_id = t.team_id
 AND tm.user_id = t.assignee_id
WHERE t.assignee_id IS NOT NULL
  AND tm.user_id IS NULL
ORDER BY t.id
";

/// Per-team member and done-task counts over `[from, to)`, for teams where
/// `user_id` is owner or admin.
pub async fn team_done_stats(
    pool: &PgPool,
    user_id: i64,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<TeamDoneStat>, sqlx::Error> {
    sqlx::query_as::<_, TeamDoneStat>(TEAM_DONE_STATS_SQL)
        .bind(user_id)
        .bind(from)
        .bind(to)
        .fetch_all(pool)
        .await
}

/// Top task creators per team over `[from, to)`, ranked with a
/// deterministic tie-break on ascending user id.
pub async fn top_creators_by_team(
    pool: &PgPool,
    user_id: i64,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<TeamTopCreator>, sqlx::Error> {
    sqlx::query_as::<_, TeamTopCreator>(TOP_CREATORS_SQL)
        .bind(user_id)
        .bind(from)
        .bind(to)
        .bind(limit)
        .fetch_all(pool)
        .await
}

/// Tasks whose assignee is no longer a member of the task's team.
pub async fn tasks_with_assignee_not_member(
    pool: &PgPool,
) -> Result<Vec<TaskIntegrityIssue>, sqlx::Error> {
    sqlx::query_as::<_, TaskIntegrityIssue>(INTEGRITY_ISSUES_SQL)
        .fetch_all(pool)
        .await
}
