/// Analytics reads with cache wrapping and the admin-only integrity query.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::warn;

use taskhive_shared::cache::StatsCache;
use taskhive_shared::models::analytics::{
    self, TaskIntegrityIssue, TeamDoneStat, TeamTopCreator,
};
use taskhive_shared::Error;

/// Largest accepted `[from, to)` window.
const MAX_RANGE_SECS: i64 = 365 * 24 * 3600;

const MAX_TOP_LIMIT: i64 = 10;

pub struct StatsService {
    pool: PgPool,
    cache: StatsCache,
    admins: HashSet<i64>,
}

impl StatsService {
    pub fn new(pool: PgPool, cache: StatsCache, admin_user_ids: &[i64]) -> Self {
        let admins: HashSet<i64> = admin_user_ids.iter().copied().filter(|id| *id > 0).collect();
        if admins.is_empty() {
            warn!("admin allowlist is empty; integrity endpoint rejects everyone");
        }
        Self { pool, cache, admins }
    }

    /// Per-team member and done-task counts for teams where the caller is
    /// owner or admin. Cached per (user, day-normalized window).
    pub async fn team_done_stats(
        &self,
        user_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TeamDoneStat>, Error> {
        validate_range(from, to)?;

        if let Some(cached) = self.cache.get_done(user_id, from, to).await {
            return Ok(cached);
        }
        let rows = analytics::team_done_stats(&self.pool, user_id, from, to).await?;
        self.cache.set_done(user_id, from, to, &rows).await;
        Ok(rows)
    }

    /// Top creators per team, `limit` in [1, 10].
    pub async fn top_creators_by_team(
        &self,
        user_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<TeamTopCreator>, Error> {
        validate_range(from, to)?;
        if !(1..=MAX_TOP_LIMIT).contains(&limit) {
            return Err(Error::BadRequest);
        }

        if let Some(cached) = self.cache.get_top(user_id, from, to, limit).await {
            return Ok(cached);
        }
        let rows = analytics::top_creators_by_team(&self.pool, user_id, from, to, limit).await?;
        self.cache.set_top(user_id, from, to, limit, &rows).await;
        Ok(rows)
    }

    /// Tasks whose assignee has left the team; allow-listed admins only.
    pub async fn tasks_with_assignee_not_member(
        &self,
        user_id: i64,
    ) -> Result<Vec<TaskIntegrityIssue>, Error> {
        if !self.admins.contains(&user_id) {
            warn!(user_id, "non-admin access to integrity endpoint");
            return Err(Error::Forbidden);
        }
        Ok(analytics::tasks_with_assignee_not_member(&self.pool).await?)
    }
}

fn validate_range(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<(), Error> {
    if from >= to {
        return Err(Error::BadRequest);
    }
    if (to - from).num_seconds() > MAX_RANGE_SECS {
        return Err(Error::BadRequest);
    }
    Ok(())
}
