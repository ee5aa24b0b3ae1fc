/// Cache for the analytics aggregates.
///
/// Keys normalize the window bounds to their UTC `yyyymmdd` form and
/// include the caller and (for top creators) the limit:
///
/// - `stats:done:u:<uid>:f:<yyyymmdd>:t:<yyyymmdd>`
/// - `stats:top:u:<uid>:f:<yyyymmdd>:t:<yyyymmdd>:l:<limit>`

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::kv::Kv;
use crate::metrics::{DegradedComponent, Metrics};
use crate::models::analytics::{TeamDoneStat, TeamTopCreator};

pub struct StatsCache {
    kv: Option<Arc<dyn Kv>>,
    ttl: Duration,
    enabled: bool,
    metrics: Arc<Metrics>,
}

impl StatsCache {
    pub fn new(
        kv: Option<Arc<dyn Kv>>,
        ttl: Duration,
        enabled: bool,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            kv,
            ttl,
            enabled,
            metrics,
        }
    }

    pub async fn get_done(
        &self,
        user_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Option<Vec<TeamDoneStat>> {
        self.get(&done_key(user_id, from, to)).await
    }

    pub async fn set_done(
        &self,
        user_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        items: &[TeamDoneStat],
    ) {
        self.set(&done_key(user_id, from, to), items).await;
    }

    pub async fn get_top(
        &self,
        user_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: i64,
    ) -> Option<Vec<TeamTopCreator>> {
        self.get(&top_key(user_id, from, to, limit)).await
    }

    pub async fn set_top(
        &self,
        user_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: i64,
        items: &[TeamTopCreator],
    ) {
        self.set(&top_key(user_id, from, to, limit), items).await;
    }

    async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<Vec<T>> {
        let kv = self.active()?;
        match kv.get(key).await {
            Ok(Some(raw)) => serde_json::from_slice(&raw).ok(),
            Ok(None) => None,
            Err(err) => {
                warn!(component = "stats_cache", key, error = %err, "cache read failed");
                self.metrics.record_redis_degraded(DegradedComponent::StatsCache);
                None
            }
        }
    }

    async fn set<T: Serialize>(&self, key: &str, items: &[T]) {
        let Some(kv) = self.active() else { return };
        let Ok(raw) = serde_json::to_vec(items) else { return };
        if let Err(err) = kv.set(key, &raw, Some(self.ttl)).await {
            warn!(component = "stats_cache", key, error = %err, "cache write failed");
            self.metrics.record_redis_degraded(DegradedComponent::StatsCache);
        }
    }

    fn active(&self) -> Option<&Arc<dyn Kv>> {
        if !self.enabled {
            return None;
        }
        self.kv.as_ref()
    }
}

fn done_key(user_id: i64, from: DateTime<Utc>, to: DateTime<Utc>) -> String {
    format!("stats:done:u:{user_id}:f:{}:t:{}", day(from), day(to))
}

fn top_key(user_id: i64, from: DateTime<Utc>, to: DateTime<Utc>, limit: i64) -> String {
    format!(
        "stats:top:u:{user_id}:f:{}:t:{}:l:{limit}",
        day(from),
        day(to)
    )
}

fn day(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%d").to_string()
}
