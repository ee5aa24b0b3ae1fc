/// Version-keyed cache for task list responses.
///
/// Each team has a version counter at `tasks:team:<id>:ver`; list payloads
/// live under `tasks:team:<id>:v:<ver>:<filters-hash>`. Invalidation bumps
/// the version, which orphans every cached page for the team at once and
/// leaves the old entries to their TTL.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::kv::{Kv, KvError};
use crate::metrics::{DegradedComponent, Metrics};

pub struct TaskListCache {
    kv: Option<Arc<dyn Kv>>,
    ttl: Duration,
    enabled: bool,
    metrics: Arc<Metrics>,
}

impl TaskListCache {
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

    /// Cached JSON payload for this team + filter combination, if any.
    pub async fn get_list(&self, team_id: i64, filters: &BTreeMap<&str, String>) -> Option<Vec<u8>> {
        let kv = self.active()?;
        let version = self.version(kv, team_id).await?;
        match kv.get(&list_key(team_id, version, filters)).await {
            Ok(found) => found,
            Err(err) => {
                self.on_kv_error("get_list", team_id, &err);
                None
            }
        }
    }

    pub async fn set_list(&self, team_id: i64, filters: &BTreeMap<&str, String>, payload: &[u8]) {
        let Some(kv) = self.active() else { return };
        let Some(version) = self.version(kv, team_id).await else {
            return;
        };
        if let Err(err) = kv
            .set(&list_key(team_id, version, filters), payload, Some(self.ttl))
            .await
        {
            self.on_kv_error("set_list", team_id, &err);
        }
    }

    /// Bumps the team's version, orphaning all of its cached pages.
    pub async fn invalidate_team(&self, team_id: i64) {
        let Some(kv) = self.active() else { return };
        if let Err(err) = kv.incr(&version_key(team_id)).await {
            self.on_kv_error("invalidate", team_id, &err);
        }
    }

    async fn version(&self, kv: &Arc<dyn Kv>, team_id: i64) -> Option<i64> {
        match kv.get(&version_key(team_id)).await {
            Ok(Some(raw)) => Some(
                std::str::from_utf8(&raw)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1),
            ),
            Ok(None) => {
                let _ = kv.set_nx(&version_key(team_id), "1", VERSION_TTL).await;
                Some(1)
            }
            Err(err) => {
                self.on_kv_error("version", team_id, &err);
                None
            }
        }
    }

    fn active(&self) -> Option<&Arc<dyn Kv>> {
        if !self.enabled {
            return None;
        }
        self.kv.as_ref()
    }

    fn on_kv_error(&self, op: &str, team_id: i64, err: &KvError) {
        warn!(component = "task_cache", op, team_id, error = %err, "cache degraded");
        self.metrics.record_redis_degraded(DegradedComponent::TaskCache);
    }
}

// Version keys outlive payload entries by a wide margin so invalidation
// bumps keep working across quiet periods.
const VERSION_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

fn version_key(team_id: i64) -> String {
    format!("tasks:team:{team_id}:ver")
}

fn list_key(team_id: i64, version: i64, filters: &BTreeMap<&str, String>) -> String {
    format!("tasks:team:{team_id}:v:{version}:{}", filters_hash(filters))
}

fn filters_hash(filters: &BTreeMap<&str, String>) -> String {
    let canonical = filters
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(&hasher.finalize()[..20])
}
