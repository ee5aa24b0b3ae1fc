/// Distributed lock with owner tokens.
///
/// Acquire is a single SET-if-absent with a random owner token and a TTL;
/// release is a compare-and-delete that only removes the key while it still
/// holds this owner's token. A stale holder releasing after its TTL expired
/// therefore never deletes a lock that has since been re-acquired.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;
use uuid::Uuid;

use crate::kv::{Kv, KvError};
use crate::metrics::Metrics;

const DEFAULT_TTL: Duration = Duration::from_secs(15);

pub struct DistLock {
    kv: Option<Arc<dyn Kv>>,
    metrics: Arc<Metrics>,
}

impl DistLock {
    pub fn new(kv: Option<Arc<dyn Kv>>, metrics: Arc<Metrics>) -> Self {
        Self { kv, metrics }
    }

    /// Attempts to take the lock.
    ///
    /// Returns `Ok(Some(token))` when acquired, `Ok(None)` when another
    /// owner holds it.
    ///
    /// # Errors
    ///
    /// Errors on an empty key, a missing KV backend, or a KV failure; the
    /// caller decides whether that bypasses or aborts its operation.
    pub async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<String>, KvError> {
        let kv = self.kv.as_ref().ok_or(KvError::Unavailable)?;
        if key.is_empty() {
            return Err(KvError::Unavailable);
        }
        let ttl = if ttl.is_zero() { DEFAULT_TTL } else { ttl };

        let token = Uuid::new_v4().to_string();
        if kv.set_nx(key, &token, ttl).await? {
            Ok(Some(token))
        } else {
            Ok(None)
        }
    }

    /// Releases the lock if this owner still holds it. Never touches a
    /// lock owned by someone else. Errors are logged and counted, not
    /// propagated: a failed release simply leaves the key to its TTL.
    pub async fn release(&self, key: &str, token: &str) {
        let Some(kv) = self.kv.as_ref() else { return };
        if key.is_empty() || token.is_empty() {
            return;
        }
        if let Err(err) = kv.del_if_equals(key, token).await {
            warn!(component = "lock", key, error = %err, "lock release failed");
            self.metrics
                .lock_release_errors
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{FailingKv, MemoryKv};

    fn lock_over(kv: Arc<dyn Kv>) -> DistLock {
        DistLock::new(Some(kv), Arc::new(Metrics::new()))
    }

    #[tokio::test]
    async fn second_acquire_fails_while_held() {
        let kv: Arc<dyn Kv> = Arc::new(MemoryKv::new());
        let lock = lock_over(kv);

        let token = lock
            .acquire("lock:invite:1:2", Duration::from_secs(15))
            .await
            .unwrap()
            .expect("first acquire succeeds");
        assert!(lock
            .acquire("lock:invite:1:2", Duration::from_secs(15))
            .await
            .unwrap()
            .is_none());

        lock.release("lock:invite:1:2", &token).await;
        assert!(lock
            .acquire("lock:invite:1:2", Duration::from_secs(15))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn stale_release_leaves_new_owner_intact() {
        let kv: Arc<dyn Kv> = Arc::new(MemoryKv::new());
        let lock = lock_over(Arc::clone(&kv));

        // A holds the lock with a very short TTL and lets it lapse.
        let token_a = lock
            .acquire("k", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        // C acquires the same key.
        let _token_c = lock
            .acquire("k", Duration::from_secs(15))
            .await
            .unwrap()
            .expect("lock expired, C may take it");

        // A's late release must not delete C's lock.
        lock.release("k", &token_a).await;
        assert!(kv.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn acquire_errors_without_kv_or_key() {
        let lock = DistLock::new(None, Arc::new(Metrics::new()));
        assert!(lock.acquire("k", Duration::from_secs(1)).await.is_err());

        let lock = lock_over(Arc::new(MemoryKv::new()));
        assert!(lock.acquire("", Duration::from_secs(1)).await.is_err());
    }

    #[tokio::test]
    async fn release_errors_are_swallowed_but_counted() {
        let metrics = Arc::new(Metrics::new());
        let lock = DistLock::new(Some(Arc::new(FailingKv::new())), metrics.clone());
        lock.release("k", "token").await;
        assert_eq!(
            metrics
                .lock_release_errors
                .load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }
}
