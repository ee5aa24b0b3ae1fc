/// JWT blacklist: per-jti revocation marks in the KV store.
///
/// The blacklist only answers "is this jti revoked"; the fail-open /
/// fail-closed decision on a KV error belongs to the caller (the auth
/// service), because the policy is configuration, not storage.
///
/// A missing KV backend is the same situation as an unreachable one and
/// surfaces as the same error, so a deployment that configured
/// fail-closed stays closed even when Redis never came up at startup.

use std::sync::Arc;
use std::time::Duration;

use crate::kv::{Kv, KvError};

pub struct JwtBlacklist {
    kv: Option<Arc<dyn Kv>>,
}

impl JwtBlacklist {
    pub fn new(kv: Option<Arc<dyn Kv>>) -> Self {
        Self { kv }
    }

    /// # Errors
    ///
    /// Propagates KV failures, and reports a missing KV backend as
    /// [`KvError::Unavailable`], so the caller can apply its configured
    /// fail-open / fail-closed policy either way. An empty jti is an
    /// error: a token without an id cannot be checked.
    pub async fn is_revoked(&self, jti: &str) -> Result<bool, KvError> {
        let kv = self.kv.as_ref().ok_or(KvError::Unavailable)?;
        if jti.is_empty() {
            return Err(KvError::Unavailable);
        }
        kv.exists(&key(jti)).await
    }

    /// Marks a jti revoked until its natural expiry.
    ///
    /// # Errors
    ///
    /// Fails when no KV backend is available; a revocation that cannot be
    /// recorded must not look like one that was.
    pub async fn revoke(&self, jti: &str, ttl: Duration) -> Result<(), KvError> {
        let kv = self.kv.as_ref().ok_or(KvError::Unavailable)?;
        if jti.is_empty() {
            return Ok(());
        }
        let ttl = if ttl.is_zero() { Duration::from_secs(1) } else { ttl };
        kv.set(&key(jti), b"1", Some(ttl)).await
    }
}

fn key(jti: &str) -> String {
    format!("blacklist:jti:{jti}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{FailingKv, MemoryKv};

    #[tokio::test]
    async fn revoked_jti_is_reported() {
        let bl = JwtBlacklist::new(Some(Arc::new(MemoryKv::new())));
        assert!(!bl.is_revoked("abc").await.unwrap());

        bl.revoke("abc", Duration::from_secs(60)).await.unwrap();
        assert!(bl.is_revoked("abc").await.unwrap());
        assert!(!bl.is_revoked("other").await.unwrap());
    }

    #[tokio::test]
    async fn missing_kv_surfaces_as_unavailable() {
        // The caller's fail-open/closed policy must see this case exactly
        // like a live KV that errors.
        let bl = JwtBlacklist::new(None);
        assert!(matches!(bl.is_revoked("abc").await, Err(KvError::Unavailable)));
        assert!(matches!(
            bl.revoke("abc", Duration::from_secs(60)).await,
            Err(KvError::Unavailable)
        ));
    }

    #[tokio::test]
    async fn kv_failure_surfaces_to_the_caller() {
        let bl = JwtBlacklist::new(Some(Arc::new(FailingKv::new())));
        assert!(bl.is_revoked("abc").await.is_err());
    }
}
