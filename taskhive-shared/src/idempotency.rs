/// Idempotent-request support: response store and request fingerprinting.
///
/// A mutating request carrying an `Idempotency-Key` is identified by
/// (user, route, key) and fingerprinted over its semantic content. Replays
/// with the same fingerprint get the captured response back; the same key
/// with a different fingerprint is a conflict.
///
/// The fingerprint is a SHA-256 hex digest over five canonicalized parts
/// joined by newlines:
///
/// 1. uppercased method
/// 2. route pattern (not the concrete path)
/// 3. content type, first token only, lowercased
/// 4. canonical query string: keys sorted, values sorted within a key
/// 5. canonical JSON body (parse-then-reserialize when parseable, raw
///    otherwise), so formatting differences do not break replay

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::kv::{Kv, KvError};

/// A captured response, stored under the idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub content_type: String,

    /// Selected headers to replay; currently only `Location`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    pub request_hash: String,
    pub created_at: i64,
}

pub struct IdempotencyStore {
    kv: Option<Arc<dyn Kv>>,
}

impl IdempotencyStore {
    pub fn new(kv: Option<Arc<dyn Kv>>) -> Self {
        Self { kv }
    }

    pub fn available(&self) -> bool {
        self.kv.is_some()
    }

    pub async fn get(&self, key: &str) -> Result<Option<StoredResponse>, KvError> {
        let Some(kv) = self.kv.as_ref() else {
            return Ok(None);
        };
        let Some(raw) = kv.get(key).await? else {
            return Ok(None);
        };
        // A corrupt record is treated as a miss rather than failing the
        // request; it will be overwritten below.
        Ok(serde_json::from_slice(&raw).ok())
    }

    pub async fn set(
        &self,
        key: &str,
        ttl: Duration,
        response: &StoredResponse,
    ) -> Result<(), KvError> {
        let Some(kv) = self.kv.as_ref() else {
            return Ok(());
        };
        let raw = serde_json::to_vec(response).map_err(|_| KvError::Unavailable)?;
        kv.set(key, &raw, Some(ttl)).await
    }
}

/// Response key for one (user, route, client key) triple.
pub fn response_key(user_id: i64, route_hash: &str, idem_key: &str) -> String {
    format!("idem:resp:{user_id}:{route_hash}:{idem_key}")
}

/// In-flight lock key for the same triple.
pub fn lock_key(user_id: i64, route_hash: &str, idem_key: &str) -> String {
    format!("lock:idem:{user_id}:{route_hash}:{idem_key}")
}

/// Fingerprints a request. See the module docs for the exact recipe.
pub fn build_request_hash(
    method: &str,
    route_pattern: &str,
    content_type: &str,
    raw_query: &str,
    body: &[u8],
) -> String {
    let parts = [
        method.trim().to_uppercase(),
        route_pattern.trim().to_string(),
        normalize_content_type(content_type),
        canonical_query(raw_query),
        canonical_json(body),
    ];

    let mut hasher = Sha256::new();
    hasher.update(parts.join("\n").as_bytes());
    hex::encode(hasher.finalize())
}

/// Short route discriminator: first 8 bytes of SHA-256, hex.
pub fn build_route_hash(route_pattern: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(route_pattern.trim().as_bytes());
    hex::encode(&hasher.finalize()[..8])
}

/// Statuses worth replaying: success, plus the deterministic client errors.
/// Everything else (429, 5xx) is transient and retries should re-execute.
pub fn is_cacheable_status(status: u16) -> bool {
    matches!(status, 200..=299 | 400 | 403 | 404 | 409)
}

fn normalize_content_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase()
}

fn canonical_query(raw_query: &str) -> String {
    if raw_query.is_empty() {
        return String::new();
    }
    let mut pairs: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for part in raw_query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = part.split_once('=').unwrap_or((part, ""));
        pairs.entry(key.to_string()).or_default().push(value.to_string());
    }
    let mut out = Vec::new();
    for (key, mut values) in pairs {
        values.sort();
        for value in values {
            out.push(format!("{key}={value}"));
        }
    }
    out.join("&")
}

fn canonical_json(body: &[u8]) -> String {
    let trimmed = std::str::from_utf8(body).map(str::trim).unwrap_or("");
    if trimmed.is_empty() {
        return String::new();
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        // serde_json maps keep object keys sorted, so reserialization is
        // canonical.
        Ok(value) => value.to_string(),
        Err(_) => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    #[test]
    fn fingerprint_ignores_json_formatting() {
        let a = build_request_hash(
            "post",
            "/api/v1/teams",
            "application/json; charset=utf-8",
            "",
            br#"{ "name" : "A" }"#,
        );
        let b = build_request_hash(
            "POST",
            "/api/v1/teams",
            "application/json",
            "",
            br#"{"name":"A"}"#,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_distinguishes_payloads() {
        let a = build_request_hash("POST", "/api/v1/teams", "application/json", "", br#"{"name":"A"}"#);
        let b = build_request_hash("POST", "/api/v1/teams", "application/json", "", br#"{"name":"B"}"#);
        assert_ne!(a, b);
    }

    #[test]
    fn fingerprint_sorts_query_keys_and_values() {
        let a = build_request_hash("POST", "/r", "", "b=2&a=1&a=0", b"");
        let b = build_request_hash("POST", "/r", "", "a=0&a=1&b=2", b"");
        assert_eq!(a, b);

        let c = build_request_hash("POST", "/r", "", "a=0&a=2&b=2", b"");
        assert_ne!(a, c);
    }

    #[test]
    fn non_json_bodies_hash_raw() {
        let a = build_request_hash("POST", "/r", "text/plain", "", b"not json {");
        let b = build_request_hash("POST", "/r", "text/plain", "", b"not json {");
        let c = build_request_hash("POST", "/r", "text/plain", "", b"not json [");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn route_hash_is_short_and_stable() {
        let h = build_route_hash("/api/v1/teams");
        assert_eq!(h.len(), 16);
        assert_eq!(h, build_route_hash(" /api/v1/teams "));
        assert_ne!(h, build_route_hash("/api/v1/tasks"));
    }

    #[test]
    fn cacheable_statuses_match_the_contract() {
        for status in [200, 201, 204, 400, 403, 404, 409] {
            assert!(is_cacheable_status(status), "{status} should cache");
        }
        for status in [301, 401, 422, 429, 500, 503] {
            assert!(!is_cacheable_status(status), "{status} should not cache");
        }
    }

    #[tokio::test]
    async fn store_round_trips_responses() {
        let store = IdempotencyStore::new(Some(Arc::new(MemoryKv::new())));
        let key = response_key(7, &build_route_hash("/api/v1/teams"), "k1");

        assert!(store.get(&key).await.unwrap().is_none());

        let resp = StoredResponse {
            status: 201,
            body: br#"{"status":"ok","id":1}"#.to_vec(),
            content_type: "application/json; charset=utf-8".to_string(),
            headers: BTreeMap::new(),
            request_hash: "abc".to_string(),
            created_at: 0,
        };
        store.set(&key, Duration::from_secs(60), &resp).await.unwrap();

        let got = store.get(&key).await.unwrap().unwrap();
        assert_eq!(got.status, 201);
        assert_eq!(got.request_hash, "abc");
        assert_eq!(got.body, resp.body);
    }
}
