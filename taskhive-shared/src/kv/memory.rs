/// In-memory [`Kv`] implementations used by the test suites.
///
/// [`MemoryKv`] honours the same per-key atomicity and expiry semantics as
/// the Redis backend (under one process). [`FailingKv`] errors on every
/// operation, standing in for an unreachable Redis when exercising
/// fail-open / fail-closed contracts.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{Kv, KvError};

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_live<T>(&self, key: &str, f: impl FnOnce(Option<&mut Entry>) -> T) -> T {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        if entries.get(key).map(|e| e.expired(now)).unwrap_or(false) {
            entries.remove(key);
        }
        f(entries.get_mut(key))
    }

    fn insert(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
    }
}

#[async_trait]
impl Kv for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self.with_live(key, |e| e.map(|e| e.value.clone())))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), KvError> {
        self.insert(key, value.to_vec(), ttl);
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        if entries.get(key).map(|e| e.expired(now)).unwrap_or(false) {
            entries.remove(key);
        }
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.as_bytes().to_vec(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn incr(&self, key: &str) -> Result<i64, KvError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        if entries.get(key).map(|e| e.expired(now)).unwrap_or(false) {
            entries.remove(key);
        }
        let entry = entries.entry(key.to_string()).or_insert(Entry {
            value: b"0".to_vec(),
            expires_at: None,
        });
        let current: i64 = std::str::from_utf8(&entry.value)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let next = current + 1;
        entry.value = next.to_string().into_bytes();
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), KvError> {
        self.with_live(key, |e| {
            if let Some(e) = e {
                e.expires_at = Some(Instant::now() + ttl);
            }
        });
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, KvError> {
        Ok(self.with_live(key, |e| {
            e.and_then(|e| e.expires_at)
                .map(|at| at.saturating_duration_since(Instant::now()))
                .filter(|d| !d.is_zero())
        }))
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        Ok(self.with_live(key, |e| e.is_some()))
    }

    async fn del(&self, keys: &[&str]) -> Result<(), KvError> {
        let mut entries = self.entries.lock().unwrap();
        for key in keys {
            entries.remove(*key);
        }
        Ok(())
    }

    async fn del_if_equals(&self, key: &str, expected: &str) -> Result<bool, KvError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        if entries.get(key).map(|e| e.expired(now)).unwrap_or(false) {
            entries.remove(key);
        }
        let matches = entries
            .get(key)
            .map(|e| e.value == expected.as_bytes())
            .unwrap_or(false);
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }
}

/// A KV backend that fails every call, modelling an unreachable Redis.
#[derive(Debug, Default)]
pub struct FailingKv;

impl FailingKv {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Kv for FailingKv {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, KvError> {
        Err(KvError::Unavailable)
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl: Option<Duration>) -> Result<(), KvError> {
        Err(KvError::Unavailable)
    }

    async fn set_nx(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<bool, KvError> {
        Err(KvError::Unavailable)
    }

    async fn incr(&self, _key: &str) -> Result<i64, KvError> {
        Err(KvError::Unavailable)
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<(), KvError> {
        Err(KvError::Unavailable)
    }

    async fn ttl(&self, _key: &str) -> Result<Option<Duration>, KvError> {
        Err(KvError::Unavailable)
    }

    async fn exists(&self, _key: &str) -> Result<bool, KvError> {
        Err(KvError::Unavailable)
    }

    async fn del(&self, _keys: &[&str]) -> Result<(), KvError> {
        Err(KvError::Unavailable)
    }

    async fn del_if_equals(&self, _key: &str, _expected: &str) -> Result<bool, KvError> {
        Err(KvError::Unavailable)
    }
}
