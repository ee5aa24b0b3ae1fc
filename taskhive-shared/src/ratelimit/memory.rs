/// In-process fixed-window limiter.
///
/// Windows are aligned to the UTC epoch: every key in a window of length W
/// resets at the same `unix_time % W == 0` boundary, so the in-memory
/// fallback counts the same windows the KV limiter does. A background task
/// evicts entries from past windows at `max(2 × window, 60s)` intervals.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::{remaining_in_window, Decision, Limiter};

#[derive(Debug, Clone, Copy)]
struct Entry {
    window: i64,
    count: i64,
}

pub struct MemoryLimiter {
    limit: i64,
    window: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryLimiter {
    pub fn new(limit: i64, window: Duration) -> Arc<Self> {
        Arc::new(Self {
            limit,
            window: if window.is_zero() { Duration::from_secs(60) } else { window },
            entries: Mutex::new(HashMap::new()),
        })
    }

    fn window_index(&self, now_unix: i64) -> i64 {
        now_unix / self.window.as_secs().max(1) as i64
    }

    fn decide(&self, key: &str, now_unix: i64) -> Decision {
        if key.is_empty() || self.limit <= 0 {
            return Decision::allow();
        }

        let window = self.window_index(now_unix);
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(key.to_string()).or_insert(Entry { window, count: 0 });
        if entry.window != window {
            entry.window = window;
            entry.count = 0;
        }

        if entry.count >= self.limit {
            return Decision::deny(remaining_in_window(self.window, now_unix));
        }
        entry.count += 1;
        Decision::allow()
    }

    /// Spawns the eviction loop; it stops when `shutdown` is cancelled.
    pub fn spawn_cleanup(limiter: &Arc<Self>, shutdown: CancellationToken) {
        let limiter = Arc::clone(limiter);
        let period = std::cmp::max(limiter.window * 2, Duration::from_secs(60));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let window = limiter.window_index(Utc::now().timestamp());
                        let mut entries = limiter.entries.lock().unwrap();
                        entries.retain(|_, e| e.window >= window);
                    }
                }
            }
        });
    }
}

#[async_trait]
impl Limiter for MemoryLimiter {
    async fn allow(&self, key: &str) -> Decision {
        self.decide(key, Utc::now().timestamp())
    }
}
