use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

/// One named admission policy: at most `max_requests` per fixed window.
/// The table of policies is startup configuration, not per-call-site
/// constants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatePolicy {
    pub name: String,
    pub window_secs: u64,
    pub max_requests: u32,
}

/// Admission decision for a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Limited { retry_after_secs: u64 },
}

#[derive(Debug)]
struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window rate limiter keyed by `(policy, client identifier)`.
///
/// A window is valid for exactly its policy's duration from `started`;
/// once expired it is replaced, never decremented. The counter increments
/// on rejected requests too, and retries do not move the window start, so
/// the retry hint shrinks toward zero as the window ages out. Every
/// attempt counts, successful or not.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    policies: Arc<HashMap<String, RatePolicy>>,
    // Outer lock guards the key table only; each window has its own mutex
    // so the read-modify-write for one client never races with itself and
    // unrelated clients do not serialize on a global lock.
    windows: Arc<Mutex<HashMap<(String, String), Arc<Mutex<Window>>>>>,
}

impl RateLimiter {
    pub fn new(policies: impl IntoIterator<Item = RatePolicy>) -> Self {
        let policies = policies
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect::<HashMap<_, _>>();
        Self {
            policies: Arc::new(policies),
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Admit or reject one request for `policy` from `client`. An unknown
    /// policy name is a wiring bug and reported as an error, not a panic.
    pub async fn check(&self, policy: &str, client: &str) -> Result<Admission> {
        let Some(cfg) = self.policies.get(policy) else {
            bail!("unknown rate-limit policy: {policy}");
        };
        let window_len = Duration::from_secs(cfg.window_secs);

        let entry = {
            let mut windows = self.windows.lock().await;
            windows
                .entry((policy.to_string(), client.to_string()))
                .or_insert_with(|| {
                    Arc::new(Mutex::new(Window {
                        started: Instant::now(),
                        count: 0,
                    }))
                })
                .clone()
        };

        let now = Instant::now();
        let mut window = entry.lock().await;
        if now.duration_since(window.started) >= window_len {
            window.started = now;
            window.count = 0;
        }
        window.count += 1;

        if window.count > cfg.max_requests {
            let remaining = window_len.saturating_sub(now.duration_since(window.started));
            let retry_after_secs = remaining.as_secs_f64().ceil() as u64;
            debug!(policy, client, count = window.count, "rate limit exceeded");
            return Ok(Admission::Limited { retry_after_secs });
        }
        Ok(Admission::Admitted)
    }

    /// Drop windows that have aged past their policy's duration. Returns
    /// the number of evicted entries. Called by the background sweeper;
    /// exposed so tests can drive it directly.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        windows.retain(|(policy, _), entry| {
            let Some(cfg) = self.policies.get(policy) else {
                return false;
            };
            match entry.try_lock() {
                Ok(window) => {
                    now.duration_since(window.started) < Duration::from_secs(cfg.window_secs)
                }
                // A checker holds the lock, so the window is in use.
                Err(_) => true,
            }
        });
        let removed = before - windows.len();
        if removed > 0 {
            debug!(removed, "swept expired rate-limit windows");
        }
        removed
    }

    #[cfg(test)]
    async fn tracked_keys(&self) -> usize {
        self.windows.lock().await.len()
    }
}

/// Background eviction of expired windows, so the table cannot grow
/// without bound under rotating client identifiers. Abort the handle on
/// shutdown.
pub fn spawn_window_sweeper(limiter: RateLimiter, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            limiter.sweep().await;
        }
    })
}
