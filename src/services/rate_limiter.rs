use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Limiter settings. Defaults to 100 requests per 60 seconds.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub limit: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 100,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
struct Window {
    count: u32,
    reset_at: Instant,
}

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_in: Duration,
}

/// Fixed-window, per-key, in-process admission gate.
///
/// Each instance enforces its own windows; with several API instances the
/// effective global limit is `instances * limit`.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Returns true if the request for `key` is admitted.
    pub async fn allow(&self, key: &str) -> bool {
        self.check(key).await.allowed
    }

    pub async fn check(&self, key: &str) -> RateDecision {
        self.allow_at(key, Instant::now()).await
    }

    /// Admission check against an explicit clock.
    pub async fn allow_at(&self, key: &str, now: Instant) -> RateDecision {
        let limit = self.config.limit;
        let mut windows = self.windows.lock().await;

        let window = windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            reset_at: now,
        });

        if now >= window.reset_at {
            window.count = 1;
            window.reset_at = now + self.config.window;
            return RateDecision {
                allowed: limit > 0,
                limit,
                remaining: limit.saturating_sub(1),
                reset_in: self.config.window,
            };
        }

        let reset_in = window.reset_at.saturating_duration_since(now);
        if window.count < limit {
            window.count += 1;
            RateDecision {
                allowed: true,
                limit,
                remaining: limit - window.count,
                reset_in,
            }
        } else {
            RateDecision {
                allowed: false,
                limit,
                remaining: 0,
                reset_in,
            }
        }
    }

    /// Drop windows that have already elapsed. Returns how many were removed.
    pub async fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Instant::now()).await
    }

    pub async fn cleanup_expired_at(&self, now: Instant) -> usize {
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        windows.retain(|_, w| w.reset_at > now);
        before - windows.len()
    }

    pub async fn tracked_keys(&self) -> usize {
        self.windows.lock().await.len()
    }
}
