use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::dispatch::repository::MiddlewareEntry;
use crate::dispatch::traits::{Flow, Middleware, MiddlewareBox, Step};
use crate::error::{ApiError, BootError};
use crate::loader::Injectable;

struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window request counter keyed by client address.
pub struct RateLimiter {
    max: u32,
    window: Duration,
    message: &'static str,
    enabled: bool,
    hits: DashMap<String, Window>,
    last_sweep: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(max: u32, window: Duration, message: &'static str) -> Self {
        Self {
            max,
            window,
            message,
            enabled: true,
            hits: DashMap::new(),
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Counts one hit for `key`; `false` once the window's budget is spent.
    pub fn check(&self, key: &str) -> bool {
        if !self.enabled {
            return true;
        }

        let now = Instant::now();
        self.sweep(now);

        let mut entry = self.hits.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }
        entry.count = entry.count.saturating_add(1);
        entry.count <= self.max
    }

    /// Drops expired windows, at most once per window length.
    fn sweep(&self, now: Instant) {
        let Ok(mut last) = self.last_sweep.try_lock() else {
            return;
        };
        if now.duration_since(*last) < self.window {
            return;
        }
        *last = now;
        drop(last);

        let before = self.hits.len();
        self.hits.retain(|_, w| now.duration_since(w.started) < self.window);
        tracing::debug!("Rate limiter evicted {} expired windows", before.saturating_sub(self.hits.len()));
    }

    /// Number of clients currently tracked
    pub fn tracked(&self) -> usize {
        self.hits.len()
    }
}

#[async_trait]
impl Middleware for RateLimiter {
    async fn handle(&self, step: Step<'_>) -> Result<Flow, ApiError> {
        if self.check(&step.ctx.client_key()) {
            Ok(Flow::next())
        } else {
            tracing::warn!("Rate limit exceeded for {}", step.ctx.client_key());
            Ok(step.halt_with(&ApiError::too_many_requests(self.message)))
        }
    }
}

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;

/// `__rateLimit` group: `api`, `auth` and `schoolCreation`.
pub fn build(injectable: &Injectable) -> Result<MiddlewareEntry, BootError> {
    let enabled = injectable.config.api.enable_rate_limiting;
    let limiters: [(&str, RateLimiter); 3] = [
        (
            "api",
            RateLimiter::new(
                100,
                Duration::from_secs(15 * MINUTE),
                "Too many requests from this IP, please try again after 15 minutes",
            ),
        ),
        (
            "auth",
            RateLimiter::new(
                10,
                Duration::from_secs(HOUR),
                "Too many authentication attempts, please try again after an hour",
            ),
        ),
        (
            "schoolCreation",
            RateLimiter::new(
                5,
                Duration::from_secs(HOUR),
                "Too many school creation attempts, please try again after an hour",
            ),
        ),
    ];

    let group: BTreeMap<String, MiddlewareBox> = limiters
        .into_iter()
        .map(|(name, limiter)| (name.to_string(), Arc::new(limiter.enabled(enabled)) as MiddlewareBox))
        .collect();
    Ok(MiddlewareEntry::Group(group))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_per_client() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60), "slow down");
        assert!(limiter.check("1.1.1.1"));
        assert!(limiter.check("1.1.1.1"));
        assert!(!limiter.check("1.1.1.1"));
        assert!(limiter.check("2.2.2.2"));
    }

    #[test]
    fn test_window_resets() {
        let limiter = RateLimiter::new(1, Duration::from_millis(20), "slow down");
        assert!(limiter.check("a"));
        assert!(!limiter.check("a"));
        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.check("a"));
    }

    #[test]
    fn test_expired_windows_are_evicted() {
        let limiter = RateLimiter::new(3, Duration::from_millis(5), "slow down");
        for i in 0..5000 {
            limiter.check(&format!("10.0.{}.{}", i / 256, i % 256));
        }
        assert!(limiter.tracked() >= 1);
        std::thread::sleep(Duration::from_millis(20));
        assert!(limiter.check("fresh"));
        assert_eq!(limiter.tracked(), 1);
    }

    #[test]
    fn test_live_windows_survive_a_sweep() {
        let limiter = RateLimiter::new(1, Duration::from_millis(50), "slow down");
        assert!(limiter.check("a"));
        std::thread::sleep(Duration::from_millis(60));
        assert!(limiter.check("b"));
        assert!(!limiter.check("b"));
        assert_eq!(limiter.tracked(), 1);
    }

    #[test]
    fn test_disabled_limiter_never_blocks() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60), "slow down").enabled(false);
        for _ in 0..5 {
            assert!(limiter.check("a"));
        }
    }
}
