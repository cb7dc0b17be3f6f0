//! Fixed-window rate limiting per client identity.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue};
use dashmap::DashMap;

use crate::error::ApiError;
use crate::http::context::RequestContext;
use crate::observability::metrics;
use crate::pipeline::{Outcome, Stage, StageKind};

const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Hit counter for one client within the current window.
#[derive(Debug)]
struct Window {
    opened_at: Instant,
    hits: u64,
}

/// Result of counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Time until the client's window resets.
    pub reset_after: Duration,
}

impl RateLimitDecision {
    pub fn reset_after_secs(&self) -> u64 {
        let secs = self.reset_after.as_secs();
        if self.reset_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }
}

/// Shared counters for the limiter.
///
/// Each identity's window is updated under its `DashMap` entry lock, so
/// concurrent hits for one client never undercount.
pub struct RateLimiterState {
    windows: DashMap<String, Window>,
    window: Duration,
    max: u64,
}

impl RateLimiterState {
    pub fn new(window: Duration, max: u64) -> Self {
        Self {
            windows: DashMap::new(),
            window,
            max,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Count a request for `key`.
    pub fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, Instant::now())
    }

    /// Count a request for `key` as if it arrived at `now`.
    pub fn check_at(&self, key: &str, now: Instant) -> RateLimitDecision {
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| Window {
                opened_at: now,
                hits: 0,
            });

        if now.saturating_duration_since(entry.opened_at) >= self.window {
            entry.opened_at = now;
            entry.hits = 0;
        }
        entry.hits += 1;

        let elapsed = now.saturating_duration_since(entry.opened_at);
        RateLimitDecision {
            allowed: entry.hits <= self.max,
            limit: self.max,
            remaining: self.max.saturating_sub(entry.hits),
            reset_after: self.window.saturating_sub(elapsed),
        }
    }

    /// Drop windows that have fully elapsed. Returns how many were removed.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.opened_at) < self.window);
        before.saturating_sub(self.windows.len())
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }
}

pub struct RateLimitStage {
    state: Arc<RateLimiterState>,
}

impl RateLimitStage {
    pub fn new(state: Arc<RateLimiterState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl Stage for RateLimitStage {
    fn kind(&self) -> StageKind {
        StageKind::RateLimit
    }

    async fn process(&self, ctx: &mut RequestContext) -> Outcome {
        let key = ctx.client_key();
        let decision = self.state.check(&key);

        ctx.set_response_header(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
        ctx.set_response_header(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
        ctx.set_response_header(
            X_RATELIMIT_RESET,
            HeaderValue::from(decision.reset_after_secs()),
        );

        if decision.allowed {
            Outcome::Continue
        } else {
            tracing::warn!(client = %key, path = %ctx.path(), "Rate limit exceeded");
            metrics::record_rate_limited();
            Outcome::Fail(ApiError::RateLimited {
                retry_after_secs: decision.reset_after_secs(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(600_000);

    #[test]
    fn test_hundred_and_first_rejected() {
        let limiter = RateLimiterState::new(WINDOW, 100);
        let start = Instant::now();

        for i in 1..=100 {
            let decision = limiter.check_at("10.0.0.1", start + Duration::from_millis(i));
            assert!(decision.allowed, "request {i} should pass");
        }
        let decision = limiter.check_at("10.0.0.1", start + Duration::from_millis(101));
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn test_window_resets() {
        let limiter = RateLimiterState::new(WINDOW, 100);
        let start = Instant::now();

        for _ in 0..101 {
            limiter.check_at("10.0.0.1", start);
        }
        assert!(!limiter.check_at("10.0.0.1", start + WINDOW / 2).allowed);

        let fresh = limiter.check_at("10.0.0.1", start + WINDOW);
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 99);
    }

    #[test]
    fn test_clients_are_independent() {
        let limiter = RateLimiterState::new(WINDOW, 1);
        let now = Instant::now();

        assert!(limiter.check_at("a", now).allowed);
        assert!(!limiter.check_at("a", now).allowed);
        assert!(limiter.check_at("b", now).allowed);
    }

    #[test]
    fn test_purge_expired() {
        let limiter = RateLimiterState::new(WINDOW, 10);
        let now = Instant::now();
        limiter.check_at("a", now);
        limiter.check_at("b", now + WINDOW / 2);

        assert_eq!(limiter.purge_expired(now + WINDOW), 1);
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn test_concurrent_hits_counted_once_each() {
        let limiter = Arc::new(RateLimiterState::new(WINDOW, 1_000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        limiter.check("shared");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(limiter.check("shared").remaining, 1_000 - 801);
    }

    #[test]
    fn test_reset_rounds_up() {
        let decision = RateLimitDecision {
            allowed: true,
            limit: 1,
            remaining: 0,
            reset_after: Duration::from_millis(1500),
        };
        assert_eq!(decision.reset_after_secs(), 2);
    }
}
