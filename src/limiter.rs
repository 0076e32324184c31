//! Per-key sliding-window rate limiter.
//!
//! Each key owns the list of its request timestamps inside the trailing
//! window; timestamps older than `now - window` are pruned before the
//! count is taken.  This is a sliding window, not a token bucket: bursts
//! are permitted up to `limit` within any trailing window but no credit
//! carries beyond it.  Interleaved checks from concurrent requests may let
//! one extra request through; the limiter is best-effort, not a strict
//! quota.

use std::time::{Duration, Instant};

use dashmap::DashMap;

#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests still available in the current window after this one.
    pub remaining: u32,
    /// Time until the oldest surviving timestamp leaves the window.  Zero
    /// when the request was allowed.
    pub retry_after: Duration,
}

#[derive(Default)]
pub struct SlidingWindow {
    hits: DashMap<String, Vec<Instant>>,
}

impl SlidingWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prune, count, and either deny or record the current request.
    /// Distinct keys (e.g. `user_<id>` vs `ai_<id>`) maintain independent
    /// windows and limits.
    pub fn check(&self, key: &str, limit: u32, window: Duration) -> RateDecision {
        let now = Instant::now();
        let mut entry = self.hits.entry(key.to_string()).or_default();
        entry.retain(|t| now.duration_since(*t) < window);
        if entry.len() as u32 >= limit {
            let oldest = entry.first().copied().unwrap_or(now);
            let retry_after = (oldest + window).saturating_duration_since(now);
            return RateDecision {
                allowed: false,
                remaining: 0,
                retry_after,
            };
        }
        entry.push(now);
        RateDecision {
            allowed: true,
            remaining: limit - entry.len() as u32,
            retry_after: Duration::ZERO,
        }
    }

    /// Number of keys currently tracked (pruning happens on check).
    pub fn tracked_keys(&self) -> usize {
        self.hits.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    #[test]
    fn limit_calls_allowed_then_denied() {
        let limiter = SlidingWindow::new();
        for i in 0..5u32 {
            let d = limiter.check("user_a", 5, WINDOW);
            assert!(d.allowed, "call {} should pass", i + 1);
            assert_eq!(d.remaining, 4 - i);
        }
        let denied = limiter.check("user_a", 5, WINDOW);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert!(denied.retry_after > Duration::ZERO);
    }

    #[test]
    fn window_slides_and_key_recovers() {
        let limiter = SlidingWindow::new();
        let window = Duration::from_millis(50);
        assert!(limiter.check("user_b", 1, window).allowed);
        assert!(!limiter.check("user_b", 1, window).allowed);
        std::thread::sleep(Duration::from_millis(70));
        assert!(limiter.check("user_b", 1, window).allowed);
    }

    #[test]
    fn keys_are_independent() {
        let limiter = SlidingWindow::new();
        assert!(limiter.check("user_c", 1, WINDOW).allowed);
        assert!(!limiter.check("user_c", 1, WINDOW).allowed);
        // A different namespace for the same caller is unaffected.
        assert!(limiter.check("ai_c", 1, WINDOW).allowed);
    }

    #[test]
    fn zero_limit_denies_immediately() {
        let limiter = SlidingWindow::new();
        let d = limiter.check("user_d", 0, WINDOW);
        assert!(!d.allowed);
        assert_eq!(d.retry_after, WINDOW);
    }
}
