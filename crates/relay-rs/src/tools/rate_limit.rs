//! Sliding-window call limits for tools backed by rate-limited services.
//!
//! A [`RateLimiter`] admits at most `max_calls` within any `window`. The
//! weather and search integrations allow 10 calls a minute, the knowledge
//! engine 5. Limits are checked by [`ManagedTool`](super::core::ManagedTool)
//! after the cache lookup, so cached answers never spend quota.

use chrono::{DateTime, TimeDelta, Utc};
use std::collections::VecDeque;
use std::time::Duration;

/// Limit configuration for one tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max_calls: usize,
    pub window: Duration,
}

impl RateLimit {
    pub fn per_minute(max_calls: usize) -> Self {
        Self {
            max_calls,
            window: Duration::from_secs(60),
        }
    }
}

/// Timestamps of recent admitted calls.
#[derive(Debug)]
pub struct RateLimiter {
    limit: RateLimit,
    calls: VecDeque<DateTime<Utc>>,
}

impl RateLimiter {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            calls: VecDeque::with_capacity(limit.max_calls),
        }
    }

    /// Record a call at `now` if the window has room. Returns `false` (and
    /// records nothing) when the limit is reached.
    pub fn try_acquire(&mut self, now: DateTime<Utc>) -> bool {
        let window = TimeDelta::from_std(self.limit.window).unwrap_or(TimeDelta::MAX);
        while let Some(oldest) = self.calls.front() {
            if now.signed_duration_since(*oldest) >= window {
                self.calls.pop_front();
            } else {
                break;
            }
        }
        if self.calls.len() >= self.limit.max_calls {
            return false;
        }
        self.calls.push_back(now);
        true
    }

    /// Calls still available in the current window.
    pub fn remaining(&self) -> usize {
        self.limit.max_calls.saturating_sub(self.calls.len())
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_limit() {
        let mut limiter = RateLimiter::new(RateLimit::per_minute(3));
        let now = Utc::now();
        assert!(limiter.try_acquire(now));
        assert!(limiter.try_acquire(now));
        assert!(limiter.try_acquire(now));
        assert!(!limiter.try_acquire(now));
        assert_eq!(limiter.remaining(), 0);
    }

    #[test]
    fn window_slides() {
        let mut limiter = RateLimiter::new(RateLimit::per_minute(1));
        let start = Utc::now();
        assert!(limiter.try_acquire(start));
        assert!(!limiter.try_acquire(start + TimeDelta::seconds(59)));
        assert!(limiter.try_acquire(start + TimeDelta::seconds(60)));
    }

    #[test]
    fn rejected_calls_do_not_consume_quota() {
        let mut limiter = RateLimiter::new(RateLimit::per_minute(1));
        let start = Utc::now();
        assert!(limiter.try_acquire(start));
        for s in 1..10 {
            assert!(!limiter.try_acquire(start + TimeDelta::seconds(s)));
        }
        assert!(limiter.try_acquire(start + TimeDelta::seconds(61)));
    }
}
