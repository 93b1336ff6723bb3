//! Per-source rate limiting for webhook ingestion.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::error::{BillingError, Result};

/// Sliding-window request counter, one independent window per source key.
///
/// A request is admitted while fewer than `max_requests` admissions fall
/// inside the trailing window. Timestamps outside the window are pruned on
/// each check, so memory per key is bounded by `max_requests`.
pub struct SlidingWindowLimiter {
    windows: DashMap<String, VecDeque<DateTime<Utc>>>,
    max_requests: u32,
    window: Duration,
}

impl SlidingWindowLimiter {
    /// Create a limiter admitting `max_requests` per `window` per key.
    #[must_use]
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            max_requests,
            window,
        }
    }

    /// Admit or reject a request from `source` at `now`.
    ///
    /// # Errors
    ///
    /// Fails with [`BillingError::RateLimitExceeded`] once the window for
    /// this source is full.
    pub fn check(&self, source: &str, now: DateTime<Utc>) -> Result<()> {
        // get_mut holds the shard lock, serializing concurrent checks per key
        let mut hits = self.windows.entry(source.to_string()).or_default();
        let cutoff = now - self.window;
        while hits.front().map_or(false, |t| *t <= cutoff) {
            hits.pop_front();
        }

        if hits.len() >= self.max_requests as usize {
            tracing::warn!(
                target: "rebill::ratelimit",
                source = %source,
                max_requests = self.max_requests,
                "webhook rate limit exceeded"
            );
            return Err(BillingError::RateLimitExceeded {
                source_key: source.to_string(),
            });
        }
        hits.push_back(now);
        Ok(())
    }

    /// Admissions currently inside the window for `source`.
    #[must_use]
    pub fn current_count(&self, source: &str, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.window;
        self.windows
            .get(source)
            .map_or(0, |hits| hits.iter().filter(|t| **t > cutoff).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn limiter(max: u32, window_secs: i64) -> SlidingWindowLimiter {
        SlidingWindowLimiter::new(max, Duration::seconds(window_secs))
    }

    #[test]
    fn test_admits_up_to_limit_then_rejects() {
        let limiter = limiter(3, 60);

        for i in 0..3 {
            limiter.check("acct_1", at(i)).unwrap();
        }
        let err = limiter.check("acct_1", at(3)).unwrap_err();
        assert!(matches!(err, BillingError::RateLimitExceeded { .. }));
    }

    #[test]
    fn test_window_slides() {
        let limiter = limiter(2, 60);

        limiter.check("acct_1", at(0)).unwrap();
        limiter.check("acct_1", at(30)).unwrap();
        assert!(limiter.check("acct_1", at(59)).is_err());

        // The first hit has left the window
        limiter.check("acct_1", at(61)).unwrap();
        assert_eq!(limiter.current_count("acct_1", at(61)), 2);
    }

    #[test]
    fn test_sources_are_independent() {
        let limiter = limiter(1, 60);

        limiter.check("acct_1", at(0)).unwrap();
        limiter.check("acct_2", at(0)).unwrap();

        assert!(limiter.check("acct_1", at(1)).is_err());
        assert!(limiter.check("acct_2", at(1)).is_err());
    }

    #[test]
    fn test_rejections_do_not_consume_budget() {
        let limiter = limiter(1, 60);

        limiter.check("acct_1", at(0)).unwrap();
        for i in 1..10 {
            assert!(limiter.check("acct_1", at(i)).is_err());
        }
        // One admission still outstanding once the window clears
        limiter.check("acct_1", at(61)).unwrap();
    }
}
