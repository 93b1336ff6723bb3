//! Payment retry scheduling and grace-period policy.
//!
//! Retry state is derived, never persisted: it is recomputed from the
//! ordered payment history each time, so a recovered payment immediately
//! clears the dunning state without a separate cleanup step.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RetryConfig;
use crate::payment::Payment;
use crate::period::days_between;
use crate::subscription::SubscriptionStatus;

/// Derived dunning state for a subscription with failed payments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryState {
    /// Retry attempts made since the first unrecovered failure.
    pub attempt_number: u32,
    /// Timestamp of the first failure not yet followed by a success.
    pub first_failure_at: DateTime<Utc>,
    /// When the next retry should fire; `None` once retries are exhausted.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Whether the grace window has closed.
    pub grace_expired: bool,
    /// Whole days of grace remaining (zero once expired).
    pub grace_days_remaining: i64,
    /// Whether the configured attempt cap has been reached.
    pub max_retries_reached: bool,
}

/// Dunning schedule calculator.
#[derive(Debug, Clone, Default)]
pub struct RetryEngine {
    config: RetryConfig,
}

impl RetryEngine {
    /// Create an engine with the given configuration.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Compute the retry state from a subscription's payment history.
    ///
    /// Payments are considered in `created_at` order. The anchor is the
    /// first failed payment not yet followed by a success; every further
    /// failure after it counts as one retry attempt. Returns `None` when
    /// there is no unrecovered failure.
    #[must_use]
    pub fn state(&self, payments: &[Payment], now: DateTime<Utc>) -> Option<RetryState> {
        let mut ordered: Vec<&Payment> = payments.iter().collect();
        ordered.sort_by_key(|p| p.created_at);

        let last_success_at = ordered
            .iter()
            .filter(|p| p.is_succeeded())
            .map(|p| p.created_at)
            .max();

        let mut failures = ordered
            .iter()
            .filter(|p| p.is_failed())
            .filter(|p| last_success_at.map_or(true, |s| p.created_at > s));

        let first_failure_at = failures.next()?.created_at;
        let attempt_number = failures.count() as u32;

        let max_retries_reached = attempt_number >= self.config.max_attempts;
        let next_retry_at = if max_retries_reached {
            None
        } else {
            self.config
                .retry_intervals
                .get(attempt_number as usize)
                .or_else(|| self.config.retry_intervals.last())
                .map(|&days| first_failure_at + Duration::days(days))
        };

        let grace_end = first_failure_at + Duration::days(self.config.grace_period_days);
        let grace_expired = now > grace_end;
        let grace_days_remaining = if grace_expired {
            0
        } else {
            days_between(now, grace_end).max(0)
        };

        Some(RetryState {
            attempt_number,
            first_failure_at,
            next_retry_at,
            grace_expired,
            grace_days_remaining,
            max_retries_reached,
        })
    }

    /// Access-continuation policy during dunning.
    ///
    /// A past-due subscription keeps access while the grace window is
    /// open; once it expires, access is revoked regardless of remaining
    /// retry attempts. Any other status falls back to its own access rule.
    #[must_use]
    pub fn retains_access(
        &self,
        status: SubscriptionStatus,
        payments: &[Payment],
        now: DateTime<Utc>,
    ) -> bool {
        match status {
            SubscriptionStatus::Active | SubscriptionStatus::Trialing => true,
            SubscriptionStatus::PastDue => self
                .state(payments, now)
                .is_some_and(|state| !state.grace_expired),
            _ => false,
        }
    }

    /// The configured grace period end for a given first failure.
    #[must_use]
    pub fn grace_end(&self, first_failure_at: DateTime<Utc>) -> DateTime<Utc> {
        first_failure_at + Duration::days(self.config.grace_period_days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn failed(at: DateTime<Utc>) -> Payment {
        let mut p = Payment::new("cus_1", 1999, "usd", at).unwrap();
        p.fail("card_declined");
        p
    }

    fn succeeded(at: DateTime<Utc>) -> Payment {
        let mut p = Payment::new("cus_1", 1999, "usd", at).unwrap();
        p.succeed();
        p
    }

    #[test]
    fn test_no_failures_no_state() {
        let engine = RetryEngine::default();
        assert_eq!(engine.state(&[], utc(2024, 1, 5)), None);
        assert_eq!(
            engine.state(&[succeeded(utc(2024, 1, 1))], utc(2024, 1, 5)),
            None
        );
    }

    #[test]
    fn test_first_attempt_schedule() {
        let engine = RetryEngine::default();
        let payments = [failed(utc(2024, 1, 1))];
        let state = engine.state(&payments, utc(2024, 1, 1)).unwrap();

        assert_eq!(state.attempt_number, 0);
        assert_eq!(state.first_failure_at, utc(2024, 1, 1));
        // Attempt 0 retries exactly 1 day after the first failure
        assert_eq!(state.next_retry_at, Some(utc(2024, 1, 2)));
        assert!(!state.max_retries_reached);
    }

    #[test]
    fn test_retry_schedule_progression() {
        let engine = RetryEngine::default();
        let mut payments = vec![failed(utc(2024, 1, 1))];

        // Each further failure advances through intervals [1, 3, 5, 7]
        for (failures_after, expected_day) in [(1, 4), (2, 6), (3, 8)] {
            payments.push(failed(utc(2024, 1, 1 + failures_after)));
            let state = engine.state(&payments, utc(2024, 1, 2)).unwrap();
            assert_eq!(state.attempt_number, failures_after);
            assert_eq!(state.next_retry_at, Some(utc(2024, 1, expected_day)));
        }
    }

    #[test]
    fn test_retries_exhausted() {
        let engine = RetryEngine::default();
        let payments: Vec<Payment> = (1..=5).map(|d| failed(utc(2024, 1, d))).collect();

        let state = engine.state(&payments, utc(2024, 1, 6)).unwrap();
        assert_eq!(state.attempt_number, 4);
        assert_eq!(state.next_retry_at, None);
        assert!(state.max_retries_reached);
    }

    #[test]
    fn test_success_clears_dunning() {
        let engine = RetryEngine::default();
        let payments = [
            failed(utc(2024, 1, 1)),
            failed(utc(2024, 1, 2)),
            succeeded(utc(2024, 1, 3)),
        ];
        assert_eq!(engine.state(&payments, utc(2024, 1, 5)), None);

        // A new failure after recovery anchors a fresh dunning cycle
        let payments = [
            failed(utc(2024, 1, 1)),
            succeeded(utc(2024, 1, 3)),
            failed(utc(2024, 2, 1)),
        ];
        let state = engine.state(&payments, utc(2024, 2, 1)).unwrap();
        assert_eq!(state.first_failure_at, utc(2024, 2, 1));
        assert_eq!(state.attempt_number, 0);
    }

    #[test]
    fn test_grace_period() {
        let engine = RetryEngine::default();
        let payments = [failed(utc(2024, 1, 1))];

        // Grace ends Jan 8 (7 days after first failure)
        let inside = engine.state(&payments, utc(2024, 1, 5)).unwrap();
        assert!(!inside.grace_expired);
        assert_eq!(inside.grace_days_remaining, 3);

        let boundary = engine.state(&payments, utc(2024, 1, 8)).unwrap();
        assert!(!boundary.grace_expired);
        assert_eq!(boundary.grace_days_remaining, 0);

        let expired = engine.state(&payments, utc(2024, 1, 10)).unwrap();
        assert!(expired.grace_expired);
        assert_eq!(expired.grace_days_remaining, 0);
    }

    #[test]
    fn test_access_policy() {
        let engine = RetryEngine::default();
        let payments = [failed(utc(2024, 1, 1))];

        // Past due keeps access inside the grace window
        assert!(engine.retains_access(SubscriptionStatus::PastDue, &payments, utc(2024, 1, 5)));
        // Revoked once grace expires, regardless of remaining retries
        assert!(!engine.retains_access(SubscriptionStatus::PastDue, &payments, utc(2024, 1, 10)));
        // Active and trialing are unaffected by dunning
        assert!(engine.retains_access(SubscriptionStatus::Active, &payments, utc(2024, 1, 10)));
        // Terminal states never retain access
        assert!(!engine.retains_access(SubscriptionStatus::Canceled, &payments, utc(2024, 1, 2)));
    }

    #[test]
    fn test_unordered_input_tolerated() {
        let engine = RetryEngine::default();
        let payments = [
            failed(utc(2024, 1, 3)),
            failed(utc(2024, 1, 1)),
            succeeded(utc(2023, 12, 15)),
        ];
        let state = engine.state(&payments, utc(2024, 1, 4)).unwrap();
        assert_eq!(state.first_failure_at, utc(2024, 1, 1));
        assert_eq!(state.attempt_number, 1);
    }
}
