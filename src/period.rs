//! Date-interval arithmetic for billing periods.
//!
//! Everything downstream (proration, renewal, dunning) leans on these
//! helpers, so the month/year rules live in exactly one place: adding
//! months clamps the day-of-month (Jan 31 + 1 month = Feb 28/29).

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BillingError, Result};

/// Billing interval for a price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    Day,
    Week,
    Month,
    Year,
}

impl BillingInterval {
    /// Parse from a wire string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "day" => Some(Self::Day),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            "year" => Some(Self::Year),
            _ => None,
        }
    }

    /// Convert to the wire string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        }
    }
}

impl std::fmt::Display for BillingInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Advance a timestamp by `count` billing periods.
///
/// # Errors
///
/// Fails with a validation error when `count` is zero or the result would
/// overflow the calendar range.
pub fn advance(
    start: DateTime<Utc>,
    interval: BillingInterval,
    count: u32,
) -> Result<DateTime<Utc>> {
    if count == 0 {
        return Err(BillingError::validation("interval count must be positive"));
    }

    let advanced = match interval {
        BillingInterval::Day => start.checked_add_signed(Duration::days(i64::from(count))),
        BillingInterval::Week => start.checked_add_signed(Duration::weeks(i64::from(count))),
        BillingInterval::Month => start.checked_add_months(Months::new(count)),
        BillingInterval::Year => start.checked_add_months(Months::new(count * 12)),
    };

    advanced.ok_or_else(|| BillingError::validation("billing period out of calendar range"))
}

/// Whole days from `a` to `b` (negative when `b` precedes `a`).
#[must_use]
pub fn days_between(a: DateTime<Utc>, b: DateTime<Utc>) -> i64 {
    (b - a).num_days()
}

/// Length of a billing period in whole days.
///
/// Zero or negative when `end <= start`; callers reject that before
/// prorating.
#[must_use]
pub fn period_days(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    days_between(start, end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_interval_round_trip() {
        for s in ["day", "week", "month", "year"] {
            assert_eq!(BillingInterval::parse(s).unwrap().as_str(), s);
        }
        assert_eq!(BillingInterval::parse("fortnight"), None);
    }

    #[test]
    fn test_advance_days_and_weeks() {
        let start = utc(2024, 1, 1);
        assert_eq!(
            advance(start, BillingInterval::Day, 30).unwrap(),
            utc(2024, 1, 31)
        );
        assert_eq!(
            advance(start, BillingInterval::Week, 2).unwrap(),
            utc(2024, 1, 15)
        );
    }

    #[test]
    fn test_advance_month_clamps_day() {
        // Jan 31 + 1 month lands on the last day of February
        assert_eq!(
            advance(utc(2024, 1, 31), BillingInterval::Month, 1).unwrap(),
            utc(2024, 2, 29)
        );
        assert_eq!(
            advance(utc(2023, 1, 31), BillingInterval::Month, 1).unwrap(),
            utc(2023, 2, 28)
        );
    }

    #[test]
    fn test_advance_year() {
        assert_eq!(
            advance(utc(2024, 2, 29), BillingInterval::Year, 1).unwrap(),
            utc(2025, 2, 28)
        );
        assert_eq!(
            advance(utc(2024, 3, 15), BillingInterval::Year, 2).unwrap(),
            utc(2026, 3, 15)
        );
    }

    #[test]
    fn test_advance_zero_count_rejected() {
        assert!(advance(utc(2024, 1, 1), BillingInterval::Month, 0).is_err());
    }

    #[test]
    fn test_days_between() {
        assert_eq!(days_between(utc(2024, 1, 1), utc(2024, 1, 31)), 30);
        assert_eq!(days_between(utc(2024, 1, 31), utc(2024, 1, 1)), -30);
        assert_eq!(days_between(utc(2024, 1, 1), utc(2024, 1, 1)), 0);
    }

    #[test]
    fn test_period_days_degenerate() {
        assert_eq!(period_days(utc(2024, 1, 10), utc(2024, 1, 10)), 0);
        assert!(period_days(utc(2024, 1, 10), utc(2024, 1, 5)) < 0);
    }
}
