//! Proration arithmetic for mid-period plan changes.
//!
//! All amounts are integer minor currency units. Time-weighted shares are
//! rounded half away from zero to the nearest minor unit, in integer
//! arithmetic, so results are exact and deterministic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BillingError, Result};
use crate::period::{days_between, period_days};

/// Computes credits and charges when a subscription's price changes
/// mid-period.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProrationCalculator;

impl ProrationCalculator {
    /// Create a calculator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Prorate a price change given elapsed and total days in the period.
    ///
    /// `unused_credit` is the time-weighted share of the current price not
    /// yet consumed; `new_plan_prorated` is the charge for the new price
    /// over the remaining days. A positive `net_amount` is an immediate
    /// charge, a negative one a credit.
    ///
    /// # Errors
    ///
    /// Fails with [`BillingError::EmptyPeriod`] when `days_in_period <= 0`,
    /// and with a validation error when `days_elapsed` falls outside the
    /// period.
    pub fn calculate(
        &self,
        current_amount: i64,
        new_amount: i64,
        days_elapsed: i64,
        days_in_period: i64,
    ) -> Result<ProrationResult> {
        if days_in_period <= 0 {
            return Err(BillingError::EmptyPeriod);
        }
        if days_elapsed < 0 || days_elapsed > days_in_period {
            return Err(BillingError::validation(format!(
                "days elapsed {days_elapsed} outside period of {days_in_period} days"
            )));
        }
        if current_amount < 0 || new_amount < 0 {
            return Err(BillingError::validation("price amounts cannot be negative"));
        }

        let days_remaining = days_in_period - days_elapsed;
        let unused_credit = rounded_share(current_amount, days_remaining, days_in_period);
        let new_plan_prorated = rounded_share(new_amount, days_remaining, days_in_period);

        Ok(ProrationResult {
            unused_credit,
            new_plan_prorated,
            net_amount: new_plan_prorated - unused_credit,
            days_elapsed,
            days_remaining,
            days_in_period,
        })
    }

    /// Prorate over an explicit billing period, deriving elapsed days from
    /// `now`. `now` outside the period is clamped to its bounds.
    ///
    /// # Errors
    ///
    /// Fails with [`BillingError::EmptyPeriod`] when the period end does
    /// not come after its start.
    pub fn for_period(
        &self,
        current_amount: i64,
        new_amount: i64,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ProrationResult> {
        let days_in_period = period_days(period_start, period_end);
        if days_in_period <= 0 {
            return Err(BillingError::EmptyPeriod);
        }
        let days_elapsed = days_between(period_start, now).clamp(0, days_in_period);
        self.calculate(current_amount, new_amount, days_elapsed, days_in_period)
    }
}

/// `round(amount * part / whole)`, half away from zero, in integers.
pub(crate) fn rounded_share(amount: i64, part: i64, whole: i64) -> i64 {
    debug_assert!(whole > 0 && part >= 0 && amount >= 0);
    let numerator = amount as i128 * part as i128;
    let whole = whole as i128;
    ((numerator * 2 + whole) / (whole * 2)) as i64
}

/// Outcome of a proration calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProrationResult {
    /// Credit for the unconsumed share of the current price.
    pub unused_credit: i64,
    /// Charge for the new price over the remaining days.
    pub new_plan_prorated: i64,
    /// `new_plan_prorated - unused_credit`; positive means charge now.
    pub net_amount: i64,
    /// Days already consumed in the period.
    pub days_elapsed: i64,
    /// Days left in the period.
    pub days_remaining: i64,
    /// Total days in the period.
    pub days_in_period: i64,
}

impl ProrationResult {
    /// Immediate charge due, zero when the change nets out as a credit.
    #[must_use]
    pub fn charge_amount(&self) -> i64 {
        self.net_amount.max(0)
    }

    /// Credit owed, zero when the change nets out as a charge.
    #[must_use]
    pub fn credit_amount(&self) -> i64 {
        (-self.net_amount).max(0)
    }

    /// Whether the change produces an immediate charge.
    #[must_use]
    pub fn is_charge(&self) -> bool {
        self.net_amount > 0
    }
}
