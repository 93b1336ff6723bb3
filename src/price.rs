//! Price model.

use serde::{Deserialize, Serialize};

use crate::error::{BillingError, Result};
use crate::period::BillingInterval;

/// A price attached to a plan.
///
/// Immutable once referenced by an active subscription, except for the
/// `active` flag which controls whether new subscriptions may use it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// Unique price identifier.
    pub id: String,
    /// Plan this price belongs to.
    pub plan_id: String,
    /// Amount in minor currency units (cents).
    pub unit_amount: i64,
    /// Lowercase ISO 4217 currency code.
    pub currency: String,
    /// Billing cadence.
    pub billing_interval: BillingInterval,
    /// Number of intervals per billing period.
    pub interval_count: u32,
    /// Whether new subscriptions may reference this price.
    pub active: bool,
}

impl Price {
    /// Validate a price at creation time.
    ///
    /// # Errors
    ///
    /// Fails when the amount is negative, the currency code is not three
    /// ASCII letters, or the interval count is zero.
    pub fn validate(&self) -> Result<()> {
        if self.unit_amount < 0 {
            return Err(BillingError::validation("price amount cannot be negative"));
        }
        validate_currency(&self.currency)?;
        if self.interval_count == 0 {
            return Err(BillingError::validation("interval count must be positive"));
        }
        Ok(())
    }
}

/// Check a lowercase ISO 4217 currency code.
pub(crate) fn validate_currency(currency: &str) -> Result<()> {
    if currency.len() == 3 && currency.chars().all(|c| c.is_ascii_lowercase()) {
        Ok(())
    } else {
        Err(BillingError::validation(format!(
            "invalid currency code '{currency}'"
        )))
    }
}
