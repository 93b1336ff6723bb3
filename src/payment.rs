//! Payment model and creation-time validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BillingError, Result};
use crate::price::validate_currency;

/// Largest accepted payment amount in minor units.
///
/// Matches the safe integer range a JSON consumer can represent without
/// precision loss.
pub const MAX_PAYMENT_AMOUNT: i64 = 9_007_199_254_740_991;

/// Payment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
    Refunded,
    PartiallyRefunded,
}

impl PaymentStatus {
    /// Convert to the wire string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
            Self::PartiallyRefunded => "partially_refunded",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A payment attempt against a customer, optionally tied to a subscription
/// and invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Unique payment identifier.
    pub id: String,
    /// Customer being charged.
    pub customer_id: String,
    /// Subscription this payment funds, if any.
    pub subscription_id: Option<String>,
    /// Invoice this payment settles, if any.
    pub invoice_id: Option<String>,
    /// Amount in minor currency units; always positive.
    pub amount: i64,
    /// Lowercase ISO 4217 currency code.
    pub currency: String,
    /// Current status.
    pub status: PaymentStatus,
    /// When the attempt was made.
    pub created_at: DateTime<Utc>,
    /// Provider failure code for failed payments.
    pub failure_code: Option<String>,
}

impl Payment {
    /// Create a pending payment, validating the amount and currency.
    ///
    /// # Errors
    ///
    /// Rejects zero, negative, and out-of-range amounts and malformed
    /// currency codes before anything is persisted.
    pub fn new(
        customer_id: impl Into<String>,
        amount: i64,
        currency: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        if amount <= 0 {
            return Err(BillingError::InvalidAmount {
                amount,
                reason: "amount must be a positive integer".to_string(),
            });
        }
        if amount > MAX_PAYMENT_AMOUNT {
            return Err(BillingError::InvalidAmount {
                amount,
                reason: "amount exceeds safe range".to_string(),
            });
        }
        let currency = currency.into();
        validate_currency(&currency)?;

        Ok(Self {
            id: format!("pay_{}", uuid::Uuid::new_v4().simple()),
            customer_id: customer_id.into(),
            subscription_id: None,
            invoice_id: None,
            amount,
            currency,
            status: PaymentStatus::Pending,
            created_at,
            failure_code: None,
        })
    }

    /// Attach the payment to a subscription.
    #[must_use]
    pub fn for_subscription(mut self, subscription_id: impl Into<String>) -> Self {
        self.subscription_id = Some(subscription_id.into());
        self
    }

    /// Mark the payment as succeeded.
    pub fn succeed(&mut self) {
        self.status = PaymentStatus::Succeeded;
        self.failure_code = None;
    }

    /// Mark the payment as failed with a provider failure code.
    pub fn fail(&mut self, failure_code: impl Into<String>) {
        self.status = PaymentStatus::Failed;
        self.failure_code = Some(failure_code.into());
    }

    /// Check whether this payment settled successfully.
    #[must_use]
    pub fn is_succeeded(&self) -> bool {
        self.status == PaymentStatus::Succeeded
    }

    /// Check whether this payment failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status == PaymentStatus::Failed
    }
}
