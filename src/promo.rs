//! Promo code validation and redemption.
//!
//! Validation is pure with respect to the code record and never mutates
//! state. `apply` is the mutating step: it records a redemption row and
//! bumps the code's counter, idempotently per (code, subscription).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BillingError, Result};
use crate::proration::rounded_share;
use crate::storage::BillingStore;

/// How a promo code discounts an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    /// `discount_value` is a percentage (0..=100).
    Percentage,
    /// `discount_value` is an amount in minor units of `currency`.
    FixedAmount,
}

/// A redeemable discount code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoCode {
    /// The code customers enter, unique per code.
    pub code: String,
    pub discount_type: DiscountType,
    /// Percentage or minor-unit amount, per `discount_type`.
    pub discount_value: i64,
    /// ISO 4217 lowercase currency for fixed-amount codes.
    pub currency: String,
    /// Total redemption cap across all customers, `None` for uncapped.
    pub max_uses: Option<u32>,
    /// Per-customer redemption cap, `None` for uncapped.
    pub max_per_customer: Option<u32>,
    /// Start of the validity window, `None` for immediately valid.
    pub valid_from: Option<DateTime<Utc>>,
    /// End of the validity window, `None` for no expiry.
    pub valid_until: Option<DateTime<Utc>>,
    /// Plans the code may be applied to, `None` or empty for all plans.
    pub allowed_plan_ids: Option<Vec<String>>,
    /// Running total of successful redemptions.
    pub current_redemptions: u32,
    pub active: bool,
}

impl PromoCode {
    /// The discount this code grants.
    #[must_use]
    pub fn discount(&self) -> Discount {
        match self.discount_type {
            DiscountType::Percentage => Discount::Percent(self.discount_value),
            DiscountType::FixedAmount => Discount::Fixed {
                amount: self.discount_value,
                currency: self.currency.clone(),
            },
        }
    }
}

/// Discount metadata returned by a successful validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Discount {
    /// Percentage off the invoice amount.
    Percent(i64),
    /// Flat amount off, in minor units.
    Fixed { amount: i64, currency: String },
}

impl Discount {
    /// The discount in minor units for an invoice of `invoice_amount`.
    ///
    /// Percentage discounts round half away from zero; fixed discounts
    /// are capped at the invoice total.
    #[must_use]
    pub fn discount_on(&self, invoice_amount: i64) -> i64 {
        if invoice_amount <= 0 {
            return 0;
        }
        match self {
            // Out-of-range percentages are rejected at validation; clamping
            // here keeps a hand-built value from exceeding the invoice.
            Discount::Percent(percent) => {
                rounded_share(invoice_amount, (*percent).clamp(0, 100), 100)
            }
            Discount::Fixed { amount, .. } => (*amount).max(0).min(invoice_amount),
        }
    }
}

/// A recorded use of a promo code against a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoRedemption {
    pub id: String,
    pub code: String,
    pub customer_id: String,
    pub subscription_id: String,
    pub redeemed_at: DateTime<Utc>,
}

/// Promo code operations over a billing store.
pub struct PromoEngine<S: BillingStore> {
    store: S,
}

impl<S: BillingStore> PromoEngine<S> {
    /// Create a new engine.
    #[must_use]
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Validate a code for redemption without consuming it.
    ///
    /// The checks run in order: existence and active flag, validity
    /// window, plan restriction, then usage caps. The first failing
    /// check determines the error.
    pub async fn validate(
        &self,
        code: &str,
        customer_id: Option<&str>,
        plan_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Discount> {
        let promo = self.fetch_active(code).await?;

        if promo.discount_value <= 0
            || (promo.discount_type == DiscountType::Percentage && promo.discount_value > 100)
        {
            return Err(BillingError::validation(format!(
                "promo code '{}' has an out-of-range discount value {}",
                code, promo.discount_value
            )));
        }

        if promo.valid_from.map_or(false, |from| now < from) {
            return Err(BillingError::PromoCodeNotStarted {
                code: code.to_string(),
            });
        }
        if promo.valid_until.map_or(false, |until| now >= until) {
            return Err(BillingError::PromoCodeExpired {
                code: code.to_string(),
            });
        }

        if let (Some(plan), Some(allowed)) = (plan_id, promo.allowed_plan_ids.as_deref()) {
            if !allowed.is_empty() && !allowed.iter().any(|p| p == plan) {
                return Err(BillingError::PromoCodePlanNotEligible {
                    code: code.to_string(),
                    plan_id: plan.to_string(),
                });
            }
        }

        if promo
            .max_uses
            .map_or(false, |cap| promo.current_redemptions >= cap)
        {
            return Err(BillingError::PromoCodeExhausted {
                code: code.to_string(),
            });
        }
        if let (Some(customer), Some(cap)) = (customer_id, promo.max_per_customer) {
            let used = self.store.redemptions_for_customer(code, customer).await?;
            if used >= cap {
                return Err(BillingError::PromoCodeExhausted {
                    code: code.to_string(),
                });
            }
        }

        Ok(promo.discount())
    }

    /// Redeem a code against a subscription.
    ///
    /// Idempotent per (code, subscription): a repeated apply for the same
    /// pair returns the existing redemption and does not bump the counter.
    pub async fn apply(
        &self,
        code: &str,
        customer_id: &str,
        subscription_id: &str,
        plan_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<PromoRedemption> {
        if let Some(existing) = self.store.find_redemption(code, subscription_id).await? {
            return Ok(existing);
        }

        self.validate(code, Some(customer_id), plan_id, now).await?;

        let redemption = PromoRedemption {
            id: format!("red_{}", uuid::Uuid::new_v4().simple()),
            code: code.to_string(),
            customer_id: customer_id.to_string(),
            subscription_id: subscription_id.to_string(),
            redeemed_at: now,
        };
        self.store.insert_redemption(&redemption).await?;

        let mut promo = self.fetch_active(code).await?;
        promo.current_redemptions += 1;
        self.store.update_promo_code(&promo).await?;

        tracing::info!(
            target: "rebill::promo",
            code = %code,
            subscription_id = %subscription_id,
            redemptions = promo.current_redemptions,
            "promo code redeemed"
        );
        Ok(redemption)
    }

    async fn fetch_active(&self, code: &str) -> Result<PromoCode> {
        match self.store.find_promo_code(code).await? {
            Some(promo) if promo.active => Ok(promo),
            _ => Err(BillingError::PromoCodeNotFound {
                code: code.to_string(),
            }),
        }
    }
}
