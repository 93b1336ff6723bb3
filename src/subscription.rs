//! Subscription model and lifecycle state machine.
//!
//! Status transitions follow a closed edge table: adding a status is a
//! compile-time-checked change across every consumer. Cancel, pause, and
//! resume are idempotent; repeating them against a subscription already in
//! the target state returns the current state without error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RenewalConfig;
use crate::error::{BillingError, Result};
use crate::period::{self, BillingInterval};
use crate::proration::{ProrationCalculator, ProrationResult};
use crate::provider::{
    CheckoutSession, CreateCheckoutRequest, ProviderClient, ProviderSubscription,
};
use crate::storage::BillingStore;

/// Subscription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// In trial period; access granted, no payment collected yet.
    Trialing,
    /// Paid and current.
    Active,
    /// Payment failed; access governed by the grace period.
    PastDue,
    /// Billing suspended at the customer's request.
    Paused,
    /// Terminal: subscription ended.
    Canceled,
    /// Awaiting the initial payment.
    Incomplete,
    /// Terminal: initial payment never completed.
    IncompleteExpired,
    /// Dunning exhausted without recovery.
    Unpaid,
}

impl SubscriptionStatus {
    /// Convert to the wire string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trialing => "trialing",
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Paused => "paused",
            Self::Canceled => "canceled",
            Self::Incomplete => "incomplete",
            Self::IncompleteExpired => "incomplete_expired",
            Self::Unpaid => "unpaid",
        }
    }

    /// Parse from a wire string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "trialing" => Some(Self::Trialing),
            "active" => Some(Self::Active),
            "past_due" => Some(Self::PastDue),
            "paused" => Some(Self::Paused),
            "canceled" => Some(Self::Canceled),
            "incomplete" => Some(Self::Incomplete),
            "incomplete_expired" => Some(Self::IncompleteExpired),
            "unpaid" => Some(Self::Unpaid),
            _ => None,
        }
    }

    /// Whether any further transition is possible from this status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Canceled | Self::IncompleteExpired)
    }

    /// Check whether `self -> to` is a legal edge of the state machine.
    #[must_use]
    pub fn can_transition(&self, to: Self) -> bool {
        use SubscriptionStatus::*;
        matches!(
            (*self, to),
            (Trialing, Active)
                | (Trialing, Canceled)
                | (Trialing, PastDue)
                | (Active, PastDue)
                | (Active, Canceled)
                | (Active, Paused)
                | (PastDue, Active)
                | (PastDue, Canceled)
                | (PastDue, Unpaid)
                | (Paused, Active)
                | (Paused, Canceled)
                | (Unpaid, Active)
                | (Unpaid, Canceled)
                | (Incomplete, Active)
                | (Incomplete, IncompleteExpired)
        )
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A customer's subscription to a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Unique subscription identifier.
    pub id: String,
    /// Subscribing customer.
    pub customer_id: String,
    /// Plan identifier.
    pub plan_id: String,
    /// Price currently in effect.
    pub price_id: String,
    /// Lifecycle status.
    pub status: SubscriptionStatus,
    /// Current billing period start.
    pub current_period_start: DateTime<Utc>,
    /// Current billing period end; always after the start.
    pub current_period_end: DateTime<Utc>,
    /// Trial window, when the subscription started with one.
    pub trial_start: Option<DateTime<Utc>>,
    /// Trial end.
    pub trial_end: Option<DateTime<Utc>>,
    /// Scheduled cancellation instant, if any.
    pub cancel_at: Option<DateTime<Utc>>,
    /// Whether the subscription ends at the current period boundary.
    pub cancel_at_period_end: bool,
    /// Seat or unit quantity.
    pub quantity: u32,
    /// Billing cadence.
    pub billing_interval: BillingInterval,
    /// Number of intervals per period.
    pub interval_count: u32,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Soft-delete marker; a deleted subscription never grants access.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Subscription {
    /// Create a subscription starting its first billing period at `start`.
    ///
    /// # Errors
    ///
    /// Fails when the computed period would be empty or the quantity is
    /// zero.
    pub fn new(
        customer_id: impl Into<String>,
        plan_id: impl Into<String>,
        price_id: impl Into<String>,
        billing_interval: BillingInterval,
        interval_count: u32,
        quantity: u32,
        start: DateTime<Utc>,
    ) -> Result<Self> {
        if quantity == 0 {
            return Err(BillingError::validation("quantity must be positive"));
        }
        let period_end = period::advance(start, billing_interval, interval_count)?;

        Ok(Self {
            id: format!("sub_{}", uuid::Uuid::new_v4().simple()),
            customer_id: customer_id.into(),
            plan_id: plan_id.into(),
            price_id: price_id.into(),
            status: SubscriptionStatus::Incomplete,
            current_period_start: start,
            current_period_end: period_end,
            trial_start: None,
            trial_end: None,
            cancel_at: None,
            cancel_at_period_end: false,
            quantity,
            billing_interval,
            interval_count,
            created_at: start,
            deleted_at: None,
        })
    }

    /// Begin a trial of `trial_days` ending in the trialing status.
    ///
    /// # Errors
    ///
    /// Fails when called on anything but a fresh incomplete subscription
    /// or with a zero-day trial.
    pub fn start_trial(&mut self, trial_days: i64, now: DateTime<Utc>) -> Result<()> {
        if trial_days <= 0 {
            return Err(BillingError::validation("trial must be at least 1 day"));
        }
        if self.status != SubscriptionStatus::Incomplete {
            return Err(BillingError::StateConflict {
                message: format!("cannot start trial from status {}", self.status),
            });
        }
        self.trial_start = Some(now);
        self.trial_end = Some(now + chrono::Duration::days(trial_days));
        self.status = SubscriptionStatus::Trialing;
        Ok(())
    }

    /// Whether this subscription currently grants access.
    ///
    /// Only active or trialing subscriptions grant access, and a
    /// soft-deleted subscription never does regardless of status.
    #[must_use]
    pub fn has_access(&self) -> bool {
        if self.deleted_at.is_some() {
            return false;
        }
        matches!(
            self.status,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing
        )
    }

    /// Whether the subscription will renew at the period boundary.
    #[must_use]
    pub fn will_renew(&self) -> bool {
        self.has_access() && !self.cancel_at_period_end && self.cancel_at.is_none()
    }

    /// Whether a plan change (upgrade or downgrade) is currently allowed.
    #[must_use]
    pub fn can_change_plan(&self) -> bool {
        self.status == SubscriptionStatus::Active
            && self.deleted_at.is_none()
            && !self.cancel_at_period_end
            && self.cancel_at.is_none()
    }

    /// Move to a new status along a legal edge.
    ///
    /// # Errors
    ///
    /// Reports a state conflict for any edge outside the table; a
    /// transition to the current status is a no-op.
    pub fn transition(&mut self, to: SubscriptionStatus) -> Result<SubscriptionStatus> {
        if self.status == to {
            return Ok(self.status);
        }
        if !self.status.can_transition(to) {
            return Err(BillingError::IllegalTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        tracing::debug!(
            target: "rebill::subscription",
            subscription_id = %self.id,
            from = %self.status,
            to = %to,
            "status transition"
        );
        self.status = to;
        Ok(self.status)
    }

    /// Cancel the subscription.
    ///
    /// Immediate cancellation moves straight to canceled; otherwise the
    /// subscription keeps access and ends at the period boundary.
    /// Canceling an already-canceled subscription is a no-op.
    pub fn cancel(&mut self, immediate: bool, now: DateTime<Utc>) -> Result<SubscriptionStatus> {
        if self.status == SubscriptionStatus::Canceled {
            return Ok(self.status);
        }
        if immediate {
            self.transition(SubscriptionStatus::Canceled)?;
            self.cancel_at = Some(now);
        } else {
            self.cancel_at_period_end = true;
        }
        Ok(self.status)
    }

    /// Pause billing. Pausing an already-paused subscription is a no-op.
    pub fn pause(&mut self) -> Result<SubscriptionStatus> {
        if self.status == SubscriptionStatus::Paused {
            return Ok(self.status);
        }
        self.transition(SubscriptionStatus::Paused)
    }

    /// Resume a paused subscription. Resuming one that is not paused
    /// returns the current state without error.
    pub fn resume(&mut self) -> Result<SubscriptionStatus> {
        if self.status != SubscriptionStatus::Paused {
            return Ok(self.status);
        }
        self.transition(SubscriptionStatus::Active)
    }

    /// Advance into the next billing period.
    ///
    /// # Errors
    ///
    /// Fails with a state conflict when the subscription will not renew
    /// (pending cancellation, paused, terminal, or deleted).
    pub fn renew(&mut self) -> Result<()> {
        if !self.will_renew() {
            return Err(BillingError::StateConflict {
                message: format!("subscription {} will not renew", self.id),
            });
        }
        let next_start = self.current_period_end;
        let next_end = period::advance(next_start, self.billing_interval, self.interval_count)?;
        self.current_period_start = next_start;
        self.current_period_end = next_end;
        if self.status == SubscriptionStatus::Trialing && self.trial_ended(next_start) {
            self.status = SubscriptionStatus::Active;
        }
        Ok(())
    }

    /// Whether the trial window is over as of `now`.
    #[must_use]
    pub fn trial_ended(&self, now: DateTime<Utc>) -> bool {
        self.trial_end.is_some_and(|end| now >= end)
    }

    /// Remaining whole trial days, `None` when not trialing or expired.
    #[must_use]
    pub fn trial_days_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
        let end = self.trial_end?;
        if self.status != SubscriptionStatus::Trialing || now >= end {
            return None;
        }
        Some((end - now).num_days())
    }

    /// Soft-delete; the record survives but never grants access again.
    pub fn soft_delete(&mut self, now: DateTime<Utc>) {
        self.deleted_at = Some(now);
    }

    /// The warning threshold (in days) due as of `now`, if a renewal
    /// warning should fire.
    ///
    /// Returns the smallest configured threshold that the remaining period
    /// has crossed, or `None` when the subscription will not renew or no
    /// threshold applies.
    #[must_use]
    pub fn renewal_warning_due(&self, now: DateTime<Utc>, config: &RenewalConfig) -> Option<i64> {
        if !self.will_renew() {
            return None;
        }
        let days_left = period::days_between(now, self.current_period_end);
        if days_left < 0 {
            return None;
        }
        config
            .warning_days
            .iter()
            .copied()
            .filter(|&w| days_left <= w)
            .min()
    }
}

/// Subscription operations over a store and provider client.
///
/// Mirrors the provider call with an immediate local state update; webhook
/// events later reconcile anything the provider settles asynchronously.
pub struct SubscriptionManager<S: BillingStore, C: ProviderClient> {
    store: S,
    client: C,
}

impl<S: BillingStore, C: ProviderClient> SubscriptionManager<S, C> {
    /// Create a new manager.
    #[must_use]
    pub fn new(store: S, client: C) -> Self {
        Self { store, client }
    }

    /// Fetch a subscription by id.
    pub async fn get(&self, subscription_id: &str) -> Result<Option<Subscription>> {
        self.store.find_subscription(subscription_id).await
    }

    /// Whether the subscription currently grants access.
    pub async fn has_access(&self, subscription_id: &str) -> Result<bool> {
        Ok(self
            .store
            .find_subscription(subscription_id)
            .await?
            .is_some_and(|sub| sub.has_access()))
    }

    /// Cancel a subscription, immediately or at period end. Idempotent.
    pub async fn cancel(
        &self,
        subscription_id: &str,
        immediate: bool,
        now: DateTime<Utc>,
    ) -> Result<Subscription> {
        let mut sub = self.require(subscription_id).await?;
        if sub.status != SubscriptionStatus::Canceled {
            self.client.cancel_subscription(&sub.id, !immediate).await?;
        }
        sub.cancel(immediate, now)?;
        self.store.update_subscription(&sub).await?;
        Ok(sub)
    }

    /// Pause billing. Idempotent.
    pub async fn pause(&self, subscription_id: &str) -> Result<Subscription> {
        let mut sub = self.require(subscription_id).await?;
        if sub.status != SubscriptionStatus::Paused {
            if !sub.has_access() {
                return Err(BillingError::StateConflict {
                    message: format!("cannot pause subscription in status {}", sub.status),
                });
            }
            self.client.pause_subscription(&sub.id).await?;
        }
        sub.pause()?;
        self.store.update_subscription(&sub).await?;
        Ok(sub)
    }

    /// Resume a paused subscription. Idempotent.
    pub async fn resume(&self, subscription_id: &str) -> Result<Subscription> {
        let mut sub = self.require(subscription_id).await?;
        if sub.status == SubscriptionStatus::Paused {
            self.client.resume_subscription(&sub.id).await?;
        }
        sub.resume()?;
        self.store.update_subscription(&sub).await?;
        Ok(sub)
    }

    /// Change the subscription's price mid-period, returning the proration.
    ///
    /// # Errors
    ///
    /// Fails with a state conflict unless the subscription is active with
    /// no pending cancellation, and propagates proration failures for
    /// degenerate periods.
    pub async fn change_plan(
        &self,
        subscription_id: &str,
        new_plan_id: &str,
        new_price_id: &str,
        current_amount: i64,
        new_amount: i64,
        now: DateTime<Utc>,
    ) -> Result<ProrationResult> {
        let mut sub = self.require(subscription_id).await?;
        if !sub.can_change_plan() {
            return Err(BillingError::StateConflict {
                message: format!(
                    "subscription {} is not eligible for a plan change",
                    sub.id
                ),
            });
        }

        let proration = ProrationCalculator::new().for_period(
            current_amount,
            new_amount,
            sub.current_period_start,
            sub.current_period_end,
            now,
        )?;

        self.client
            .update_subscription_price(&sub.id, new_price_id)
            .await?;

        sub.plan_id = new_plan_id.to_string();
        sub.price_id = new_price_id.to_string();
        self.store.update_subscription(&sub).await?;

        tracing::info!(
            target: "rebill::subscription",
            subscription_id = %sub.id,
            plan_id = %new_plan_id,
            net_amount = proration.net_amount,
            "plan changed"
        );
        Ok(proration)
    }

    /// Open a hosted checkout session at the provider.
    pub async fn checkout(&self, request: CreateCheckoutRequest) -> Result<CheckoutSession> {
        let session = self.client.create_checkout_session(request).await?;
        tracing::info!(
            target: "rebill::subscription",
            session_id = %session.id,
            "checkout session created"
        );
        Ok(session)
    }

    /// Fetch the provider's current view of a known subscription, for
    /// reconciliation against local state.
    pub async fn provider_state(&self, subscription_id: &str) -> Result<ProviderSubscription> {
        let sub = self.require(subscription_id).await?;
        self.client.retrieve_subscription(&sub.id).await
    }

    async fn require(&self, subscription_id: &str) -> Result<Subscription> {
        self.store
            .find_subscription(subscription_id)
            .await?
            .ok_or_else(|| BillingError::not_found("subscription", subscription_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn test_subscription(start: DateTime<Utc>) -> Subscription {
        Subscription::new(
            "cus_1",
            "starter",
            "price_starter",
            BillingInterval::Month,
            1,
            1,
            start,
        )
        .unwrap()
    }

    #[test]
    fn test_new_subscription_period_invariant() {
        let sub = test_subscription(utc(2024, 1, 15));
        assert!(sub.current_period_end > sub.current_period_start);
        assert_eq!(sub.current_period_end, utc(2024, 2, 15));
        assert_eq!(sub.status, SubscriptionStatus::Incomplete);
    }

    #[test]
    fn test_transition_table() {
        use SubscriptionStatus::*;
        assert!(Trialing.can_transition(Active));
        assert!(Active.can_transition(PastDue));
        assert!(Active.can_transition(Paused));
        assert!(PastDue.can_transition(Active));
        assert!(PastDue.can_transition(Unpaid));
        assert!(Paused.can_transition(Active));
        assert!(Incomplete.can_transition(Active));
        assert!(Incomplete.can_transition(IncompleteExpired));

        // Recovery and cleanup edges
        assert!(Trialing.can_transition(PastDue));
        assert!(Unpaid.can_transition(Active));
        assert!(Unpaid.can_transition(Canceled));
        assert!(Paused.can_transition(Canceled));

        // Terminal states have no outgoing edges
        assert!(Canceled.is_terminal());
        assert!(IncompleteExpired.is_terminal());
        for to in [Trialing, Active, PastDue, Paused, Incomplete, Unpaid] {
            assert!(!Canceled.can_transition(to));
            assert!(!IncompleteExpired.can_transition(to));
        }

        // No skipping back into trial
        assert!(!Active.can_transition(Trialing));
        assert!(!PastDue.can_transition(Paused));
    }

    #[test]
    fn test_illegal_transition_reported() {
        let mut sub = test_subscription(utc(2024, 1, 1));
        sub.status = SubscriptionStatus::Canceled;
        let err = sub.transition(SubscriptionStatus::Active).unwrap_err();
        assert!(matches!(err, BillingError::IllegalTransition { .. }));
    }

    #[test]
    fn test_cancel_idempotent() {
        let mut sub = test_subscription(utc(2024, 1, 1));
        sub.status = SubscriptionStatus::Active;

        let status = sub.cancel(true, utc(2024, 1, 10)).unwrap();
        assert_eq!(status, SubscriptionStatus::Canceled);

        // Second cancel is a no-op returning canceled
        let status = sub.cancel(true, utc(2024, 1, 11)).unwrap();
        assert_eq!(status, SubscriptionStatus::Canceled);
    }

    #[test]
    fn test_cancel_at_period_end_keeps_access() {
        let mut sub = test_subscription(utc(2024, 1, 1));
        sub.status = SubscriptionStatus::Active;
        sub.cancel(false, utc(2024, 1, 10)).unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert!(sub.cancel_at_period_end);
        assert!(sub.has_access());
        assert!(!sub.will_renew());
    }

    #[test]
    fn test_pause_resume_idempotent() {
        let mut sub = test_subscription(utc(2024, 1, 1));
        sub.status = SubscriptionStatus::Active;

        assert_eq!(sub.pause().unwrap(), SubscriptionStatus::Paused);
        assert_eq!(sub.pause().unwrap(), SubscriptionStatus::Paused);
        assert_eq!(sub.resume().unwrap(), SubscriptionStatus::Active);
        // Resuming a non-paused subscription returns current state
        assert_eq!(sub.resume().unwrap(), SubscriptionStatus::Active);
    }

    #[test]
    fn test_access_rules() {
        let mut sub = test_subscription(utc(2024, 1, 1));
        sub.status = SubscriptionStatus::Active;
        assert!(sub.has_access());

        sub.status = SubscriptionStatus::Trialing;
        assert!(sub.has_access());

        for status in [
            SubscriptionStatus::PastDue,
            SubscriptionStatus::Paused,
            SubscriptionStatus::Canceled,
            SubscriptionStatus::Incomplete,
            SubscriptionStatus::Unpaid,
        ] {
            sub.status = status;
            assert!(!sub.has_access(), "{status} should not grant access");
        }
    }

    #[test]
    fn test_soft_delete_overrides_status() {
        let mut sub = test_subscription(utc(2024, 1, 1));
        sub.status = SubscriptionStatus::Active;
        sub.soft_delete(utc(2024, 1, 5));
        assert!(!sub.has_access());
        assert!(!sub.will_renew());
    }

    #[test]
    fn test_will_renew() {
        let mut sub = test_subscription(utc(2024, 1, 1));
        sub.status = SubscriptionStatus::Active;
        assert!(sub.will_renew());

        sub.cancel_at = Some(utc(2024, 6, 1));
        assert!(!sub.will_renew());

        sub.cancel_at = None;
        sub.cancel_at_period_end = true;
        assert!(!sub.will_renew());
    }

    #[test]
    fn test_plan_change_eligibility() {
        let mut sub = test_subscription(utc(2024, 1, 1));
        sub.status = SubscriptionStatus::Active;
        assert!(sub.can_change_plan());

        sub.cancel_at_period_end = true;
        assert!(!sub.can_change_plan());

        sub.cancel_at_period_end = false;
        sub.status = SubscriptionStatus::Trialing;
        assert!(!sub.can_change_plan());
    }

    #[test]
    fn test_renew_advances_period() {
        let mut sub = test_subscription(utc(2024, 1, 31));
        sub.status = SubscriptionStatus::Active;
        assert_eq!(sub.current_period_end, utc(2024, 2, 29));

        sub.renew().unwrap();
        assert_eq!(sub.current_period_start, utc(2024, 2, 29));
        assert_eq!(sub.current_period_end, utc(2024, 3, 29));
    }

    #[test]
    fn test_renew_refused_when_cancelling() {
        let mut sub = test_subscription(utc(2024, 1, 1));
        sub.status = SubscriptionStatus::Active;
        sub.cancel_at_period_end = true;
        assert!(matches!(
            sub.renew(),
            Err(BillingError::StateConflict { .. })
        ));
    }

    #[test]
    fn test_trial() {
        let mut sub = test_subscription(utc(2024, 1, 1));
        sub.start_trial(14, utc(2024, 1, 1)).unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Trialing);
        assert_eq!(sub.trial_days_remaining(utc(2024, 1, 4)), Some(11));
        assert!(sub.trial_ended(utc(2024, 1, 15)));
        assert_eq!(sub.trial_days_remaining(utc(2024, 1, 20)), None);

        // Trial cannot restart once underway
        assert!(sub.start_trial(7, utc(2024, 1, 2)).is_err());
    }

    #[test]
    fn test_renewal_warning() {
        let config = RenewalConfig::default();
        let mut sub = test_subscription(utc(2024, 1, 1));
        sub.status = SubscriptionStatus::Active;

        // 31 days out: no threshold crossed yet (period is Jan 1 - Feb 1)
        assert_eq!(sub.renewal_warning_due(utc(2024, 1, 1), &config), None);
        assert_eq!(sub.renewal_warning_due(utc(2024, 1, 2), &config), Some(30));
        assert_eq!(sub.renewal_warning_due(utc(2024, 1, 26), &config), Some(7));
        assert_eq!(sub.renewal_warning_due(utc(2024, 1, 31), &config), Some(1));

        sub.cancel_at_period_end = true;
        assert_eq!(sub.renewal_warning_due(utc(2024, 1, 31), &config), None);
    }
}
