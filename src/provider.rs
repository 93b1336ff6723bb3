//! Payment provider boundary.
//!
//! The engine mirrors provider-side mutations into local state but never
//! executes charges itself. Applications implement [`ProviderClient`]
//! over their provider SDK; calls that fail surface as
//! [`crate::BillingError::Provider`] and leave local state untouched.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

/// The provider's view of a subscription, as returned by
/// [`ProviderClient::retrieve_subscription`]. Status strings are the
/// provider's own vocabulary and are not parsed here.
#[derive(Debug, Clone)]
pub struct ProviderSubscription {
    pub id: String,
    pub status: String,
    pub price_id: String,
    pub current_period_end: Option<DateTime<Utc>>,
}

/// A hosted checkout session the customer is redirected to.
#[derive(Debug, Clone)]
pub struct CheckoutSession {
    pub id: String,
    /// URL to send the customer to.
    pub url: String,
}

/// What the checkout session collects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutMode {
    /// One-time payment.
    Payment,
    /// Recurring subscription.
    Subscription,
    /// Collect a payment method without charging.
    Setup,
}

impl CheckoutMode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Payment => "payment",
            Self::Subscription => "subscription",
            Self::Setup => "setup",
        }
    }
}

/// Request to open a hosted checkout session.
#[derive(Debug, Clone)]
pub struct CreateCheckoutRequest {
    pub customer_id: String,
    pub price_id: String,
    pub quantity: u32,
    pub mode: CheckoutMode,
    /// Where the provider redirects after payment.
    pub success_url: String,
    /// Where the provider redirects on abandonment.
    pub cancel_url: String,
    pub trial_period_days: Option<u32>,
}

/// Remote operations the billing engine issues against a payment provider.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Create a subscription at the provider, returning its provider id.
    async fn create_subscription(&self, customer_id: &str, price_id: &str) -> Result<String>;

    /// Fetch the provider's current view of a subscription.
    async fn retrieve_subscription(&self, subscription_id: &str) -> Result<ProviderSubscription>;

    /// Cancel a subscription, at the period boundary or immediately.
    async fn cancel_subscription(&self, subscription_id: &str, at_period_end: bool)
        -> Result<()>;

    /// Pause billing for a subscription.
    async fn pause_subscription(&self, subscription_id: &str) -> Result<()>;

    /// Resume a paused subscription.
    async fn resume_subscription(&self, subscription_id: &str) -> Result<()>;

    /// Move a subscription to a different price.
    async fn update_subscription_price(&self, subscription_id: &str, price_id: &str)
        -> Result<()>;

    /// Open a hosted checkout session.
    async fn create_checkout_session(
        &self,
        request: CreateCheckoutRequest,
    ) -> Result<CheckoutSession>;

    /// Fetch an existing checkout session.
    async fn retrieve_checkout_session(&self, session_id: &str) -> Result<CheckoutSession>;

    /// Invalidate an open checkout session so its URL stops working.
    async fn expire_checkout_session(&self, session_id: &str) -> Result<()>;
}

#[cfg(any(test, feature = "test-billing"))]
pub mod test {
    //! Recording mock for provider calls.

    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::error::BillingError;

    /// Records every call; optionally fails all of them.
    #[derive(Clone, Default)]
    pub struct MockProviderClient {
        calls: Arc<Mutex<Vec<String>>>,
        fail: Arc<Mutex<bool>>,
    }

    impl MockProviderClient {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every subsequent call return a provider error.
        pub fn fail_next_calls(&self) {
            *self.fail.lock().unwrap() = true;
        }

        /// The calls recorded so far, as "operation:args" strings.
        #[must_use]
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) -> Result<()> {
            if *self.fail.lock().unwrap() {
                return Err(BillingError::Provider {
                    operation: call,
                    message: "mock failure".to_string(),
                });
            }
            self.calls.lock().unwrap().push(call);
            Ok(())
        }
    }

    #[async_trait]
    impl ProviderClient for MockProviderClient {
        async fn create_subscription(
            &self,
            customer_id: &str,
            price_id: &str,
        ) -> Result<String> {
            self.record(format!("create_subscription:{customer_id}:{price_id}"))?;
            Ok(format!("sub_provider_{customer_id}"))
        }

        async fn cancel_subscription(
            &self,
            subscription_id: &str,
            at_period_end: bool,
        ) -> Result<()> {
            self.record(format!("cancel_subscription:{subscription_id}:{at_period_end}"))
        }

        async fn pause_subscription(&self, subscription_id: &str) -> Result<()> {
            self.record(format!("pause_subscription:{subscription_id}"))
        }

        async fn resume_subscription(&self, subscription_id: &str) -> Result<()> {
            self.record(format!("resume_subscription:{subscription_id}"))
        }

        async fn retrieve_subscription(
            &self,
            subscription_id: &str,
        ) -> Result<ProviderSubscription> {
            self.record(format!("retrieve_subscription:{subscription_id}"))?;
            Ok(ProviderSubscription {
                id: subscription_id.to_string(),
                status: "active".to_string(),
                price_id: "price_mock".to_string(),
                current_period_end: None,
            })
        }

        async fn update_subscription_price(
            &self,
            subscription_id: &str,
            price_id: &str,
        ) -> Result<()> {
            self.record(format!(
                "update_subscription_price:{subscription_id}:{price_id}"
            ))
        }

        async fn create_checkout_session(
            &self,
            request: CreateCheckoutRequest,
        ) -> Result<CheckoutSession> {
            self.record(format!(
                "create_checkout_session:{}:{}:{}",
                request.customer_id,
                request.price_id,
                request.mode.as_str()
            ))?;
            Ok(CheckoutSession {
                id: format!("cs_mock_{}", request.customer_id),
                url: "https://checkout.example.com/cs_mock".to_string(),
            })
        }

        async fn retrieve_checkout_session(&self, session_id: &str) -> Result<CheckoutSession> {
            self.record(format!("retrieve_checkout_session:{session_id}"))?;
            Ok(CheckoutSession {
                id: session_id.to_string(),
                url: "https://checkout.example.com/cs_mock".to_string(),
            })
        }

        async fn expire_checkout_session(&self, session_id: &str) -> Result<()> {
            self.record(format!("expire_checkout_session:{session_id}"))
        }
    }
}
