//! Rebill - a subscription billing lifecycle engine
//!
//! Rebill models the billing domain as a set of pure calculators and small
//! async managers: a closed subscription state machine, integer-exact
//! proration, payment retry and grace-period dunning, feature entitlements
//! with usage limits, promo codes, and a hardened webhook admission gate.
//! It executes no charges itself; persistence and the payment provider are
//! injected behind the [`BillingStore`] and [`ProviderClient`] traits.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use rebill::{ProrationCalculator, RetryConfig, RetryEngine};
//!
//! fn main() -> rebill::Result<()> {
//!     rebill::init_tracing();
//!
//!     // 15 days into a 30-day period, upgrading 19.99 -> 49.99
//!     let proration = ProrationCalculator::new().calculate(1999, 4999, 15, 30)?;
//!     assert_eq!(proration.net_amount, 1500);
//!
//!     let engine = RetryEngine::new(RetryConfig::default());
//!     let _ = engine;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod entitlements;
mod error;
pub mod invoice;
pub mod payment;
pub mod period;
pub mod price;
pub mod promo;
pub mod proration;
pub mod provider;
pub mod ratelimit;
pub mod replay;
pub mod retry;
pub mod storage;
pub mod subscription;
pub mod webhook;

// Re-exports for public API
pub use config::{
    InvoiceNumberConfig, RenewalConfig, RetryConfig, RetryConfigBuilder, WebhookConfig,
    WebhookConfigBuilder,
};
pub use entitlements::{
    Entitlement, EntitlementsManager, Limit, LimitCheckResult, UsageAction,
};
pub use error::{BillingError, Result};
pub use invoice::{
    generate_invoice_number, parse_invoice_number, proration_lines, Invoice, InvoiceLine,
    InvoiceStatus,
};
pub use payment::{Payment, PaymentStatus, MAX_PAYMENT_AMOUNT};
pub use period::BillingInterval;
pub use price::Price;
pub use promo::{Discount, DiscountType, PromoCode, PromoEngine, PromoRedemption};
pub use proration::{ProrationCalculator, ProrationResult};
pub use provider::{
    CheckoutMode, CheckoutSession, CreateCheckoutRequest, ProviderClient, ProviderSubscription,
};
pub use ratelimit::SlidingWindowLimiter;
pub use replay::{InMemoryReplayCache, ReplayCache};
pub use retry::{RetryEngine, RetryState};
pub use storage::{BillingStore, Page, PageRequest};
pub use subscription::{Subscription, SubscriptionManager, SubscriptionStatus};
pub use webhook::{WebhookEvent, WebhookGate, WebhookRequest};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging with sensible defaults
///
/// Call this early, typically in main() before constructing any managers.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "info", "debug", "rebill=debug")
/// - `REBILL_LOG_JSON`: Set to "true" for JSON formatted logs
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_logs = std::env::var("REBILL_LOG_JSON")
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
