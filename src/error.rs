//! Billing error types.
//!
//! Every fallible operation in this crate returns [`Result`]. Variants are
//! grouped by kind: validation, not-found, state conflicts, security
//! rejections, exhaustion, and collaborator passthrough. Storage and
//! provider failures are propagated untouched; this crate never retries
//! them on its own.

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BillingError>;

/// The error type for billing operations.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    // Validation
    /// Malformed or out-of-range input, rejected before any state mutation.
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// A billing period with zero or negative length.
    #[error("Proration failed: period has no days")]
    EmptyPeriod,

    /// A payment amount outside the accepted range.
    #[error("Invalid payment amount {amount}: {reason}")]
    InvalidAmount { amount: i64, reason: String },

    // Not found
    /// A referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The promo code does not exist or is inactive.
    #[error("Promo code not found: {code}")]
    PromoCodeNotFound { code: String },

    // State conflicts
    /// The requested status transition is not a legal edge.
    #[error("Illegal subscription transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    /// The operation is not valid for the entity's current state.
    #[error("State conflict: {message}")]
    StateConflict { message: String },

    /// A limit key was incremented before ever being set.
    #[error("Limit '{key}' has no definition for customer {customer_id}")]
    LimitNotDefined { customer_id: String, key: String },

    // Promo eligibility
    /// The promo code's validity window has not opened yet.
    #[error("Promo code {code} is not yet valid")]
    PromoCodeNotStarted { code: String },

    /// The promo code's validity window has closed.
    #[error("Promo code {code} has expired")]
    PromoCodeExpired { code: String },

    /// The promo code is restricted to other plans.
    #[error("Promo code {code} is not eligible for plan {plan_id}")]
    PromoCodePlanNotEligible { code: String, plan_id: String },

    // Security
    /// No signature header was supplied.
    #[error("Missing webhook signature")]
    MissingSignature,

    /// The signature header lacks the timestamp or signature part.
    #[error("Malformed webhook signature header")]
    MalformedSignature,

    /// The recomputed HMAC did not match any provided signature.
    #[error("Invalid webhook signature")]
    InvalidSignature,

    /// The signed timestamp is older than the accepted tolerance.
    #[error("Webhook timestamp expired ({age_seconds} seconds old)")]
    TimestampExpired { age_seconds: i64 },

    /// The signed timestamp is too far in the future.
    #[error("Webhook timestamp is {skew_seconds} seconds in the future")]
    FutureTimestamp { skew_seconds: i64 },

    /// The event id was already seen within the replay TTL.
    #[error("Webhook replay detected: {event_id}")]
    ReplayDetected { event_id: String },

    /// The source key exceeded its request quota.
    #[error("Rate limit exceeded for source '{source_key}'")]
    RateLimitExceeded { source_key: String },

    /// The payload exceeds the configured maximum size.
    #[error("Webhook payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The request body is not JSON.
    #[error("Unsupported webhook content type: {content_type}")]
    UnsupportedContentType { content_type: String },

    // Exhaustion
    /// All configured payment retry attempts have been consumed.
    #[error("Payment retries exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// A promo code usage cap was reached.
    #[error("Promo code {code} redemption cap reached")]
    PromoCodeExhausted { code: String },

    // Collaborator passthrough
    /// A storage collaborator failure, propagated untouched.
    #[error("Storage error: {0}")]
    Storage(#[source] anyhow::Error),

    /// A payment-provider failure, propagated untouched.
    #[error("Provider error during '{operation}': {message}")]
    Provider { operation: String, message: String },
}

impl BillingError {
    /// Build a validation error from any message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Build a not-found error for an entity.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Check whether this error was caused by the caller's input or state.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Storage(_) | Self::Provider { .. })
    }

    /// Check whether this is a webhook security rejection.
    #[must_use]
    pub fn is_security_error(&self) -> bool {
        matches!(
            self,
            Self::MissingSignature
                | Self::MalformedSignature
                | Self::InvalidSignature
                | Self::TimestampExpired { .. }
                | Self::FutureTimestamp { .. }
                | Self::ReplayDetected { .. }
                | Self::RateLimitExceeded { .. }
                | Self::PayloadTooLarge { .. }
                | Self::UnsupportedContentType { .. }
        )
    }

    /// Check whether this is a terminal, non-retryable exhaustion outcome.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(
            self,
            Self::RetriesExhausted { .. } | Self::PromoCodeExhausted { .. }
        )
    }
}
