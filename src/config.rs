//! Engine configuration.
//!
//! Every tunable lives in an explicit struct with a builder that fills the
//! documented defaults, so partial overrides never lose a field. Configs are
//! plain data; the components that consume them take them by value or
//! reference with no ambient state.

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Dunning configuration for failed payments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Days after the first failure at which each retry attempt fires.
    pub retry_intervals: Vec<i64>,
    /// Maximum number of retry attempts before giving up.
    pub max_attempts: u32,
    /// Days after the first failure during which access is preserved.
    pub grace_period_days: i64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_intervals: vec![1, 3, 5, 7],
            max_attempts: 4,
            grace_period_days: 7,
        }
    }
}

impl RetryConfig {
    /// Start building a config from the defaults.
    #[must_use]
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::default()
    }
}

/// Builder for [`RetryConfig`].
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    retry_intervals: Option<Vec<i64>>,
    max_attempts: Option<u32>,
    grace_period_days: Option<i64>,
}

impl RetryConfigBuilder {
    /// Override the retry schedule (days after first failure).
    #[must_use]
    pub fn retry_intervals(mut self, days: impl Into<Vec<i64>>) -> Self {
        self.retry_intervals = Some(days.into());
        self
    }

    /// Override the maximum number of attempts.
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Override the grace period length in days.
    #[must_use]
    pub fn grace_period_days(mut self, days: i64) -> Self {
        self.grace_period_days = Some(days);
        self
    }

    /// Build the effective config, filling unset fields with defaults.
    #[must_use]
    pub fn build(self) -> RetryConfig {
        let defaults = RetryConfig::default();
        RetryConfig {
            retry_intervals: self.retry_intervals.unwrap_or(defaults.retry_intervals),
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts),
            grace_period_days: self
                .grace_period_days
                .unwrap_or(defaults.grace_period_days),
        }
    }
}

/// Renewal notification configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewalConfig {
    /// Days before period end at which a renewal warning is due.
    pub warning_days: Vec<i64>,
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            warning_days: vec![30, 7, 1],
        }
    }
}

/// Invoice numbering configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceNumberConfig {
    /// Prefix for generated invoice numbers.
    pub prefix: String,
    /// Zero-padded width of the sequence component.
    pub sequence_digits: usize,
}

impl Default for InvoiceNumberConfig {
    fn default() -> Self {
        Self {
            prefix: "INV".to_string(),
            sequence_digits: 6,
        }
    }
}

/// Webhook security configuration.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Maximum age of a signed timestamp before rejection.
    pub tolerance: Duration,
    /// Maximum allowed clock skew into the future.
    pub future_skew: Duration,
    /// How long a seen event id suppresses replays.
    pub replay_ttl: Duration,
    /// Maximum accepted payload size in bytes.
    pub max_payload_bytes: usize,
    /// Requests allowed per source key within `rate_window`.
    pub max_requests: u32,
    /// Sliding rate-limit window.
    pub rate_window: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            tolerance: Duration::seconds(300),
            future_skew: Duration::seconds(60),
            replay_ttl: Duration::hours(1),
            max_payload_bytes: 256 * 1024,
            max_requests: 100,
            rate_window: Duration::seconds(60),
        }
    }
}

impl WebhookConfig {
    /// Start building a config from the defaults.
    #[must_use]
    pub fn builder() -> WebhookConfigBuilder {
        WebhookConfigBuilder::default()
    }
}

/// Builder for [`WebhookConfig`].
#[derive(Debug, Default)]
pub struct WebhookConfigBuilder {
    tolerance: Option<Duration>,
    future_skew: Option<Duration>,
    replay_ttl: Option<Duration>,
    max_payload_bytes: Option<usize>,
    max_requests: Option<u32>,
    rate_window: Option<Duration>,
}

impl WebhookConfigBuilder {
    /// Override the signed-timestamp tolerance.
    #[must_use]
    pub fn tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    /// Override the allowed future clock skew.
    #[must_use]
    pub fn future_skew(mut self, skew: Duration) -> Self {
        self.future_skew = Some(skew);
        self
    }

    /// Override the replay-suppression TTL.
    #[must_use]
    pub fn replay_ttl(mut self, ttl: Duration) -> Self {
        self.replay_ttl = Some(ttl);
        self
    }

    /// Override the maximum payload size.
    #[must_use]
    pub fn max_payload_bytes(mut self, bytes: usize) -> Self {
        self.max_payload_bytes = Some(bytes);
        self
    }

    /// Override the per-source request quota.
    #[must_use]
    pub fn max_requests(mut self, requests: u32) -> Self {
        self.max_requests = Some(requests);
        self
    }

    /// Override the rate-limit window.
    #[must_use]
    pub fn rate_window(mut self, window: Duration) -> Self {
        self.rate_window = Some(window);
        self
    }

    /// Build the effective config, filling unset fields with defaults.
    #[must_use]
    pub fn build(self) -> WebhookConfig {
        let defaults = WebhookConfig::default();
        WebhookConfig {
            tolerance: self.tolerance.unwrap_or(defaults.tolerance),
            future_skew: self.future_skew.unwrap_or(defaults.future_skew),
            replay_ttl: self.replay_ttl.unwrap_or(defaults.replay_ttl),
            max_payload_bytes: self.max_payload_bytes.unwrap_or(defaults.max_payload_bytes),
            max_requests: self.max_requests.unwrap_or(defaults.max_requests),
            rate_window: self.rate_window.unwrap_or(defaults.rate_window),
        }
    }
}
