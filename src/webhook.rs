//! Inbound webhook admission.
//!
//! Every provider event passes through [`WebhookGate`] before any handler
//! sees it: payload constraints, per-source rate limit, HMAC-SHA256
//! signature with a signed timestamp, freshness, and replay suppression,
//! in that order. The gate owns no handler logic; it either yields a
//! parsed [`WebhookEvent`] or a security error.
//!
//! The signature header follows the `t=<unix-seconds>,v1=<hex>` scheme.
//! Multiple `v1` entries are accepted so secrets can rotate without a
//! delivery gap.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::config::WebhookConfig;
use crate::error::{BillingError, Result};
use crate::ratelimit::SlidingWindowLimiter;
use crate::replay::{InMemoryReplayCache, ReplayCache};

type HmacSha256 = Hmac<Sha256>;

/// A provider event that cleared the gate.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    /// Provider-assigned event id, unique per event.
    pub id: String,
    /// Event type string, e.g. `invoice.payment_failed`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event payload, left uninterpreted for the dispatcher.
    #[serde(default)]
    pub data: serde_json::Value,
}

/// The raw inbound request, as the transport layer saw it.
#[derive(Debug, Clone, Copy)]
pub struct WebhookRequest<'a> {
    /// Raw body bytes, exactly as signed by the provider.
    pub payload: &'a [u8],
    /// The signature header value, if one was sent.
    pub signature_header: Option<&'a str>,
    /// The Content-Type header value, if one was sent.
    pub content_type: Option<&'a str>,
    /// Rate-limit key for the sender (provider account, IP).
    pub source: &'a str,
}

/// Parsed `t=...,v1=...` header.
struct SignatureHeader {
    timestamp: i64,
    /// All `v1` candidates, decoded lazily during verification.
    signatures: Vec<String>,
}

/// Admission gate for inbound provider webhooks.
///
/// The secret is held as a [`SecretString`] so it never appears in debug
/// output or logs.
pub struct WebhookGate<R: ReplayCache> {
    secret: SecretString,
    config: WebhookConfig,
    replay: R,
    limiter: SlidingWindowLimiter,
}

impl<R: ReplayCache> WebhookGate<R> {
    /// Create a gate with the shared signing secret and a replay cache.
    #[must_use]
    pub fn new(secret: impl Into<SecretString>, config: WebhookConfig, replay: R) -> Self {
        let limiter = SlidingWindowLimiter::new(config.max_requests, config.rate_window);
        Self {
            secret: secret.into(),
            config,
            replay,
            limiter,
        }
    }
}

impl WebhookGate<InMemoryReplayCache> {
    /// Create a gate backed by an in-process replay cache whose TTL is
    /// taken from `config.replay_ttl`.
    #[must_use]
    pub fn with_in_memory_replay(secret: impl Into<SecretString>, config: WebhookConfig) -> Self {
        let replay = InMemoryReplayCache::new(config.replay_ttl);
        Self::new(secret, config, replay)
    }
}

impl<R: ReplayCache> WebhookGate<R> {
    /// Run the full admission pipeline on an inbound request.
    ///
    /// # Errors
    ///
    /// Every rejection is a security variant of [`BillingError`]; the first
    /// failing stage wins and later stages are not consulted. In particular
    /// an unverified request never reaches the replay cache, so forged
    /// traffic cannot poison it.
    pub async fn admit(
        &self,
        request: WebhookRequest<'_>,
        now: DateTime<Utc>,
    ) -> Result<WebhookEvent> {
        self.check_payload(&request)?;
        self.limiter.check(request.source, now)?;

        let header = request
            .signature_header
            .ok_or(BillingError::MissingSignature)?;
        let parsed = parse_signature_header(header)?;
        self.verify_signature(&parsed, request.payload)?;
        self.check_freshness(parsed.timestamp, now)?;

        let event: WebhookEvent = serde_json::from_slice(request.payload).map_err(|e| {
            tracing::warn!(
                target: "rebill::webhook",
                error = %e,
                "webhook payload is not valid JSON"
            );
            BillingError::validation("webhook payload is not valid JSON")
        })?;

        self.replay.try_record(&event.id, now).await?;

        tracing::debug!(
            target: "rebill::webhook",
            event_id = %event.id,
            event_type = %event.event_type,
            source = %request.source,
            "webhook admitted"
        );
        Ok(event)
    }

    fn check_payload(&self, request: &WebhookRequest<'_>) -> Result<()> {
        if request.payload.len() > self.config.max_payload_bytes {
            return Err(BillingError::PayloadTooLarge {
                size: request.payload.len(),
                max: self.config.max_payload_bytes,
            });
        }
        match request.content_type {
            Some(ct) if is_json_content_type(ct) => Ok(()),
            other => Err(BillingError::UnsupportedContentType {
                content_type: other.unwrap_or("<none>").to_string(),
            }),
        }
    }

    fn verify_signature(&self, header: &SignatureHeader, payload: &[u8]) -> Result<()> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| BillingError::InvalidSignature)?;
        mac.update(header.timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        let expected = mac.finalize().into_bytes();

        // Any matching v1 passes; rotation sends the old and new secret's
        // signatures side by side.
        for candidate in &header.signatures {
            let Ok(provided) = hex::decode(candidate) else {
                continue;
            };
            if provided.len() == expected.len()
                && expected.as_slice().ct_eq(&provided).unwrap_u8() == 1
            {
                return Ok(());
            }
        }
        Err(BillingError::InvalidSignature)
    }

    fn check_freshness(&self, timestamp: i64, now: DateTime<Utc>) -> Result<()> {
        let age_seconds = now.timestamp() - timestamp;
        let skew = self.config.future_skew.num_seconds();
        let tolerance = self.config.tolerance.num_seconds();

        if age_seconds < -skew {
            return Err(BillingError::FutureTimestamp {
                skew_seconds: -age_seconds,
            });
        }
        if age_seconds > tolerance {
            return Err(BillingError::TimestampExpired { age_seconds });
        }
        Ok(())
    }
}

fn is_json_content_type(value: &str) -> bool {
    let mime = value.split(';').next().unwrap_or("").trim();
    if mime.eq_ignore_ascii_case("application/json") {
        return true;
    }
    // Structured syntax suffixes such as application/webhook+json.
    // The header is caller-supplied, so never index into it by byte offset.
    let lowered = mime.to_ascii_lowercase();
    lowered
        .strip_prefix("application/")
        .map_or(false, |subtype| {
            !subtype.is_empty() && subtype.ends_with("+json")
        })
}

fn parse_signature_header(header: &str) -> Result<SignatureHeader> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(
                    value
                        .parse::<i64>()
                        .map_err(|_| BillingError::MalformedSignature)?,
                );
            }
            Some(("v1", value)) if !value.is_empty() => {
                signatures.push(value.to_string());
            }
            _ => {}
        }
    }

    match (timestamp, signatures.is_empty()) {
        (Some(timestamp), false) => Ok(SignatureHeader {
            timestamp,
            signatures,
        }),
        _ => Err(BillingError::MalformedSignature),
    }
}
