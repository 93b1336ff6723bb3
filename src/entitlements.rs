//! Feature entitlements and metered usage limits.
//!
//! An entitlement is a boolean grant per (customer, key), optionally
//! time-bounded. A limit is a numeric ceiling with a running counter.
//! A limit key with no stored definition means unlimited access.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BillingError, Result};
use crate::storage::BillingStore;

/// A feature grant for a customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    /// Unique grant identifier.
    pub id: String,
    /// Customer holding the grant.
    pub customer_id: String,
    /// Entitlement key (e.g., "api_access").
    pub key: String,
    /// Where the grant came from (plan, manual, promotion).
    pub source: String,
    /// When the grant was created or last refreshed.
    pub granted_at: DateTime<Utc>,
    /// Optional expiry; `None` means the grant does not lapse.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Entitlement {
    /// Whether the grant is in force as of `now`.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expiry| expiry > now)
    }
}

/// A metered usage ceiling for a customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit {
    /// Customer the limit applies to.
    pub customer_id: String,
    /// Limit key (e.g., "api_calls").
    pub key: String,
    /// Maximum permitted value.
    pub max_value: u64,
    /// Current usage counter.
    pub current_value: u64,
    /// Optional period-boundary reset instant.
    pub reset_at: Option<DateTime<Utc>>,
}

/// Result of checking a limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitCheckResult {
    /// Whether further usage is allowed.
    pub allowed: bool,
    /// Current counter value.
    pub current_value: u64,
    /// The ceiling; `None` means unlimited.
    pub max_value: Option<u64>,
    /// Units left before the ceiling; `None` means unlimited.
    pub remaining: Option<u64>,
}

impl LimitCheckResult {
    /// The result for a key with no stored definition.
    #[must_use]
    pub fn unlimited(current_value: u64) -> Self {
        Self {
            allowed: true,
            current_value,
            max_value: None,
            remaining: None,
        }
    }
}

/// How to apply a usage report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageAction {
    /// Add to the current counter.
    #[default]
    Increment,
    /// Overwrite the counter (period-boundary resets).
    Set,
}

/// Entitlement and limit operations over a billing store.
pub struct EntitlementsManager<S: BillingStore> {
    store: S,
}

impl<S: BillingStore> EntitlementsManager<S> {
    /// Create a new manager.
    #[must_use]
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Grant an entitlement. Idempotent: granting an already-held key
    /// refreshes the expiry and source, leaving exactly one active record.
    pub async fn grant(
        &self,
        customer_id: &str,
        key: &str,
        source: &str,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Entitlement> {
        let grant = match self.store.find_entitlement(customer_id, key).await? {
            Some(mut existing) => {
                existing.source = source.to_string();
                existing.expires_at = expires_at;
                existing.granted_at = now;
                existing
            }
            None => Entitlement {
                id: format!("ent_{}", uuid::Uuid::new_v4().simple()),
                customer_id: customer_id.to_string(),
                key: key.to_string(),
                source: source.to_string(),
                granted_at: now,
                expires_at,
            },
        };
        self.store.upsert_entitlement(&grant).await?;
        Ok(grant)
    }

    /// Remove a grant. Revoking an absent grant is a no-op.
    pub async fn revoke(&self, customer_id: &str, key: &str) -> Result<()> {
        self.store.delete_entitlement(customer_id, key).await
    }

    /// Whether the customer holds an unexpired grant for `key`.
    pub async fn check(&self, customer_id: &str, key: &str, now: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .store
            .find_entitlement(customer_id, key)
            .await?
            .is_some_and(|grant| grant.is_active(now)))
    }

    /// Define or replace a limit ceiling, resetting the counter.
    pub async fn set_limit(
        &self,
        customer_id: &str,
        key: &str,
        max_value: u64,
        reset_at: Option<DateTime<Utc>>,
    ) -> Result<Limit> {
        let limit = Limit {
            customer_id: customer_id.to_string(),
            key: key.to_string(),
            max_value,
            current_value: 0,
            reset_at,
        };
        self.store.save_limit(&limit).await?;
        Ok(limit)
    }

    /// Check current usage against the ceiling.
    ///
    /// A key with no stored definition is unlimited. Counters may
    /// overshoot the ceiling; `remaining` saturates at zero.
    pub async fn check_limit(&self, customer_id: &str, key: &str) -> Result<LimitCheckResult> {
        match self.store.find_limit(customer_id, key).await? {
            None => Ok(LimitCheckResult::unlimited(0)),
            Some(limit) => Ok(LimitCheckResult {
                allowed: limit.current_value < limit.max_value,
                current_value: limit.current_value,
                max_value: Some(limit.max_value),
                remaining: Some(limit.max_value.saturating_sub(limit.current_value)),
            }),
        }
    }

    /// Add `delta` to the usage counter.
    ///
    /// # Errors
    ///
    /// Fails with [`BillingError::LimitNotDefined`] when the key was never
    /// set. The store performs the addition atomically with respect to
    /// concurrent increments for the same (customer, key).
    pub async fn increment(&self, customer_id: &str, key: &str, delta: u64) -> Result<Limit> {
        self.store.increment_limit(customer_id, key, delta).await
    }

    /// Report usage: increment by `quantity` or overwrite the counter.
    pub async fn record_usage(
        &self,
        customer_id: &str,
        key: &str,
        action: UsageAction,
        quantity: u64,
    ) -> Result<Limit> {
        match action {
            UsageAction::Increment => self.increment(customer_id, key, quantity).await,
            UsageAction::Set => {
                let mut limit = self
                    .store
                    .find_limit(customer_id, key)
                    .await?
                    .ok_or_else(|| BillingError::LimitNotDefined {
                        customer_id: customer_id.to_string(),
                        key: key.to_string(),
                    })?;
                limit.current_value = quantity;
                self.store.save_limit(&limit).await?;
                Ok(limit)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test::InMemoryBillingStore;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn manager() -> EntitlementsManager<InMemoryBillingStore> {
        EntitlementsManager::new(InMemoryBillingStore::new())
    }

    #[tokio::test]
    async fn test_grant_and_check() {
        let mgr = manager();
        let now = utc(2024, 1, 1);

        assert!(!mgr.check("cus_1", "reports", now).await.unwrap());

        mgr.grant("cus_1", "reports", "plan", None, now).await.unwrap();
        assert!(mgr.check("cus_1", "reports", now).await.unwrap());
    }

    #[tokio::test]
    async fn test_grant_idempotent() {
        let mgr = manager();
        let now = utc(2024, 1, 1);

        let first = mgr.grant("cus_1", "api", "plan", None, now).await.unwrap();
        let second = mgr
            .grant("cus_1", "api", "promotion", Some(utc(2024, 6, 1)), now)
            .await
            .unwrap();

        // Same record, refreshed in place
        assert_eq!(first.id, second.id);
        assert_eq!(second.source, "promotion");
        assert!(mgr.check("cus_1", "api", now).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_grant_is_inactive() {
        let mgr = manager();
        mgr.grant("cus_1", "beta", "manual", Some(utc(2024, 2, 1)), utc(2024, 1, 1))
            .await
            .unwrap();

        assert!(mgr.check("cus_1", "beta", utc(2024, 1, 15)).await.unwrap());
        assert!(!mgr.check("cus_1", "beta", utc(2024, 2, 1)).await.unwrap());
        assert!(!mgr.check("cus_1", "beta", utc(2024, 3, 1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke() {
        let mgr = manager();
        let now = utc(2024, 1, 1);
        mgr.grant("cus_1", "api", "plan", None, now).await.unwrap();

        mgr.revoke("cus_1", "api").await.unwrap();
        assert!(!mgr.check("cus_1", "api", now).await.unwrap());

        // Revoking again is a no-op
        mgr.revoke("cus_1", "api").await.unwrap();
    }

    #[tokio::test]
    async fn test_undefined_limit_is_unlimited() {
        let mgr = manager();
        let result = mgr.check_limit("cus_1", "projects").await.unwrap();
        assert!(result.allowed);
        assert_eq!(result.max_value, None);
        assert_eq!(result.remaining, None);
    }

    #[tokio::test]
    async fn test_limit_exact_boundary() {
        let mgr = manager();
        mgr.set_limit("cus_1", "projects", 10, None).await.unwrap();

        let limit = mgr.increment("cus_1", "projects", 10).await.unwrap();
        assert_eq!(limit.current_value, 10);

        let result = mgr.check_limit("cus_1", "projects").await.unwrap();
        assert!(!result.allowed);
        assert_eq!(result.current_value, 10);
        assert_eq!(result.max_value, Some(10));
        assert_eq!(result.remaining, Some(0));
    }

    #[tokio::test]
    async fn test_increment_without_definition_fails() {
        let mgr = manager();
        let err = mgr.increment("cus_1", "projects", 1).await.unwrap_err();
        assert!(matches!(err, BillingError::LimitNotDefined { .. }));
    }

    #[tokio::test]
    async fn test_increment_may_overshoot() {
        let mgr = manager();
        mgr.set_limit("cus_1", "api_calls", 5, None).await.unwrap();

        // Increments past the ceiling are not clamped or rejected
        let limit = mgr.increment("cus_1", "api_calls", 8).await.unwrap();
        assert_eq!(limit.current_value, 8);

        let result = mgr.check_limit("cus_1", "api_calls").await.unwrap();
        assert!(!result.allowed);
        assert_eq!(result.remaining, Some(0));
    }

    #[tokio::test]
    async fn test_record_usage_set_resets_counter() {
        let mgr = manager();
        mgr.set_limit("cus_1", "api_calls", 100, None).await.unwrap();
        mgr.record_usage("cus_1", "api_calls", UsageAction::Increment, 40)
            .await
            .unwrap();
        mgr.record_usage("cus_1", "api_calls", UsageAction::Increment, 20)
            .await
            .unwrap();

        let result = mgr.check_limit("cus_1", "api_calls").await.unwrap();
        assert_eq!(result.current_value, 60);

        // Period-boundary reset
        let limit = mgr
            .record_usage("cus_1", "api_calls", UsageAction::Set, 0)
            .await
            .unwrap();
        assert_eq!(limit.current_value, 0);
        assert!(mgr.check_limit("cus_1", "api_calls").await.unwrap().allowed);
    }
}
