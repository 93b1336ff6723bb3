//! Persistence boundary for billing records.
//!
//! The engine never talks to a database directly. Applications implement
//! [`BillingStore`] over their own persistence layer; an in-memory
//! implementation backs the test suite and is exported behind the
//! `test-billing` feature for downstream tests.

use async_trait::async_trait;

use crate::entitlements::{Entitlement, Limit};
use crate::error::Result;
use crate::payment::Payment;
use crate::promo::{PromoCode, PromoRedemption};
use crate::subscription::Subscription;

/// A pagination window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Maximum rows to return.
    pub limit: usize,
    /// Rows to skip.
    pub offset: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub data: Vec<T>,
    /// Total matching rows, across all pages.
    pub total: usize,
    /// Whether rows exist beyond this page.
    pub has_more: bool,
}

impl<T> Page<T> {
    /// Build a page by windowing a full, already-filtered result set.
    #[must_use]
    pub fn from_full(mut rows: Vec<T>, page: PageRequest) -> Self {
        let total = rows.len();
        let end = (page.offset + page.limit).min(total);
        let data: Vec<T> = if page.offset >= total {
            Vec::new()
        } else {
            rows.drain(page.offset..end).collect()
        };
        Self {
            data,
            total,
            has_more: end < total,
        }
    }
}

/// Persistence operations the billing engine depends on.
///
/// All mutations on an unknown id fail with [`crate::BillingError::NotFound`].
/// `increment_limit` must be atomic with respect to concurrent increments
/// for the same (customer, key) pair.
#[async_trait]
pub trait BillingStore: Send + Sync {
    // Subscriptions
    async fn insert_subscription(&self, sub: &Subscription) -> Result<()>;
    async fn find_subscription(&self, id: &str) -> Result<Option<Subscription>>;
    async fn update_subscription(&self, sub: &Subscription) -> Result<()>;
    async fn subscriptions_for_customer(
        &self,
        customer_id: &str,
        page: PageRequest,
    ) -> Result<Page<Subscription>>;

    // Payments
    async fn insert_payment(&self, payment: &Payment) -> Result<()>;
    async fn update_payment(&self, payment: &Payment) -> Result<()>;
    /// Payments for a subscription, ordered by creation time ascending.
    async fn payments_for_subscription(&self, subscription_id: &str) -> Result<Vec<Payment>>;

    // Entitlements
    async fn upsert_entitlement(&self, grant: &Entitlement) -> Result<()>;
    async fn find_entitlement(&self, customer_id: &str, key: &str)
        -> Result<Option<Entitlement>>;
    async fn delete_entitlement(&self, customer_id: &str, key: &str) -> Result<()>;

    // Limits
    async fn save_limit(&self, limit: &Limit) -> Result<()>;
    async fn find_limit(&self, customer_id: &str, key: &str) -> Result<Option<Limit>>;
    /// Atomically add `delta` to the counter, failing if the key was never set.
    async fn increment_limit(&self, customer_id: &str, key: &str, delta: u64) -> Result<Limit>;

    // Promo codes
    async fn find_promo_code(&self, code: &str) -> Result<Option<PromoCode>>;
    async fn update_promo_code(&self, promo: &PromoCode) -> Result<()>;
    async fn insert_redemption(&self, redemption: &PromoRedemption) -> Result<()>;
    async fn find_redemption(
        &self,
        code: &str,
        subscription_id: &str,
    ) -> Result<Option<PromoRedemption>>;
    /// How many times `customer_id` has redeemed `code`.
    async fn redemptions_for_customer(&self, code: &str, customer_id: &str) -> Result<u32>;
}

#[cfg(any(test, feature = "test-billing"))]
pub mod test {
    //! In-memory store for tests.

    use std::sync::Arc;

    use dashmap::DashMap;

    use super::*;
    use crate::error::BillingError;

    #[derive(Default)]
    struct Inner {
        subscriptions: DashMap<String, Subscription>,
        payments: DashMap<String, Payment>,
        entitlements: DashMap<(String, String), Entitlement>,
        limits: DashMap<(String, String), Limit>,
        promo_codes: DashMap<String, PromoCode>,
        redemptions: DashMap<(String, String), PromoRedemption>,
    }

    /// Map-backed [`BillingStore`]. Cloning shares the underlying data.
    #[derive(Clone, Default)]
    pub struct InMemoryBillingStore {
        inner: Arc<Inner>,
    }

    impl InMemoryBillingStore {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Insert a promo code directly, bypassing the trait.
        pub fn seed_promo_code(&self, promo: PromoCode) {
            self.inner.promo_codes.insert(promo.code.clone(), promo);
        }

        /// Insert a subscription directly, bypassing the trait.
        pub fn seed_subscription(&self, sub: Subscription) {
            self.inner.subscriptions.insert(sub.id.clone(), sub);
        }
    }

    #[async_trait]
    impl BillingStore for InMemoryBillingStore {
        async fn insert_subscription(&self, sub: &Subscription) -> Result<()> {
            self.inner
                .subscriptions
                .insert(sub.id.clone(), sub.clone());
            Ok(())
        }

        async fn find_subscription(&self, id: &str) -> Result<Option<Subscription>> {
            Ok(self.inner.subscriptions.get(id).map(|s| s.value().clone()))
        }

        async fn update_subscription(&self, sub: &Subscription) -> Result<()> {
            if !self.inner.subscriptions.contains_key(&sub.id) {
                return Err(BillingError::not_found("subscription", &sub.id));
            }
            self.inner
                .subscriptions
                .insert(sub.id.clone(), sub.clone());
            Ok(())
        }

        async fn subscriptions_for_customer(
            &self,
            customer_id: &str,
            page: PageRequest,
        ) -> Result<Page<Subscription>> {
            let mut rows: Vec<Subscription> = self
                .inner
                .subscriptions
                .iter()
                .filter(|entry| entry.customer_id == customer_id)
                .map(|entry| entry.value().clone())
                .collect();
            rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Ok(Page::from_full(rows, page))
        }

        async fn insert_payment(&self, payment: &Payment) -> Result<()> {
            self.inner
                .payments
                .insert(payment.id.clone(), payment.clone());
            Ok(())
        }

        async fn update_payment(&self, payment: &Payment) -> Result<()> {
            if !self.inner.payments.contains_key(&payment.id) {
                return Err(BillingError::not_found("payment", &payment.id));
            }
            self.inner
                .payments
                .insert(payment.id.clone(), payment.clone());
            Ok(())
        }

        async fn payments_for_subscription(
            &self,
            subscription_id: &str,
        ) -> Result<Vec<Payment>> {
            let mut rows: Vec<Payment> = self
                .inner
                .payments
                .iter()
                .filter(|entry| entry.subscription_id.as_deref() == Some(subscription_id))
                .map(|entry| entry.value().clone())
                .collect();
            rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Ok(rows)
        }

        async fn upsert_entitlement(&self, grant: &Entitlement) -> Result<()> {
            let key = (grant.customer_id.clone(), grant.key.clone());
            self.inner.entitlements.insert(key, grant.clone());
            Ok(())
        }

        async fn find_entitlement(
            &self,
            customer_id: &str,
            key: &str,
        ) -> Result<Option<Entitlement>> {
            let key = (customer_id.to_string(), key.to_string());
            Ok(self.inner.entitlements.get(&key).map(|e| e.value().clone()))
        }

        async fn delete_entitlement(&self, customer_id: &str, key: &str) -> Result<()> {
            let key = (customer_id.to_string(), key.to_string());
            self.inner.entitlements.remove(&key);
            Ok(())
        }

        async fn save_limit(&self, limit: &Limit) -> Result<()> {
            let key = (limit.customer_id.clone(), limit.key.clone());
            self.inner.limits.insert(key, limit.clone());
            Ok(())
        }

        async fn find_limit(&self, customer_id: &str, key: &str) -> Result<Option<Limit>> {
            let key = (customer_id.to_string(), key.to_string());
            Ok(self.inner.limits.get(&key).map(|l| l.value().clone()))
        }

        async fn increment_limit(
            &self,
            customer_id: &str,
            key: &str,
            delta: u64,
        ) -> Result<Limit> {
            let map_key = (customer_id.to_string(), key.to_string());
            // get_mut holds the shard lock, making the add atomic per key
            match self.inner.limits.get_mut(&map_key) {
                Some(mut entry) => {
                    entry.current_value = entry.current_value.saturating_add(delta);
                    Ok(entry.value().clone())
                }
                None => Err(BillingError::LimitNotDefined {
                    customer_id: customer_id.to_string(),
                    key: key.to_string(),
                }),
            }
        }

        async fn find_promo_code(&self, code: &str) -> Result<Option<PromoCode>> {
            Ok(self.inner.promo_codes.get(code).map(|p| p.value().clone()))
        }

        async fn update_promo_code(&self, promo: &PromoCode) -> Result<()> {
            if !self.inner.promo_codes.contains_key(&promo.code) {
                return Err(BillingError::not_found("promo_code", &promo.code));
            }
            self.inner
                .promo_codes
                .insert(promo.code.clone(), promo.clone());
            Ok(())
        }

        async fn insert_redemption(&self, redemption: &PromoRedemption) -> Result<()> {
            let key = (redemption.code.clone(), redemption.subscription_id.clone());
            self.inner.redemptions.insert(key, redemption.clone());
            Ok(())
        }

        async fn find_redemption(
            &self,
            code: &str,
            subscription_id: &str,
        ) -> Result<Option<PromoRedemption>> {
            let key = (code.to_string(), subscription_id.to_string());
            Ok(self.inner.redemptions.get(&key).map(|r| r.value().clone()))
        }

        async fn redemptions_for_customer(
            &self,
            code: &str,
            customer_id: &str,
        ) -> Result<u32> {
            let count = self
                .inner
                .redemptions
                .iter()
                .filter(|entry| entry.code == code && entry.customer_id == customer_id)
                .count();
            Ok(count as u32)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_windowing() {
        let rows: Vec<u32> = (0..10).collect();

        let page = Page::from_full(rows.clone(), PageRequest { limit: 4, offset: 0 });
        assert_eq!(page.data, vec![0, 1, 2, 3]);
        assert_eq!(page.total, 10);
        assert!(page.has_more);

        let page = Page::from_full(rows.clone(), PageRequest { limit: 4, offset: 8 });
        assert_eq!(page.data, vec![8, 9]);
        assert!(!page.has_more);

        let page = Page::from_full(rows, PageRequest { limit: 4, offset: 20 });
        assert!(page.data.is_empty());
        assert_eq!(page.total, 10);
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn test_update_unknown_subscription_fails() {
        use crate::period::BillingInterval;
        use crate::subscription::Subscription;
        use chrono::{TimeZone, Utc};

        let store = test::InMemoryBillingStore::new();
        let sub = Subscription::new(
            "cus_1",
            "starter",
            "price_starter",
            BillingInterval::Month,
            1,
            1,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        )
        .unwrap();

        let err = store.update_subscription(&sub).await.unwrap_err();
        assert!(matches!(err, crate::error::BillingError::NotFound { .. }));
    }
}
