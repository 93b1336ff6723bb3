//! Replay suppression for webhook events.
//!
//! Providers redeliver events on timeout, so a duplicate within the TTL
//! window is expected traffic, not necessarily an attack. Either way the
//! second delivery must not be processed twice.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::error::{BillingError, Result};

/// First-seen tracking for event ids.
///
/// Implementations serialize access per event id; the gate calls this once
/// per verified request.
#[async_trait]
pub trait ReplayCache: Send + Sync {
    /// Record `event_id` as seen at `now`.
    ///
    /// # Errors
    ///
    /// Fails with [`BillingError::ReplayDetected`] when the id was already
    /// seen within the TTL window.
    async fn try_record(&self, event_id: &str, now: DateTime<Utc>) -> Result<()>;
}

/// Map-backed [`ReplayCache`] with lazy per-entry eviction.
///
/// An expired entry is overwritten on lookup rather than swept by a
/// background task. Suitable for a single process; multi-node deployments
/// want a shared backing store instead.
pub struct InMemoryReplayCache {
    seen: DashMap<String, DateTime<Utc>>,
    ttl: Duration,
}

impl InMemoryReplayCache {
    /// Create a cache where entries expire after `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: DashMap::new(),
            ttl,
        }
    }

    /// Number of tracked ids, expired entries included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Drop every entry older than the TTL as of `now`.
    pub fn evict_expired(&self, now: DateTime<Utc>) {
        let ttl = self.ttl;
        self.seen.retain(|_, first_seen| now - *first_seen <= ttl);
    }
}

impl Default for InMemoryReplayCache {
    fn default() -> Self {
        Self::new(Duration::hours(1))
    }
}

#[async_trait]
impl ReplayCache for InMemoryReplayCache {
    async fn try_record(&self, event_id: &str, now: DateTime<Utc>) -> Result<()> {
        // The entry guard holds the shard lock, so concurrent deliveries of
        // the same id serialize here.
        match self.seen.entry(event_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                if now - *entry.get() <= self.ttl {
                    return Err(BillingError::ReplayDetected {
                        event_id: event_id.to_string(),
                    });
                }
                // Expired entry, treat as first sight again
                entry.insert(now);
                Ok(())
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(now);
                Ok(())
            }
        }
    }
}
