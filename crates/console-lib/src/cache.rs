//! Single-slot snapshot cache with a freshness deadline

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::time::Instant;

use crate::models::ClusterSnapshot;

struct CacheEntry {
    snapshot: Arc<ClusterSnapshot>,
    expires_at: Instant,
}

/// Latest known-good snapshot. Readers never block each other; the
/// refresher is the only writer.
pub struct TtlCache {
    ttl: Duration,
    slot: RwLock<Option<CacheEntry>>,
}

impl TtlCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RwLock::new(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The cached snapshot, unless absent or expired
    pub fn get(&self) -> Option<Arc<ClusterSnapshot>> {
        let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref()
            .filter(|entry| Instant::now() < entry.expires_at)
            .map(|entry| entry.snapshot.clone())
    }

    /// The cached snapshot regardless of expiry
    pub fn latest(&self) -> Option<Arc<ClusterSnapshot>> {
        let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref().map(|entry| entry.snapshot.clone())
    }

    /// Replace the slot; the new entry lives for one TTL from now
    pub fn set(&self, snapshot: Arc<ClusterSnapshot>) {
        let entry = CacheEntry {
            snapshot,
            expires_at: Instant::now() + self.ttl,
        };
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Some(entry);
    }

    pub fn invalidate(&self) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
