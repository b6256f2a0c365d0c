//! Short-lived memory of the metrics access check

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::sources::AccessStatus;

/// Last access verdict with its expiry
#[derive(Debug)]
pub struct AccessCache {
    ttl: Duration,
    entry: Mutex<Option<(AccessStatus, Instant)>>,
}

impl AccessCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: Mutex::new(None),
        }
    }

    /// The remembered verdict, if it has not expired
    pub fn get(&self) -> Option<AccessStatus> {
        let entry = self.entry.lock().unwrap_or_else(PoisonError::into_inner);
        entry
            .as_ref()
            .filter(|(_, expires)| Instant::now() < *expires)
            .map(|(status, _)| status.clone())
    }

    pub fn record(&self, status: AccessStatus) {
        let mut entry = self.entry.lock().unwrap_or_else(PoisonError::into_inner);
        *entry = Some((status, Instant::now() + self.ttl));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_verdict_expires() {
        let cache = AccessCache::new(Duration::from_secs(60));
        assert_eq!(cache.get(), None);

        cache.record(AccessStatus::Denied("forbidden".to_string()));
        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(cache.get(), Some(AccessStatus::Denied("forbidden".to_string())));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get(), None);
    }
}
