use std::time::{Duration, Instant};

use tokio::sync::RwLock;

/// A single-slot, time-to-live cache. Used for exchange-info snapshots and
/// ticker reads that don't need to hit the venue on every call.
pub struct TtlCache<T: Clone> {
    ttl: Duration,
    inner: RwLock<Option<(Instant, T)>>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: RwLock::new(None),
        }
    }

    pub async fn get(&self) -> Option<T> {
        let guard = self.inner.read().await;
        match &*guard {
            Some((stored_at, value)) if stored_at.elapsed() < self.ttl => Some(value.clone()),
            _ => None,
        }
    }

    pub async fn set(&self, value: T) {
        let mut guard = self.inner.write().await;
        *guard = Some((Instant::now(), value));
    }

    /// Force the next `get` to miss, independent of TTL.
    pub async fn invalidate(&self) {
        let mut guard = self.inner.write().await;
        *guard = None;
    }
}
