//! Short-TTL cache fronting the live view
//!
//! Serves repeated observer reads without touching the store. The stats
//! entry is invalidated on every execution state transition.

use std::time::{Duration, Instant};
use tokio::sync::RwLock;

pub struct TtlCell<V> {
    ttl: Duration,
    slot: RwLock<Option<(V, Instant)>>,
}

impl<V: Clone> TtlCell<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RwLock::new(None),
        }
    }

    pub async fn get(&self) -> Option<V> {
        let slot = self.slot.read().await;
        match slot.as_ref() {
            Some((value, stored)) if stored.elapsed() < self.ttl => Some(value.clone()),
            _ => None,
        }
    }

    pub async fn put(&self, value: V) {
        *self.slot.write().await = Some((value, Instant::now()));
    }

    pub async fn invalidate(&self) {
        *self.slot.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entries_expire_and_invalidate() {
        let cell = TtlCell::new(Duration::from_millis(20));
        assert!(cell.get().await.is_none());

        cell.put(7u32).await;
        assert_eq!(cell.get().await, Some(7));

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(cell.get().await.is_none());

        cell.put(8u32).await;
        cell.invalidate().await;
        assert!(cell.get().await.is_none());
    }
}
