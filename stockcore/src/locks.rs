//! Per-stock-key lock table.
//!
//! Exclusivity is scoped per key: movements against different keys proceed
//! fully in parallel, while the read-compute-commit sequence for one key is
//! serialized. Acquisition is bounded by a timeout so a stuck holder cannot
//! starve every other caller on a hot key.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Mutex as KeyMutex, OwnedMutexGuard};

use crate::types::StockKey;

/// Prune the registry once it grows past this many entries. Keys are bounded
/// by the catalog size, so this is rarely reached outside of tests.
const PRUNE_THRESHOLD: usize = 1024;

/// Registry of per-key async mutexes.
#[derive(Debug)]
pub(crate) struct KeyLocks {
    registry: Mutex<HashMap<StockKey, Arc<KeyMutex<()>>>>,
}

impl KeyLocks {
    pub(crate) fn new() -> Self {
        Self {
            registry: Mutex::new(HashMap::new()),
        }
    }

    /// Acquires the lock for `key`, waiting at most `timeout`.
    ///
    /// Returns `None` on timeout; the caller reports contention.
    pub(crate) async fn acquire(
        &self,
        key: &StockKey,
        timeout: Duration,
    ) -> Option<OwnedMutexGuard<()>> {
        let handle = self.handle_for(key);
        tokio::time::timeout(timeout, handle.lock_owned()).await.ok()
    }

    fn handle_for(&self, key: &StockKey) -> Arc<KeyMutex<()>> {
        let mut registry = self.registry.lock();
        if registry.len() > PRUNE_THRESHOLD {
            // An entry only the registry still references has no holder and
            // no waiters; dropping it under the registry mutex is race-free.
            registry.retain(|_, handle| Arc::strong_count(handle) > 1);
        }
        registry
            .entry(key.clone())
            .or_insert_with(|| Arc::new(KeyMutex::new(())))
            .clone()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.registry.lock().len()
    }
}

impl Default for KeyLocks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ProductId, WarehouseId};

    fn key(product: &str) -> StockKey {
        StockKey::new(
            ProductId::try_new(product).unwrap(),
            WarehouseId::try_new("main").unwrap(),
            None,
        )
    }

    #[tokio::test]
    async fn same_key_blocks_until_timeout() {
        let locks = KeyLocks::new();
        let held = locks
            .acquire(&key("widget"), Duration::from_millis(100))
            .await
            .unwrap();

        let contended = locks
            .acquire(&key("widget"), Duration::from_millis(20))
            .await;
        assert!(contended.is_none());

        drop(held);
        let reacquired = locks
            .acquire(&key("widget"), Duration::from_millis(100))
            .await;
        assert!(reacquired.is_some());
    }

    #[tokio::test]
    async fn different_keys_do_not_contend() {
        let locks = KeyLocks::new();
        let _held = locks
            .acquire(&key("widget"), Duration::from_millis(100))
            .await
            .unwrap();

        let other = locks
            .acquire(&key("gadget"), Duration::from_millis(20))
            .await;
        assert!(other.is_some());
    }

    #[tokio::test]
    async fn registry_prunes_idle_entries_past_threshold() {
        let locks = KeyLocks::new();
        for i in 0..=PRUNE_THRESHOLD {
            let guard = locks
                .acquire(&key(&format!("product-{i}")), Duration::from_millis(100))
                .await
                .unwrap();
            drop(guard);
        }
        assert!(locks.len() > PRUNE_THRESHOLD);

        // Holding one key while the next acquisition prunes keeps that entry.
        let _held = locks
            .acquire(&key("held"), Duration::from_millis(100))
            .await
            .unwrap();
        let _trigger = locks
            .acquire(&key("trigger"), Duration::from_millis(100))
            .await
            .unwrap();
        assert!(locks.len() <= 3);
    }
}
