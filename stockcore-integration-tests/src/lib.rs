//! Test harnesses shared by the `StockCore` integration tests.
//!
//! The wrappers here decorate [`InMemoryLedgerStore`] with controlled
//! misbehavior - injected commit failures and slow commits - so tests can
//! exercise the applier's partial-failure and contention paths without a
//! real failing backend.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use stockcore::errors::{StoreError, StoreResult};
use stockcore::movement::MovementRecord;
use stockcore::stock::{StockRecord, StockWrite};
use stockcore::store::{LedgerStore, MovementFilter};
use stockcore::types::StockKey;
use stockcore_memory::InMemoryLedgerStore;

/// A ledger store that fails specific commits on demand.
///
/// Commits are numbered from zero in the order they arrive; a commit whose
/// sequence number was registered with [`fail_commit`] fails with
/// `StoreError::Unavailable` before touching the underlying store.
///
/// [`fail_commit`]: FlakyStore::fail_commit
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: InMemoryLedgerStore,
    commits: AtomicUsize,
    failures: Mutex<HashSet<usize>>,
}

impl FlakyStore {
    /// Creates a store with no scheduled failures.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules the `index`-th commit (zero-based) to fail.
    pub fn fail_commit(&self, index: usize) {
        self.failures
            .lock()
            .expect("Mutex poisoned")
            .insert(index);
    }

    /// The underlying in-memory store, for direct inspection.
    pub const fn inner(&self) -> &InMemoryLedgerStore {
        &self.inner
    }
}

#[async_trait]
impl LedgerStore for FlakyStore {
    async fn stock(&self, key: &StockKey) -> StoreResult<Option<StockRecord>> {
        self.inner.stock(key).await
    }

    async fn commit(
        &self,
        write: StockWrite,
        movement: MovementRecord,
    ) -> StoreResult<StockRecord> {
        let sequence = self.commits.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .failures
            .lock()
            .expect("Mutex poisoned")
            .contains(&sequence);
        if injected {
            return Err(StoreError::Unavailable(format!(
                "injected fault on commit {sequence}"
            )));
        }
        self.inner.commit(write, movement).await
    }

    async fn movements(&self, filter: &MovementFilter) -> StoreResult<Vec<MovementRecord>> {
        self.inner.movements(filter).await
    }

    async fn snapshot(&self) -> StoreResult<Vec<StockRecord>> {
        self.inner.snapshot().await
    }
}

/// A ledger store whose commits against one designated key are slow.
///
/// Used to verify key isolation (a slow key must not delay other keys) and
/// contention timeouts (a held key lock must fail fast for other callers).
#[derive(Debug)]
pub struct SlowStore {
    inner: InMemoryLedgerStore,
    slow_key: StockKey,
    delay: Duration,
}

impl SlowStore {
    /// Creates a store that sleeps for `delay` inside every commit against
    /// `slow_key`.
    pub fn new(slow_key: StockKey, delay: Duration) -> Self {
        Self {
            inner: InMemoryLedgerStore::new(),
            slow_key,
            delay,
        }
    }
}

#[async_trait]
impl LedgerStore for SlowStore {
    async fn stock(&self, key: &StockKey) -> StoreResult<Option<StockRecord>> {
        self.inner.stock(key).await
    }

    async fn commit(
        &self,
        write: StockWrite,
        movement: MovementRecord,
    ) -> StoreResult<StockRecord> {
        if write.key == self.slow_key {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.commit(write, movement).await
    }

    async fn movements(&self, filter: &MovementFilter) -> StoreResult<Vec<MovementRecord>> {
        self.inner.movements(filter).await
    }

    async fn snapshot(&self) -> StoreResult<Vec<StockRecord>> {
        self.inner.snapshot().await
    }
}
