//! In-memory ledger store for `StockCore`
//!
//! This crate provides an in-memory implementation of the `LedgerStore`
//! trait from the stockcore crate, useful for testing and development
//! scenarios where persistence is not required.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::significant_drop_tightening)]

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use stockcore::errors::{StoreError, StoreResult};
use stockcore::movement::MovementRecord;
use stockcore::stock::{ExpectedRevision, StockRecord, StockWrite};
use stockcore::store::{LedgerStore, MovementFilter};
use stockcore::types::{Revision, StockKey, Timestamp};

/// Thread-safe in-memory ledger store for testing.
///
/// Cloning shares the underlying storage, so a clone handed to a read
/// projection observes every commit made through the original.
#[derive(Debug, Clone)]
pub struct InMemoryLedgerStore {
    // Current stock record per key
    stocks: Arc<RwLock<HashMap<StockKey, StockRecord>>>,
    // Append-only movement log, in commit order
    movements: Arc<RwLock<Vec<MovementRecord>>>,
}

impl InMemoryLedgerStore {
    /// Create a new empty in-memory ledger store.
    pub fn new() -> Self {
        Self {
            stocks: Arc::new(RwLock::new(HashMap::new())),
            movements: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Number of movement records committed so far.
    pub fn movement_count(&self) -> usize {
        self.movements.read().expect("RwLock poisoned").len()
    }
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn stock(&self, key: &StockKey) -> StoreResult<Option<StockRecord>> {
        let stocks = self.stocks.read().expect("RwLock poisoned");

        Ok(stocks.get(key).cloned())
    }

    async fn commit(
        &self,
        write: StockWrite,
        movement: MovementRecord,
    ) -> StoreResult<StockRecord> {
        // Both write locks are taken before any check or mutation, in a
        // fixed order, so the pair of writes is atomic with respect to
        // every other reader and writer.
        let mut stocks = self.stocks.write().expect("RwLock poisoned");
        let mut movements = self.movements.write().expect("RwLock poisoned");

        let current = stocks.get(&write.key);
        match (write.expected, current) {
            (ExpectedRevision::Absent, Some(record)) => {
                return Err(StoreError::RevisionConflict {
                    key: write.key,
                    expected: ExpectedRevision::Absent,
                    current: record.revision,
                });
            }
            (ExpectedRevision::At(expected), record) => {
                let current_revision = record.map_or_else(Revision::initial, |r| r.revision);
                if record.is_none() || current_revision != expected {
                    return Err(StoreError::RevisionConflict {
                        key: write.key,
                        expected: ExpectedRevision::At(expected),
                        current: current_revision,
                    });
                }
            }
            (ExpectedRevision::Absent | ExpectedRevision::Any, _) => {}
        }

        let now = Timestamp::now();
        let committed = match stocks.get(&write.key) {
            Some(record) => StockRecord {
                key: write.key.clone(),
                on_hand: write.on_hand,
                reserved: write.reserved.unwrap_or(record.reserved),
                revision: record.revision.next(),
                created_at: record.created_at,
                updated_at: now,
            },
            None => StockRecord {
                key: write.key.clone(),
                on_hand: write.on_hand,
                reserved: write.reserved.unwrap_or(0),
                revision: Revision::initial().next(),
                created_at: now,
                updated_at: now,
            },
        };

        stocks.insert(write.key, committed.clone());
        movements.push(movement);

        Ok(committed)
    }

    async fn movements(&self, filter: &MovementFilter) -> StoreResult<Vec<MovementRecord>> {
        let movements = self.movements.read().expect("RwLock poisoned");

        let mut matching: Vec<MovementRecord> = movements
            .iter()
            .filter(|movement| filter.matches(movement))
            .cloned()
            .collect();

        // Commit order and (recorded_at, id) order agree for records written
        // by the applier; sort anyway so the contract holds for any input.
        matching.sort_by(|a, b| {
            a.recorded_at
                .cmp(&b.recorded_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        if let Some(limit) = filter.limit {
            matching.truncate(limit);
        }

        Ok(matching)
    }

    async fn snapshot(&self) -> StoreResult<Vec<StockRecord>> {
        let stocks = self.stocks.read().expect("RwLock poisoned");

        let mut records: Vec<StockRecord> = stocks.values().cloned().collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }
}
