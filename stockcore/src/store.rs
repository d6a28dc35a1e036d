//! The `LedgerStore` port: the persistence boundary of the ledger.
//!
//! This trait is backend-independent. No business logic lives behind it; all
//! invariant enforcement is in the movement applier. The one contract
//! implementations must honor is atomicity of [`LedgerStore::commit`]: the
//! stock upsert and the movement append succeed or fail together, so the
//! movement log can never disagree with the state it produced.

use async_trait::async_trait;

use crate::errors::StoreResult;
use crate::movement::{MovementKind, MovementRecord};
use crate::stock::{StockRecord, StockWrite};
use crate::types::{ProductId, StockKey, Timestamp, WarehouseId};

/// Criteria for listing movement records.
///
/// All criteria are conjunctive; an empty filter matches every movement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MovementFilter {
    /// Match movements touching exactly this stock key (either side).
    pub key: Option<StockKey>,
    /// Match movements of this product.
    pub product: Option<ProductId>,
    /// Match movements whose `from` or `to` side is this warehouse.
    pub warehouse: Option<WarehouseId>,
    /// Match movements of this kind.
    pub kind: Option<MovementKind>,
    /// Match movements recorded at or after this instant.
    pub since: Option<Timestamp>,
    /// Maximum number of records to return (`None` = no limit).
    pub limit: Option<usize>,
}

impl MovementFilter {
    /// Creates an empty filter matching every movement.
    pub const fn new() -> Self {
        Self {
            key: None,
            product: None,
            warehouse: None,
            kind: None,
            since: None,
            limit: None,
        }
    }

    /// Restricts to movements touching exactly this stock key.
    #[must_use]
    pub fn for_key(mut self, key: StockKey) -> Self {
        self.key = Some(key);
        self
    }

    /// Restricts to movements of this product.
    #[must_use]
    pub fn for_product(mut self, product: ProductId) -> Self {
        self.product = Some(product);
        self
    }

    /// Restricts to movements whose from- or to-side is this warehouse.
    #[must_use]
    pub fn in_warehouse(mut self, warehouse: WarehouseId) -> Self {
        self.warehouse = Some(warehouse);
        self
    }

    /// Restricts to movements of this kind.
    #[must_use]
    pub fn of_kind(mut self, kind: MovementKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Restricts to movements recorded at or after this instant.
    #[must_use]
    pub const fn since(mut self, since: Timestamp) -> Self {
        self.since = Some(since);
        self
    }

    /// Caps the number of records returned.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `movement` satisfies every criterion except the limit.
    ///
    /// Adapters that filter in application code (the in-memory store) use
    /// this directly; SQL-backed adapters translate the same semantics into
    /// their queries.
    pub fn matches(&self, movement: &MovementRecord) -> bool {
        if let Some(key) = &self.key {
            if movement.delta_for(key) == 0 {
                return false;
            }
        }
        if let Some(product) = &self.product {
            if &movement.product != product {
                return false;
            }
        }
        if let Some(warehouse) = &self.warehouse {
            let touches = movement.from_warehouse.as_ref() == Some(warehouse)
                || movement.to_warehouse.as_ref() == Some(warehouse);
            if !touches {
                return false;
            }
        }
        if let Some(kind) = &self.kind {
            if &movement.kind != kind {
                return false;
            }
        }
        if let Some(since) = self.since {
            if movement.recorded_at < since {
                return false;
            }
        }
        true
    }
}

/// The persistence port all ledger store implementations must satisfy.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Point lookup of the stock record for `key`.
    ///
    /// Returns `None` for a key no movement has touched yet; the applier
    /// treats that as `{on_hand: 0, reserved: 0}`.
    async fn stock(&self, key: &StockKey) -> StoreResult<Option<StockRecord>>;

    /// Atomically upserts the stock record and appends the movement record.
    ///
    /// Both writes succeed or neither does. The write's expected revision is
    /// checked against the current record inside the same atomic unit; a
    /// mismatch fails with [`StoreError::RevisionConflict`] and leaves both
    /// tables untouched.
    ///
    /// Returns the stock record as committed (revision bumped, timestamps
    /// set).
    ///
    /// [`StoreError::RevisionConflict`]: crate::errors::StoreError::RevisionConflict
    async fn commit(&self, write: StockWrite, movement: MovementRecord)
        -> StoreResult<StockRecord>;

    /// Lists movement records matching `filter`, ordered by `recorded_at`
    /// then id (the order [`replay_on_hand`] expects).
    ///
    /// [`replay_on_hand`]: crate::movement::replay_on_hand
    async fn movements(&self, filter: &MovementFilter) -> StoreResult<Vec<MovementRecord>>;

    /// All stock records, ordered by key. The read model for dashboards and
    /// stockout predictors.
    async fn snapshot(&self) -> StoreResult<Vec<StockRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroI64;

    fn key(warehouse: &str) -> StockKey {
        StockKey::new(
            ProductId::try_new("widget").unwrap(),
            WarehouseId::try_new(warehouse).unwrap(),
            None,
        )
    }

    fn movement(warehouse: &str, delta: i64, kind: MovementKind) -> MovementRecord {
        MovementRecord::for_delta(&key(warehouse), NonZeroI64::new(delta).unwrap(), kind)
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = MovementFilter::new();
        assert!(filter.matches(&movement("main", 5, MovementKind::Receipt)));
        assert!(filter.matches(&movement("west", -5, MovementKind::Sale)));
    }

    #[test]
    fn warehouse_filter_matches_either_side() {
        let filter = MovementFilter::new().in_warehouse(WarehouseId::try_new("main").unwrap());
        // Positive delta: warehouse lands on the to-side.
        assert!(filter.matches(&movement("main", 5, MovementKind::Receipt)));
        // Negative delta: warehouse lands on the from-side.
        assert!(filter.matches(&movement("main", -5, MovementKind::Sale)));
        assert!(!filter.matches(&movement("west", 5, MovementKind::Receipt)));
    }

    #[test]
    fn key_filter_requires_exact_key_match() {
        let filter = MovementFilter::new().for_key(key("main"));
        assert!(filter.matches(&movement("main", 5, MovementKind::Receipt)));
        assert!(!filter.matches(&movement("west", 5, MovementKind::Receipt)));
    }

    #[test]
    fn kind_filter_distinguishes_custom_tags() {
        let cycle_count = MovementKind::custom("cycle_count").unwrap();
        let filter = MovementFilter::new().of_kind(cycle_count.clone());
        let mut m = movement("main", 1, cycle_count);
        assert!(filter.matches(&m));
        m.kind = MovementKind::Adjustment;
        assert!(!filter.matches(&m));
    }

    #[test]
    fn filters_compose_conjunctively() {
        let filter = MovementFilter::new()
            .for_product(ProductId::try_new("widget").unwrap())
            .of_kind(MovementKind::Receipt);
        assert!(filter.matches(&movement("main", 5, MovementKind::Receipt)));
        assert!(!filter.matches(&movement("main", -5, MovementKind::Sale)));
    }
}
