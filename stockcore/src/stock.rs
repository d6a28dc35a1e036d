//! Stock records: the current-state side of the ledger.
//!
//! One [`StockRecord`] exists per stock key, created lazily by the first
//! movement referencing the key and never deleted - a zero-quantity row is a
//! valid, inactive record. Records are only ever updated through the movement
//! applier's atomic commit.

use serde::{Deserialize, Serialize};

use crate::types::{Revision, StockKey, Timestamp};

/// The current quantities for one stock key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    /// The key this record tracks.
    pub key: StockKey,
    /// Total physical quantity present, irrespective of reservations.
    /// Never negative; the clamp policy guarantees it.
    pub on_hand: u64,
    /// Quantity earmarked by outstanding orders. Maintained by the
    /// reservation subsystem; the ledger stores it but never mutates it.
    pub reserved: u64,
    /// Bumped on every committed movement; used to detect writers bypassing
    /// the per-key critical section.
    pub revision: Revision,
    /// When the record was created by its first movement.
    pub created_at: Timestamp,
    /// When the record was last updated.
    pub updated_at: Timestamp,
}

impl StockRecord {
    /// Quantity available for new orders: `on_hand − reserved`, floored at
    /// zero. Always derived, never stored.
    pub const fn available(&self) -> u64 {
        self.on_hand.saturating_sub(self.reserved)
    }
}

/// The revision a writer expects the stock record to be at.
///
/// Store implementations reject a commit whose expectation does not match,
/// so a lookup-then-commit sequence under the applier's key lock can never
/// lose an update to a writer that bypassed the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpectedRevision {
    /// No record may exist for the key yet.
    Absent,
    /// The record must exist at exactly this revision.
    At(Revision),
    /// Any state is acceptable (no conflict detection). Not used by the
    /// applier; exists for administrative backfills.
    Any,
}

impl std::fmt::Display for ExpectedRevision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Absent => f.write_str("absent"),
            Self::At(revision) => write!(f, "revision {revision}"),
            Self::Any => f.write_str("any"),
        }
    }
}

/// The stock-side half of an atomic commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockWrite {
    /// The key to upsert.
    pub key: StockKey,
    /// The new on-hand quantity.
    pub on_hand: u64,
    /// New reserved quantity, or `None` to preserve the current value.
    /// The applier always passes `None`; reservation maintenance lives
    /// outside the ledger.
    pub reserved: Option<u64>,
    /// The revision the writer observed before computing `on_hand`.
    pub expected: ExpectedRevision,
}

impl StockWrite {
    /// Creates a stock write that preserves the record's reserved quantity.
    pub const fn new(key: StockKey, on_hand: u64, expected: ExpectedRevision) -> Self {
        Self {
            key,
            on_hand,
            reserved: None,
            expected,
        }
    }

    /// Sets the reserved quantity. For administrative tooling only.
    #[must_use]
    pub const fn with_reserved(mut self, reserved: u64) -> Self {
        self.reserved = Some(reserved);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ProductId, WarehouseId};

    fn record(on_hand: u64, reserved: u64) -> StockRecord {
        StockRecord {
            key: StockKey::new(
                ProductId::try_new("widget").unwrap(),
                WarehouseId::try_new("main").unwrap(),
                None,
            ),
            on_hand,
            reserved,
            revision: Revision::initial().next(),
            created_at: Timestamp::now(),
            updated_at: Timestamp::now(),
        }
    }

    #[test]
    fn available_subtracts_reservations() {
        assert_eq!(record(10, 3).available(), 7);
    }

    #[test]
    fn available_floors_at_zero_when_over_reserved() {
        assert_eq!(record(5, 9).available(), 0);
    }

    #[test]
    fn expected_revision_display_forms() {
        assert_eq!(ExpectedRevision::Absent.to_string(), "absent");
        assert_eq!(
            ExpectedRevision::At(Revision::try_new(7).unwrap()).to_string(),
            "revision 7"
        );
        assert_eq!(ExpectedRevision::Any.to_string(), "any");
    }
}
