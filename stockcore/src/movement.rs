//! Movement records: the append-only audit trail of the ledger.
//!
//! Every quantity change is captured as an immutable [`MovementRecord`]. The
//! record stores an unsigned magnitude plus a from/to location pair instead
//! of a signed quantity: stock leaving a location populates the `from` side,
//! stock arriving populates the `to` side. One schema therefore serves
//! intra-warehouse adjustments and inter-warehouse transfers alike - a
//! transfer is one outbound movement paired with one inbound movement on two
//! different stock keys, each independently atomic.

use std::num::NonZeroI64;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{BinId, MovementId, ProductId, StockKey, Timestamp, WarehouseId};

/// The maximum length of a custom movement kind tag.
const MAX_KIND_LEN: usize = 64;

/// The error returned when a movement kind tag fails validation.
#[derive(Debug, Clone, Error)]
#[error("invalid movement kind: {0}")]
pub struct InvalidMovementKind(String);

/// Classifies a movement for audit and reporting purposes.
///
/// The known variants cover the ledger's own vocabulary; [`Custom`] carries
/// a caller-supplied tag for domain-specific movement types without losing
/// type safety. Kinds serialize as a single string (`"receipt"`,
/// `"transfer_out"`, or the custom tag), so one column carries the whole
/// enumeration.
///
/// [`Custom`]: MovementKind::Custom
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MovementKind {
    /// Stock received against a purchase order.
    Receipt,
    /// Manual quantity adjustment.
    Adjustment,
    /// Inbound half of a warehouse transfer.
    TransferIn,
    /// Outbound half of a warehouse transfer.
    TransferOut,
    /// Correction of a previously recorded quantity.
    Correction,
    /// Initial quantity load when a location is first stocked.
    InitialLoad,
    /// Stock leaving through a sale.
    Sale,
    /// A caller-supplied movement type; the tag is trimmed, non-empty, and
    /// at most 64 characters.
    Custom(String),
}

impl MovementKind {
    /// Creates a custom movement kind from a caller-supplied tag.
    ///
    /// Tags matching a known kind normalize to that variant, so
    /// `MovementKind::custom("receipt")` and [`MovementKind::Receipt`]
    /// compare equal.
    pub fn custom(tag: impl Into<String>) -> Result<Self, InvalidMovementKind> {
        let tag = tag.into().trim().to_string();
        if tag.is_empty() {
            return Err(InvalidMovementKind("tag must be non-empty".to_string()));
        }
        if tag.chars().count() > MAX_KIND_LEN {
            return Err(InvalidMovementKind(format!(
                "tag exceeds {MAX_KIND_LEN} characters"
            )));
        }
        Ok(Self::from_tag(tag))
    }

    fn from_tag(tag: String) -> Self {
        match tag.as_str() {
            "receipt" => Self::Receipt,
            "adjustment" => Self::Adjustment,
            "transfer_in" => Self::TransferIn,
            "transfer_out" => Self::TransferOut,
            "correction" => Self::Correction,
            "initial_load" => Self::InitialLoad,
            "sale" => Self::Sale,
            _ => Self::Custom(tag),
        }
    }

    /// The string form this kind serializes as.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Receipt => "receipt",
            Self::Adjustment => "adjustment",
            Self::TransferIn => "transfer_in",
            Self::TransferOut => "transfer_out",
            Self::Correction => "correction",
            Self::InitialLoad => "initial_load",
            Self::Sale => "sale",
            Self::Custom(tag) => tag,
        }
    }
}

impl std::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for MovementKind {
    type Error = InvalidMovementKind;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::custom(value)
    }
}

impl From<MovementKind> for String {
    fn from(kind: MovementKind) -> Self {
        kind.as_str().to_string()
    }
}

/// An optional pointer to the business object that caused a movement.
///
/// Opaque to the ledger; used only for audit traceability (purchase order,
/// transfer batch, manual edit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// The kind of the causing object, e.g. `"purchase_order"`.
    pub kind: String,
    /// The identifier of the causing object.
    pub id: String,
}

impl Reference {
    /// Creates a new reference.
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

/// One immutable row of the movement log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecord {
    /// Unique identifier, generated at write time.
    pub id: MovementId,
    /// The product that moved.
    pub product: ProductId,
    /// Unsigned magnitude of the change; never zero.
    pub quantity: u64,
    /// What kind of movement this was.
    pub kind: MovementKind,
    /// Warehouse the stock left, for negative deltas.
    pub from_warehouse: Option<WarehouseId>,
    /// Bin the stock left, for negative deltas against a binned key.
    pub from_bin: Option<BinId>,
    /// Warehouse the stock arrived at, for positive deltas.
    pub to_warehouse: Option<WarehouseId>,
    /// Bin the stock arrived at, for positive deltas against a binned key.
    pub to_bin: Option<BinId>,
    /// Pointer to the causing business object, if any.
    pub reference: Option<Reference>,
    /// Free-text reason, if any.
    pub notes: Option<String>,
    /// Immutable write timestamp.
    pub recorded_at: Timestamp,
}

impl MovementRecord {
    /// Builds the movement record for applying `delta` to `key`.
    ///
    /// Negative deltas populate the `from` side with the key's location
    /// (stock is leaving), positive deltas populate the `to` side. A fresh
    /// [`MovementId`] and the current timestamp are assigned.
    pub fn for_delta(key: &StockKey, delta: NonZeroI64, kind: MovementKind) -> Self {
        let outbound = delta.get() < 0;
        let (from_warehouse, from_bin, to_warehouse, to_bin) = if outbound {
            (Some(key.warehouse.clone()), key.bin.clone(), None, None)
        } else {
            (None, None, Some(key.warehouse.clone()), key.bin.clone())
        };
        Self {
            id: MovementId::new(),
            product: key.product.clone(),
            quantity: delta.get().unsigned_abs(),
            kind,
            from_warehouse,
            from_bin,
            to_warehouse,
            to_bin,
            reference: None,
            notes: None,
            recorded_at: Timestamp::now(),
        }
    }

    /// Attaches a reference to the causing business object.
    #[must_use]
    pub fn with_reference(mut self, reference: Reference) -> Self {
        self.reference = Some(reference);
        self
    }

    /// Attaches a free-text reason.
    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// The stock key this movement touched, reconstructed from whichever
    /// location side is populated. `None` if neither side is set (a record
    /// the ledger itself would never write).
    pub fn key(&self) -> Option<StockKey> {
        if let Some(warehouse) = &self.to_warehouse {
            return Some(StockKey::new(
                self.product.clone(),
                warehouse.clone(),
                self.to_bin.clone(),
            ));
        }
        self.from_warehouse.as_ref().map(|warehouse| {
            StockKey::new(self.product.clone(), warehouse.clone(), self.from_bin.clone())
        })
    }

    /// The signed delta this movement represents for `key`: positive when
    /// the key matches the `to` side, negative when it matches the `from`
    /// side, zero when the movement does not touch the key.
    pub fn delta_for(&self, key: &StockKey) -> i64 {
        // Applier-written quantities are |i64| magnitudes, so this fits.
        let magnitude = i64::try_from(self.quantity).unwrap_or(i64::MAX);
        if self.product != key.product {
            return 0;
        }
        if self.to_warehouse.as_ref() == Some(&key.warehouse) && self.to_bin == key.bin {
            return magnitude;
        }
        if self.from_warehouse.as_ref() == Some(&key.warehouse) && self.from_bin == key.bin {
            return -magnitude;
        }
        0
    }
}

/// Replays a stock key's movement log, reproducing its on-hand quantity.
///
/// Movements must be supplied in recorded order (the order
/// [`LedgerStore::movements`] returns). Each step applies the movement's
/// signed delta and clamps at zero, exactly as the applier did when the
/// movement was committed, so the result reconciles exactly with the current
/// stock record. This is the audit path for investigating drift: a mismatch
/// between the replayed value and the stored on-hand indicates a write that
/// bypassed the ledger.
///
/// [`LedgerStore::movements`]: crate::store::LedgerStore::movements
pub fn replay_on_hand<'a, I>(movements: I, key: &StockKey) -> u64
where
    I: IntoIterator<Item = &'a MovementRecord>,
{
    movements.into_iter().fold(0u64, |on_hand, movement| {
        let delta = movement.delta_for(key);
        if delta < 0 {
            on_hand.saturating_sub(delta.unsigned_abs())
        } else {
            on_hand.saturating_add(delta.unsigned_abs())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ProductId, WarehouseId};

    fn key() -> StockKey {
        StockKey::new(
            ProductId::try_new("widget").unwrap(),
            WarehouseId::try_new("main").unwrap(),
            None,
        )
    }

    fn nz(delta: i64) -> NonZeroI64 {
        NonZeroI64::new(delta).unwrap()
    }

    #[test]
    fn known_kinds_round_trip_through_strings() {
        for kind in [
            MovementKind::Receipt,
            MovementKind::Adjustment,
            MovementKind::TransferIn,
            MovementKind::TransferOut,
            MovementKind::Correction,
            MovementKind::InitialLoad,
            MovementKind::Sale,
        ] {
            let tag = kind.as_str().to_string();
            assert_eq!(MovementKind::try_from(tag).unwrap(), kind);
        }
    }

    #[test]
    fn custom_kind_normalizes_known_tags() {
        assert_eq!(
            MovementKind::custom("receipt").unwrap(),
            MovementKind::Receipt
        );
        assert_eq!(
            MovementKind::custom("cycle_count").unwrap(),
            MovementKind::Custom("cycle_count".to_string())
        );
    }

    #[test]
    fn custom_kind_rejects_blank_and_oversized_tags() {
        assert!(MovementKind::custom("").is_err());
        assert!(MovementKind::custom("   ").is_err());
        assert!(MovementKind::custom("x".repeat(65)).is_err());
        assert!(MovementKind::custom("x".repeat(64)).is_ok());
    }

    #[test]
    fn kind_serializes_as_plain_string() {
        let json = serde_json::to_string(&MovementKind::TransferOut).unwrap();
        assert_eq!(json, "\"transfer_out\"");
        let parsed: MovementKind = serde_json::from_str("\"cycle_count\"").unwrap();
        assert_eq!(parsed, MovementKind::Custom("cycle_count".to_string()));
    }

    #[test]
    fn positive_delta_populates_to_side() {
        let movement = MovementRecord::for_delta(&key(), nz(50), MovementKind::Receipt);
        assert_eq!(movement.quantity, 50);
        assert_eq!(movement.to_warehouse, Some(key().warehouse));
        assert_eq!(movement.from_warehouse, None);
        assert_eq!(movement.delta_for(&key()), 50);
    }

    #[test]
    fn negative_delta_populates_from_side() {
        let movement = MovementRecord::for_delta(&key(), nz(-15), MovementKind::Adjustment);
        assert_eq!(movement.quantity, 15);
        assert_eq!(movement.from_warehouse, Some(key().warehouse));
        assert_eq!(movement.to_warehouse, None);
        assert_eq!(movement.delta_for(&key()), -15);
    }

    #[test]
    fn delta_is_zero_for_unrelated_keys() {
        let movement = MovementRecord::for_delta(&key(), nz(10), MovementKind::Receipt);
        let other = StockKey::new(
            ProductId::try_new("widget").unwrap(),
            WarehouseId::try_new("west").unwrap(),
            None,
        );
        assert_eq!(movement.delta_for(&other), 0);
    }

    #[test]
    fn binned_and_binless_keys_do_not_cross_match() {
        let binless = key();
        let binned = StockKey::new(
            binless.product.clone(),
            binless.warehouse.clone(),
            Some(BinId::try_new("A-01").unwrap()),
        );
        let movement = MovementRecord::for_delta(&binned, nz(10), MovementKind::Receipt);
        assert_eq!(movement.delta_for(&binned), 10);
        assert_eq!(movement.delta_for(&binless), 0);
    }

    #[test]
    fn key_reconstructs_the_touched_location() {
        let movement = MovementRecord::for_delta(&key(), nz(-3), MovementKind::Sale);
        assert_eq!(movement.key(), Some(key()));
    }

    #[test]
    fn replay_applies_the_clamp_at_each_step() {
        // Receive 10, withdraw 15 (clamped to 0 at commit time), receive 5.
        let movements = vec![
            MovementRecord::for_delta(&key(), nz(10), MovementKind::Receipt),
            MovementRecord::for_delta(&key(), nz(-15), MovementKind::Adjustment),
            MovementRecord::for_delta(&key(), nz(5), MovementKind::Receipt),
        ];
        // A plain signed sum would give 0; the clamped fold gives 5, which is
        // what the ledger actually holds after those three commits.
        assert_eq!(replay_on_hand(&movements, &key()), 5);
    }

    #[test]
    fn replay_of_empty_log_is_zero() {
        assert_eq!(replay_on_hand(&[], &key()), 0);
    }
}
