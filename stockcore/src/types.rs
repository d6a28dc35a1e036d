//! Core identifier and scalar types for the `StockCore` ledger.
//!
//! All identifier types use smart constructors so that a value, once
//! constructed, is valid everywhere it flows - following the
//! "parse, don't validate" principle.

use chrono::{DateTime, Utc};
use nutype::nutype;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies a product in the catalog.
///
/// `ProductId` values are trimmed, non-empty, and at most 64 characters.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 64),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct ProductId(String);

/// Identifies a warehouse.
///
/// Same constraints as [`ProductId`]: trimmed, non-empty, at most 64
/// characters.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 64),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct WarehouseId(String);

/// Identifies a storage bin within a warehouse.
///
/// Bins are optional: the bin-less location of a warehouse is a stock key of
/// its own, distinct from every binned key (see [`StockKey`]).
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 64),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct BinId(String);

/// A globally unique movement identifier using UUIDv7 format.
///
/// UUIDv7 provides time-based sort order, so listing movements by id yields
/// the order in which they were recorded.
#[nutype(
    validate(predicate = |id: &Uuid| id.get_version() == Some(uuid::Version::SortRand)),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct MovementId(Uuid);

impl MovementId {
    /// Creates a new `MovementId` with the current timestamp.
    pub fn new() -> Self {
        // Uuid::now_v7() always returns a valid v7 UUID
        Self::try_new(Uuid::now_v7()).expect("Uuid::now_v7() should always return a valid v7 UUID")
    }
}

impl Default for MovementId {
    fn default() -> Self {
        Self::new()
    }
}

/// The revision of a stock record.
///
/// Revisions start at 0 (no committed movements yet) and increment with each
/// committed movement. Store implementations use the revision to detect
/// writers that bypassed the per-key critical section.
#[nutype(
    validate(greater_or_equal = 0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Display,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct Revision(u64);

impl Revision {
    /// The revision of a stock key with no committed movements.
    pub fn initial() -> Self {
        Self::try_new(0).expect("0 is always a valid revision")
    }

    /// Returns the next revision after this one.
    #[must_use]
    pub fn next(self) -> Self {
        let current: u64 = self.into();
        Self::try_new(current + 1).expect("next revision should always be valid")
    }
}

/// The unique (product, warehouse, bin-or-none) tuple identifying one stock
/// record.
///
/// The bin-less key `(P, W, None)` is distinct from any binned key
/// `(P, W, Some(B))`; both may carry quantity independently.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StockKey {
    /// The product this key tracks.
    pub product: ProductId,
    /// The warehouse holding the stock.
    pub warehouse: WarehouseId,
    /// The bin within the warehouse, if the stock is binned.
    pub bin: Option<BinId>,
}

impl StockKey {
    /// Creates a stock key. Pass `None` for the warehouse-level (bin-less)
    /// location.
    pub const fn new(product: ProductId, warehouse: WarehouseId, bin: Option<BinId>) -> Self {
        Self {
            product,
            warehouse,
            bin,
        }
    }
}

impl std::fmt::Display for StockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.bin {
            Some(bin) => write!(f, "{}/{}/{}", self.product, self.warehouse, bin),
            None => write!(f, "{}/{}", self.product, self.warehouse),
        }
    }
}

/// A timestamp for when a movement was recorded.
///
/// Wraps a UTC `DateTime` so timestamp handling stays consistent throughout
/// the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a new timestamp from a UTC `DateTime`.
    pub const fn new(datetime: DateTime<Utc>) -> Self {
        Self(datetime)
    }

    /// Creates a timestamp representing the current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Returns the underlying `DateTime`.
    pub const fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Converts the timestamp into the underlying `DateTime`.
    pub const fn into_datetime(self) -> DateTime<Utc> {
        self.0
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(datetime: DateTime<Utc>) -> Self {
        Self::new(datetime)
    }
}

impl From<Timestamp> for DateTime<Utc> {
    fn from(timestamp: Timestamp) -> Self {
        timestamp.into_datetime()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn product_id_accepts_valid_strings(s in "[a-zA-Z0-9_-]{1,64}") {
            let result = ProductId::try_new(s.clone());
            prop_assert!(result.is_ok());
            let product_id = result.unwrap();
            prop_assert_eq!(product_id.as_ref(), &s);
        }

        #[test]
        fn product_id_trims_whitespace(s in " {0,5}[a-zA-Z0-9_-]{1,50} {0,5}") {
            let result = ProductId::try_new(s.clone());
            prop_assert!(result.is_ok());
            let product_id = result.unwrap();
            prop_assert_eq!(product_id.as_ref(), s.trim());
        }

        #[test]
        fn product_id_rejects_blank_strings(s in " {0,20}") {
            prop_assert!(ProductId::try_new(s).is_err());
        }

        #[test]
        fn warehouse_id_rejects_strings_over_64_chars(s in "[a-zA-Z0-9]{65,120}") {
            prop_assert!(WarehouseId::try_new(s).is_err());
        }

        #[test]
        fn revision_next_increments_by_one(v in 0u64..u64::MAX) {
            let revision = Revision::try_new(v).unwrap();
            let next: u64 = revision.next().into();
            prop_assert_eq!(next, v + 1);
        }

        #[test]
        fn stock_key_roundtrip_serialization(
            p in "[a-z0-9-]{1,30}",
            w in "[a-z0-9-]{1,30}",
            b in proptest::option::of("[a-z0-9-]{1,30}"),
        ) {
            let key = StockKey::new(
                ProductId::try_new(p).unwrap(),
                WarehouseId::try_new(w).unwrap(),
                b.map(|b| BinId::try_new(b).unwrap()),
            );
            let json = serde_json::to_string(&key).unwrap();
            let deserialized: StockKey = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(key, deserialized);
        }
    }

    #[test]
    fn binless_key_is_distinct_from_binned_key() {
        let product = ProductId::try_new("widget").unwrap();
        let warehouse = WarehouseId::try_new("main").unwrap();
        let binless = StockKey::new(product.clone(), warehouse.clone(), None);
        let binned = StockKey::new(
            product,
            warehouse,
            Some(BinId::try_new("A-01").unwrap()),
        );
        assert_ne!(binless, binned);
    }

    #[test]
    fn stock_key_display_includes_bin_only_when_present() {
        let product = ProductId::try_new("widget").unwrap();
        let warehouse = WarehouseId::try_new("main").unwrap();
        let binless = StockKey::new(product.clone(), warehouse.clone(), None);
        assert_eq!(binless.to_string(), "widget/main");

        let binned = StockKey::new(product, warehouse, Some(BinId::try_new("A-01").unwrap()));
        assert_eq!(binned.to_string(), "widget/main/A-01");
    }

    #[test]
    fn movement_id_new_creates_valid_v7() {
        let id = MovementId::new();
        assert_eq!(id.as_ref().get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn movement_id_rejects_non_v7_uuids() {
        assert!(MovementId::try_new(Uuid::nil()).is_err());
        assert!(MovementId::try_new(Uuid::max()).is_err());
    }

    #[test]
    fn movement_ids_created_in_sequence_sort_in_order() {
        let first = MovementId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = MovementId::new();
        assert!(first < second);
    }

    #[test]
    fn revision_initial_is_zero() {
        let value: u64 = Revision::initial().into();
        assert_eq!(value, 0);
    }
}
