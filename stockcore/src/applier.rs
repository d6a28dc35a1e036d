//! The movement applier: the ledger's single write path.
//!
//! `MovementApplier` owns the read-compute-commit lifecycle for a movement:
//!
//! 1. Acquire the target stock key's lock (bounded wait).
//! 2. Read the current stock record.
//! 3. Compute the new on-hand quantity, clamping a would-be-negative result
//!    to zero.
//! 4. Commit the stock upsert and the movement record as one atomic unit.
//!
//! The store handle is injected, so the applier runs unchanged over the
//! in-memory store in tests and a durable store in production.

use std::num::NonZeroI64;
use std::time::Duration;

use tracing::{debug, error, instrument, warn};

use crate::errors::{ApplyError, ApplyResult};
use crate::locks::KeyLocks;
use crate::movement::{MovementKind, MovementRecord, Reference};
use crate::stock::{ExpectedRevision, StockWrite};
use crate::store::LedgerStore;
use crate::types::{BinId, MovementId, ProductId, StockKey, Timestamp, WarehouseId};

/// Configuration for the movement applier.
#[derive(Debug, Clone)]
pub struct ApplierConfig {
    /// Bounded wait for a stock key's lock before failing with
    /// [`ApplyError::Contention`].
    pub lock_timeout: Duration,
}

impl Default for ApplierConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
        }
    }
}

/// A single movement to apply to one stock key.
#[derive(Debug, Clone)]
pub struct MovementRequest {
    /// The product whose quantity changes.
    pub product: ProductId,
    /// The warehouse holding the stock.
    pub warehouse: WarehouseId,
    /// The bin within the warehouse, if the stock is binned.
    pub bin: Option<BinId>,
    /// Signed quantity change. Must be non-zero.
    pub delta: i64,
    /// What kind of movement this is.
    pub kind: MovementKind,
    /// Pointer to the causing business object, if any.
    pub reference: Option<Reference>,
    /// Free-text reason, if any.
    pub notes: Option<String>,
}

impl MovementRequest {
    /// Creates a request against the warehouse-level (bin-less) stock key.
    pub const fn new(
        product: ProductId,
        warehouse: WarehouseId,
        delta: i64,
        kind: MovementKind,
    ) -> Self {
        Self {
            product,
            warehouse,
            bin: None,
            delta,
            kind,
            reference: None,
            notes: None,
        }
    }

    /// Targets a specific bin instead of the warehouse-level key.
    #[must_use]
    pub fn in_bin(mut self, bin: BinId) -> Self {
        self.bin = Some(bin);
        self
    }

    /// Attaches a reference to the causing business object.
    #[must_use]
    pub fn with_reference(mut self, kind: impl Into<String>, id: impl Into<String>) -> Self {
        self.reference = Some(Reference::new(kind, id));
        self
    }

    /// Attaches a free-text reason.
    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// The stock key this request targets.
    pub fn stock_key(&self) -> StockKey {
        StockKey::new(
            self.product.clone(),
            self.warehouse.clone(),
            self.bin.clone(),
        )
    }
}

/// The before/after snapshot returned for a successfully applied movement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMovement {
    /// The stock key the movement was applied to.
    pub key: StockKey,
    /// The identifier of the movement record written.
    pub movement_id: MovementId,
    /// On-hand quantity before the movement.
    pub before_on_hand: u64,
    /// On-hand quantity after the movement.
    pub after_on_hand: u64,
    /// Whether the requested change would have driven on-hand negative and
    /// was clamped to zero. Recorded for audit; the movement still proceeded.
    pub clamped: bool,
    /// When the movement was recorded.
    pub recorded_at: Timestamp,
}

/// Applies movements to stock keys, one atomic commit per movement.
///
/// Cloning is not provided; share an applier behind an `Arc` so all callers
/// go through one lock table. Two appliers over the same store would rely
/// solely on revision conflicts for correctness, turning every race into a
/// retry instead of a short wait.
#[derive(Debug)]
pub struct MovementApplier<S> {
    store: S,
    locks: KeyLocks,
    config: ApplierConfig,
}

impl<S> MovementApplier<S>
where
    S: LedgerStore,
{
    /// Creates an applier with the default configuration.
    pub fn new(store: S) -> Self {
        Self::with_config(store, ApplierConfig::default())
    }

    /// Creates an applier with a custom configuration.
    pub fn with_config(store: S, config: ApplierConfig) -> Self {
        Self {
            store,
            locks: KeyLocks::new(),
            config,
        }
    }

    /// The injected store handle, for read projections.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Applies a single movement and returns its before/after snapshot.
    ///
    /// A would-be-negative result is clamped to zero rather than rejected
    /// (the system favors availability over strict rejection; callers that
    /// need hard rejection pre-check available quantity themselves). The
    /// clamp is flagged on the result and logged at warning level.
    ///
    /// A transfer between two locations is two calls - one negative, one
    /// positive - and is NOT atomic as a pair: a crash between them leaves
    /// the source decremented and the destination not yet incremented. That
    /// state is recoverable via the movement log and is never silently
    /// corrected.
    #[instrument(
        name = "ledger.apply",
        skip(self, request),
        fields(key = %request.stock_key(), delta = request.delta, kind = %request.kind)
    )]
    pub async fn apply(&self, request: MovementRequest) -> ApplyResult<AppliedMovement> {
        let Some(delta) = NonZeroI64::new(request.delta) else {
            return Err(ApplyError::Validation(
                "movement delta must be non-zero".to_string(),
            ));
        };
        if delta.get() == i64::MIN {
            return Err(ApplyError::Validation(
                "movement delta out of range".to_string(),
            ));
        }

        let key = request.stock_key();
        let Some(_guard) = self.locks.acquire(&key, self.config.lock_timeout).await else {
            warn!(key = %key, timeout = ?self.config.lock_timeout, "stock key lock not acquired within timeout");
            return Err(ApplyError::Contention { key });
        };

        let current = self
            .store
            .stock(&key)
            .await
            .map_err(|err| escalate(err, &key))?;
        let (before, expected) = current.as_ref().map_or(
            (0, ExpectedRevision::Absent),
            |record| (record.on_hand, ExpectedRevision::At(record.revision)),
        );

        let (after, clamped) = apply_delta(before, delta)?;
        if clamped {
            warn!(
                key = %key,
                before_on_hand = before,
                delta = delta.get(),
                "movement would drive on-hand negative; clamped to zero"
            );
        }

        let mut movement = MovementRecord::for_delta(&key, delta, request.kind);
        if let Some(reference) = request.reference {
            movement = movement.with_reference(reference);
        }
        if let Some(notes) = request.notes {
            movement = movement.with_notes(notes);
        }
        let movement_id = movement.id;
        let recorded_at = movement.recorded_at;

        let committed = self
            .store
            .commit(StockWrite::new(key.clone(), after, expected), movement)
            .await
            .map_err(|err| escalate(err, &key))?;

        debug!(
            key = %key,
            before_on_hand = before,
            after_on_hand = committed.on_hand,
            movement_id = %movement_id,
            "movement applied"
        );

        Ok(AppliedMovement {
            key,
            movement_id,
            before_on_hand: before,
            after_on_hand: committed.on_hand,
            clamped,
            recorded_at,
        })
    }
}

/// Converts a store failure for the caller, logging integrity violations:
/// they indicate a bug rather than a transient condition and need manual
/// investigation.
fn escalate(err: crate::errors::StoreError, key: &StockKey) -> ApplyError {
    let err = ApplyError::from(err);
    if let ApplyError::Integrity(detail) = &err {
        error!(key = %key, detail = %detail, "ledger integrity violation");
    }
    err
}

/// Computes the post-movement on-hand quantity and whether it was clamped.
fn apply_delta(before: u64, delta: NonZeroI64) -> ApplyResult<(u64, bool)> {
    let magnitude = delta.get().unsigned_abs();
    if delta.get() > 0 {
        before
            .checked_add(magnitude)
            .map(|after| (after, false))
            .ok_or_else(|| {
                ApplyError::Validation("movement would overflow on-hand quantity".to_string())
            })
    } else if magnitude > before {
        Ok((0, true))
    } else {
        Ok((before - magnitude, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nz(delta: i64) -> NonZeroI64 {
        NonZeroI64::new(delta).unwrap()
    }

    #[test]
    fn apply_delta_adds_and_subtracts() {
        assert_eq!(apply_delta(10, nz(5)).unwrap(), (15, false));
        assert_eq!(apply_delta(10, nz(-5)).unwrap(), (5, false));
        assert_eq!(apply_delta(10, nz(-10)).unwrap(), (0, false));
    }

    #[test]
    fn apply_delta_clamps_over_withdrawal_to_zero() {
        assert_eq!(apply_delta(10, nz(-15)).unwrap(), (0, true));
        assert_eq!(apply_delta(0, nz(-1)).unwrap(), (0, true));
    }

    #[test]
    fn apply_delta_rejects_overflow() {
        let result = apply_delta(u64::MAX, nz(1));
        assert!(matches!(result, Err(ApplyError::Validation(_))));
    }

    #[test]
    fn request_builder_targets_binned_keys() {
        let request = MovementRequest::new(
            ProductId::try_new("widget").unwrap(),
            WarehouseId::try_new("main").unwrap(),
            5,
            MovementKind::Receipt,
        )
        .in_bin(BinId::try_new("A-01").unwrap())
        .with_reference("purchase_order", "PO-1001")
        .with_notes("first receipt");

        let key = request.stock_key();
        assert_eq!(key.to_string(), "widget/main/A-01");
        assert_eq!(
            request.reference,
            Some(Reference::new("purchase_order", "PO-1001"))
        );
    }

    #[test]
    fn default_config_bounds_lock_waits() {
        let config = ApplierConfig::default();
        assert_eq!(config.lock_timeout, Duration::from_secs(5));
    }
}
