//! `StockCore` - auditable inventory stock ledger
//!
//! This library maintains on-hand quantities for (product, warehouse, bin)
//! locations and records every mutation as an immutable movement. The current
//! quantity of any stock key always reconciles exactly against a replay of
//! its movement log.
//!
//! All mutations flow through [`MovementApplier::apply`] (single movement) or
//! [`MovementApplier::apply_batch`] (ordered multi-movement). The applier
//! serializes access per stock key, so concurrent callers never lose updates,
//! and commits the stock update together with its movement record as one
//! atomic unit through a [`LedgerStore`] implementation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod applier;
pub mod batch;
pub mod errors;
mod locks;
pub mod movement;
pub mod stock;
pub mod store;
pub mod types;

pub use applier::{AppliedMovement, ApplierConfig, MovementApplier, MovementRequest};
pub use batch::BatchOutcome;
pub use errors::{ApplyError, ApplyResult, StoreError, StoreResult};
pub use movement::{
    replay_on_hand, InvalidMovementKind, MovementKind, MovementRecord, Reference,
};
pub use stock::{ExpectedRevision, StockRecord, StockWrite};
pub use store::{LedgerStore, MovementFilter};
pub use types::{BinId, MovementId, ProductId, Revision, StockKey, Timestamp, WarehouseId};
