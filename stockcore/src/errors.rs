//! Error types for the `StockCore` ledger.
//!
//! The taxonomy has two layers, converted at the boundary between them:
//!
//! - [`StoreError`]: persistence-layer failures, produced by [`LedgerStore`]
//!   implementations.
//! - [`ApplyError`]: failures surfaced to callers of the movement applier.
//!
//! Expected business outcomes are never errors: clamping a would-be-negative
//! on-hand result to zero is reported on the successful
//! [`AppliedMovement`](crate::applier::AppliedMovement) and logged at warning
//! level, because downstream callers rely on movements never failing outright
//! for quantity reasons.
//!
//! [`LedgerStore`]: crate::store::LedgerStore

use std::time::Duration;

use thiserror::Error;

use crate::stock::ExpectedRevision;
use crate::types::{Revision, StockKey};

/// Errors produced by [`LedgerStore`](crate::store::LedgerStore)
/// implementations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The store is unreachable or temporarily unavailable. Retryable.
    #[error("ledger store unavailable: {0}")]
    Unavailable(String),

    /// A store operation exceeded its deadline. Retryable.
    #[error("ledger store operation timed out after {0:?}")]
    Timeout(Duration),

    /// The stock record's revision did not match the expected revision.
    ///
    /// Under the applier's per-key critical section this indicates a writer
    /// that bypassed the key lock (for example a second process sharing the
    /// same database); the commit was not applied and may be retried.
    #[error("revision conflict on stock key '{key}': expected {expected}, current {current}")]
    RevisionConflict {
        /// The stock key the commit targeted.
        key: StockKey,
        /// The revision the writer expected.
        expected: ExpectedRevision,
        /// The revision actually found.
        current: Revision,
    },

    /// Stored data could not be encoded or decoded.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Stored state violates the ledger's schema (for example a negative
    /// quantity or an unparseable movement kind). Fatal.
    #[error("ledger store corrupted: {0}")]
    Corrupted(String),

    /// The store was misconfigured.
    #[error("ledger store configuration error: {0}")]
    Configuration(String),
}

impl StoreError {
    /// Whether the failure is transient and the operation may be retried.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::Timeout(_) | Self::RevisionConflict { .. }
        )
    }
}

/// Errors surfaced by the movement applier.
///
/// The applier never retries on its own: replaying a commit after an
/// ambiguous failure could record the same movement twice. Callers decide,
/// using [`ApplyError::is_transient`], whether to resubmit.
#[derive(Debug, Clone, Error)]
pub enum ApplyError {
    /// The movement request was malformed (zero delta, quantity overflow).
    #[error("invalid movement request: {0}")]
    Validation(String),

    /// Exclusive access to the stock key could not be obtained within the
    /// configured timeout, or another writer won the key. Retryable.
    #[error("contention on stock key '{key}'")]
    Contention {
        /// The stock key that could not be acquired.
        key: StockKey,
    },

    /// An invariant that should be structurally impossible was violated.
    /// Fatal: indicates a bug, not a transient condition.
    #[error("ledger integrity violation: {0}")]
    Integrity(String),

    /// The persistence layer failed.
    #[error("ledger store error: {0}")]
    Storage(StoreError),
}

impl ApplyError {
    /// Whether the failure is transient and the movement may be resubmitted.
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Contention { .. } => true,
            Self::Storage(err) => err.is_transient(),
            Self::Validation(_) | Self::Integrity(_) => false,
        }
    }
}

impl From<StoreError> for ApplyError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RevisionConflict { key, .. } => Self::Contention { key },
            StoreError::Corrupted(detail) => Self::Integrity(detail),
            other => Self::Storage(other),
        }
    }
}

/// Type alias for store results.
pub type StoreResult<T> = Result<T, StoreError>;

/// Type alias for applier results.
pub type ApplyResult<T> = Result<T, ApplyError>;
