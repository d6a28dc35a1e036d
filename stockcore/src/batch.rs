//! Batch coordination: ordered multi-movement submission.
//!
//! Receiving a multi-line purchase order is a batch of movement requests
//! applied strictly in input order. Each line carries its own atomicity
//! guarantee; the batch as a whole is deliberately not transactional, so a
//! failed line never discards the lines already received - callers inspect
//! the per-line outcomes and retry selectively.

use tracing::{instrument, warn};

use crate::applier::{AppliedMovement, MovementApplier, MovementRequest};
use crate::errors::{ApplyError, ApplyResult};
use crate::store::LedgerStore;

/// The aggregate outcome of a batch, preserving every per-line result in
/// input order.
#[derive(Debug)]
pub struct BatchOutcome {
    /// Whether every line applied successfully.
    pub all_succeeded: bool,
    /// Per-line outcomes, in the order the requests were submitted.
    pub results: Vec<ApplyResult<AppliedMovement>>,
}

impl BatchOutcome {
    /// Number of lines in the batch.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether the batch was empty.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// The successfully applied lines.
    pub fn applied(&self) -> impl Iterator<Item = &AppliedMovement> {
        self.results.iter().filter_map(|r| r.as_ref().ok())
    }

    /// The failed lines, with their input positions.
    pub fn failures(&self) -> impl Iterator<Item = (usize, &ApplyError)> {
        self.results
            .iter()
            .enumerate()
            .filter_map(|(index, r)| r.as_ref().err().map(|err| (index, err)))
    }
}

impl<S> MovementApplier<S>
where
    S: LedgerStore,
{
    /// Applies an ordered list of movements, one independent commit per
    /// line.
    ///
    /// Lines run sequentially in input order: later lines may depend
    /// implicitly on earlier ones (for example splitting one shipment across
    /// bins). A failed line is recorded and the remaining lines still
    /// execute; there is no cross-line lock and no cross-line rollback.
    #[instrument(name = "ledger.apply_batch", skip(self, requests), fields(lines = requests.len()))]
    pub async fn apply_batch(&self, requests: Vec<MovementRequest>) -> BatchOutcome {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.apply(request).await);
        }
        let all_succeeded = results.iter().all(Result::is_ok);
        if !all_succeeded {
            let failed = results.iter().filter(|r| r.is_err()).count();
            warn!(
                failed,
                lines = results.len(),
                "batch completed with failed lines"
            );
        }
        BatchOutcome {
            all_succeeded,
            results,
        }
    }
}
