use crate::{BatchId, JobId};

/// Side effects requested by a lifecycle transition.
///
/// The engine executes them only after the transitioned job row is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Fan out one task per URL as a new batch.
    DispatchBatch { job_id: JobId, urls: Vec<String> },
    /// Revoke every not-yet-finished task of the batch.
    CancelBatch { batch: BatchId },
    /// Ask the capacity controller to resize the worker fleet.
    RecomputeCapacity,
}
