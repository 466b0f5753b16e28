use crate::BatchId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobMsg {
    /// Discovery produced a non-empty URL set for every domain of the job.
    DiscoveryCompleted { urls: Vec<String> },
    /// Discovery finished without a single usable URL.
    NoUrlsFound,
    /// Discovery or dispatch raised an orchestration fault.
    OrchestrationFailed { error: String },
    /// The coordinator accepted a batch for this job.
    BatchDispatched { batch: BatchId },
    /// Every task of the batch reported back; `skipped` tasks were revoked
    /// before they could write a result.
    BatchFinished { batch: BatchId, skipped: usize },
    /// User asked to pause a running job.
    Pause,
    /// User asked to resume; `pending` are the URLs without any result.
    Resume { pending: Vec<String> },
    /// User asked to cancel.
    Cancel,
}

impl JobMsg {
    /// Short operation name used in errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            JobMsg::DiscoveryCompleted { .. } => "discovery-complete",
            JobMsg::NoUrlsFound => "no-urls-found",
            JobMsg::OrchestrationFailed { .. } => "fail",
            JobMsg::BatchDispatched { .. } => "record-batch",
            JobMsg::BatchFinished { .. } => "finalize",
            JobMsg::Pause => "pause",
            JobMsg::Resume { .. } => "resume",
            JobMsg::Cancel => "cancel",
        }
    }
}
