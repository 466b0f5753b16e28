//! Harvester core: job lifecycle state machine, result records and capacity math.
//!
//! Everything here is pure; the engine crate owns IO and executes the
//! [`Effect`]s returned by [`update`].
mod capacity;
mod effect;
mod job;
mod msg;
mod result;
mod update;
pub mod urls;
mod view_model;

pub use capacity::CapacityPolicy;
pub use effect::Effect;
pub use job::{BatchId, Job, JobId, JobStatus, UnknownStatus, ValidationError};
pub use msg::JobMsg;
pub use result::{pending_urls, BatchSummary, ResultPayload, ResultStatus, UrlResult};
pub use update::{update, TransitionError, NO_URLS_FOUND};
pub use view_model::{JobStatusView, Progress};
