use crate::{Effect, Job, JobMsg, JobStatus};

/// Message stored on a job whose discovery produced nothing to fetch.
pub const NO_URLS_FOUND: &str = "No URLs found";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("cannot {op} a job that is {status}")]
    InvalidState { op: &'static str, status: JobStatus },
}

/// Pure update function: applies a message to a job and returns any effects.
///
/// Terminal jobs reject every message except a late `BatchFinished`, which
/// leaves them untouched.
pub fn update(mut job: Job, msg: JobMsg) -> Result<(Job, Vec<Effect>), TransitionError> {
    let op = msg.name();
    let require = |job: &Job, allowed: &[JobStatus]| {
        if allowed.contains(&job.status) {
            Ok(())
        } else {
            Err(TransitionError::InvalidState {
                op,
                status: job.status,
            })
        }
    };

    let effects = match msg {
        JobMsg::DiscoveryCompleted { urls } => {
            require(&job, &[JobStatus::Pending])?;
            if urls.is_empty() {
                complete_without_urls(&mut job);
                vec![Effect::RecomputeCapacity]
            } else {
                job.total_urls = urls.len();
                job.urls = urls.clone();
                job.status = JobStatus::Running;
                vec![
                    Effect::DispatchBatch {
                        job_id: job.id.clone(),
                        urls,
                    },
                    Effect::RecomputeCapacity,
                ]
            }
        }
        JobMsg::NoUrlsFound => {
            require(&job, &[JobStatus::Pending])?;
            complete_without_urls(&mut job);
            vec![Effect::RecomputeCapacity]
        }
        JobMsg::OrchestrationFailed { error } => {
            require(&job, &[JobStatus::Pending, JobStatus::Running, JobStatus::Paused])?;
            job.status = JobStatus::Failed;
            job.error = Some(error);
            with_cancel(job.batch.take())
        }
        JobMsg::BatchDispatched { batch } => {
            require(&job, &[JobStatus::Running])?;
            job.batch = Some(batch);
            Vec::new()
        }
        JobMsg::BatchFinished { batch, skipped } => {
            // A finalize from a batch that was paused or replaced must not complete the job.
            if job.status == JobStatus::Running && job.batch.as_ref() == Some(&batch) {
                // Revoked tasks leave their URLs pending; keep the job resumable.
                job.status = if skipped > 0 {
                    JobStatus::Paused
                } else {
                    JobStatus::Completed
                };
                job.batch = None;
            }
            vec![Effect::RecomputeCapacity]
        }
        JobMsg::Pause => {
            require(&job, &[JobStatus::Running])?;
            job.status = JobStatus::Paused;
            with_cancel(job.batch.take())
        }
        JobMsg::Resume { pending } => {
            require(&job, &[JobStatus::Paused])?;
            if pending.is_empty() {
                job.status = JobStatus::Completed;
                vec![Effect::RecomputeCapacity]
            } else {
                job.status = JobStatus::Running;
                vec![
                    Effect::DispatchBatch {
                        job_id: job.id.clone(),
                        urls: pending,
                    },
                    Effect::RecomputeCapacity,
                ]
            }
        }
        JobMsg::Cancel => {
            require(&job, &[JobStatus::Pending, JobStatus::Running, JobStatus::Paused])?;
            job.status = JobStatus::Cancelled;
            with_cancel(job.batch.take())
        }
    };

    Ok((job, effects))
}

fn complete_without_urls(job: &mut Job) {
    job.status = JobStatus::Completed;
    job.total_urls = 0;
    job.message = Some(NO_URLS_FOUND.to_string());
}

fn with_cancel(batch: Option<crate::BatchId>) -> Vec<Effect> {
    let mut effects = Vec::with_capacity(2);
    if let Some(batch) = batch {
        effects.push(Effect::CancelBatch { batch });
    }
    effects.push(Effect::RecomputeCapacity);
    effects
}
