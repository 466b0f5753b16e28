use std::sync::Once;

use harvester_core::{
    update, BatchId, Effect, Job, JobId, JobMsg, JobStatus, TransitionError, NO_URLS_FOUND,
};
use pretty_assertions::assert_eq;

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(harvest_logging::initialize_for_tests);
}

fn urls(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn running_job(items: &[&str]) -> Job {
    let (job, _) = update(
        Job::pending(JobId::from("job-1")),
        JobMsg::DiscoveryCompleted { urls: urls(items) },
    )
    .unwrap();
    let (job, _) = update(
        job,
        JobMsg::BatchDispatched {
            batch: BatchId::new("batch-1"),
        },
    )
    .unwrap();
    job
}

fn in_status(status: JobStatus) -> Job {
    let mut job = running_job(&["a"]);
    job.status = status;
    job
}

#[test]
fn discovery_complete_sets_urls_and_dispatches_them() {
    init_logging();
    let (job, effects) = update(
        Job::pending(JobId::from("job-1")),
        JobMsg::DiscoveryCompleted {
            urls: urls(&["a", "b", "c"]),
        },
    )
    .unwrap();

    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.urls, urls(&["a", "b", "c"]));
    assert_eq!(job.total_urls, 3);
    assert_eq!(job.validate(), Ok(()));
    assert_eq!(
        effects,
        vec![
            Effect::DispatchBatch {
                job_id: JobId::from("job-1"),
                urls: urls(&["a", "b", "c"]),
            },
            Effect::RecomputeCapacity,
        ]
    );
}

#[test]
fn no_urls_found_completes_with_message() {
    init_logging();
    let (job, effects) = update(Job::pending(JobId::from("job-1")), JobMsg::NoUrlsFound).unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.total_urls, 0);
    assert_eq!(job.message.as_deref(), Some(NO_URLS_FOUND));
    assert_eq!(effects, vec![Effect::RecomputeCapacity]);
}

#[test]
fn pause_cancels_the_in_flight_batch() {
    init_logging();
    let (job, effects) = update(running_job(&["a", "b"]), JobMsg::Pause).unwrap();

    assert_eq!(job.status, JobStatus::Paused);
    assert_eq!(job.batch, None);
    assert_eq!(
        effects,
        vec![
            Effect::CancelBatch {
                batch: BatchId::new("batch-1")
            },
            Effect::RecomputeCapacity,
        ]
    );
}

#[test]
fn pause_requires_a_running_job() {
    init_logging();
    let err = update(Job::pending(JobId::from("job-1")), JobMsg::Pause).unwrap_err();
    assert_eq!(
        err,
        TransitionError::InvalidState {
            op: "pause",
            status: JobStatus::Pending
        }
    );
    assert_eq!(err.to_string(), "cannot pause a job that is PENDING");
}

#[test]
fn cancel_from_pending_has_no_batch_to_revoke() {
    init_logging();
    let (job, effects) = update(Job::pending(JobId::from("job-1")), JobMsg::Cancel).unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(effects, vec![Effect::RecomputeCapacity]);
}

#[test]
fn cancel_while_running_revokes_batch() {
    init_logging();
    let (job, effects) = update(running_job(&["a"]), JobMsg::Cancel).unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(effects.contains(&Effect::CancelBatch {
        batch: BatchId::new("batch-1")
    }));
}

#[test]
fn orchestration_failure_records_error_detail() {
    init_logging();
    let (job, _) = update(
        Job::pending(JobId::from("job-1")),
        JobMsg::OrchestrationFailed {
            error: "discovery task panicked".into(),
        },
    )
    .unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("discovery task panicked"));
    assert_eq!(job.validate(), Ok(()));
}

#[test]
fn finalize_completes_only_the_current_batch() {
    init_logging();
    let job = running_job(&["a", "b"]);

    let (stale, effects) = update(
        job.clone(),
        JobMsg::BatchFinished {
            batch: BatchId::new("older-batch"),
            skipped: 0,
        },
    )
    .unwrap();
    assert_eq!(stale.status, JobStatus::Running);
    assert_eq!(effects, vec![Effect::RecomputeCapacity]);

    let (done, _) = update(
        job,
        JobMsg::BatchFinished {
            batch: BatchId::new("batch-1"),
            skipped: 0,
        },
    )
    .unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.batch, None);
}

#[test]
fn finalize_with_revoked_tasks_pauses_the_job() {
    init_logging();
    let (interrupted, effects) = update(
        running_job(&["a", "b", "c"]),
        JobMsg::BatchFinished {
            batch: BatchId::new("batch-1"),
            skipped: 2,
        },
    )
    .unwrap();
    assert_eq!(interrupted.status, JobStatus::Paused);
    assert_eq!(interrupted.batch, None);
    assert_eq!(effects, vec![Effect::RecomputeCapacity]);

    let (resumed, _) = update(
        interrupted,
        JobMsg::Resume {
            pending: urls(&["b", "c"]),
        },
    )
    .unwrap();
    assert_eq!(resumed.status, JobStatus::Running);
}

#[test]
fn finalize_after_pause_leaves_job_paused() {
    init_logging();
    let (paused, _) = update(running_job(&["a"]), JobMsg::Pause).unwrap();
    let (after, _) = update(
        paused,
        JobMsg::BatchFinished {
            batch: BatchId::new("batch-1"),
            skipped: 0,
        },
    )
    .unwrap();
    assert_eq!(after.status, JobStatus::Paused);
}

#[test]
fn terminal_states_never_become_active_again() {
    init_logging();
    let messages = vec![
        JobMsg::DiscoveryCompleted { urls: urls(&["x"]) },
        JobMsg::NoUrlsFound,
        JobMsg::OrchestrationFailed {
            error: "late".into(),
        },
        JobMsg::BatchDispatched {
            batch: BatchId::new("b2"),
        },
        JobMsg::BatchFinished {
            batch: BatchId::new("batch-1"),
            skipped: 0,
        },
        JobMsg::Pause,
        JobMsg::Resume {
            pending: urls(&["a"]),
        },
        JobMsg::Cancel,
    ];

    for status in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
        for msg in messages.clone() {
            let name = msg.name();
            match update(in_status(status), msg) {
                Ok((job, effects)) => {
                    assert_eq!(job.status, status, "{name} changed a {status} job");
                    assert!(
                        !effects
                            .iter()
                            .any(|e| matches!(e, Effect::DispatchBatch { .. })),
                        "{name} dispatched work for a {status} job"
                    );
                }
                Err(TransitionError::InvalidState { status: seen, .. }) => {
                    assert_eq!(seen, status)
                }
            }
        }
    }
}
