use harvester_core::{
    pending_urls, update, BatchId, CapacityPolicy, Effect, Job, JobId, JobMsg, JobStatus,
    JobStatusView, UrlResult,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn paused_job(items: &[&str]) -> Job {
    let urls: Vec<String> = items.iter().map(|s| s.to_string()).collect();
    let (job, _) = update(
        Job::pending(JobId::from("job-r")),
        JobMsg::DiscoveryCompleted { urls },
    )
    .unwrap();
    let (job, _) = update(
        job,
        JobMsg::BatchDispatched {
            batch: BatchId::new("first"),
        },
    )
    .unwrap();
    let (job, _) = update(job, JobMsg::Pause).unwrap();
    job
}

fn dispatched(effects: &[Effect]) -> Vec<String> {
    effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::DispatchBatch { urls, .. } => Some(urls.clone()),
            _ => None,
        })
        .flatten()
        .collect()
}

#[test]
fn resume_dispatches_exactly_the_unresulted_urls() {
    let job = paused_job(&["a", "b", "c"]);
    let results = vec![UrlResult::success(
        job.id.clone(),
        "b",
        json!({"title": "B"}),
    )];

    let pending = pending_urls(&job.urls, &results);
    let (job, effects) = update(job, JobMsg::Resume { pending }).unwrap();

    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(dispatched(&effects), vec!["a", "c"]);
    assert_eq!(job.urls.len(), 3, "urls never shrink on resume");
}

#[test]
fn second_resume_never_redispatches_resulted_urls() {
    let job = paused_job(&["a", "b", "c"]);
    let mut results = vec![UrlResult::failed(job.id.clone(), "a", "no html")];

    let pending = pending_urls(&job.urls, &results);
    let (job, effects) = update(job, JobMsg::Resume { pending }).unwrap();
    assert_eq!(dispatched(&effects), vec!["b", "c"]);

    // "b" finishes, then the job is paused and resumed again.
    results.push(UrlResult::success(job.id.clone(), "b", json!({})));
    let (job, _) = update(
        job,
        JobMsg::BatchDispatched {
            batch: BatchId::new("second"),
        },
    )
    .unwrap();
    let (job, _) = update(job, JobMsg::Pause).unwrap();
    let pending = pending_urls(&job.urls, &results);
    let (_, effects) = update(job, JobMsg::Resume { pending }).unwrap();
    assert_eq!(dispatched(&effects), vec!["c"]);
}

#[test]
fn resume_with_nothing_pending_completes() {
    let job = paused_job(&["a"]);
    let (job, effects) = update(job, JobMsg::Resume { pending: vec![] }).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(effects, vec![Effect::RecomputeCapacity]);
}

#[test]
fn resume_requires_a_paused_job() {
    let job = paused_job(&["a"]);
    let (running, _) = update(
        job,
        JobMsg::Resume {
            pending: vec!["a".into()],
        },
    )
    .unwrap();
    assert!(update(
        running,
        JobMsg::Resume {
            pending: vec!["a".into()]
        }
    )
    .is_err());
}

#[test]
fn capacity_scales_with_active_jobs() {
    let policy = CapacityPolicy {
        workers_per_job: 3,
        per_container_concurrency: 3,
    };
    assert_eq!(policy.desired_workers(2), 6);
    assert_eq!(policy.desired_containers(2), 2);
    assert_eq!(policy.desired_containers(0), 0);

    let uneven = CapacityPolicy {
        workers_per_job: 2,
        per_container_concurrency: 4,
    };
    assert_eq!(uneven.desired_containers(3), 2);

    let zero_concurrency = CapacityPolicy {
        workers_per_job: 1,
        per_container_concurrency: 0,
    };
    assert_eq!(zero_concurrency.desired_containers(2), 2);
}

#[test]
fn status_view_counts_each_url_once() {
    let job = paused_job(&["a", "b", "c", "d"]);
    let results = vec![
        UrlResult::failed(job.id.clone(), "a", "no html"),
        UrlResult::success(job.id.clone(), "a", json!({"title": "A"})),
        UrlResult::failed(job.id.clone(), "b", "no record"),
    ];

    let view = JobStatusView::build(&job, &results);
    assert_eq!(view.status, JobStatus::Paused);
    assert_eq!(view.progress.total, 4);
    assert_eq!(view.progress.completed, 2);
    assert_eq!(view.progress.success, 1);
    assert_eq!(view.progress.failed, 1);
    assert!((view.progress.percent - 50.0).abs() < f64::EPSILON);
}
