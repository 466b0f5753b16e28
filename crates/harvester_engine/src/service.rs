//! Job orchestration: lifecycle transitions, effect execution and the query surface.
use std::sync::Arc;

use harvest_logging::{harvest_debug, harvest_error, harvest_info, harvest_warn};
use harvester_core::urls::dedupe_preserving_order;
use harvester_core::{
    update, BatchId, Effect, Job, JobId, JobMsg, JobStatus, JobStatusView, ResultPayload,
    ResultStatus, TransitionError, UrlResult,
};
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;

use crate::coordinator::TaskCoordinator;
use crate::discover::UrlDiscovery;
use crate::scale::CapacityController;
use crate::store::{JobStore, StoreError};

/// Error stored on a job whose discovery was cut short by a process exit.
pub const INTERRUPTED_DISCOVERY: &str = "interrupted during discovery";

/// Writes attempted when recording an orchestration fault.
const FAIL_ATTEMPTS: u32 = 2;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error(transparent)]
    InvalidState(#[from] TransitionError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Store(StoreError),
}

impl ServiceError {
    /// Errors caused by the request rather than by the system.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServiceError::NotFound(_)
                | ServiceError::InvalidState(_)
                | ServiceError::InvalidRequest(_)
        )
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => ServiceError::NotFound(id),
            other => ServiceError::Store(other),
        }
    }
}

struct ServiceInner {
    store: Arc<dyn JobStore>,
    discovery: Arc<dyn UrlDiscovery>,
    coordinator: TaskCoordinator,
    capacity: CapacityController,
    /// Serializes read-update-write of job rows within this process.
    transitions: Mutex<()>,
    /// Bumped after every committed transition.
    changes: watch::Sender<u64>,
}

#[derive(Clone)]
pub struct JobService {
    inner: Arc<ServiceInner>,
}

impl JobService {
    pub fn new(
        store: Arc<dyn JobStore>,
        discovery: Arc<dyn UrlDiscovery>,
        coordinator: TaskCoordinator,
        capacity: CapacityController,
    ) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: Arc::new(ServiceInner {
                store,
                discovery,
                coordinator,
                capacity,
                transitions: Mutex::new(()),
                changes,
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.inner.store
    }

    pub fn coordinator(&self) -> &TaskCoordinator {
        &self.inner.coordinator
    }

    /// Registers a job for `domains` and starts discovery in the background.
    pub async fn start_job(&self, domains: Vec<String>) -> Result<JobId, ServiceError> {
        let domains: Vec<String> = domains
            .into_iter()
            .map(|domain| domain.trim().to_string())
            .filter(|domain| !domain.is_empty())
            .collect();
        if domains.is_empty() {
            return Err(ServiceError::InvalidRequest(
                "at least one domain is required".into(),
            ));
        }

        let id = JobId::new(uuid::Uuid::new_v4().to_string());
        {
            let _guard = self.inner.transitions.lock().await;
            self.inner.store.put_job(&Job::pending(id.clone())).await?;
        }
        self.notify();
        harvest_info!("job={id} created for {} domains", domains.len());
        self.inner.capacity.rebalance().await;

        let service = self.clone();
        let job_id = id.clone();
        tokio::spawn(async move { service.orchestrate(job_id, domains).await });
        Ok(id)
    }

    /// Discovers every domain concurrently, then hands the URL set to the state machine.
    async fn orchestrate(&self, id: JobId, domains: Vec<String>) {
        let mut discoveries = JoinSet::new();
        for (index, domain) in domains.iter().cloned().enumerate() {
            let discovery = self.inner.discovery.clone();
            discoveries.spawn(async move {
                let outcome = discovery.discover(&domain).await;
                (index, domain, outcome)
            });
        }

        let mut per_domain: Vec<Vec<String>> = vec![Vec::new(); domains.len()];
        let mut failures = Vec::new();
        while let Some(joined) = discoveries.join_next().await {
            match joined {
                Ok((index, _, Ok(urls))) => per_domain[index] = urls,
                Ok((_, domain, Err(err))) => failures.push(format!("{domain}: {err}")),
                Err(err) => failures.push(format!("discovery task failed: {err}")),
            }
        }

        let msg = if !failures.is_empty() {
            harvest_error!("job={id} discovery failed: {}", failures.join("; "));
            JobMsg::OrchestrationFailed {
                error: failures.join("; "),
            }
        } else {
            let urls = dedupe_preserving_order(per_domain.into_iter().flatten());
            if urls.is_empty() {
                JobMsg::NoUrlsFound
            } else {
                JobMsg::DiscoveryCompleted { urls }
            }
        };

        match self.apply(&id, msg).await {
            Ok((_, effects)) => self.run_effects(effects).await,
            // Cancelled or deleted while discovering.
            Err(err @ (ServiceError::InvalidState(_) | ServiceError::NotFound(_))) => {
                harvest_info!("job={id} discovery outcome dropped: {err}");
            }
            Err(err) => {
                self.fail(&id, format!("recording discovery outcome failed: {err}"))
                    .await;
            }
        }
    }

    pub async fn job(&self, id: &JobId) -> Result<Job, ServiceError> {
        self.inner
            .store
            .get_job(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(id.clone()))
    }

    pub async fn job_status(&self, id: &JobId) -> Result<JobStatusView, ServiceError> {
        let job = self.job(id).await?;
        let results = self.inner.store.list_results(id).await?;
        Ok(JobStatusView::build(&job, &results))
    }

    /// Extracted product records of the job, one per successfully processed URL.
    pub async fn results(&self, id: &JobId) -> Result<Vec<Value>, ServiceError> {
        let rows = self.download(id).await?;
        Ok(rows
            .into_iter()
            .filter(|row| row.status == ResultStatus::Success)
            .filter_map(|row| match row.payload {
                ResultPayload::Record(record) => Some(record),
                ResultPayload::Reason(_) => None,
            })
            .collect())
    }

    /// Every stored result row of the job, failures included.
    pub async fn download(&self, id: &JobId) -> Result<Vec<UrlResult>, ServiceError> {
        self.job(id).await?;
        Ok(self.inner.store.list_results(id).await?)
    }

    pub async fn list_jobs(&self) -> Result<Vec<Job>, ServiceError> {
        Ok(self
            .inner
            .store
            .list_jobs_by_status(&JobStatus::ALL)
            .await?)
    }

    pub async fn pause(&self, id: &JobId) -> Result<Job, ServiceError> {
        let (job, effects) = self.apply(id, JobMsg::Pause).await?;
        self.run_effects(effects).await;
        Ok(job)
    }

    /// Re-dispatches exactly the URLs without a recorded result.
    pub async fn resume(&self, id: &JobId) -> Result<Job, ServiceError> {
        let (job, effects) = {
            let _guard = self.inner.transitions.lock().await;
            let job = self.load(id).await?;
            let pending = self.inner.store.pending_urls(id).await?;
            harvest_info!("job={id} resuming with {} pending urls", pending.len());
            self.commit(job, JobMsg::Resume { pending }).await?
        };
        self.run_effects(effects).await;
        Ok(job)
    }

    pub async fn cancel(&self, id: &JobId) -> Result<Job, ServiceError> {
        let (job, effects) = self.apply(id, JobMsg::Cancel).await?;
        self.run_effects(effects).await;
        Ok(job)
    }

    /// Removes the job and its results, revoking any in-flight batch.
    pub async fn delete(&self, id: &JobId) -> Result<(), ServiceError> {
        {
            let _guard = self.inner.transitions.lock().await;
            let job = self.load(id).await?;
            if let Some(batch) = job.batch.as_ref() {
                self.inner.coordinator.cancel(batch);
            }
            self.inner.store.delete_job(id).await?;
        }
        self.notify();
        harvest_info!("job={id} deleted");
        self.inner.capacity.rebalance().await;
        Ok(())
    }

    /// Settles jobs left active by a previous process. `RUNNING` jobs become
    /// `PAUSED` so they can be resumed; `PENDING` jobs lost their discovery and
    /// become `FAILED`.
    pub async fn recover_interrupted(&self) -> Result<Vec<JobId>, ServiceError> {
        let recovered = {
            let _guard = self.inner.transitions.lock().await;
            let stale = self
                .inner
                .store
                .list_jobs_by_status(&JobStatus::ACTIVE)
                .await?;
            let mut recovered = Vec::with_capacity(stale.len());
            for mut job in stale {
                if job.status == JobStatus::Running {
                    job.batch = None;
                    self.commit(job.clone(), JobMsg::Pause).await?;
                    harvest_warn!("job={} was interrupted; marked PAUSED", job.id);
                } else {
                    let error = INTERRUPTED_DISCOVERY.to_string();
                    self.commit(job.clone(), JobMsg::OrchestrationFailed { error })
                        .await?;
                    harvest_warn!("job={} was interrupted during discovery; marked FAILED", job.id);
                }
                recovered.push(job.id);
            }
            recovered
        };
        if !recovered.is_empty() {
            self.inner.capacity.rebalance().await;
        }
        Ok(recovered)
    }

    /// Pauses every running job and revokes all outstanding batches.
    pub async fn shutdown(&self) {
        match self
            .inner
            .store
            .list_jobs_by_status(&[JobStatus::Running])
            .await
        {
            Ok(running) => {
                for job in running {
                    match self.pause(&job.id).await {
                        Ok(_) => harvest_info!("job={} paused for shutdown", job.id),
                        Err(err) => harvest_warn!("job={} not paused for shutdown: {err}", job.id),
                    }
                }
            }
            Err(err) => harvest_warn!("Could not list running jobs for shutdown: {err}"),
        }
        self.inner.coordinator.cancel_all();
    }

    /// Waits until the job is no longer `PENDING` or `RUNNING` and returns it.
    pub async fn wait_for_job(&self, id: &JobId) -> Result<Job, ServiceError> {
        let mut changes = self.inner.changes.subscribe();
        loop {
            let job = self.job(id).await?;
            if !job.status.is_active() {
                return Ok(job);
            }
            if changes.changed().await.is_err() {
                return Ok(job);
            }
        }
    }

    async fn load(&self, id: &JobId) -> Result<Job, ServiceError> {
        self.job(id).await
    }

    /// Load, transition and store one job under the transition lock.
    async fn apply(&self, id: &JobId, msg: JobMsg) -> Result<(Job, Vec<Effect>), ServiceError> {
        let _guard = self.inner.transitions.lock().await;
        let job = self.load(id).await?;
        self.commit(job, msg).await
    }

    /// Caller must hold the transition lock.
    async fn commit(&self, job: Job, msg: JobMsg) -> Result<(Job, Vec<Effect>), ServiceError> {
        let op = msg.name();
        let previous = job.status;
        let (job, effects) = update(job, msg)?;
        self.inner.store.put_job(&job).await?;
        if previous != job.status {
            harvest_info!("job={} {op}: {previous} -> {}", job.id, job.status);
        } else {
            harvest_debug!("job={} {op}: stays {}", job.id, job.status);
        }
        self.notify();
        Ok((job, effects))
    }

    /// Records an orchestration fault on the job, retrying the write once.
    async fn fail(&self, id: &JobId, error: String) {
        harvest_error!("job={id} {error}");
        for attempt in 1..=FAIL_ATTEMPTS {
            let msg = JobMsg::OrchestrationFailed {
                error: error.clone(),
            };
            match self.apply(id, msg).await {
                Ok((_, effects)) => {
                    for effect in effects {
                        match effect {
                            Effect::CancelBatch { batch } => {
                                self.inner.coordinator.cancel(&batch);
                            }
                            Effect::RecomputeCapacity => self.inner.capacity.rebalance().await,
                            Effect::DispatchBatch { .. } => {}
                        }
                    }
                    return;
                }
                Err(err @ (ServiceError::InvalidState(_) | ServiceError::NotFound(_))) => {
                    harvest_debug!("job={id} already settled: {err}");
                    return;
                }
                Err(err) => {
                    harvest_warn!("job={id} recording failure (attempt {attempt}) failed: {err}");
                }
            }
        }
        harvest_error!("job={id} could not be marked FAILED");
    }

    fn notify(&self) {
        self.inner.changes.send_modify(|generation| *generation += 1);
    }

    async fn run_effects(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::DispatchBatch { job_id, urls } => self.dispatch(job_id, urls).await,
                Effect::CancelBatch { batch } => {
                    if !self.inner.coordinator.cancel(&batch) {
                        harvest_debug!("batch={batch} already finished");
                    }
                }
                Effect::RecomputeCapacity => {
                    self.inner.capacity.rebalance().await;
                }
            }
        }
    }

    /// Fans out the batch, records its handle and registers its finalize step.
    async fn dispatch(&self, job_id: JobId, urls: Vec<String>) {
        let batch = self.inner.coordinator.dispatch(&job_id, urls);
        let recorded = self
            .apply(
                &job_id,
                JobMsg::BatchDispatched {
                    batch: batch.clone(),
                },
            )
            .await;
        match recorded {
            Ok(_) => {}
            // Paused or cancelled before the handle was stored; nothing else will revoke it.
            Err(err @ (ServiceError::InvalidState(_) | ServiceError::NotFound(_))) => {
                harvest_warn!("job={job_id} batch={batch} not recorded ({err}); revoking");
                self.inner.coordinator.cancel(&batch);
            }
            Err(err) => {
                self.inner.coordinator.cancel(&batch);
                self.fail(&job_id, format!("recording batch {batch} failed: {err}"))
                    .await;
            }
        }

        let service = self.clone();
        tokio::spawn(async move { service.finalize(job_id, batch).await });
    }

    /// Runs once per batch after every task has reported.
    async fn finalize(&self, job_id: JobId, batch: BatchId) {
        let summary = self.inner.coordinator.await_completion(&batch).await;
        self.inner.coordinator.release(&batch);
        let skipped = match summary {
            Some(summary) => {
                harvest_info!(
                    "job={job_id} batch={batch} finalize: {}/{} succeeded, {} skipped",
                    summary.success_count,
                    summary.total,
                    summary.skipped_count
                );
                summary.skipped_count
            }
            None => 0,
        };

        match self
            .apply(&job_id, JobMsg::BatchFinished { batch, skipped })
            .await
        {
            Ok(_) => {}
            Err(ServiceError::NotFound(_)) => {
                harvest_debug!("job={job_id} deleted before its batch finished");
            }
            Err(err @ ServiceError::InvalidState(_)) => {
                harvest_error!("job={job_id} finalize rejected: {err}");
            }
            Err(err) => {
                self.fail(&job_id, format!("recording batch completion failed: {err}"))
                    .await;
            }
        }
        self.inner.capacity.rebalance().await;
    }
}
