//! Fan-out / fan-in execution of per-URL tasks.
//!
//! A batch is one task per URL. Tasks share a permit pool, check the live job
//! status before they start and again before they write, and report an outcome
//! that the batch collector folds into a [`BatchSummary`].
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use harvest_logging::{harvest_debug, harvest_error, harvest_info, harvest_warn};
use harvester_core::{BatchId, BatchSummary, JobId, JobStatus, ResultStatus, UrlResult};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::extract::ProductExtractor;
use crate::pipeline::PageSource;
use crate::store::{JobStore, StoreError};

/// Reason stored when neither the renderer nor the HTTP fallback produced HTML.
pub const NO_HTML: &str = "could not fetch html";
/// Reason stored when the page was fetched but yielded no product record.
pub const NO_RECORD: &str = "could not extract product data";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorSettings {
    /// Tasks running at once across all batches.
    pub concurrency: usize,
    /// Extra attempts for a task whose run failed on a store fault.
    pub task_retries: u32,
    pub task_retry_delay: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            concurrency: 3,
            task_retries: 2,
            task_retry_delay: Duration::from_secs(1),
        }
    }
}

struct BatchEntry {
    job_id: JobId,
    revoke: CancellationToken,
    summary: watch::Receiver<Option<BatchSummary>>,
}

struct Inner {
    permits: Arc<Semaphore>,
    pages: Arc<dyn PageSource>,
    extractor: Arc<dyn ProductExtractor>,
    store: Arc<dyn JobStore>,
    settings: CoordinatorSettings,
    batches: Mutex<HashMap<BatchId, BatchEntry>>,
}

#[derive(Clone)]
pub struct TaskCoordinator {
    inner: Arc<Inner>,
}

impl TaskCoordinator {
    pub fn new(
        pages: Arc<dyn PageSource>,
        extractor: Arc<dyn ProductExtractor>,
        store: Arc<dyn JobStore>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                permits: Arc::new(Semaphore::new(settings.concurrency.max(1))),
                pages,
                extractor,
                store,
                settings,
                batches: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn batches(&self) -> std::sync::MutexGuard<'_, HashMap<BatchId, BatchEntry>> {
        match self.inner.batches.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Fans out one task per URL and returns the handle of the new batch.
    ///
    /// Must be called from within a tokio runtime.
    pub fn dispatch(&self, job_id: &JobId, urls: Vec<String>) -> BatchId {
        let batch = BatchId::new(uuid::Uuid::new_v4().to_string());
        let revoke = CancellationToken::new();
        let (summary_tx, summary_rx) = watch::channel(None);

        harvest_info!("job={job_id} batch={batch} dispatching {} tasks", urls.len());
        let mut tasks = JoinSet::new();
        for url in urls {
            tasks.spawn(run_task(
                self.inner.clone(),
                job_id.clone(),
                url,
                revoke.child_token(),
            ));
        }

        self.batches().insert(
            batch.clone(),
            BatchEntry {
                job_id: job_id.clone(),
                revoke,
                summary: summary_rx,
            },
        );

        let label = batch.clone();
        tokio::spawn(async move {
            let mut statuses = Vec::new();
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(status) => statuses.push(status),
                    Err(err) => {
                        harvest_error!("batch={label} task aborted: {err}");
                        statuses.push(ResultStatus::Failed);
                    }
                }
            }
            let summary = BatchSummary::from_statuses(statuses);
            harvest_info!(
                "batch={label} finished: {} total, {} success, {} failed, {} skipped",
                summary.total,
                summary.success_count,
                summary.failed_count,
                summary.skipped_count
            );
            let _ = summary_tx.send(Some(summary));
        });

        batch
    }

    /// Waits until every task of the batch has reported. `None` for an unknown batch.
    pub async fn await_completion(&self, batch: &BatchId) -> Option<BatchSummary> {
        let mut summary = self.batches().get(batch)?.summary.clone();
        let done = summary.wait_for(Option::is_some).await.ok()?;
        *done
    }

    /// Revokes every task of the batch that has not started yet.
    pub fn cancel(&self, batch: &BatchId) -> bool {
        match self.batches().get(batch) {
            Some(entry) => {
                harvest_info!("job={} batch={batch} revoked", entry.job_id);
                entry.revoke.cancel();
                true
            }
            None => false,
        }
    }

    /// Forgets a finalized batch.
    pub fn release(&self, batch: &BatchId) {
        self.batches().remove(batch);
    }

    pub fn active_batches(&self) -> usize {
        self.batches().len()
    }

    /// Revokes every outstanding batch.
    pub fn cancel_all(&self) {
        for entry in self.batches().values() {
            entry.revoke.cancel();
        }
    }
}

async fn run_task(
    inner: Arc<Inner>,
    job_id: JobId,
    url: String,
    revoked: CancellationToken,
) -> ResultStatus {
    let _permit = tokio::select! {
        biased;
        _ = revoked.cancelled() => {
            harvest_debug!("job={job_id} url={url} revoked before start");
            return ResultStatus::Skipped;
        }
        permit = inner.permits.clone().acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return ResultStatus::Skipped,
        },
    };

    let mut attempt = 0;
    loop {
        match process_url(&inner, &job_id, &url).await {
            Ok(status) => return status,
            Err(err) if attempt < inner.settings.task_retries => {
                attempt += 1;
                harvest_warn!(
                    "job={job_id} url={url} task fault, retry {attempt}/{}: {err}",
                    inner.settings.task_retries
                );
                tokio::time::sleep(inner.settings.task_retry_delay).await;
            }
            Err(err) => {
                harvest_error!("job={job_id} url={url} task failed after retries: {err}");
                return ResultStatus::Failed;
            }
        }
    }
}

async fn process_url(inner: &Inner, job_id: &JobId, url: &str) -> Result<ResultStatus, StoreError> {
    if !job_is_running(inner, job_id).await? {
        harvest_debug!("job={job_id} url={url} skipped, job no longer running");
        return Ok(ResultStatus::Skipped);
    }

    let result = match inner.pages.fetch_html(url).await {
        None => UrlResult::failed(job_id.clone(), url, NO_HTML),
        Some(html) => match inner.extractor.extract(url, &html).await {
            Some(record) => UrlResult::success(job_id.clone(), url, record),
            None => UrlResult::failed(job_id.clone(), url, NO_RECORD),
        },
    };

    // A pause or cancel may have landed while the page was loading.
    if !job_is_running(inner, job_id).await? {
        harvest_debug!("job={job_id} url={url} result dropped, job no longer running");
        return Ok(ResultStatus::Skipped);
    }
    let status = result.status;
    inner.store.append_result(result).await?;
    harvest_debug!("job={job_id} url={url} recorded {status:?}");
    Ok(status)
}

async fn job_is_running(inner: &Inner, job_id: &JobId) -> Result<bool, StoreError> {
    Ok(inner.store.job_status(job_id).await? == Some(JobStatus::Running))
}
