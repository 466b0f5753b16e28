#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use harvester_core::urls::InvalidDomain;
use harvester_core::{BatchId, CapacityPolicy, Job, JobId, JobStatus, UrlResult};
use harvester_engine::{
    CapacityController, CoordinatorSettings, DiscoveryError, JobService, JobStore, MemoryStore,
    PageSource, ProductExtractor, ScaleError, Scaler, StoreError, TaskCoordinator, UrlDiscovery,
};
use serde_json::{json, Value};
use tokio::sync::Semaphore;

/// Serves canned HTML per URL. With a gate, every fetch first waits for a permit.
#[derive(Default)]
pub struct StubPages {
    pages: HashMap<String, String>,
    gate: Option<Arc<Semaphore>>,
    calls: Mutex<Vec<String>>,
}

impl StubPages {
    pub fn new(pages: &[(&str, &str)]) -> Self {
        Self {
            pages: pages
                .iter()
                .map(|(url, html)| (url.to_string(), html.to_string()))
                .collect(),
            ..Self::default()
        }
    }

    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl PageSource for StubPages {
    async fn fetch_html(&self, url: &str) -> Option<String> {
        self.calls.lock().unwrap().push(url.to_string());
        if let Some(gate) = &self.gate {
            gate.acquire().await.ok()?.forget();
        }
        self.pages.get(url).cloned()
    }
}

/// Yields a record for every page that mentions "product".
pub struct KeywordExtractor;

#[async_trait::async_trait]
impl ProductExtractor for KeywordExtractor {
    async fn extract(&self, url: &str, html: &str) -> Option<Value> {
        html.contains("product")
            .then(|| json!({ "url": url, "title": html }))
    }
}

/// Canned discovery outcome per domain.
#[derive(Default)]
pub struct StubDiscovery {
    outcomes: HashMap<String, Result<Vec<String>, String>>,
}

impl StubDiscovery {
    pub fn with(mut self, domain: &str, urls: &[&str]) -> Self {
        self.outcomes.insert(
            domain.to_string(),
            Ok(urls.iter().map(|u| u.to_string()).collect()),
        );
        self
    }

    pub fn failing(mut self, domain: &str, reason: &str) -> Self {
        self.outcomes
            .insert(domain.to_string(), Err(reason.to_string()));
        self
    }
}

#[async_trait::async_trait]
impl UrlDiscovery for StubDiscovery {
    async fn discover(&self, domain: &str) -> Result<Vec<String>, DiscoveryError> {
        match self.outcomes.get(domain) {
            Some(Ok(urls)) => Ok(urls.clone()),
            Some(Err(reason)) => Err(DiscoveryError::InvalidDomain(InvalidDomain {
                domain: domain.to_string(),
                reason: reason.clone(),
            })),
            None => Ok(Vec::new()),
        }
    }
}

#[derive(Default)]
pub struct RecordingScaler {
    sizes: Mutex<Vec<usize>>,
}

impl RecordingScaler {
    pub fn sizes(&self) -> Vec<usize> {
        self.sizes.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Scaler for RecordingScaler {
    async fn scale(&self, containers: usize) -> Result<(), ScaleError> {
        self.sizes.lock().unwrap().push(containers);
        Ok(())
    }
}

/// Scaler whose every call fails, as when the container runtime is down.
#[derive(Default)]
pub struct FailingScaler {
    calls: AtomicUsize,
}

impl FailingScaler {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Scaler for FailingScaler {
    async fn scale(&self, _containers: usize) -> Result<(), ScaleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ScaleError::Exit {
            status: "exit status: 1".into(),
            stderr: "container runtime unreachable".into(),
        })
    }
}

/// Store whose `append_result` fails the first `failures` times and whose
/// `put_job` fails `put_failures` times after the first `put_after` calls.
pub struct FlakyStore {
    inner: MemoryStore,
    failures: AtomicUsize,
    puts: AtomicUsize,
    put_after: usize,
    put_failures: usize,
}

impl FlakyStore {
    pub fn new(failures: usize) -> Self {
        Self {
            inner: MemoryStore::new(),
            failures: AtomicUsize::new(failures),
            puts: AtomicUsize::new(0),
            put_after: 0,
            put_failures: 0,
        }
    }

    pub fn failing_puts(put_after: usize, put_failures: usize) -> Self {
        Self {
            put_after,
            put_failures,
            ..Self::new(0)
        }
    }
}

#[async_trait::async_trait]
impl JobStore for FlakyStore {
    async fn put_job(&self, job: &Job) -> Result<(), StoreError> {
        let call = self.puts.fetch_add(1, Ordering::SeqCst);
        if call >= self.put_after && call < self.put_after + self.put_failures {
            return Err(StoreError::Task("disk unavailable".into()));
        }
        self.inner.put_job(job).await
    }

    async fn get_job(&self, id: &JobId) -> Result<Option<Job>, StoreError> {
        self.inner.get_job(id).await
    }

    async fn update_status(&self, id: &JobId, status: JobStatus) -> Result<(), StoreError> {
        self.inner.update_status(id, status).await
    }

    async fn update_batch(&self, id: &JobId, batch: Option<BatchId>) -> Result<(), StoreError> {
        self.inner.update_batch(id, batch).await
    }

    async fn append_result(&self, result: UrlResult) -> Result<(), StoreError> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(StoreError::Task("disk unavailable".into()));
        }
        self.inner.append_result(result).await
    }

    async fn list_results(&self, id: &JobId) -> Result<Vec<UrlResult>, StoreError> {
        self.inner.list_results(id).await
    }

    async fn delete_job(&self, id: &JobId) -> Result<bool, StoreError> {
        self.inner.delete_job(id).await
    }

    async fn list_jobs_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>, StoreError> {
        self.inner.list_jobs_by_status(statuses).await
    }
}

pub fn running_job(id: &str, urls: &[&str]) -> Job {
    let mut job = Job::new(JobId::new(id), JobStatus::Running);
    job.urls = urls.iter().map(|u| u.to_string()).collect();
    job.total_urls = job.urls.len();
    job
}

pub fn coordinator_settings(concurrency: usize) -> CoordinatorSettings {
    CoordinatorSettings {
        concurrency,
        task_retries: 2,
        task_retry_delay: Duration::from_millis(1),
    }
}

pub struct Harness {
    pub service: JobService,
    pub store: Arc<MemoryStore>,
    pub pages: Arc<StubPages>,
    pub scaler: Arc<RecordingScaler>,
}

pub fn harness(discovery: StubDiscovery, pages: StubPages, concurrency: usize) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let pages = Arc::new(pages);
    let scaler = Arc::new(RecordingScaler::default());
    let service = service_with(
        store.clone(),
        scaler.clone(),
        discovery,
        pages.clone(),
        concurrency,
    );
    Harness {
        service,
        store,
        pages,
        scaler,
    }
}

/// Service over an arbitrary store and scaler, with the keyword extractor.
pub fn service_with(
    store: Arc<dyn JobStore>,
    scaler: Arc<dyn Scaler>,
    discovery: StubDiscovery,
    pages: Arc<StubPages>,
    concurrency: usize,
) -> JobService {
    let coordinator = TaskCoordinator::new(
        pages,
        Arc::new(KeywordExtractor),
        store.clone(),
        coordinator_settings(concurrency),
    );
    let capacity = CapacityController::new(
        store.clone(),
        scaler,
        CapacityPolicy {
            workers_per_job: 3,
            per_container_concurrency: 3,
        },
    );
    JobService::new(store, Arc::new(discovery), coordinator, capacity)
}

/// Polls `check` until it holds, failing the test after five seconds.
pub async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
