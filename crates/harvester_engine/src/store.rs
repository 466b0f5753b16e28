//! Job and result persistence.
//!
//! Every operation touches a single job row (plus its results) atomically;
//! there are no multi-row transactions. Rows are validated on the way in.
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use harvest_logging::{harvest_debug, harvest_info, harvest_warn};
use harvester_core::{pending_urls, BatchId, Job, JobId, JobStatus, UrlResult, ValidationError};
use serde::{Deserialize, Serialize};

use crate::persist::{append_line, AtomicFileWriter, PersistError};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("invalid row: {0}")]
    Invalid(#[from] ValidationError),
    #[error("store file {path}: {message}")]
    Corrupt { path: PathBuf, message: String },
    #[error("store write failed: {0}")]
    Persist(#[from] PersistError),
    #[error("store background task failed: {0}")]
    Task(String),
}

#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    /// Creates the job or replaces the stored row with the same id.
    async fn put_job(&self, job: &Job) -> Result<(), StoreError>;
    async fn get_job(&self, id: &JobId) -> Result<Option<Job>, StoreError>;
    async fn update_status(&self, id: &JobId, status: JobStatus) -> Result<(), StoreError>;
    async fn update_batch(&self, id: &JobId, batch: Option<BatchId>) -> Result<(), StoreError>;
    /// Appends a result row; the job must exist.
    async fn append_result(&self, result: UrlResult) -> Result<(), StoreError>;
    async fn list_results(&self, id: &JobId) -> Result<Vec<UrlResult>, StoreError>;
    /// Removes the job and all of its results. Returns whether the job existed.
    async fn delete_job(&self, id: &JobId) -> Result<bool, StoreError>;
    async fn list_jobs_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>, StoreError>;

    /// Live status read used by tasks; no locking beyond the row read.
    async fn job_status(&self, id: &JobId) -> Result<Option<JobStatus>, StoreError> {
        Ok(self.get_job(id).await?.map(|job| job.status))
    }

    /// URLs of the job without any recorded result, in job order.
    async fn pending_urls(&self, id: &JobId) -> Result<Vec<String>, StoreError> {
        let job = self
            .get_job(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let results = self.list_results(id).await?;
        Ok(pending_urls(&job.urls, &results))
    }
}

/// Row storage shared by both store flavours.
#[derive(Debug, Default, Clone)]
struct Tables {
    jobs: BTreeMap<JobId, Job>,
    results: BTreeMap<JobId, Vec<UrlResult>>,
}

impl Tables {
    fn put_job(&mut self, job: &Job) -> Result<(), StoreError> {
        job.validate()?;
        self.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn job_mut(&mut self, id: &JobId) -> Result<&mut Job, StoreError> {
        self.jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    fn update_status(&mut self, id: &JobId, status: JobStatus) -> Result<(), StoreError> {
        let job = self.job_mut(id)?;
        let mut updated = job.clone();
        updated.status = status;
        updated.validate()?;
        *job = updated;
        Ok(())
    }

    fn update_batch(&mut self, id: &JobId, batch: Option<BatchId>) -> Result<(), StoreError> {
        self.job_mut(id)?.batch = batch;
        Ok(())
    }

    fn check_result(&self, result: &UrlResult) -> Result<(), StoreError> {
        result.validate()?;
        if !self.jobs.contains_key(&result.job_id) {
            return Err(StoreError::NotFound(result.job_id.clone()));
        }
        Ok(())
    }

    fn append_result(&mut self, result: UrlResult) -> Result<(), StoreError> {
        self.check_result(&result)?;
        self.results
            .entry(result.job_id.clone())
            .or_default()
            .push(result);
        Ok(())
    }

    fn list_results(&self, id: &JobId) -> Vec<UrlResult> {
        self.results.get(id).cloned().unwrap_or_default()
    }

    fn delete_job(&mut self, id: &JobId) -> bool {
        self.results.remove(id);
        self.jobs.remove(id).is_some()
    }

    fn list_jobs_by_status(&self, statuses: &[JobStatus]) -> Vec<Job> {
        self.jobs
            .values()
            .filter(|job| statuses.contains(&job.status))
            .cloned()
            .collect()
    }
}

/// Process-local store; contents are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Tables) -> T) -> T {
        let mut guard = match self.tables.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

#[async_trait::async_trait]
impl JobStore for MemoryStore {
    async fn put_job(&self, job: &Job) -> Result<(), StoreError> {
        self.with(|t| t.put_job(job))
    }

    async fn get_job(&self, id: &JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.with(|t| t.jobs.get(id).cloned()))
    }

    async fn update_status(&self, id: &JobId, status: JobStatus) -> Result<(), StoreError> {
        self.with(|t| t.update_status(id, status))
    }

    async fn update_batch(&self, id: &JobId, batch: Option<BatchId>) -> Result<(), StoreError> {
        self.with(|t| t.update_batch(id, batch))
    }

    async fn append_result(&self, result: UrlResult) -> Result<(), StoreError> {
        self.with(|t| t.append_result(result))
    }

    async fn list_results(&self, id: &JobId) -> Result<Vec<UrlResult>, StoreError> {
        Ok(self.with(|t| t.list_results(id)))
    }

    async fn delete_job(&self, id: &JobId) -> Result<bool, StoreError> {
        Ok(self.with(|t| t.delete_job(id)))
    }

    async fn list_jobs_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>, StoreError> {
        Ok(self.with(|t| t.list_jobs_by_status(statuses)))
    }
}

/// On-disk layout of the [`RonFileStore`] snapshot.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    jobs: Vec<Job>,
}

/// Store persisted as a RON snapshot of the job rows plus an append-only log of
/// result rows, one JSON object per line, next to it.
///
/// Job mutations rewrite the snapshot atomically. A result costs one appended
/// line. Deleting a job rewrites the log without its rows.
pub struct RonFileStore {
    tables: tokio::sync::Mutex<Tables>,
    writer: AtomicFileWriter,
    file_name: String,
    log_name: String,
    path: PathBuf,
    log_path: PathBuf,
}

impl RonFileStore {
    /// Opens `path`, starting empty when the file does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let corrupt = |message: String| StoreError::Corrupt {
            path: path.clone(),
            message,
        };
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| corrupt("path has no file name".into()))?
            .to_string();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let log_name = format!("{file_name}.results");
        let log_path = dir.join(&log_name);

        let mut tables = Tables::default();
        match fs::read_to_string(&path) {
            Ok(text) => {
                let snapshot: Snapshot =
                    ron::from_str(&text).map_err(|err| corrupt(err.to_string()))?;
                for job in snapshot.jobs {
                    tables.jobs.insert(job.id.clone(), job);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(corrupt(err.to_string())),
        }
        let replayed = replay_results(&log_path, &mut tables)?;
        if !tables.jobs.is_empty() {
            harvest_info!(
                "Loaded {} jobs and {replayed} results from {}",
                tables.jobs.len(),
                path.display()
            );
        }

        Ok(Self {
            tables: tokio::sync::Mutex::new(tables),
            writer: AtomicFileWriter::new(dir),
            file_name,
            log_name,
            path,
            log_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File holding the result rows.
    pub fn results_path(&self) -> &Path {
        &self.log_path
    }

    /// Applies `f` to the job rows and, if it succeeded, writes the new snapshot
    /// before releasing the lock.
    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<JobId, Job>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut tables = self.tables.lock().await;
        let mut draft = tables.jobs.clone();
        let value = f(&mut draft)?;
        self.write_snapshot(&draft).await?;
        tables.jobs = draft;
        Ok(value)
    }

    async fn write_snapshot(&self, jobs: &BTreeMap<JobId, Job>) -> Result<(), StoreError> {
        let snapshot = Snapshot {
            jobs: jobs.values().cloned().collect(),
        };
        let pretty = ron::ser::PrettyConfig::new();
        let content = ron::ser::to_string_pretty(&snapshot, pretty)
            .map_err(|err| self.corrupt(&self.path, err.to_string()))?;
        self.write_file(self.file_name.clone(), content).await?;
        harvest_debug!("Store snapshot written to {}", self.path.display());
        Ok(())
    }

    async fn write_file(&self, file_name: String, content: String) -> Result<(), StoreError> {
        let writer = self.writer.clone();
        tokio::task::spawn_blocking(move || writer.write(&file_name, &content))
            .await
            .map_err(|err| StoreError::Task(err.to_string()))??;
        Ok(())
    }

    fn corrupt(&self, path: &Path, message: String) -> StoreError {
        StoreError::Corrupt {
            path: path.to_path_buf(),
            message,
        }
    }
}

/// Reads the result log into `tables`. Rows of unknown jobs are dropped and a
/// torn final line is ignored; any other unreadable line is an error.
fn replay_results(log_path: &Path, tables: &mut Tables) -> Result<usize, StoreError> {
    let text = match fs::read_to_string(log_path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(err) => {
            return Err(StoreError::Corrupt {
                path: log_path.to_path_buf(),
                message: err.to_string(),
            })
        }
    };

    let lines: Vec<&str> = text.lines().filter(|line| !line.trim().is_empty()).collect();
    let mut replayed = 0;
    for (index, line) in lines.iter().enumerate() {
        let result: UrlResult = match serde_json::from_str(line) {
            Ok(result) => result,
            Err(err) if index + 1 == lines.len() => {
                harvest_warn!("Ignoring torn last line of {}: {err}", log_path.display());
                break;
            }
            Err(err) => {
                return Err(StoreError::Corrupt {
                    path: log_path.to_path_buf(),
                    message: format!("line {}: {err}", index + 1),
                })
            }
        };
        match tables.append_result(result) {
            Ok(()) => replayed += 1,
            Err(err) => harvest_debug!("Skipping logged result: {err}"),
        }
    }
    Ok(replayed)
}

#[async_trait::async_trait]
impl JobStore for RonFileStore {
    async fn put_job(&self, job: &Job) -> Result<(), StoreError> {
        self.mutate(|jobs| {
            job.validate()?;
            jobs.insert(job.id.clone(), job.clone());
            Ok(())
        })
        .await
    }

    async fn get_job(&self, id: &JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.tables.lock().await.jobs.get(id).cloned())
    }

    async fn update_status(&self, id: &JobId, status: JobStatus) -> Result<(), StoreError> {
        self.mutate(|jobs| {
            let job = jobs
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;
            job.status = status;
            job.validate()?;
            Ok(())
        })
        .await
    }

    async fn update_batch(&self, id: &JobId, batch: Option<BatchId>) -> Result<(), StoreError> {
        self.mutate(|jobs| {
            jobs.get_mut(id)
                .ok_or_else(|| StoreError::NotFound(id.clone()))?
                .batch = batch;
            Ok(())
        })
        .await
    }

    async fn append_result(&self, result: UrlResult) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.check_result(&result)?;
        let line = serde_json::to_string(&result)
            .map_err(|err| self.corrupt(&self.log_path, err.to_string()))?;
        let log_path = self.log_path.clone();
        tokio::task::spawn_blocking(move || append_line(&log_path, &line))
            .await
            .map_err(|err| StoreError::Task(err.to_string()))??;
        tables.append_result(result)
    }

    async fn list_results(&self, id: &JobId) -> Result<Vec<UrlResult>, StoreError> {
        Ok(self.tables.lock().await.list_results(id))
    }

    async fn delete_job(&self, id: &JobId) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.jobs.contains_key(id) {
            return Ok(false);
        }
        let mut draft = tables.clone();
        draft.delete_job(id);

        // Snapshot first: rows left in the log for a missing job are dropped on open.
        self.write_snapshot(&draft.jobs).await?;
        let mut log = String::new();
        for result in draft.results.values().flatten() {
            let line = serde_json::to_string(result)
                .map_err(|err| self.corrupt(&self.log_path, err.to_string()))?;
            log.push_str(&line);
            log.push('\n');
        }
        self.write_file(self.log_name.clone(), log).await?;

        *tables = draft;
        Ok(true)
    }

    async fn list_jobs_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>, StoreError> {
        Ok(self.tables.lock().await.list_jobs_by_status(statuses))
    }
}
