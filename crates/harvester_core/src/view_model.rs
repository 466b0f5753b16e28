use serde::Serialize;

use crate::{Job, JobId, JobStatus, ResultStatus, UrlResult};

/// Progress counters of a job, derived from its stored results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
    pub total: usize,
    pub completed: usize,
    pub success: usize,
    pub failed: usize,
    pub percent: f64,
}

/// What a status query reports about a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub status: JobStatus,
    pub message: Option<String>,
    pub error: Option<String>,
    pub progress: Progress,
}

impl JobStatusView {
    pub fn build(job: &Job, results: &[UrlResult]) -> Self {
        // A URL retried across resumes may hold several results; count it once.
        let mut seen = std::collections::HashMap::new();
        for result in results {
            let entry = seen.entry(result.url.as_str()).or_insert(result.status);
            if result.status == ResultStatus::Success {
                *entry = ResultStatus::Success;
            }
        }
        let success = seen
            .values()
            .filter(|s| **s == ResultStatus::Success)
            .count();
        let failed = seen.values().filter(|s| **s == ResultStatus::Failed).count();
        let completed = success + failed;
        let total = job.total_urls;
        let percent = if total > 0 {
            completed as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        Self {
            job_id: job.id.clone(),
            status: job.status,
            message: job.message.clone(),
            error: job.error.clone(),
            progress: Progress {
                total,
                completed,
                success,
                failed,
                percent,
            },
        }
    }
}
