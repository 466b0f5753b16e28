use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{JobId, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ResultPayload {
    /// Structured extraction output.
    Record(serde_json::Value),
    /// Why the URL produced no record.
    Reason(String),
}

/// Outcome of processing one URL within one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlResult {
    pub job_id: JobId,
    pub url: String,
    pub status: ResultStatus,
    pub payload: ResultPayload,
}

impl UrlResult {
    pub fn success(job_id: JobId, url: impl Into<String>, record: serde_json::Value) -> Self {
        Self {
            job_id,
            url: url.into(),
            status: ResultStatus::Success,
            payload: ResultPayload::Record(record),
        }
    }

    pub fn failed(job_id: JobId, url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            job_id,
            url: url.into(),
            status: ResultStatus::Failed,
            payload: ResultPayload::Reason(reason.into()),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.job_id.as_str().trim().is_empty() {
            return Err(ValidationError::EmptyJobId);
        }
        if self.url.trim().is_empty() {
            return Err(ValidationError::EmptyResultUrl);
        }
        if self.status == ResultStatus::Success
            && !matches!(self.payload, ResultPayload::Record(_))
        {
            return Err(ValidationError::SuccessWithoutRecord(self.url.clone()));
        }
        Ok(())
    }
}

/// URLs of `urls` that have no recorded result yet, in job order.
pub fn pending_urls(urls: &[String], results: &[UrlResult]) -> Vec<String> {
    let done: HashSet<&str> = results.iter().map(|r| r.url.as_str()).collect();
    urls.iter()
        .filter(|url| !done.contains(url.as_str()))
        .cloned()
        .collect()
}

/// Aggregate of every outcome reported by one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
}

impl BatchSummary {
    pub fn from_statuses(statuses: impl IntoIterator<Item = ResultStatus>) -> Self {
        statuses
            .into_iter()
            .fold(BatchSummary::default(), |mut summary, status| {
                summary.total += 1;
                match status {
                    ResultStatus::Success => summary.success_count += 1,
                    ResultStatus::Failed => summary.failed_count += 1,
                    ResultStatus::Skipped => summary.skipped_count += 1,
                }
                summary
            })
    }
}
