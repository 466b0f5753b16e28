use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier of one crawl run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Handle of one fanned-out group of tasks.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Paused,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    /// Statuses that count towards worker capacity.
    pub const ACTIVE: [JobStatus; 2] = [JobStatus::Running, JobStatus::Pending];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Paused => "PAUSED",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// One crawl run over one or more domains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub total_urls: usize,
    pub urls: Vec<String>,
    pub batch: Option<BatchId>,
    /// Orchestration fault detail; only set together with `Failed`.
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl Job {
    pub fn new(id: JobId, status: JobStatus) -> Self {
        Self {
            id,
            status,
            total_urls: 0,
            urls: Vec::new(),
            batch: None,
            error: None,
            message: None,
        }
    }

    /// Job registered at start, before discovery has produced any URL.
    pub fn pending(id: JobId) -> Self {
        Self::new(id, JobStatus::Pending)
    }

    /// Checks the invariants a stored job row must satisfy.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.as_str().trim().is_empty() {
            return Err(ValidationError::EmptyJobId);
        }
        if self.status != JobStatus::Pending && self.total_urls != self.urls.len() {
            return Err(ValidationError::UrlCountMismatch {
                total_urls: self.total_urls,
                actual: self.urls.len(),
            });
        }
        if self.error.is_some() && self.status != JobStatus::Failed {
            return Err(ValidationError::ErrorWithoutFailure(self.status));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("job id must not be empty")]
    EmptyJobId,
    #[error("total_urls is {total_urls} but the job holds {actual} urls")]
    UrlCountMismatch { total_urls: usize, actual: usize },
    #[error("error detail set on a {0} job")]
    ErrorWithoutFailure(JobStatus),
    #[error("result url must not be empty")]
    EmptyResultUrl,
    #[error("success result for {0} carries no record")]
    SuccessWithoutRecord(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_its_name() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>(), Ok(status));
        }
        assert_eq!("paused".parse::<JobStatus>(), Ok(JobStatus::Paused));
        assert!("DONE".parse::<JobStatus>().is_err());
    }

    #[test]
    fn status_serializes_in_upper_case() {
        let json = serde_json::to_string(&JobStatus::Cancelled).unwrap();
        assert_eq!(json, "\"CANCELLED\"");
    }

    #[test]
    fn running_job_must_count_its_urls() {
        let mut job = Job::new(JobId::from("j"), JobStatus::Running);
        job.urls = vec!["https://a.example/p/1".into()];
        assert_eq!(
            job.validate(),
            Err(ValidationError::UrlCountMismatch {
                total_urls: 0,
                actual: 1
            })
        );
        job.total_urls = 1;
        assert_eq!(job.validate(), Ok(()));
    }

    #[test]
    fn pending_job_with_blank_id_is_rejected() {
        assert_eq!(
            Job::pending(JobId::from("  ")).validate(),
            Err(ValidationError::EmptyJobId)
        );
    }
}
