use serde::{Deserialize, Serialize};

/// Translates the number of active jobs into a worker fleet size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityPolicy {
    pub workers_per_job: usize,
    /// Tasks one container runs concurrently; zero is treated as one.
    pub per_container_concurrency: usize,
}

impl Default for CapacityPolicy {
    fn default() -> Self {
        Self {
            workers_per_job: 3,
            per_container_concurrency: 3,
        }
    }
}

impl CapacityPolicy {
    pub fn desired_workers(&self, active_jobs: usize) -> usize {
        active_jobs.saturating_mul(self.workers_per_job)
    }

    pub fn desired_containers(&self, active_jobs: usize) -> usize {
        let workers = self.desired_workers(active_jobs);
        if workers == 0 {
            return 0;
        }
        workers.div_ceil(self.per_container_concurrency.max(1))
    }
}
