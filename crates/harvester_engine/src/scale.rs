use std::sync::Arc;

use harvest_logging::{harvest_info, harvest_warn};
use harvester_core::{CapacityPolicy, JobStatus};

use crate::store::JobStore;

#[derive(Debug, thiserror::Error)]
pub enum ScaleError {
    #[error("scale command is empty")]
    EmptyCommand,
    #[error("failed to run scale command: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("scale command exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },
}

/// Resizes the worker fleet to the requested number of containers.
#[async_trait::async_trait]
pub trait Scaler: Send + Sync {
    async fn scale(&self, containers: usize) -> Result<(), ScaleError>;
}

/// Runs an external command such as
/// `docker compose up -d --no-recreate --scale worker={count}`.
#[derive(Debug, Clone)]
pub struct CommandScaler {
    template: Vec<String>,
}

impl CommandScaler {
    pub const COUNT_PLACEHOLDER: &'static str = "{count}";

    pub fn new(template: &str) -> Result<Self, ScaleError> {
        let template: Vec<String> = template.split_whitespace().map(str::to_string).collect();
        if template.is_empty() {
            return Err(ScaleError::EmptyCommand);
        }
        Ok(Self { template })
    }

    /// Program and arguments with the container count substituted.
    pub fn command_line(&self, containers: usize) -> Vec<String> {
        let count = containers.to_string();
        self.template
            .iter()
            .map(|part| part.replace(Self::COUNT_PLACEHOLDER, &count))
            .collect()
    }
}

#[async_trait::async_trait]
impl Scaler for CommandScaler {
    async fn scale(&self, containers: usize) -> Result<(), ScaleError> {
        let line = self.command_line(containers);
        let (program, args) = line.split_first().ok_or(ScaleError::EmptyCommand)?;
        let output = tokio::process::Command::new(program)
            .args(args)
            .output()
            .await?;
        if !output.status.success() {
            return Err(ScaleError::Exit {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Scaler for single-process runs: only reports the target size.
#[derive(Debug, Default)]
pub struct LogScaler;

#[async_trait::async_trait]
impl Scaler for LogScaler {
    async fn scale(&self, containers: usize) -> Result<(), ScaleError> {
        harvest_info!("Desired worker containers: {containers}");
        Ok(())
    }
}

/// Maps the active job count to a fleet size after every lifecycle transition.
pub struct CapacityController {
    store: Arc<dyn JobStore>,
    scaler: Arc<dyn Scaler>,
    policy: CapacityPolicy,
}

impl CapacityController {
    pub fn new(store: Arc<dyn JobStore>, scaler: Arc<dyn Scaler>, policy: CapacityPolicy) -> Self {
        Self {
            store,
            scaler,
            policy,
        }
    }

    /// Recomputes and applies the fleet size. Failures are logged, never raised.
    pub async fn rebalance(&self) {
        let active = match self.store.list_jobs_by_status(&JobStatus::ACTIVE).await {
            Ok(jobs) => jobs.len(),
            Err(err) => {
                harvest_warn!("Capacity check skipped, could not count active jobs: {err}");
                return;
            }
        };
        let containers = self.policy.desired_containers(active);
        harvest_info!(
            "Capacity: {active} active jobs -> {} workers in {containers} containers",
            self.policy.desired_workers(active)
        );
        if let Err(err) = self.scaler.scale(containers).await {
            harvest_warn!("Scaling to {containers} containers failed: {err}");
        }
    }
}
