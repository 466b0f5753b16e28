use std::path::Path;

use anyhow::{Context, Result};
use harvest_logging::{harvest_info, harvest_warn};
use harvester_core::{Job, JobId, JobStatus};
use harvester_engine::{export_results, EngineConfig, EngineHandle, JobService, ServiceError};
use serde::Serialize;

use crate::cli::{Cli, Command};

/// One line of the `jobs` listing.
#[derive(Debug, Serialize)]
struct JobRow<'a> {
    id: &'a str,
    status: JobStatus,
    total_urls: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

impl<'a> From<&'a Job> for JobRow<'a> {
    fn from(job: &'a Job) -> Self {
        Self {
            id: job.id.as_str(),
            status: job.status,
            total_urls: job.total_urls,
            message: job.message.as_deref(),
            error: job.error.as_deref(),
        }
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = EngineConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let engine = EngineHandle::build(&config, Some(cli.store.as_path()))
        .await
        .with_context(|| format!("opening job store {}", cli.store.display()))?;
    let service = engine.service().clone();

    // The store file belongs to one process at a time, so active rows are leftovers.
    let recovered = service.recover_interrupted().await?;
    if !recovered.is_empty() {
        harvest_warn!("Settled {} jobs interrupted by a previous run", recovered.len());
    }

    let outcome = execute(&service, cli.command).await;
    engine.shutdown().await;
    outcome
}

async fn execute(service: &JobService, command: Command) -> Result<()> {
    match command {
        Command::Crawl { domains, out } => {
            let id = service.start_job(domains).await?;
            println!("Started job {id}");
            follow(service, &id, &out).await
        }
        Command::Resume { id, out } => {
            let id = JobId::new(id);
            let job = service.resume(&id).await?;
            println!("Resumed job {id} ({})", job.status);
            follow(service, &id, &out).await
        }
        Command::Status { id } => print_json(&service.job_status(&JobId::new(id)).await?),
        Command::Results { id } => print_json(&service.results(&JobId::new(id)).await?),
        Command::Export { id, out } => export(service, &JobId::new(id), &out).await,
        Command::Pause { id } => print_json(&JobRow::from(&service.pause(&JobId::new(id)).await?)),
        Command::Cancel { id } => {
            print_json(&JobRow::from(&service.cancel(&JobId::new(id)).await?))
        }
        Command::Delete { id } => {
            let id = JobId::new(id);
            service.delete(&id).await?;
            println!("Deleted job {id}");
            Ok(())
        }
        Command::Jobs => {
            let jobs = service.list_jobs().await?;
            let rows: Vec<JobRow> = jobs.iter().map(JobRow::from).collect();
            print_json(&rows)
        }
    }
}

/// Waits for the job to settle, pausing it on Ctrl-C, and exports what it produced.
async fn follow(service: &JobService, id: &JobId, out: &Path) -> Result<()> {
    let job = tokio::select! {
        job = service.wait_for_job(id) => job?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for Ctrl-C")?;
            return interrupt(service, id).await;
        }
    };

    harvest_info!("job={id} settled as {}", job.status);
    print_json(&service.job_status(id).await?)?;
    if job.status == JobStatus::Completed && job.total_urls > 0 {
        export(service, id, out).await?;
    }
    Ok(())
}

async fn interrupt(service: &JobService, id: &JobId) -> Result<()> {
    match service.pause(id).await {
        Ok(_) => {
            println!("Job {id} paused; continue with `harvester resume {id}`");
            Ok(())
        }
        // Still discovering; there is no batch to pause yet.
        Err(ServiceError::InvalidState(_)) => {
            service.cancel(id).await?;
            println!("Job {id} cancelled during discovery");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

async fn export(service: &JobService, id: &JobId, out: &Path) -> Result<()> {
    let rows = service.download(id).await?;
    let dir = out.join(id.as_str());
    let summary = export_results(&dir, id, &rows)
        .with_context(|| format!("exporting results to {}", dir.display()))?;
    println!(
        "Exported {} results ({} success, {} failed) to {}",
        summary.total,
        summary.success,
        summary.failed,
        summary.results_path.display()
    );
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
