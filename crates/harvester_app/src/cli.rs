use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "harvester")]
#[command(about = "Discover product pages of e-commerce domains and extract product records")]
pub struct Cli {
    /// Engine settings in RON; environment variables override them.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// File holding jobs and results between runs.
    #[arg(long, global = true, default_value = "harvester_jobs.ron")]
    pub store: PathBuf,

    /// Also write the log to this file.
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Log debug detail.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start a job for one or more domains and wait for it to finish
    Crawl {
        #[arg(required = true)]
        domains: Vec<String>,
        /// Directory receiving the exported results.
        #[arg(long, default_value = "output")]
        out: PathBuf,
    },

    /// Resume a paused job and wait for it to finish
    Resume {
        id: String,
        #[arg(long, default_value = "output")]
        out: PathBuf,
    },

    /// Show status and progress of a job
    Status { id: String },

    /// Print the extracted product records of a job
    Results { id: String },

    /// Export every result row of a job as JSON lines plus a manifest
    Export {
        id: String,
        #[arg(long, default_value = "output")]
        out: PathBuf,
    },

    /// Pause a running job
    Pause { id: String },

    /// Cancel a job
    Cancel { id: String },

    /// Delete a job and its results
    Delete { id: String },

    /// List all known jobs
    Jobs,
}
