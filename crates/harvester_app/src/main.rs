mod app;
mod cli;

use clap::Parser;
use harvest_logging::LogDestination;
use log::LevelFilter;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; settings then come from the config file and defaults.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let destination = match cli.log_file.clone() {
        Some(path) => LogDestination::Both(path),
        None => LogDestination::Terminal,
    };
    harvest_logging::initialize(destination, level);

    app::run(cli).await
}
