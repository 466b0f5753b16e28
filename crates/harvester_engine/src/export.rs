use std::path::{Path, PathBuf};

use harvester_core::{JobId, ResultStatus, UrlResult};
use serde_json::json;

use crate::persist::{AtomicFileWriter, PersistError};

pub const RESULTS_FILENAME: &str = "results.jsonl";
pub const MANIFEST_FILENAME: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub results_path: PathBuf,
    pub manifest_path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("persist error: {0}")]
    Persist(#[from] PersistError),
    #[error("failed to serialize result: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Writes one JSON line per result row plus a small manifest into `dir`.
pub fn export_results(
    dir: &Path,
    job_id: &JobId,
    results: &[UrlResult],
) -> Result<ExportSummary, ExportError> {
    let mut buffer = String::new();
    for result in results {
        buffer.push_str(&serde_json::to_string(result)?);
        buffer.push('\n');
    }

    let success = results
        .iter()
        .filter(|r| r.status == ResultStatus::Success)
        .count();
    let failed = results
        .iter()
        .filter(|r| r.status == ResultStatus::Failed)
        .count();

    let writer = AtomicFileWriter::new(dir.to_path_buf());
    let results_path = writer.write(RESULTS_FILENAME, &buffer)?;

    let manifest = json!({
        "job_id": job_id.as_str(),
        "total": results.len(),
        "success": success,
        "failed": failed,
        "results_file": RESULTS_FILENAME,
    });
    let manifest_path = writer.write(MANIFEST_FILENAME, &serde_json::to_string_pretty(&manifest)?)?;

    Ok(ExportSummary {
        total: results.len(),
        success,
        failed,
        results_path,
        manifest_path,
    })
}
