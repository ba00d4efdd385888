//! Scenario process spawning
//!
//! Every scenario runs in a fresh process: the runner re-executes its own
//! binary with the hidden `scenario` subcommand and reads the JSON report the
//! child leaves behind.

use std::path::Path;
use std::process::Stdio;

use crate::common::{paths, Error, Result};
use crate::scenario::ScenarioResult;

/// Run `name` in a child process and collect its result
pub async fn run_isolated(name: &str, file: Option<&Path>) -> Result<ScenarioResult> {
    let exe_path = std::env::current_exe().map_err(|e| {
        Error::Internal(format!("Failed to get current executable path: {}", e))
    })?;

    let scratch = paths::ensure_scratch_base()?;
    let report = tempfile::Builder::new()
        .prefix("report-")
        .suffix(".json")
        .tempfile_in(&scratch)?;

    let mut command = tokio::process::Command::new(&exe_path);
    command
        .arg("scenario")
        .arg(name)
        .arg("--report")
        .arg(report.path())
        .stdin(Stdio::null());
    if let Some(file) = file {
        command.arg("--file").arg(file);
    }

    tracing::debug!(scenario = name, "Spawning scenario process");
    let status = command.status().await.map_err(|e| Error::Spawn {
        program: exe_path.display().to_string(),
        source: e,
    })?;

    let content = std::fs::read_to_string(report.path()).unwrap_or_default();
    if content.trim().is_empty() {
        return Ok(ScenarioResult::crashed(
            name,
            format!("scenario process exited with {} without a report", status),
        ));
    }
    let result: ScenarioResult = serde_json::from_str(&content)?;
    if status.code() != Some(result.exit_code()) {
        tracing::warn!(
            scenario = name,
            ?status,
            verdict = ?result.verdict,
            "Exit status disagrees with the report"
        );
    }
    Ok(result)
}
