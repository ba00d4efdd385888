//! Scenario results
//!
//! A result travels from the scenario process to the runner as JSON, and is
//! printed by the runner.

use std::path::PathBuf;

use colored::Colorize;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::common::{Error, FailureKind, EXIT_FAIL, EXIT_SKIP};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Passed,
    Failed,
    Skipped,
}

/// One pipeline step and how it went
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub verdict: Verdict,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub verdict: Verdict,
    #[serde(default)]
    pub failure: Option<FailureKind>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub steps: Vec<StepRecord>,
    pub duration_ms: u64,
    /// Work directory holding the scenario's logs
    #[serde(default)]
    pub workdir: Option<PathBuf>,
}

impl ScenarioResult {
    pub fn passed(name: &str, steps: Vec<StepRecord>, duration_ms: u64) -> Self {
        Self {
            name: name.to_string(),
            verdict: Verdict::Passed,
            failure: None,
            error: None,
            steps,
            duration_ms,
            workdir: None,
        }
    }

    /// Failed, or skipped if the error says the environment lacks something
    pub fn from_error(name: &str, error: &Error, steps: Vec<StepRecord>, duration_ms: u64) -> Self {
        let kind = error.kind();
        Self {
            name: name.to_string(),
            verdict: if error.is_skip() {
                Verdict::Skipped
            } else {
                Verdict::Failed
            },
            failure: Some(kind),
            error: Some(error.to_string()),
            steps,
            duration_ms,
            workdir: None,
        }
    }

    /// The process died without reporting
    pub fn crashed(name: &str, message: String) -> Self {
        Self {
            name: name.to_string(),
            verdict: Verdict::Failed,
            failure: Some(FailureKind::Internal),
            error: Some(message),
            steps: Vec::new(),
            duration_ms: 0,
            workdir: None,
        }
    }

    pub fn with_workdir(mut self, workdir: PathBuf) -> Self {
        self.workdir = Some(workdir);
        self
    }

    pub fn exit_code(&self) -> i32 {
        match self.verdict {
            Verdict::Passed => 0,
            Verdict::Failed => EXIT_FAIL,
            Verdict::Skipped => EXIT_SKIP,
        }
    }

    pub fn print(&self, verbose: bool) {
        let secs = format!("({:.1}s)", self.duration_ms as f64 / 1000.0);
        match self.verdict {
            Verdict::Passed => println!("{} {} {}", "✓".green(), self.name, secs.dimmed()),
            Verdict::Skipped => println!(
                "{} {} {}",
                "-".yellow(),
                self.name,
                self.error.as_deref().unwrap_or("skipped").dimmed()
            ),
            Verdict::Failed => {
                let kind = self
                    .failure
                    .map(|k| k.to_string())
                    .unwrap_or_else(|| "failure".to_string());
                println!("{} {} {} {}", "✗".red(), self.name, kind.red(), secs.dimmed());
                if let Some(error) = &self.error {
                    for line in error.lines() {
                        println!("    {}", line);
                    }
                }
                if let Some(dir) = &self.workdir {
                    println!("    {} {}", "logs:".dimmed(), dir.display());
                }
            }
        }
        if verbose {
            for step in &self.steps {
                let mark = match step.verdict {
                    Verdict::Passed => "✓".green(),
                    Verdict::Failed => "✗".red(),
                    Verdict::Skipped => "-".yellow(),
                };
                println!("    {} {} {}", mark, step.name, format!("{}ms", step.elapsed_ms).dimmed());
            }
        }
    }
}

/// Records pipeline steps as they start and end
#[derive(Debug)]
pub struct StepLog {
    current: Option<(String, Instant)>,
    done: Vec<StepRecord>,
}

impl Default for StepLog {
    fn default() -> Self {
        Self::new()
    }
}

impl StepLog {
    pub fn new() -> Self {
        Self {
            current: None,
            done: Vec::new(),
        }
    }

    /// Close the running step as passed and start `name`
    pub fn begin(&mut self, name: &str) {
        self.close(Verdict::Passed);
        tracing::info!(step = name, "Step");
        self.current = Some((name.to_string(), Instant::now()));
    }

    /// Close the running step, if any, with `verdict`
    pub fn close(&mut self, verdict: Verdict) {
        if let Some((name, started)) = self.current.take() {
            self.done.push(StepRecord {
                name,
                verdict,
                elapsed_ms: started.elapsed().as_millis() as u64,
            });
        }
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_ref().map(|(name, _)| name.as_str())
    }

    pub fn take(&mut self) -> Vec<StepRecord> {
        std::mem::take(&mut self.done)
    }
}

/// Totals over a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Summary {
    pub fn from_results(results: &[ScenarioResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            match result.verdict {
                Verdict::Passed => summary.passed += 1,
                Verdict::Failed => summary.failed += 1,
                Verdict::Skipped => summary.skipped += 1,
            }
        }
        summary
    }

    /// 0 if nothing failed, 77 if everything was skipped, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.failed > 0 {
            EXIT_FAIL
        } else if self.passed == 0 && self.skipped > 0 {
            EXIT_SKIP
        } else {
            0
        }
    }

    pub fn print(&self) {
        println!();
        let line = format!(
            "{} passed, {} failed, {} skipped",
            self.passed, self.failed, self.skipped
        );
        if self.failed > 0 {
            println!("{}", line.red());
        } else {
            println!("{}", line.green());
        }
    }
}
