//! Scenario process side
//!
//! Runs exactly one scenario inside a private mount namespace, so the tmpfs
//! mounts over the daemon's configuration vanish with the process even if
//! teardown never happens.

use std::path::{Path, PathBuf};

use crate::common::config::Config;
use crate::common::{logging, paths, Result};
use crate::scenario::{catalog, Scenario, ScenarioEngine, ScenarioResult};
use crate::world::capabilities::Capabilities;
use crate::world::{sys, LinuxTestbed};

/// Run `name` and write its result to `report`, returning the exit status
pub async fn run_scenario(name: &str, file: Option<&Path>, report: Option<&Path>) -> i32 {
    let result = execute(name, file).await;
    if let Some(report) = report {
        let written = serde_json::to_string_pretty(&result)
            .map_err(crate::common::Error::from)
            .and_then(|json| std::fs::write(report, json).map_err(Into::into));
        if let Err(e) = written {
            eprintln!("Error: failed to write report {}: {}", report.display(), e);
        }
    } else {
        result.print(true);
    }
    result.exit_code()
}

async fn execute(name: &str, file: Option<&Path>) -> ScenarioResult {
    let scenario = match catalog::select(file, &[name.to_string()]) {
        Ok(mut found) if !found.is_empty() => found.remove(0),
        Ok(_) => return ScenarioResult::crashed(name, "scenario not found".into()),
        Err(e) => return ScenarioResult::from_error(name, &e, Vec::new(), 0),
    };
    let config = match prepare(&scenario).await {
        Ok(config) => config,
        Err(e) => return ScenarioResult::from_error(name, &e, Vec::new(), 0),
    };
    let workdir = match create_workdir(name) {
        Ok(dir) => dir,
        Err(e) => return ScenarioResult::from_error(name, &e, Vec::new(), 0),
    };

    let (log_path, guard) = logging::init_scenario(&workdir, config.daemon.log_stdout);
    tracing::info!(scenario = name, log = %log_path.display(), "Scenario process started");

    let result = match LinuxTestbed::create(config.clone(), &workdir).await {
        Ok(testbed) => {
            let mut engine = ScenarioEngine::new(testbed, config);
            engine.run(&scenario).await
        }
        Err(e) => {
            tracing::error!("Testbed setup failed: {}", e);
            ScenarioResult::from_error(name, &e, Vec::new(), 0)
        }
    };
    drop(guard);
    result.with_workdir(workdir)
}

/// Load configuration, check prerequisites and enter a private mount namespace
async fn prepare(scenario: &Scenario) -> Result<Config> {
    let config = Config::load()?;
    Capabilities::detect(&config).await.require(scenario)?;
    sys::isolate_mounts()?;
    Ok(config)
}

fn create_workdir(name: &str) -> Result<PathBuf> {
    Ok(paths::create_workdir(&format!("{}-", name))?)
}
