//! CLI command handling
//!
//! Dispatches CLI commands and formats their output.

pub mod isolate;
mod spawn;

use std::path::Path;

use colored::Colorize;

use crate::commands::{Commands, ShellLink};
use crate::common::config::Config;
use crate::common::{paths, Error, Result};
use crate::profile::AddressingMode;
use crate::scenario::{catalog, AccessPointConfig, HwMode, ScenarioResult, Summary};
use crate::world::capabilities::Capabilities;
use crate::world::{sys, DaemonOptions, LinuxTestbed, Testbed};

/// Dispatch a CLI command, returning the process exit status
pub async fn dispatch(command: Commands) -> Result<i32> {
    match command {
        Commands::List { file } => {
            list(file.as_deref())?;
            Ok(0)
        }

        Commands::Run {
            names,
            file,
            json,
            verbose,
        } => run(&names, file.as_deref(), json, verbose).await,

        Commands::Scenario { name, file, report } => {
            Ok(isolate::run_scenario(&name, file.as_deref(), report.as_deref()).await)
        }

        Commands::Shell { link } => {
            shell(link).await?;
            Ok(0)
        }

        Commands::Check => {
            check().await?;
            Ok(0)
        }
    }
}

fn list(file: Option<&Path>) -> Result<()> {
    let scenarios = catalog::available(file)?;
    let width = scenarios.iter().map(|s| s.name.len()).max().unwrap_or(0);
    for scenario in &scenarios {
        println!(
            "{:width$}  {}",
            scenario.name.cyan(),
            scenario.description.as_deref().unwrap_or("").dimmed(),
            width = width
        );
    }
    Ok(())
}

async fn run(names: &[String], file: Option<&Path>, json: bool, verbose: bool) -> Result<i32> {
    let scenarios = catalog::select(file, names)?;
    if !json {
        println!("{}", format!("Running {} scenario(s)", scenarios.len()).cyan());
        println!();
    }

    let mut results: Vec<ScenarioResult> = Vec::with_capacity(scenarios.len());
    for scenario in &scenarios {
        let result = spawn::run_isolated(&scenario.name, file).await?;
        if !json {
            result.print(verbose);
        }
        results.push(result);
    }

    let summary = Summary::from_results(&results);
    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        summary.print();
    }
    Ok(summary.exit_code())
}

async fn check() -> Result<()> {
    let config = Config::load()?;
    let capabilities = Capabilities::detect(&config).await;
    for line in capabilities.report() {
        let mark = if line.available {
            "✓".green()
        } else {
            "✗".red()
        };
        match line.detail {
            Some(detail) => println!("{} {} {}", mark, line.name, detail.dimmed()),
            None => println!("{} {}", mark, line.name),
        }
    }
    Ok(())
}

/// Interactive debugging session against a running peer and daemon
async fn shell(link: ShellLink) -> Result<()> {
    let config = Config::load()?;
    if !sys::is_root() {
        return Err(Error::NotRoot);
    }
    sys::isolate_mounts()?;
    let workdir = paths::create_workdir("shell-")?;

    let mut testbed = LinuxTestbed::create(config, &workdir).await?;
    let outcome = interactive(&mut testbed, link).await;
    let teardown = testbed.teardown().await;
    outcome.and(teardown)
}

async fn interactive(testbed: &mut LinuxTestbed, link: ShellLink) -> Result<()> {
    let auto_connect = match link {
        ShellLink::Wifi => {
            testbed
                .start_access_point(&AccessPointConfig::open(HwMode::G), AddressingMode::Ipv4)
                .await?;
            false
        }
        ShellLink::Ethernet => {
            testbed.start_router(AddressingMode::Ipv4).await?;
            true
        }
    };
    testbed
        .start_daemon(DaemonOptions {
            auto_connect,
            session_manager_mock: false,
        })
        .await?;

    let ifaces = testbed.interfaces().clone();
    println!("{}", "Testbed is up".cyan());
    println!("  access point radio: {} ({})", ifaces.wifi_ap, ifaces.wifi_ap_mac);
    println!("  client radio:       {}", ifaces.wifi_client);
    println!("  wired client:       {} ({})", ifaces.eth_client, ifaces.eth_client_mac);
    println!("  wired router:       {}", ifaces.eth_router);
    println!("  logs:               {}", testbed.workdir().display());
    println!("{}", "Exit the shell to tear everything down.".dimmed());

    let status = tokio::process::Command::new("bash")
        .arg("-i")
        .status()
        .await
        .map_err(|e| Error::Spawn {
            program: "bash".into(),
            source: e,
        })?;
    tracing::debug!(?status, "Shell exited");
    Ok(())
}
