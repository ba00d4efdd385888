//! CLI command definitions
//!
//! Defines the clap commands for the harness CLI.

use clap::{Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// List available scenarios
    List {
        /// YAML file with custom scenarios instead of the built-in catalog
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Run scenarios, each in its own isolated process
    Run {
        /// Scenarios to run (default: all)
        names: Vec<String>,

        /// YAML file with custom scenarios instead of the built-in catalog
        #[arg(long)]
        file: Option<PathBuf>,

        /// Print results as JSON instead of text
        #[arg(long)]
        json: bool,

        /// Show every pipeline step of each scenario
        #[arg(long, short)]
        verbose: bool,
    },

    /// Run one scenario in this process (used by 'run')
    #[command(hide = true)]
    Scenario {
        name: String,

        #[arg(long)]
        file: Option<PathBuf>,

        /// Where to write the JSON result
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Bring up a peer and the daemon, then open an interactive shell
    Shell {
        /// Which peer to start
        #[arg(value_enum)]
        link: ShellLink,
    },

    /// Report which scenario prerequisites this machine has
    Check,
}

/// Peer started by the `shell` command
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ShellLink {
    Wifi,
    Ethernet,
}
