//! NetworkManager integration harness
//!
//! Runs end-to-end scenarios against the real daemon on emulated hardware,
//! each in its own process and mount namespace.

use clap::Parser;
use commands::Commands;
use nm_harness::common::logging;
use nm_harness::{cli, commands};

#[derive(Parser)]
#[command(name = "nm-harness", about = "NetworkManager integration test harness")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    // Scenario processes set up their own logging once the work directory exists
    if !matches!(cli.command, Commands::Scenario { .. }) {
        logging::init_runner();
    }

    match cli::dispatch(cli.command).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
