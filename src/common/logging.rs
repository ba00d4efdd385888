//! Logging and tracing configuration
//!
//! The runner logs compactly to stdout. Each scenario child process logs in
//! full detail to a file in its work directory, and additionally to stderr
//! when diagnostics are streamed.

use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// File name of the per-scenario harness log
pub const SCENARIO_LOG: &str = "scenario.log";

/// Initialize tracing for the runner (stdout logging)
///
/// Logs are controlled by the `RUST_LOG` environment variable.
/// Default level is INFO for this crate, WARN for dependencies.
pub fn init_runner() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("nm_harness=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

/// Initialize tracing for a scenario process
///
/// Returns the log file path and the guard flushing the file writer; the
/// guard must live until the scenario has finished.
pub fn init_scenario(workdir: &Path, stream: bool) -> (PathBuf, WorkerGuard) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("nm_harness=debug,zbus=warn,info"));

    let log_path = workdir.join(SCENARIO_LOG);
    let appender = tracing_appender::rolling::never(workdir, SCENARIO_LOG);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE);

    let stderr_layer = stream.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();

    (log_path, guard)
}
