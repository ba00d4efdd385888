//! Configuration, log and scratch paths

use std::io;
use std::path::{Path, PathBuf};

/// Name used for the configuration and data directories
const APP_NAME: &str = "nm-harness";

/// Get the configuration directory path
///
/// Uses the directories crate for platform-appropriate locations:
/// `~/.config/nm-harness/` on Linux.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Base directory for per-scenario work directories
///
/// Scenario work directories hold generated daemon/peer configuration and
/// captured logs. They live under the system temp dir so the root user
/// running the suite does not need a home directory.
pub fn scratch_base() -> PathBuf {
    std::env::temp_dir().join(APP_NAME)
}

/// Ensure the scratch base exists and return it
pub fn ensure_scratch_base() -> io::Result<PathBuf> {
    let dir = scratch_base();
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}

/// Create a uniquely named directory under `base` that outlives the call
///
/// Work directories are left behind so logs can be inspected after a run.
pub fn kept_dir_in(base: &Path, prefix: &str) -> io::Result<PathBuf> {
    let dir = tempfile::Builder::new().prefix(prefix).tempdir_in(base)?;
    Ok(dir.keep())
}

/// Create a kept work directory under the scratch base
pub fn create_workdir(prefix: &str) -> io::Result<PathBuf> {
    kept_dir_in(&ensure_scratch_base()?, prefix)
}

/// Directory where enterprise authentication material is generated
///
/// The access point configuration references files in here by absolute path.
pub fn pki_dir() -> PathBuf {
    PathBuf::from("/tmp/hostapd")
}
