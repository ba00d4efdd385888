//! Process supervisor
//!
//! Owns every process the testbed spawns and every piece of OS state it
//! changes, as a stack of cleanup actions. Teardown unwinds the stack in
//! reverse order, runs every action even when earlier ones fail, and can be
//! called any number of times.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};

use super::sys;
use crate::common::{Error, Result};

/// One registered undo action
#[derive(Debug)]
pub enum Cleanup {
    /// Terminate and reap a spawned process
    Process { name: String, child: Child },
    Unmount(PathBuf),
    /// `ip link del`
    DeleteLink(String),
    /// `rmmod`
    UnloadModule(String),
    RemoveDir(PathBuf),
    /// Arbitrary command, e.g. unblocking a radio
    Command { program: String, args: Vec<String> },
}

impl Cleanup {
    fn describe(&self) -> String {
        match self {
            Self::Process { name, child } => match child.id() {
                Some(pid) => format!("stop {} (pid {})", name, pid),
                None => format!("stop {}", name),
            },
            Self::Unmount(path) => format!("unmount {}", path.display()),
            Self::DeleteLink(link) => format!("delete link {}", link),
            Self::UnloadModule(module) => format!("unload module {}", module),
            Self::RemoveDir(path) => format!("remove {}", path.display()),
            Self::Command { program, args } => format!("{} {}", program, args.join(" ")),
        }
    }
}

/// Run a command to completion and return its stdout
///
/// A non-zero exit status is an error carrying stderr.
pub async fn run(program: &str, args: &[&str]) -> Result<String> {
    tracing::debug!(program, ?args, "Running");
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| Error::Spawn {
            program: program.to_string(),
            source,
        })?;
    if !output.status.success() {
        return Err(Error::CommandFailed {
            command: format!("{} {}", program, args.join(" ")),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

pub struct ProcessSupervisor {
    stack: Vec<Cleanup>,
    stop_timeout: Duration,
}

impl ProcessSupervisor {
    /// `stop_timeout` bounds how long a terminated process may take to exit
    /// before it is killed
    pub fn new(stop_timeout: Duration) -> Self {
        Self {
            stack: Vec::new(),
            stop_timeout,
        }
    }

    /// Spawn `command` and register it for termination
    ///
    /// Returns the process id.
    pub fn spawn(&mut self, name: &str, command: &mut Command) -> Result<u32> {
        let child = command
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::Spawn {
                program: name.to_string(),
                source,
            })?;
        let pid = child
            .id()
            .ok_or_else(|| Error::Internal(format!("{} exited before it could be tracked", name)))?;
        tracing::info!(name, pid, "Started");
        self.stack.push(Cleanup::Process {
            name: name.to_string(),
            child,
        });
        Ok(pid)
    }

    pub fn push(&mut self, action: Cleanup) {
        tracing::trace!(action = %action.describe(), "Registered cleanup");
        self.stack.push(action);
    }

    /// Whether the most recent process registered under `name` is running
    pub fn is_running(&mut self, name: &str) -> bool {
        self.stack.iter_mut().rev().find_map(|action| match action {
            Cleanup::Process { name: n, child } if n == name => {
                Some(matches!(child.try_wait(), Ok(None)))
            }
            _ => None,
        }) == Some(true)
    }

    pub fn pending(&self) -> usize {
        self.stack.len()
    }

    /// Unwind every registered action, newest first
    ///
    /// Returns the errors of the actions that failed; the stack is empty
    /// afterwards either way.
    pub async fn teardown(&mut self) -> Vec<Error> {
        let mut errors = Vec::new();
        while let Some(action) = self.stack.pop() {
            let description = action.describe();
            tracing::debug!(action = %description, "Cleaning up");
            if let Err(e) = self.undo(action).await {
                tracing::warn!(action = %description, error = %e, "Cleanup failed");
                errors.push(e);
            }
        }
        errors
    }

    async fn undo(&self, action: Cleanup) -> Result<()> {
        match action {
            Cleanup::Process { name, mut child } => self.stop(&name, &mut child).await,
            Cleanup::Unmount(path) => sys::unmount(&path).map_err(|e| {
                Error::Internal(format!("Failed to unmount {}: {}", path.display(), e))
            }),
            Cleanup::DeleteLink(link) => run("ip", &["link", "del", &link]).await.map(drop),
            Cleanup::UnloadModule(module) => run("rmmod", &[&module]).await.map(drop),
            Cleanup::RemoveDir(path) => match std::fs::remove_dir_all(&path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(Error::Io(e)),
                _ => Ok(()),
            },
            Cleanup::Command { program, args } => {
                let args: Vec<&str> = args.iter().map(String::as_str).collect();
                run(&program, &args).await.map(drop)
            }
        }
    }

    async fn stop(&self, name: &str, child: &mut Child) -> Result<()> {
        if let Ok(Some(status)) = child.try_wait() {
            tracing::debug!(name, %status, "Already exited");
            return Ok(());
        }
        if let Some(pid) = child.id() {
            if let Err(e) = sys::terminate(pid) {
                tracing::debug!(name, pid, error = %e, "SIGTERM failed");
            }
        }
        match tokio::time::timeout(self.stop_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(name, %status, "Stopped");
                Ok(())
            }
            Ok(Err(e)) => Err(Error::Io(e)),
            Err(_) => {
                tracing::warn!(name, "Did not exit after SIGTERM, killing");
                child.kill().await.map_err(Error::Io)
            }
        }
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        if !self.stack.is_empty() {
            tracing::warn!(pending = self.stack.len(), "Supervisor dropped without teardown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supervisor() -> ProcessSupervisor {
        ProcessSupervisor::new(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_teardown_stops_processes() {
        let mut sup = supervisor();
        let pid = sup.spawn("sleeper", Command::new("sleep").arg("60")).unwrap();
        assert!(sup.is_running("sleeper"));
        assert!(sys::is_process_alive(pid));

        let errors = sup.teardown().await;
        assert!(errors.is_empty(), "{:?}", errors);
        assert_eq!(sup.pending(), 0);
        assert!(!sup.is_running("sleeper"));
    }

    #[tokio::test]
    async fn test_teardown_is_lifo_and_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let inner = dir.path().join("outer").join("inner");
        std::fs::create_dir_all(&inner).unwrap();

        let mut sup = supervisor();
        sup.push(Cleanup::RemoveDir(dir.path().join("outer")));
        // Runs first; would fail if the outer directory were already gone
        sup.push(Cleanup::Command {
            program: "test".into(),
            args: vec!["-d".into(), inner.display().to_string()],
        });

        assert!(sup.teardown().await.is_empty());
        assert!(!dir.path().join("outer").exists());
        assert!(sup.teardown().await.is_empty());
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_unwinding() {
        let dir = tempfile::tempdir().unwrap();
        let victim = dir.path().join("victim");
        std::fs::create_dir(&victim).unwrap();

        let mut sup = supervisor();
        sup.push(Cleanup::RemoveDir(victim.clone()));
        sup.push(Cleanup::Command {
            program: "false".into(),
            args: Vec::new(),
        });

        let errors = sup.teardown().await;
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], Error::CommandFailed { .. }));
        assert!(!victim.exists());
    }

    #[tokio::test]
    async fn test_exited_process_is_not_an_error() {
        let mut sup = supervisor();
        sup.spawn("quick", &mut Command::new("true")).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!sup.is_running("quick"));
        assert!(sup.teardown().await.is_empty());
    }

    #[tokio::test]
    async fn test_run_reports_stderr() {
        let err = run("sh", &["-c", "echo broken >&2; exit 3"]).await.unwrap_err();
        match err {
            Error::CommandFailed { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
