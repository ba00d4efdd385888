//! Error types for the harness
//!
//! Every failure names the wait, assertion or launch step that broke and the
//! last state the harness observed, so a red scenario can be diagnosed from
//! its report alone.

use std::io;
use thiserror::Error;

use crate::profile::ProfileError;
use crate::service::ServiceError;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Failure categories a scenario can end in
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Peer or daemon failed to launch or be recognized
    Setup,
    /// A bounded wait did not converge
    Timeout,
    /// The daemon reported a genuine error for an async call
    AsyncOperation,
    /// OS-visible state disagrees with what the daemon reports
    Verification,
    /// A daemon object index lagged behind; only ever seen before escalation
    TransientLookupMiss,
    /// The environment lacks a required capability
    Skipped,
    /// Harness bug or unexpected I/O problem
    Internal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Setup => write!(f, "setup failure"),
            Self::Timeout => write!(f, "timeout"),
            Self::AsyncOperation => write!(f, "async operation failure"),
            Self::Verification => write!(f, "verification failure"),
            Self::TransientLookupMiss => write!(f, "lookup miss"),
            Self::Skipped => write!(f, "skipped"),
            Self::Internal => write!(f, "internal error"),
        }
    }
}

/// Main error type for the harness
#[derive(Error, Debug)]
pub enum Error {
    // === Setup Errors ===
    #[error("Daemon failed to start: {0}")]
    DaemonStartFailed(String),

    #[error("Emulated peer failed to start: {0}")]
    PeerStartFailed(String),

    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Command '{command}' failed with exit code {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Could not determine {role} device '{interface}'. Daemon reports: {known}")]
    DeviceMissing {
        role: String,
        interface: String,
        known: String,
    },

    #[error("Device '{interface}' has unexpected {property}: expected {expected}, got {actual}")]
    DeviceMismatch {
        interface: String,
        property: String,
        expected: String,
        actual: String,
    },

    #[error("Could not find the profile for session {session} after {attempts} attempts")]
    ProfileNotFound { session: String, attempts: u32 },

    // === Wait Errors ===
    #[error("Timed out after {secs:.1}s {intent}. Last observed: {observed}")]
    Timeout {
        intent: String,
        secs: f64,
        observed: String,
    },

    // === Async Operation Errors ===
    #[error("{operation} failed: {message}")]
    AsyncOperation { operation: String, message: String },

    // === Verification Errors ===
    #[error("Interface '{interface}' state mismatch: {message}\n--- observed ---\n{observed}")]
    Verification {
        interface: String,
        message: String,
        observed: String,
    },

    #[error("Scenario assertion failed: {0}")]
    Assertion(String),

    #[error("Profile check failed: {0}")]
    Profile(#[from] ProfileError),

    // === Environment Errors ===
    #[error("Skipped: {0}")]
    Unsupported(String),

    #[error("This harness needs to be run as root")]
    NotRoot,

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Unknown scenario '{0}'. Use 'nm-harness list' to see available scenarios")]
    UnknownScenario(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Service Errors ===
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("D-Bus error: {0}")]
    Dbus(#[from] zbus::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a timeout error for a named wait
    pub fn timeout(intent: &str, waited: std::time::Duration, observed: impl Into<String>) -> Self {
        Self::Timeout {
            intent: intent.to_string(),
            secs: waited.as_secs_f64(),
            observed: observed.into(),
        }
    }

    /// Create a device property mismatch error
    pub fn device_mismatch(
        interface: &str,
        property: &str,
        expected: impl std::fmt::Display,
        actual: impl std::fmt::Display,
    ) -> Self {
        Self::DeviceMismatch {
            interface: interface.to_string(),
            property: property.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Create a verification error carrying the raw introspection output
    pub fn verification(interface: &str, message: impl Into<String>, observed: &str) -> Self {
        Self::Verification {
            interface: interface.to_string(),
            message: message.into(),
            observed: observed.trim_end().to_string(),
        }
    }

    /// Create an async operation failure
    pub fn async_failed(operation: &str, message: impl Into<String>) -> Self {
        Self::AsyncOperation {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    /// Map this error onto the failure category reported for the scenario
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::DaemonStartFailed(_)
            | Self::PeerStartFailed(_)
            | Self::Spawn { .. }
            | Self::CommandFailed { .. }
            | Self::DeviceMissing { .. }
            | Self::DeviceMismatch { .. }
            | Self::ProfileNotFound { .. } => FailureKind::Setup,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::AsyncOperation { .. } | Self::Service(_) | Self::Dbus(_) => {
                FailureKind::AsyncOperation
            }
            Self::Verification { .. } | Self::Assertion(_) | Self::Profile(_) => FailureKind::Verification,
            Self::Unsupported(_) => FailureKind::Skipped,
            _ => FailureKind::Internal,
        }
    }

    /// Whether the scenario should be reported as skipped rather than failed
    pub fn is_skip(&self) -> bool {
        self.kind() == FailureKind::Skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_profile_lookup_escalates_to_setup() {
        let err = Error::ProfileNotFound {
            session: "/org/freedesktop/NetworkManager/ActiveConnection/1".to_string(),
            attempts: 3,
        };
        assert_eq!(err.kind(), FailureKind::Setup);
    }

    #[test]
    fn test_timeout_message_names_intent_and_state() {
        let err = Error::timeout(
            "waiting for wlan1 to get activated",
            Duration::from_secs(60),
            "session 'fake net' activating",
        );
        let msg = err.to_string();
        assert!(msg.contains("waiting for wlan1 to get activated"));
        assert!(msg.contains("activating"));
        assert_eq!(err.kind(), FailureKind::Timeout);
    }

    #[test]
    fn test_unsupported_is_skip() {
        assert!(Error::Unsupported("no wireless support".into()).is_skip());
        assert!(!Error::Assertion("x".into()).is_skip());
    }
}
