//! The daemon under test, as a capability set
//!
//! The harness only reads published state, watches change notifications and
//! issues the two lifecycle calls (create-and-activate, deactivate). Anything
//! offering those through [`NetworkService`] can be driven by the scenario
//! engine: the D-Bus backend in [`nm`] or the in-memory simulator used by the
//! test suite.

pub mod nm;
mod proxies;
mod types;

use std::future::Future;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::profile::{ConnectionProfile, ProfileError};

pub use types::*;

/// Error name the daemon uses for a cancelled call
pub const CANCELLED_ERROR: &str = "org.freedesktop.NetworkManager.Cancelled";

/// Errors reported by a service backend
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    /// The operation observed its cancellation signal and gave up
    #[error("Operation was cancelled")]
    Cancelled,

    /// The daemon rejected the call
    #[error("{message} ({name})")]
    Daemon { name: String, message: String },

    #[error("Object {0} does not exist")]
    ObjectMissing(ObjectId),

    #[error("Invalid profile: {0}")]
    InvalidProfile(#[from] ProfileError),

    #[error("{0}")]
    Bus(String),
}

impl From<zbus::Error> for ServiceError {
    fn from(e: zbus::Error) -> Self {
        match e {
            zbus::Error::MethodError(name, message, _) => {
                let name = name.to_string();
                if name == CANCELLED_ERROR {
                    Self::Cancelled
                } else {
                    Self::Daemon {
                        name,
                        message: message.unwrap_or_default(),
                    }
                }
            }
            other => Self::Bus(other.to_string()),
        }
    }
}

impl From<zbus::fdo::Error> for ServiceError {
    fn from(e: zbus::fdo::Error) -> Self {
        Self::Bus(e.to_string())
    }
}

/// Cancellation side of an in-flight operation
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Cancellation signal observed by an in-flight operation
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        let (_, signal) = cancel_pair();
        signal
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation was requested
    ///
    /// Pends forever if the handle is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Run `fut` until it completes or cancellation is requested
    ///
    /// On cancellation the future is dropped, which is how an in-flight
    /// D-Bus call gets abandoned, and the operation resolves with
    /// [`ServiceError::Cancelled`].
    pub async fn guard<T, F>(&mut self, fut: F) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, ServiceError>>,
    {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(ServiceError::Cancelled),
            result = fut => result,
        }
    }
}

/// Create a connected cancellation handle and signal
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

/// Arguments of the create-and-activate call
#[derive(Debug, Clone)]
pub struct ActivationRequest {
    pub profile: ConnectionProfile,
    pub device: ObjectId,
    /// Peer to join, for wireless links
    pub specific_object: Option<ObjectId>,
}

/// Capability set of the daemon under test
#[async_trait]
pub trait NetworkService: Send + Sync + 'static {
    /// Take the change notification stream (can only be called once)
    fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<Notification>>;

    /// Full current state
    async fn snapshot(&self) -> Result<Snapshot, ServiceError>;

    /// Create a profile and activate it, returning the new active session
    async fn add_and_activate(
        &self,
        request: ActivationRequest,
        cancel: CancelSignal,
    ) -> Result<ObjectId, ServiceError>;

    async fn deactivate(&self, session: &ObjectId) -> Result<(), ServiceError>;

    /// Settings of a saved profile, without secrets
    async fn profile(&self, id: &ObjectId) -> Result<ConnectionProfile, ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_guard_returns_cancelled_once_signalled() {
        let (handle, mut signal) = cancel_pair();
        handle.cancel();
        let result: Result<(), _> = signal
            .guard(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
            .await;
        assert_eq!(result, Err(ServiceError::Cancelled));
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_guard_passes_through_result() {
        let mut signal = CancelSignal::never();
        let result = signal.guard(async { Ok::<_, ServiceError>(7) }).await;
        assert_eq!(result, Ok(7));
        assert!(!signal.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_handle_never_cancels() {
        let (handle, mut signal) = cancel_pair();
        drop(handle);
        let waited = tokio::time::timeout(Duration::from_secs(5), signal.cancelled()).await;
        assert!(waited.is_err());
    }
}
