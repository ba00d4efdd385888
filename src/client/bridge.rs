//! Async operation bridge
//!
//! Turns a one-shot asynchronous daemon call into a single awaited step with
//! a timeout. The call runs as its own task while the bridge keeps pumping
//! notifications; completion and timer race for a single resolve-once flag,
//! so exactly one outcome is ever reported. On timeout the call is cancelled
//! cooperatively and the bridge waits for it to acknowledge before returning.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use super::pump::EventPump;
use crate::common::{Error, Result};
use crate::service::{cancel_pair, CancelSignal, ServiceError};

/// How an operation ended, from the caller's point of view
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Completed(T),
    /// The operation was cancelled, by the bridge's timer or otherwise.
    /// `acknowledged` is false when it had to be aborted after ignoring the
    /// cancellation request.
    Cancelled { acknowledged: bool },
}

/// Single-assignment completion slot
struct Completion<T> {
    resolved: AtomicBool,
    slot: Mutex<Option<std::result::Result<T, ServiceError>>>,
    ready: Notify,
}

impl<T> Completion<T> {
    fn new() -> Self {
        Self {
            resolved: AtomicBool::new(false),
            slot: Mutex::new(None),
            ready: Notify::new(),
        }
    }

    /// Claim the flag for `result`; false if an outcome was already decided
    fn resolve(&self, result: std::result::Result<T, ServiceError>) -> bool {
        if self.resolved.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(result);
        }
        self.ready.notify_one();
        true
    }

    /// Claim the flag for the timer; false if the operation got there first
    fn claim_timeout(&self) -> bool {
        !self.resolved.swap(true, Ordering::AcqRel)
    }

    fn take(&self) -> Option<std::result::Result<T, ServiceError>> {
        self.slot.lock().ok()?.take()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AsyncBridge {
    poll_interval: Duration,
    ack_timeout: Duration,
}

impl AsyncBridge {
    /// `ack_timeout` bounds how long a cancelled operation may take to
    /// acknowledge before it is aborted
    pub fn new(poll_interval: Duration, ack_timeout: Duration) -> Self {
        Self {
            poll_interval,
            ack_timeout,
        }
    }

    /// Run `operation` to completion or until `timeout` elapses
    ///
    /// A genuine error reported by the operation fails with
    /// [`Error::AsyncOperation`]. The operation's own cancellation error is
    /// an expected outcome and maps to [`Outcome::Cancelled`].
    pub async fn run_async<T, F, Fut>(
        &self,
        pump: &mut EventPump,
        name: &str,
        timeout: Duration,
        operation: F,
    ) -> Result<Outcome<T>>
    where
        T: Send + 'static,
        F: FnOnce(CancelSignal) -> Fut,
        Fut: Future<Output = std::result::Result<T, ServiceError>> + Send + 'static,
    {
        let completion = Arc::new(Completion::new());
        let (cancel, signal) = cancel_pair();

        let task_completion = Arc::clone(&completion);
        let task_name = name.to_string();
        let fut = operation(signal);
        let mut task = tokio::spawn(async move {
            let result = fut.await;
            if !task_completion.resolve(result) {
                tracing::debug!(operation = %task_name, "Ignoring completion after timeout");
            }
        });

        tracing::debug!(operation = name, timeout_secs = timeout.as_secs_f64(), "Started");
        let deadline = Instant::now() + timeout;
        loop {
            pump.pump_pending();
            tokio::select! {
                biased;
                _ = completion.ready.notified() => {
                    if let Some(result) = completion.take() {
                        return match result {
                            Ok(value) => Ok(Outcome::Completed(value)),
                            Err(ServiceError::Cancelled) => {
                                tracing::debug!(operation = name, "Operation reported cancellation");
                                Ok(Outcome::Cancelled { acknowledged: true })
                            }
                            Err(e) => Err(Error::async_failed(name, e.to_string())),
                        };
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    if !completion.claim_timeout() {
                        // The operation resolved first; its result is on the way
                        continue;
                    }
                    tracing::warn!(operation = name, "Timed out, cancelling");
                    cancel.cancel();
                    let acknowledged =
                        match tokio::time::timeout(self.ack_timeout, &mut task).await {
                            Ok(_) => true,
                            Err(_) => {
                                tracing::warn!(operation = name, "Cancellation not acknowledged, aborting");
                                task.abort();
                                false
                            }
                        };
                    pump.pump_pending();
                    return Ok(Outcome::Cancelled { acknowledged });
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}
