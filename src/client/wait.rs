//! Eventual-condition waiter
//!
//! The one place scenario code is allowed to sleep while watching daemon
//! state. Every wait pumps pending notifications before each evaluation and
//! carries an intent that ends up in the timeout message.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use super::pump::EventPump;
use crate::common::{Error, Result};
use crate::service::Snapshot;

#[derive(Debug, Clone, Copy)]
pub struct Waiter {
    poll_interval: Duration,
}

impl Waiter {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Wait until `predicate` holds on the pumped snapshot
    ///
    /// Returns without sleeping when the predicate already holds.
    pub async fn until<F>(
        &self,
        pump: &mut EventPump,
        timeout: Duration,
        intent: &str,
        mut predicate: F,
    ) -> Result<()>
    where
        F: FnMut(&Snapshot) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            pump.pump_pending();
            if predicate(pump.snapshot()) {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::debug!(intent, timeout_secs = timeout.as_secs_f64(), "Wait timed out");
                return Err(Error::timeout(intent, timeout, pump.snapshot().summary()));
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Wait for OS-side readiness that the daemon does not publish
    ///
    /// `ready` yields the value once ready, or a description of what it saw
    /// so far, which becomes the observed state on timeout.
    pub async fn until_ready<T, F, Fut>(
        &self,
        timeout: Duration,
        intent: &str,
        mut ready: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, String>>,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let observed = match ready().await {
                Ok(value) => return Ok(value),
                Err(observed) => observed,
            };
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::timeout(intent, timeout, observed));
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::FailureKind;
    use crate::service::Notification;
    use tokio::sync::mpsc;

    fn waiter() -> Waiter {
        Waiter::new(Duration::from_millis(100))
    }

    #[tokio::test(start_paused = true)]
    async fn test_true_predicate_returns_without_sleeping() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let mut pump = EventPump::new(rx, Snapshot::default());
        let start = Instant::now();
        waiter()
            .until(&mut pump, Duration::from_secs(10), "checking nothing", |_| true)
            .await
            .unwrap();
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_notification() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut pump = EventPump::new(rx, Snapshot::default());
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(750)).await;
            let _ = tx.send(Notification::NetworkingEnabled(true));
        });
        let start = Instant::now();
        waiter()
            .until(&mut pump, Duration::from_secs(2), "waiting for networking", |s| {
                s.networking_enabled
            })
            .await
            .unwrap();
        let waited = Instant::now() - start;
        assert!(waited >= Duration::from_millis(750));
        assert!(waited <= Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reports_intent_and_last_state() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let mut pump = EventPump::new(rx, Snapshot::default());
        let err = waiter()
            .until(&mut pump, Duration::from_secs(2), "waiting for networking", |s| {
                s.networking_enabled
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Timeout);
        let msg = err.to_string();
        assert!(msg.contains("waiting for networking"));
        assert!(msg.contains("networking=off"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_until_ready_keeps_last_observation() {
        let mut attempts = 0;
        let err = waiter()
            .until_ready(Duration::from_secs(1), "waiting for wlan0", || {
                attempts += 1;
                let seen = format!("attempt {}", attempts);
                async move { Err::<(), _>(seen) }
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("attempt 11"));

        let value = waiter()
            .until_ready(Duration::from_secs(1), "ready", || async { Ok::<_, String>(5) })
            .await
            .unwrap();
        assert_eq!(value, 5);
    }
}
