//! Synchronous-looking view of an event-driven daemon
//!
//! A [`Client`] owns the notification stream of a [`NetworkService`] and the
//! snapshot it feeds. Scenario code observes state only through
//! [`Client::wait_until`] and runs lifecycle calls only through
//! [`Client::add_and_activate`], which are the two points where it suspends.

pub mod bridge;
pub mod pump;
pub mod wait;

use std::sync::Arc;
use std::time::Duration;

pub use bridge::{AsyncBridge, Outcome};
pub use pump::EventPump;
pub use wait::Waiter;

use crate::common::config::Timeouts;
use crate::common::{Error, Result};
use crate::profile::ConnectionProfile;
use crate::service::{ActivationRequest, NetworkService, ObjectId, ServiceError, Snapshot};

pub struct Client<S: NetworkService> {
    service: Arc<S>,
    pump: EventPump,
    waiter: Waiter,
    bridge: AsyncBridge,
}

impl<S: NetworkService> Client<S> {
    /// Subscribe to `service` and take the initial snapshot
    pub async fn attach(service: Arc<S>, timeouts: &Timeouts) -> Result<Self> {
        let rx = service
            .subscribe()
            .ok_or_else(|| Error::Internal("service notifications already taken".into()))?;
        let snapshot = service.snapshot().await?;
        tracing::debug!(version = %snapshot.version, devices = snapshot.devices.len(), "Attached");
        Ok(Self {
            service,
            pump: EventPump::new(rx, snapshot),
            waiter: Waiter::new(timeouts.poll_interval()),
            bridge: AsyncBridge::new(
                timeouts.poll_interval(),
                Timeouts::secs(timeouts.cancel_ack),
            ),
        })
    }

    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    pub fn waiter(&self) -> Waiter {
        self.waiter
    }

    /// Dispatch queued notifications without waiting for new ones
    pub fn pump_pending(&mut self) -> usize {
        self.pump.pump_pending()
    }

    /// Current state, after dispatching anything queued
    pub fn snapshot(&mut self) -> &Snapshot {
        self.pump.pump_pending();
        self.pump.snapshot()
    }

    pub async fn wait_until<F>(&mut self, timeout: Duration, intent: &str, predicate: F) -> Result<()>
    where
        F: FnMut(&Snapshot) -> bool,
    {
        self.waiter
            .until(&mut self.pump, timeout, intent, predicate)
            .await
    }

    /// Create-and-activate through the async bridge
    pub async fn add_and_activate(
        &mut self,
        request: ActivationRequest,
        timeout: Duration,
    ) -> Result<Outcome<ObjectId>> {
        let service = Arc::clone(&self.service);
        self.bridge
            .run_async(&mut self.pump, "add_and_activate_connection", timeout, move |cancel| {
                async move { service.add_and_activate(request, cancel).await }
            })
            .await
    }

    pub async fn deactivate(&self, session: &ObjectId) -> Result<()> {
        self.service.deactivate(session).await?;
        Ok(())
    }

    pub async fn profile(&self, id: &ObjectId) -> std::result::Result<ConnectionProfile, ServiceError> {
        self.service.profile(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::AddressingMode;
    use crate::service::SessionState;
    use crate::testing::{sample_interfaces, SimulatedNetwork, SimulationConfig, WIRED_PROFILE_NAME};
    use crate::world::DaemonOptions;
    use tokio::time::Instant;

    fn wired_session_activated(snapshot: &Snapshot) -> bool {
        snapshot
            .user_sessions()
            .iter()
            .any(|s| s.name == WIRED_PROFILE_NAME && s.state == SessionState::Activated)
    }

    #[tokio::test(start_paused = true)]
    async fn test_changes_between_attach_and_first_pump_are_kept() {
        let net = Arc::new(SimulatedNetwork::new(
            SimulationConfig::default(),
            &sample_interfaces(),
            "fake net",
        ));
        net.boot(DaemonOptions {
            auto_connect: true,
            session_manager_mock: false,
        });
        let mut client = Client::attach(Arc::clone(&net), &Timeouts::default())
            .await
            .unwrap();
        assert!(client.pump.snapshot().user_sessions().is_empty());

        // The session appears and activates while nothing is pumped
        net.start_router(AddressingMode::Ipv4);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(wired_session_activated(&net.state()));
        assert!(!wired_session_activated(client.pump.snapshot()));

        let start = Instant::now();
        client
            .wait_until(
                Duration::from_secs(1),
                "waiting for the wired session",
                wired_session_activated,
            )
            .await
            .unwrap();
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_twice_fails() {
        let net = Arc::new(SimulatedNetwork::new(
            SimulationConfig::default(),
            &sample_interfaces(),
            "fake net",
        ));
        net.boot(DaemonOptions::default());
        let _first = Client::attach(Arc::clone(&net), &Timeouts::default())
            .await
            .unwrap();
        let second = Client::attach(net, &Timeouts::default()).await;
        assert!(matches!(second, Err(Error::Internal(_))));
    }
}
