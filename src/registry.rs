//! Device and session registry
//!
//! Maps scenario roles onto daemon devices, checking hardware identity on
//! the way, and resolves an active session back to its saved profile.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::client::Client;
use crate::common::config::Timeouts;
use crate::common::{normalize_mac, Error, FailureKind, Result};
use crate::profile::ConnectionProfile;
use crate::service::{DeviceKind, NetworkService, ObjectId, ServiceError, Snapshot};

/// Part a device plays in a scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    WifiClient,
    WifiAccessPoint,
    EthernetClient,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WifiClient => write!(f, "wifi client"),
            Self::WifiAccessPoint => write!(f, "wifi AP"),
            Self::EthernetClient => write!(f, "eth client"),
        }
    }
}

/// What the hardware address of a device must look like
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HwExpectation {
    Exact(String),
    /// The daemon may randomize the address; it just must not collide
    NotEqual(String),
    Any,
}

/// Identity a daemon device must have to fill a role
#[derive(Debug, Clone)]
pub struct ExpectedDevice {
    pub role: Role,
    pub interface: String,
    pub kind: DeviceKind,
    pub driver: String,
    pub hw: HwExpectation,
}

/// Devices resolved by role
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: BTreeMap<Role, (ObjectId, String)>,
}

impl DeviceRegistry {
    pub fn get(&self, role: Role) -> Result<&ObjectId> {
        self.devices
            .get(&role)
            .map(|(id, _)| id)
            .ok_or_else(|| Error::Internal(format!("no {} device resolved", role)))
    }

    pub fn interface(&self, role: Role) -> Option<&str> {
        self.devices.get(&role).map(|(_, iface)| iface.as_str())
    }

    pub fn roles(&self) -> impl Iterator<Item = Role> + '_ {
        self.devices.keys().copied()
    }
}

/// Whether every expected interface has shown up in the daemon
pub fn all_present(snapshot: &Snapshot, expected: &[ExpectedDevice]) -> bool {
    expected
        .iter()
        .all(|e| snapshot.device_by_interface(&e.interface).is_some())
}

/// Match expected devices to daemon devices by interface name
///
/// Fails on the first missing device or identity mismatch; this is a setup
/// failure and is never retried.
pub fn resolve_devices(snapshot: &Snapshot, expected: &[ExpectedDevice]) -> Result<DeviceRegistry> {
    let mut registry = DeviceRegistry::default();
    for want in expected {
        let device = snapshot
            .device_by_interface(&want.interface)
            .ok_or_else(|| Error::DeviceMissing {
                role: want.role.to_string(),
                interface: want.interface.clone(),
                known: snapshot
                    .devices
                    .values()
                    .map(|d| d.interface.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            })?;

        if device.kind != want.kind {
            return Err(Error::device_mismatch(
                &want.interface,
                "device type",
                want.kind,
                device.kind,
            ));
        }
        if device.driver != want.driver {
            return Err(Error::device_mismatch(
                &want.interface,
                "driver",
                &want.driver,
                &device.driver,
            ));
        }
        let actual = normalize_mac(&device.hw_address);
        match &want.hw {
            HwExpectation::Exact(mac) if normalize_mac(mac) != actual => {
                return Err(Error::device_mismatch(
                    &want.interface,
                    "hardware address",
                    mac,
                    &device.hw_address,
                ));
            }
            HwExpectation::NotEqual(mac) if normalize_mac(mac) == actual => {
                return Err(Error::device_mismatch(
                    &want.interface,
                    "hardware address",
                    format!("anything but {}", mac),
                    &device.hw_address,
                ));
            }
            _ => {}
        }

        tracing::debug!(role = %want.role, iface = %want.interface, device = %device.id, "Resolved device");
        registry
            .devices
            .insert(want.role, (device.id.clone(), want.interface.clone()));
    }
    Ok(registry)
}

/// Find the saved profile behind an active session
///
/// The daemon can publish the session before the profile shows up in its
/// devices' available profiles, so this retries a fixed number of times with
/// a short delay before giving up.
pub async fn resolve_active_profile<S: NetworkService>(
    client: &mut Client<S>,
    session: &ObjectId,
    timeouts: &Timeouts,
) -> Result<(ObjectId, ConnectionProfile)> {
    let attempts = timeouts.profile_retry_attempts.max(1);
    for attempt in 1..=attempts {
        let candidate = {
            let snapshot = client.snapshot();
            snapshot.session(session).and_then(|s| {
                let published = s
                    .devices
                    .iter()
                    .filter_map(|d| snapshot.device(d))
                    .any(|d| d.available_profiles.contains(&s.profile));
                published.then(|| s.profile.clone())
            })
        };

        if let Some(path) = candidate {
            match client.profile(&path).await {
                Ok(profile) => return Ok((path, profile)),
                Err(ServiceError::ObjectMissing(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        tracing::debug!(
            %session,
            attempt,
            kind = %FailureKind::TransientLookupMiss,
            "Profile not published yet"
        );
        if attempt < attempts {
            tokio::time::sleep(timeouts.profile_retry_delay()).await;
        }
    }
    Err(Error::ProfileNotFound {
        session: session.to_string(),
        attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::AddressingMode;
    use crate::service::{DeviceInfo, DeviceState, Notification, SessionState};
    use crate::testing::{sample_interfaces, SimulatedNetwork, SimulationConfig, WIRED_PROFILE_NAME};
    use crate::world::DaemonOptions;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    fn device(id: &str, iface: &str, kind: DeviceKind, driver: &str, mac: &str) -> DeviceInfo {
        DeviceInfo {
            id: ObjectId::new(id),
            interface: iface.into(),
            kind,
            driver: driver.into(),
            hw_address: mac.into(),
            state: DeviceState::Disconnected,
            managed: true,
            firmware_missing: false,
            udi: format!("/sys/devices/virtual/net/{}", iface),
            access_points: Vec::new(),
            active_access_point: None,
            available_profiles: Vec::new(),
        }
    }

    fn snapshot() -> Snapshot {
        let mut snap = Snapshot::default();
        for d in [
            device("/d/1", "wlan0", DeviceKind::Wifi, "mac80211_hwsim", "02:00:00:00:00:00"),
            device("/d/2", "wlan1", DeviceKind::Wifi, "mac80211_hwsim", "7E:11:22:33:44:55"),
            device("/d/3", "eth42", DeviceKind::Veth, "veth", "aa:bb:cc:dd:ee:ff"),
        ] {
            snap.apply(Notification::DeviceAdded(d));
        }
        snap
    }

    fn expected() -> Vec<ExpectedDevice> {
        vec![
            ExpectedDevice {
                role: Role::WifiAccessPoint,
                interface: "wlan0".into(),
                kind: DeviceKind::Wifi,
                driver: "mac80211_hwsim".into(),
                hw: HwExpectation::Exact("02:00:00:00:00:00".into()),
            },
            ExpectedDevice {
                role: Role::WifiClient,
                interface: "wlan1".into(),
                kind: DeviceKind::Wifi,
                driver: "mac80211_hwsim".into(),
                hw: HwExpectation::NotEqual("02:00:00:00:00:00".into()),
            },
            ExpectedDevice {
                role: Role::EthernetClient,
                interface: "eth42".into(),
                kind: DeviceKind::Veth,
                driver: "veth".into(),
                hw: HwExpectation::Exact("AA:BB:CC:DD:EE:FF".into()),
            },
        ]
    }

    #[test]
    fn test_resolves_all_roles() {
        let registry = resolve_devices(&snapshot(), &expected()).unwrap();
        assert_eq!(registry.get(Role::WifiClient).unwrap(), &ObjectId::new("/d/2"));
        assert_eq!(registry.interface(Role::EthernetClient), Some("eth42"));
        assert_eq!(registry.roles().count(), 3);
    }

    #[test]
    fn test_missing_device_is_setup_failure() {
        let mut want = expected();
        want[2].interface = "eth99".into();
        let err = resolve_devices(&snapshot(), &want).unwrap_err();
        assert_eq!(err.kind(), FailureKind::Setup);
        assert!(err.to_string().contains("eth99"));
        assert!(err.to_string().contains("wlan1"));
        assert!(!all_present(&snapshot(), &want));
    }

    #[test]
    fn test_client_sharing_ap_address_is_rejected() {
        let mut snap = snapshot();
        snap.apply(Notification::DeviceAdded(device(
            "/d/2",
            "wlan1",
            DeviceKind::Wifi,
            "mac80211_hwsim",
            "02:00:00:00:00:00",
        )));
        let err = resolve_devices(&snap, &expected()).unwrap_err();
        assert!(matches!(err, Error::DeviceMismatch { ref property, .. } if property == "hardware address"));
    }

    #[test]
    fn test_wrong_driver_is_rejected() {
        let mut want = expected();
        want[2].driver = "e1000".into();
        let err = resolve_devices(&snapshot(), &want).unwrap_err();
        assert!(err.to_string().contains("driver"));
    }

    fn retry_timeouts() -> Timeouts {
        Timeouts {
            profile_retry_attempts: 3,
            profile_retry_delay_ms: 100,
            ..Timeouts::default()
        }
    }

    /// Auto-connected wired session whose profile shows up `profile_lag` late
    async fn wired_session(profile_lag: Duration) -> (Client<SimulatedNetwork>, ObjectId) {
        let net = Arc::new(SimulatedNetwork::new(
            SimulationConfig {
                profile_lag,
                ..SimulationConfig::default()
            },
            &sample_interfaces(),
            "fake net",
        ));
        net.boot(DaemonOptions {
            auto_connect: true,
            session_manager_mock: false,
        });
        net.start_router(AddressingMode::Ipv4);
        let mut client = Client::attach(net, &Timeouts::default()).await.unwrap();
        client
            .wait_until(Duration::from_secs(10), "waiting for the wired session", |s| {
                !s.user_sessions().is_empty()
            })
            .await
            .unwrap();
        let session = client.snapshot().user_sessions()[0].id.clone();
        (client, session)
    }

    #[tokio::test(start_paused = true)]
    async fn test_published_profile_resolves_without_retry() {
        let (mut client, session) = wired_session(Duration::from_millis(50)).await;
        client
            .wait_until(Duration::from_secs(10), "waiting for activation", |s| {
                s.session(&session).map(|s| s.state) == Some(SessionState::Activated)
            })
            .await
            .unwrap();

        let start = Instant::now();
        let (_, profile) = resolve_active_profile(&mut client, &session, &retry_timeouts())
            .await
            .unwrap();
        assert_eq!(Instant::now(), start);
        assert_eq!(profile.id, WIRED_PROFILE_NAME);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_profile_is_found_on_a_later_attempt() {
        let (mut client, session) = wired_session(Duration::from_millis(150)).await;

        let start = Instant::now();
        let (_, profile) = resolve_active_profile(&mut client, &session, &retry_timeouts())
            .await
            .unwrap();
        let waited = Instant::now() - start;
        assert!(waited >= Duration::from_millis(100), "{:?}", waited);
        assert!(waited <= Duration::from_millis(200), "{:?}", waited);
        assert_eq!(profile.id, WIRED_PROFILE_NAME);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_are_a_setup_failure() {
        let (mut client, session) = wired_session(Duration::from_secs(60)).await;

        let start = Instant::now();
        let err = resolve_active_profile(&mut client, &session, &retry_timeouts())
            .await
            .unwrap_err();
        // Two delays between three attempts
        assert_eq!(Instant::now() - start, Duration::from_millis(200));
        assert!(matches!(err, Error::ProfileNotFound { attempts: 3, .. }));
        assert_eq!(err.kind(), FailureKind::Setup);
        assert_ne!(err.kind(), FailureKind::Timeout);
        assert!(err.to_string().contains("after 3 attempts"));
    }
}
