//! Object model of the daemon under test, as seen through its API
//!
//! These are plain snapshots: the daemon stays the source of truth and the
//! harness only ever holds `ObjectId` handles to its objects.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque handle of a daemon object (a D-Bus object path for the real daemon)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(String);

impl ObjectId {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The daemon uses "/" for "no object"
    pub fn is_null(&self) -> bool {
        self.0.is_empty() || self.0 == "/"
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Device class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    Ethernet,
    Wifi,
    Veth,
    Other(u32),
}

impl DeviceKind {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::Ethernet,
            2 => Self::Wifi,
            20 => Self::Veth,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ethernet => write!(f, "ethernet"),
            Self::Wifi => write!(f, "wifi"),
            Self::Veth => write!(f, "veth"),
            Self::Other(raw) => write!(f, "type {}", raw),
        }
    }
}

/// Device state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceState {
    Unknown,
    Unmanaged,
    Unavailable,
    Disconnected,
    Prepare,
    Config,
    NeedAuth,
    IpConfig,
    IpCheck,
    Secondaries,
    Activated,
    Deactivating,
    Failed,
}

impl DeviceState {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            10 => Self::Unmanaged,
            20 => Self::Unavailable,
            30 => Self::Disconnected,
            40 => Self::Prepare,
            50 => Self::Config,
            60 => Self::NeedAuth,
            70 => Self::IpConfig,
            80 => Self::IpCheck,
            90 => Self::Secondaries,
            100 => Self::Activated,
            110 => Self::Deactivating,
            120 => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Unmanaged => "unmanaged",
            Self::Unavailable => "unavailable",
            Self::Disconnected => "disconnected",
            Self::Prepare => "prepare",
            Self::Config => "config",
            Self::NeedAuth => "need-auth",
            Self::IpConfig => "ip-config",
            Self::IpCheck => "ip-check",
            Self::Secondaries => "secondaries",
            Self::Activated => "activated",
            Self::Deactivating => "deactivating",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Active session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Unknown,
    Activating,
    Activated,
    Deactivating,
    Deactivated,
}

impl SessionState {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::Activating,
            2 => Self::Activated,
            3 => Self::Deactivating,
            4 => Self::Deactivated,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Activating => "activating",
            Self::Activated => "activated",
            Self::Deactivating => "deactivating",
            Self::Deactivated => "deactivated",
        };
        f.write_str(s)
    }
}

/// Operating mode advertised by a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerMode {
    Unknown,
    AdHoc,
    Infrastructure,
    AccessPoint,
    Mesh,
}

impl PeerMode {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::AdHoc,
            2 => Self::Infrastructure,
            3 => Self::AccessPoint,
            4 => Self::Mesh,
            _ => Self::Unknown,
        }
    }
}

/// A network interface known to the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: ObjectId,
    /// OS interface name
    pub interface: String,
    pub kind: DeviceKind,
    pub driver: String,
    pub hw_address: String,
    pub state: DeviceState,
    pub managed: bool,
    pub firmware_missing: bool,
    pub udi: String,
    /// Peers visible from this device (wireless only)
    pub access_points: Vec<ObjectId>,
    pub active_access_point: Option<ObjectId>,
    /// Saved profiles that could be activated on this device
    pub available_profiles: Vec<ObjectId>,
}

/// A discovered wireless peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessPointInfo {
    pub id: ObjectId,
    pub ssid: Vec<u8>,
    /// Kbit/s
    pub max_bitrate: u32,
    pub mode: PeerMode,
    pub hw_address: String,
}

impl AccessPointInfo {
    pub fn ssid_lossy(&self) -> String {
        String::from_utf8_lossy(&self.ssid).into_owned()
    }
}

/// Runtime binding of a profile to devices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: ObjectId,
    pub uuid: String,
    /// Human-readable profile name
    pub name: String,
    /// Saved profile this session instantiates
    pub profile: ObjectId,
    pub state: SessionState,
    pub devices: Vec<ObjectId>,
}

/// Name of the loopback session managed by recent daemons
pub const LOOPBACK_SESSION: &str = "lo";

/// Change notification published by the daemon
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    NetworkingEnabled(bool),
    DeviceAdded(DeviceInfo),
    DeviceRemoved(ObjectId),
    DeviceStateChanged {
        device: ObjectId,
        state: DeviceState,
    },
    AvailableProfilesChanged {
        device: ObjectId,
        profiles: Vec<ObjectId>,
    },
    ActiveAccessPointChanged {
        device: ObjectId,
        access_point: Option<ObjectId>,
    },
    AccessPointAdded {
        device: ObjectId,
        access_point: AccessPointInfo,
    },
    AccessPointRemoved {
        device: ObjectId,
        access_point: ObjectId,
    },
    SessionAdded(SessionInfo),
    SessionRemoved(ObjectId),
    SessionStateChanged {
        session: ObjectId,
        state: SessionState,
    },
}

/// Client-side view of everything the daemon publishes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub networking_enabled: bool,
    pub version: String,
    pub devices: BTreeMap<ObjectId, DeviceInfo>,
    pub access_points: BTreeMap<ObjectId, AccessPointInfo>,
    pub sessions: BTreeMap<ObjectId, SessionInfo>,
}

impl Snapshot {
    /// Apply one notification. Idempotent: re-adding replaces, removing a
    /// missing object is a no-op, changes to unknown objects are dropped.
    pub fn apply(&mut self, notification: Notification) {
        match notification {
            Notification::NetworkingEnabled(enabled) => self.networking_enabled = enabled,
            Notification::DeviceAdded(device) => {
                self.devices.insert(device.id.clone(), device);
            }
            Notification::DeviceRemoved(id) => {
                if let Some(device) = self.devices.remove(&id) {
                    for ap in device.access_points {
                        self.access_points.remove(&ap);
                    }
                }
            }
            Notification::DeviceStateChanged { device, state } => {
                if let Some(d) = self.devices.get_mut(&device) {
                    d.state = state;
                }
            }
            Notification::AvailableProfilesChanged { device, profiles } => {
                if let Some(d) = self.devices.get_mut(&device) {
                    d.available_profiles = profiles;
                }
            }
            Notification::ActiveAccessPointChanged {
                device,
                access_point,
            } => {
                if let Some(d) = self.devices.get_mut(&device) {
                    d.active_access_point = access_point.filter(|ap| !ap.is_null());
                }
            }
            Notification::AccessPointAdded {
                device,
                access_point,
            } => {
                if let Some(d) = self.devices.get_mut(&device) {
                    if !d.access_points.contains(&access_point.id) {
                        d.access_points.push(access_point.id.clone());
                    }
                    self.access_points
                        .insert(access_point.id.clone(), access_point);
                }
            }
            Notification::AccessPointRemoved {
                device,
                access_point,
            } => {
                if let Some(d) = self.devices.get_mut(&device) {
                    d.access_points.retain(|ap| ap != &access_point);
                }
                self.access_points.remove(&access_point);
            }
            Notification::SessionAdded(session) => {
                self.sessions.insert(session.id.clone(), session);
            }
            Notification::SessionRemoved(id) => {
                self.sessions.remove(&id);
            }
            Notification::SessionStateChanged { session, state } => {
                if let Some(s) = self.sessions.get_mut(&session) {
                    s.state = state;
                }
            }
        }
    }

    pub fn device(&self, id: &ObjectId) -> Option<&DeviceInfo> {
        self.devices.get(id)
    }

    pub fn device_by_interface(&self, interface: &str) -> Option<&DeviceInfo> {
        self.devices.values().find(|d| d.interface == interface)
    }

    pub fn session(&self, id: &ObjectId) -> Option<&SessionInfo> {
        self.sessions.get(id)
    }

    /// Active sessions, ignoring the loopback session
    pub fn user_sessions(&self) -> Vec<&SessionInfo> {
        self.sessions
            .values()
            .filter(|s| s.name != LOOPBACK_SESSION)
            .collect()
    }

    /// Peers visible from a device, in discovery order
    pub fn access_points_of(&self, device: &ObjectId) -> Vec<&AccessPointInfo> {
        self.devices
            .get(device)
            .map(|d| {
                d.access_points
                    .iter()
                    .filter_map(|id| self.access_points.get(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// One-line description of devices and sessions for failure reports
    pub fn summary(&self) -> String {
        let devices: Vec<String> = self
            .devices
            .values()
            .map(|d| format!("{}={}", d.interface, d.state))
            .collect();
        let sessions: Vec<String> = self
            .sessions
            .values()
            .map(|s| format!("'{}'={}", s.name, s.state))
            .collect();
        format!(
            "networking={} devices=[{}] sessions=[{}]",
            if self.networking_enabled { "on" } else { "off" },
            devices.join(", "),
            sessions.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn device(id: &str, iface: &str) -> DeviceInfo {
        DeviceInfo {
            id: ObjectId::new(id),
            interface: iface.to_string(),
            kind: DeviceKind::Wifi,
            driver: "mac80211_hwsim".to_string(),
            hw_address: "02:00:00:00:01:00".to_string(),
            state: DeviceState::Disconnected,
            managed: true,
            firmware_missing: false,
            udi: "/sys/devices/virtual/mac80211_hwsim/hwsim1/net/wlan1".to_string(),
            access_points: Vec::new(),
            active_access_point: None,
            available_profiles: Vec::new(),
        }
    }

    fn access_point(id: &str) -> AccessPointInfo {
        AccessPointInfo {
            id: ObjectId::new(id),
            ssid: b"fake net".to_vec(),
            max_bitrate: 11000,
            mode: PeerMode::Infrastructure,
            hw_address: "02:00:00:00:00:00".to_string(),
        }
    }

    #[test]
    fn test_raw_state_mapping() {
        assert_eq!(DeviceState::from_raw(100), DeviceState::Activated);
        assert_eq!(DeviceState::from_raw(10), DeviceState::Unmanaged);
        assert_eq!(DeviceState::from_raw(7), DeviceState::Unknown);
        assert_eq!(SessionState::from_raw(2), SessionState::Activated);
        assert_eq!(DeviceKind::from_raw(20), DeviceKind::Veth);
        assert_eq!(PeerMode::from_raw(2), PeerMode::Infrastructure);
    }

    #[test]
    fn test_apply_is_idempotent() {
        let mut snap = Snapshot::default();
        let dev = device("/dev/1", "wlan1");
        snap.apply(Notification::DeviceAdded(dev.clone()));
        snap.apply(Notification::DeviceAdded(dev));
        assert_eq!(snap.devices.len(), 1);

        let added = Notification::AccessPointAdded {
            device: ObjectId::new("/dev/1"),
            access_point: access_point("/ap/1"),
        };
        snap.apply(added.clone());
        snap.apply(added);
        assert_eq!(snap.access_points_of(&ObjectId::new("/dev/1")).len(), 1);

        snap.apply(Notification::SessionRemoved(ObjectId::new("/missing")));
        snap.apply(Notification::DeviceStateChanged {
            device: ObjectId::new("/missing"),
            state: DeviceState::Activated,
        });
        assert!(snap.sessions.is_empty());
    }

    #[test]
    fn test_removing_device_drops_its_access_points() {
        let mut snap = Snapshot::default();
        snap.apply(Notification::DeviceAdded(device("/dev/1", "wlan1")));
        snap.apply(Notification::AccessPointAdded {
            device: ObjectId::new("/dev/1"),
            access_point: access_point("/ap/1"),
        });
        snap.apply(Notification::DeviceRemoved(ObjectId::new("/dev/1")));
        assert!(snap.access_points.is_empty());
    }

    #[test]
    fn test_null_active_access_point_is_none() {
        let mut snap = Snapshot::default();
        snap.apply(Notification::DeviceAdded(device("/dev/1", "wlan1")));
        snap.apply(Notification::ActiveAccessPointChanged {
            device: ObjectId::new("/dev/1"),
            access_point: Some(ObjectId::new("/")),
        });
        assert_eq!(snap.devices[&ObjectId::new("/dev/1")].active_access_point, None);
    }

    #[test]
    fn test_user_sessions_skip_loopback() {
        let mut snap = Snapshot::default();
        for (id, name) in [("/a/1", "lo"), ("/a/2", "fake net")] {
            snap.apply(Notification::SessionAdded(SessionInfo {
                id: ObjectId::new(id),
                uuid: id.to_string(),
                name: name.to_string(),
                profile: ObjectId::new("/s/1"),
                state: SessionState::Activated,
                devices: Vec::new(),
            }));
        }
        let user = snap.user_sessions();
        assert_eq!(user.len(), 1);
        assert_eq!(user[0].name, "fake net");
        assert!(snap.summary().contains("'fake net'=activated"));
    }
}
