//! In-memory daemon
//!
//! [`SimulatedNetwork`] implements [`NetworkService`] on tokio timers. It
//! models just enough of the daemon for the scenario pipeline: devices with a
//! state machine, peers that get discovered, sessions that activate or get
//! rejected, and interface addresses for the link introspector.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::profile::{
    AddressingMode, Authentication, ConnectionProfile, Ip6Privacy, Ipv4Method, Ipv6Method,
    LinkKind, RouterMode,
};
use crate::scenario::{AccessPointConfig, ApSecurity};
use crate::service::{
    ActivationRequest, AccessPointInfo, CancelSignal, DeviceInfo, DeviceKind, DeviceState,
    NetworkService, Notification, ObjectId, PeerMode, ServiceError, SessionInfo, SessionState,
    Snapshot, LOOPBACK_SESSION,
};
use crate::world::pki::{ACCOUNTS, KEY_PASSWORD};
use crate::world::{DaemonOptions, Interfaces};

const OBJECT_ROOT: &str = "/org/freedesktop/NetworkManager";

/// Name the daemon gives to wired profiles it creates
pub const WIRED_PROFILE_NAME: &str = "Wired connection 1";

/// Timing and failure knobs of the simulation
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub version: String,
    /// Time the create-and-activate call takes to return
    pub call_latency: Duration,
    /// Time from activation start to `activated`
    pub activation_latency: Duration,
    /// Time from activation start to the profile being published on the device
    pub profile_lag: Duration,
    /// Time from activation start to giving up on bad credentials
    pub rejection_latency: Duration,
    /// Time for a running peer to be discovered
    pub discovery_latency: Duration,
    /// Time from a usable wired link to an automatic session
    pub auto_connect_latency: Duration,
    /// Time for a device to reconnect after a fault is lifted
    pub reconnect_latency: Duration,
    /// Never return from the create-and-activate call
    pub hang_activation_call: bool,
    /// Keep running the create-and-activate call after cancellation
    pub ignore_cancellation: bool,
    /// Error returned by the create-and-activate call
    pub activation_error: Option<ServiceError>,
    /// Error the daemon answers every deactivation with
    pub deactivation_error: Option<ServiceError>,
    /// Interfaces the daemon never picks up
    pub hidden_interfaces: Vec<String>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            version: "1.46.0".to_string(),
            call_latency: Duration::from_millis(200),
            activation_latency: Duration::from_secs(2),
            profile_lag: Duration::from_millis(50),
            rejection_latency: Duration::from_secs(5),
            discovery_latency: Duration::from_secs(1),
            auto_connect_latency: Duration::from_secs(3),
            reconnect_latency: Duration::from_millis(500),
            hang_activation_call: false,
            ignore_cancellation: false,
            activation_error: None,
            deactivation_error: None,
            hidden_interfaces: Vec::new(),
        }
    }
}

/// Addresses configured on an interface
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkState {
    /// Kernel interface index
    pub index: u32,
    pub up: bool,
    pub mac: String,
    pub ipv4: bool,
    /// Router mode and privacy of the IPv6 configuration
    pub ipv6: Option<(RouterMode, Option<Ip6Privacy>)>,
    /// Addressing served by a peer on this interface
    pub peer: Option<AddressingMode>,
    /// Associated with the access point
    pub associated: bool,
}

struct AccessPoint {
    config: AccessPointConfig,
    ssid: String,
    addressing: AddressingMode,
}

struct World {
    state: Snapshot,
    tx: mpsc::UnboundedSender<Notification>,
    running: bool,
    options: DaemonOptions,
    interfaces: Interfaces,
    default_ssid: String,
    /// Saved profiles as the daemon returns them, without secrets
    profiles: BTreeMap<ObjectId, ConnectionProfile>,
    credentials: BTreeMap<ObjectId, Authentication>,
    /// Profile last activated on each device, for reconnecting
    last_profile: BTreeMap<ObjectId, ObjectId>,
    access_point: Option<AccessPoint>,
    router: Option<AddressingMode>,
    links: BTreeMap<String, LinkState>,
    blocked: BTreeSet<String>,
    sleeping: bool,
    next_id: u64,
}

impl World {
    fn emit(&mut self, notification: Notification) {
        self.state.apply(notification.clone());
        // The client may be gone during teardown
        let _ = self.tx.send(notification);
    }

    fn next_object(&mut self, kind: &str) -> ObjectId {
        self.next_id += 1;
        ObjectId::new(format!("{}/{}/{}", OBJECT_ROOT, kind, self.next_id))
    }

    fn device_id(&self, iface: &str) -> Option<ObjectId> {
        self.state.device_by_interface(iface).map(|d| d.id.clone())
    }

    fn interface_of(&self, device: &ObjectId) -> Option<String> {
        self.state.device(device).map(|d| d.interface.clone())
    }

    fn link(&mut self, iface: &str) -> &mut LinkState {
        self.links.entry(iface.to_string()).or_default()
    }

    fn set_device_state(&mut self, device: &ObjectId, state: DeviceState) {
        if self.state.device(device).is_some_and(|d| d.state != state) {
            self.emit(Notification::DeviceStateChanged {
                device: device.clone(),
                state,
            });
        }
    }

    fn set_session_state(&mut self, session: &ObjectId, state: SessionState) {
        self.emit(Notification::SessionStateChanged {
            session: session.clone(),
            state,
        });
    }

    fn add_device(&mut self, iface: &str, kind: DeviceKind, driver: &str, managed: bool) {
        let id = self.next_object("Devices");
        let mac = self.links.get(iface).map(|l| l.mac.clone()).unwrap_or_default();
        let state = if !managed {
            DeviceState::Unmanaged
        } else if self.blocked.contains(iface) {
            DeviceState::Unavailable
        } else {
            DeviceState::Disconnected
        };
        let udi = match kind {
            DeviceKind::Wifi => format!("/sys/devices/virtual/mac80211_hwsim/hwsim0/net/{}", iface),
            _ => format!("/sys/devices/virtual/net/{}", iface),
        };
        self.emit(Notification::DeviceAdded(DeviceInfo {
            id,
            interface: iface.to_string(),
            kind,
            driver: driver.to_string(),
            hw_address: mac,
            state,
            managed,
            firmware_missing: false,
            udi,
            access_points: Vec::new(),
            active_access_point: None,
            available_profiles: Vec::new(),
        }));
    }

    fn discover_access_point(&mut self) {
        let Some(ap) = &self.access_point else {
            return;
        };
        let (ssid, bitrate) = (ap.ssid.clone(), ap.config.hw_mode.max_bitrate());
        let client = self.interfaces.wifi_client.clone();
        if self.blocked.contains(&client) || self.sleeping {
            return;
        }
        let Some(device) = self.device_id(&client) else {
            return;
        };
        if !self.state.access_points_of(&device).is_empty() {
            return;
        }
        let id = self.next_object("AccessPoint");
        let hw_address = self.interfaces.wifi_ap_mac.clone();
        self.emit(Notification::AccessPointAdded {
            device,
            access_point: AccessPointInfo {
                id,
                ssid: ssid.into_bytes(),
                max_bitrate: bitrate,
                mode: PeerMode::Infrastructure,
                hw_address,
            },
        });
    }

    /// Whether the peer accepts the profile; `None` when there is no peer
    fn accepts(&self, profile: &ObjectId) -> Option<bool> {
        let link = self.profiles.get(profile)?.link;
        match link {
            LinkKind::Ethernet => self.router.map(|_| true),
            LinkKind::Wifi => {
                let ap = self.access_point.as_ref()?;
                let auth = self.credentials.get(profile)?;
                Some(credentials_match(&ap.config, auth))
            }
        }
    }

    fn start_session(&mut self, profile: &ObjectId, device: &ObjectId) -> ObjectId {
        let id = self.next_object("ActiveConnection");
        let (name, uuid) = self
            .profiles
            .get(profile)
            .map(|p| (p.id.clone(), p.uuid.clone()))
            .unwrap_or_default();
        self.emit(Notification::SessionAdded(SessionInfo {
            id: id.clone(),
            uuid,
            name,
            profile: profile.clone(),
            state: SessionState::Activating,
            devices: vec![device.clone()],
        }));
        self.set_device_state(device, DeviceState::Prepare);
        self.set_device_state(device, DeviceState::Config);
        id
    }

    fn publish_profile(&mut self, device: &ObjectId, profile: &ObjectId) {
        let Some(info) = self.state.device(device) else {
            return;
        };
        if info.available_profiles.contains(profile) {
            return;
        }
        let mut profiles = info.available_profiles.clone();
        profiles.push(profile.clone());
        self.emit(Notification::AvailableProfilesChanged {
            device: device.clone(),
            profiles,
        });
    }

    fn complete_activation(&mut self, session: &ObjectId) {
        let Some(info) = self.state.session(session).cloned() else {
            return;
        };
        if info.state != SessionState::Activating {
            return;
        }
        let Some(device) = info.devices.first().cloned() else {
            return;
        };
        let Some(profile) = self.profiles.get(&info.profile).cloned() else {
            return;
        };
        let Some(iface) = self.interface_of(&device) else {
            return;
        };
        let peer = match profile.link {
            LinkKind::Wifi => self.access_point.as_ref().map(|ap| ap.addressing),
            LinkKind::Ethernet => self.router,
        };
        let Some(peer) = peer else {
            return;
        };

        self.set_device_state(&device, DeviceState::IpConfig);
        let link = self.link(&iface);
        link.up = true;
        link.ipv4 = peer == AddressingMode::Ipv4 && profile.ipv4 == Ipv4Method::Auto;
        link.ipv6 = match peer {
            AddressingMode::Ipv6 { router } if profile.ipv6 == Ipv6Method::Auto => {
                Some((router, profile.ip6_privacy))
            }
            _ => None,
        };
        link.associated = profile.link == LinkKind::Wifi;
        if profile.link == LinkKind::Wifi {
            let active = self
                .state
                .device(&device)
                .and_then(|d| d.access_points.first().cloned());
            self.emit(Notification::ActiveAccessPointChanged {
                device: device.clone(),
                access_point: active,
            });
        }
        self.last_profile.insert(device.clone(), info.profile.clone());
        self.set_device_state(&device, DeviceState::Activated);
        self.set_session_state(session, SessionState::Activated);
    }

    fn reject(&mut self, session: &ObjectId) {
        let Some(info) = self.state.session(session).cloned() else {
            return;
        };
        if info.state != SessionState::Activating {
            return;
        }
        for device in &info.devices {
            self.set_device_state(device, DeviceState::NeedAuth);
            self.set_device_state(device, DeviceState::Failed);
        }
        self.end_session(session, DeviceState::Disconnected);
    }

    /// Tear a session down and leave its devices in `device_state`
    fn end_session(&mut self, session: &ObjectId, device_state: DeviceState) {
        let Some(info) = self.state.session(session).cloned() else {
            return;
        };
        self.set_session_state(session, SessionState::Deactivating);
        for device in &info.devices {
            if let Some(iface) = self.interface_of(device) {
                let link = self.link(&iface);
                link.ipv4 = false;
                link.ipv6 = None;
                link.associated = false;
            }
            self.emit(Notification::ActiveAccessPointChanged {
                device: device.clone(),
                access_point: None,
            });
            self.set_device_state(device, device_state);
        }
        self.set_session_state(session, SessionState::Deactivated);
        self.emit(Notification::SessionRemoved(session.clone()));
    }

    fn sessions_on(&self, device: &ObjectId) -> Vec<ObjectId> {
        self.state
            .sessions
            .values()
            .filter(|s| s.devices.contains(device))
            .map(|s| s.id.clone())
            .collect()
    }

    /// Bring a device down, ending its sessions
    fn take_down(&mut self, device: &ObjectId, state: DeviceState) {
        for session in self.sessions_on(device) {
            self.end_session(&session, state);
        }
        self.set_device_state(device, state);
        if let Some(iface) = self.interface_of(device) {
            let link = self.link(&iface);
            link.up = false;
        }
    }

    fn bring_back(&mut self, device: &ObjectId) {
        self.set_device_state(device, DeviceState::Disconnected);
    }

    fn create_profile(&mut self, mut profile: ConnectionProfile) -> ObjectId {
        let id = self.next_object("Settings");
        if profile.uuid.is_empty() {
            profile.uuid = format!("{:08x}-0000-4000-8000-{:012x}", self.next_id, self.next_id);
        }
        self.credentials.insert(id.clone(), profile.auth.clone());
        profile.auth = profile.auth.without_secrets();
        self.profiles.insert(id.clone(), profile);
        id
    }

    /// Complete a partial profile the way the daemon does
    fn complete(&self, mut profile: ConnectionProfile) -> ConnectionProfile {
        if profile.link == LinkKind::Wifi && profile.ssid.is_none() {
            profile.ssid = Some(
                self.access_point
                    .as_ref()
                    .map(|ap| ap.ssid.clone())
                    .unwrap_or_else(|| self.default_ssid.clone()),
            );
        }
        if profile.id.is_empty() {
            profile.id = match (&profile.link, &profile.ssid) {
                (LinkKind::Wifi, Some(ssid)) => ssid.clone(),
                _ => WIRED_PROFILE_NAME.to_string(),
            };
        }
        profile
    }

    fn wired_auto_profile(&self) -> ConnectionProfile {
        ConnectionProfile {
            id: WIRED_PROFILE_NAME.to_string(),
            uuid: String::new(),
            link: LinkKind::Ethernet,
            ssid: None,
            hidden: false,
            ipv4: Ipv4Method::Auto,
            ipv6: Ipv6Method::Auto,
            ip6_privacy: None,
            auth: Authentication::Open,
        }
    }
}

fn credentials_match(ap: &AccessPointConfig, auth: &Authentication) -> bool {
    match (&ap.security, auth) {
        (ApSecurity::Open, Authentication::Open) => true,
        (ApSecurity::WpaPsk { .. }, Authentication::PreSharedKey { psk }) => {
            psk.as_deref().is_some_and(|psk| ap.accepts_psk(psk))
        }
        (
            ApSecurity::WpaEap {
                client_certificate: false,
            },
            Authentication::Enterprise {
                identity, password, ..
            },
        ) => ACCOUNTS
            .iter()
            .any(|(user, pw)| identity.as_str() == *user && password.as_deref() == Some(*pw)),
        (
            ApSecurity::WpaEap {
                client_certificate: true,
            },
            Authentication::Enterprise {
                client_certificate: Some(cert),
                ..
            },
        ) => cert.private_key_password.as_deref() == Some(KEY_PASSWORD),
        _ => false,
    }
}

/// Shared handle on the simulated world
#[derive(Clone)]
struct Sim {
    world: Arc<Mutex<World>>,
    config: Arc<SimulationConfig>,
}

impl Sim {
    fn lock(&self) -> MutexGuard<'_, World> {
        self.world.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with<R>(&self, f: impl FnOnce(&mut World) -> R) -> R {
        f(&mut self.lock())
    }

    /// Run `f` after `delay` on the runtime
    fn later(&self, delay: Duration, f: impl FnOnce(&Sim) + Send + 'static) {
        let sim = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            f(&sim);
        });
    }

    fn activate_profile(&self, profile: ObjectId, device: ObjectId) -> ObjectId {
        let (session, accepted) = self.with(|w| {
            let session = w.start_session(&profile, &device);
            (session, w.accepts(&profile))
        });

        self.later(self.config.profile_lag, move |sim| {
            sim.with(|w| w.publish_profile(&device, &profile))
        });
        let id = session.clone();
        match accepted {
            Some(true) => self.later(self.config.activation_latency, move |sim| {
                sim.with(|w| w.complete_activation(&id))
            }),
            Some(false) => self.later(self.config.rejection_latency, move |sim| {
                sim.with(|w| w.reject(&id))
            }),
            // Nothing to connect to: stays activating
            None => {}
        }
        session
    }

    fn schedule_discovery(&self) {
        self.later(self.config.discovery_latency, |sim| {
            sim.with(World::discover_access_point)
        });
    }

    fn schedule_auto_connect(&self) {
        self.later(self.config.auto_connect_latency, |sim| {
            let target = sim.with(|w| {
                if !w.running || !w.options.auto_connect || w.router.is_none() || w.sleeping {
                    return None;
                }
                let device = w.device_id(&w.interfaces.eth_client.clone())?;
                if !w.sessions_on(&device).is_empty() {
                    return None;
                }
                let profile = match w.last_profile.get(&device) {
                    Some(profile) => profile.clone(),
                    None => {
                        let profile = w.wired_auto_profile();
                        w.create_profile(profile)
                    }
                };
                Some((profile, device))
            });
            if let Some((profile, device)) = target {
                sim.activate_profile(profile, device);
            }
        });
    }

    fn schedule_reconnect(&self, device: ObjectId) {
        self.later(self.config.reconnect_latency, move |sim| {
            let profile = sim.with(|w| {
                if !w.sessions_on(&device).is_empty() {
                    return None;
                }
                w.last_profile.get(&device).cloned()
            });
            if let Some(profile) = profile {
                sim.activate_profile(profile, device);
            }
        });
    }

    fn add_and_activate(&self, request: ActivationRequest) -> Result<ObjectId, ServiceError> {
        let profile = self.with(|w| {
            if !w.running {
                return Err(ServiceError::Bus("daemon is not running".into()));
            }
            let device = w
                .state
                .device(&request.device)
                .ok_or_else(|| ServiceError::ObjectMissing(request.device.clone()))?;
            if matches!(device.state, DeviceState::Unmanaged | DeviceState::Unavailable) {
                return Err(ServiceError::Daemon {
                    name: "org.freedesktop.NetworkManager.UnknownDevice".into(),
                    message: format!("device {} is {}", device.interface, device.state),
                });
            }
            if request.profile.link == LinkKind::Wifi {
                let known = request
                    .specific_object
                    .as_ref()
                    .is_some_and(|ap| w.state.access_points.contains_key(ap));
                if !known {
                    return Err(ServiceError::Daemon {
                        name: "org.freedesktop.NetworkManager.UnknownConnection".into(),
                        message: "no suitable access point".into(),
                    });
                }
            }
            let profile = w.complete(request.profile.clone());
            Ok(w.create_profile(profile))
        })?;
        Ok(self.activate_profile(profile, request.device))
    }
}

/// A daemon living in memory
pub struct SimulatedNetwork {
    sim: Sim,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Notification>>>,
}

impl SimulatedNetwork {
    pub fn new(config: SimulationConfig, interfaces: &Interfaces, default_ssid: &str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let links = [
            (interfaces.wifi_ap.clone(), interfaces.wifi_ap_mac.clone()),
            (interfaces.wifi_client.clone(), client_mac(&interfaces.wifi_ap_mac)),
            (interfaces.eth_client.clone(), interfaces.eth_client_mac.clone()),
        ]
        .into_iter()
        .zip(2..)
        .map(|((iface, mac), index)| {
            let link = LinkState {
                index,
                mac,
                ..LinkState::default()
            };
            (iface, link)
        })
        .collect();
        let world = World {
            state: Snapshot {
                version: config.version.clone(),
                ..Snapshot::default()
            },
            tx,
            running: false,
            options: DaemonOptions::default(),
            interfaces: interfaces.clone(),
            default_ssid: default_ssid.to_string(),
            profiles: BTreeMap::new(),
            credentials: BTreeMap::new(),
            last_profile: BTreeMap::new(),
            access_point: None,
            router: None,
            links,
            blocked: BTreeSet::new(),
            sleeping: false,
            next_id: 0,
        };
        Self {
            sim: Sim {
                world: Arc::new(Mutex::new(world)),
                config: Arc::new(config),
            },
            rx: Mutex::new(Some(rx)),
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.sim.config
    }

    pub fn is_running(&self) -> bool {
        self.sim.with(|w| w.running)
    }

    /// Start the daemon: publish devices and start connecting
    pub fn boot(&self, options: DaemonOptions) {
        let (has_ap, has_router) = self.sim.with(|w| {
            w.running = true;
            w.options = options;
            let ifaces = w.interfaces.clone();
            let hidden = &self.sim.config.hidden_interfaces;
            let devices = [
                (&ifaces.wifi_ap, DeviceKind::Wifi, "mac80211_hwsim", false),
                (&ifaces.wifi_client, DeviceKind::Wifi, "mac80211_hwsim", true),
                (&ifaces.eth_client, DeviceKind::Veth, "veth", true),
            ];
            for (iface, kind, driver, managed) in devices {
                if !hidden.contains(iface) {
                    w.add_device(iface, kind, driver, managed);
                }
            }
            let lo = w.next_object("ActiveConnection");
            w.emit(Notification::SessionAdded(SessionInfo {
                id: lo,
                uuid: "00000000-0000-4000-8000-00000000006c".into(),
                name: LOOPBACK_SESSION.into(),
                profile: ObjectId::new("/"),
                state: SessionState::Activated,
                devices: Vec::new(),
            }));
            w.emit(Notification::NetworkingEnabled(true));
            (w.access_point.is_some(), w.router.is_some())
        });
        tracing::debug!(has_ap, has_router, "Simulated daemon started");
        if has_ap {
            self.sim.schedule_discovery();
        }
        if has_router {
            self.sim.schedule_auto_connect();
        }
    }

    pub fn start_access_point(&self, config: &AccessPointConfig, addressing: AddressingMode) {
        let running = self.sim.with(|w| {
            let ssid = config.ssid_or(&w.default_ssid).to_string();
            w.access_point = Some(AccessPoint {
                config: config.clone(),
                ssid,
                addressing,
            });
            let ap = w.interfaces.wifi_ap.clone();
            let link = w.link(&ap);
            link.up = true;
            link.peer = Some(addressing);
            w.running
        });
        if running {
            self.sim.schedule_discovery();
        }
    }

    pub fn start_router(&self, addressing: AddressingMode) {
        let running = self.sim.with(|w| {
            w.router = Some(addressing);
            w.running
        });
        if running {
            self.sim.schedule_auto_connect();
        }
    }

    pub fn is_blocked(&self, iface: &str) -> bool {
        self.sim.with(|w| w.blocked.contains(iface))
    }

    pub fn set_blocked(&self, iface: &str, blocked: bool) {
        let reconnect = self.sim.with(|w| {
            let device = w.device_id(iface);
            if blocked {
                w.blocked.insert(iface.to_string());
                if let Some(device) = &device {
                    w.take_down(device, DeviceState::Unavailable);
                }
                None
            } else {
                w.blocked.remove(iface);
                let device = device?;
                w.link(iface).up = true;
                w.bring_back(&device);
                Some(device)
            }
        });
        if let Some(device) = reconnect {
            self.sim.schedule_reconnect(device);
        }
    }

    /// React to the session manager announcing sleep or wake-up
    pub fn set_sleeping(&self, sleeping: bool) {
        let devices = self.sim.with(|w| {
            w.sleeping = sleeping;
            let clients = [w.interfaces.wifi_client.clone(), w.interfaces.eth_client.clone()];
            let devices: Vec<ObjectId> = clients.iter().filter_map(|i| w.device_id(i)).collect();
            for device in &devices {
                if sleeping {
                    w.take_down(device, DeviceState::Unmanaged);
                } else {
                    if let Some(iface) = w.interface_of(device) {
                        w.link(&iface).up = true;
                    }
                    w.bring_back(device);
                }
            }
            devices
        });
        if !sleeping {
            for device in devices {
                self.sim.schedule_reconnect(device);
            }
        }
    }

    /// Stop the daemon and the peers, leaving every interface unconfigured
    pub fn shutdown(&self) {
        self.sim.with(|w| {
            w.running = false;
            w.access_point = None;
            w.router = None;
            w.blocked.clear();
            for link in w.links.values_mut() {
                *link = LinkState {
                    index: link.index,
                    mac: std::mem::take(&mut link.mac),
                    ..LinkState::default()
                };
            }
        });
    }

    /// The daemon's own view of its state
    pub fn state(&self) -> Snapshot {
        self.sim.with(|w| w.state.clone())
    }

    pub fn link_state(&self, iface: &str) -> Option<LinkState> {
        self.sim.with(|w| w.links.get(iface).cloned())
    }

    pub fn ssid(&self) -> Option<String> {
        self.sim
            .with(|w| w.access_point.as_ref().map(|ap| ap.ssid.clone()))
    }

    /// Saved profile including secrets, as it was handed to the daemon
    pub fn credentials(&self, profile: &ObjectId) -> Option<Authentication> {
        self.sim.with(|w| w.credentials.get(profile).cloned())
    }
}

/// Derive the client radio's address from the access point's
fn client_mac(ap_mac: &str) -> String {
    let mut octets: Vec<String> = ap_mac.split(':').map(str::to_string).collect();
    if let Some(fifth) = octets.get_mut(4) {
        *fifth = "01".to_string();
    }
    octets.join(":")
}

#[async_trait]
impl NetworkService for SimulatedNetwork {
    fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<Notification>> {
        self.rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    async fn snapshot(&self) -> Result<Snapshot, ServiceError> {
        Ok(self.state())
    }

    async fn add_and_activate(
        &self,
        request: ActivationRequest,
        mut cancel: CancelSignal,
    ) -> Result<ObjectId, ServiceError> {
        let config = &self.sim.config;
        let latency = if config.hang_activation_call {
            Duration::from_secs(24 * 3600)
        } else {
            config.call_latency
        };
        if config.ignore_cancellation {
            tokio::time::sleep(latency).await;
        } else {
            cancel
                .guard(async {
                    tokio::time::sleep(latency).await;
                    Ok(())
                })
                .await?;
        }
        if let Some(error) = &config.activation_error {
            return Err(error.clone());
        }
        self.sim.add_and_activate(request)
    }

    async fn deactivate(&self, session: &ObjectId) -> Result<(), ServiceError> {
        if let Some(error) = &self.sim.config.deactivation_error {
            return Err(error.clone());
        }
        self.sim.with(|w| {
            if w.state.session(session).is_none() {
                return Err(ServiceError::ObjectMissing(session.clone()));
            }
            w.end_session(session, DeviceState::Disconnected);
            Ok(())
        })
    }

    async fn profile(&self, id: &ObjectId) -> Result<ConnectionProfile, ServiceError> {
        self.sim.with(|w| {
            w.profiles
                .get(id)
                .cloned()
                .ok_or_else(|| ServiceError::ObjectMissing(id.clone()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Ip6Privacy;
    use crate::scenario::{HwMode, WpaVersion};
    use crate::testing::sample_interfaces;

    fn network(config: SimulationConfig) -> SimulatedNetwork {
        SimulatedNetwork::new(config, &sample_interfaces(), "fake net")
    }

    fn psk_ap(passphrase: &str) -> AccessPointConfig {
        AccessPointConfig::open(HwMode::G).with_security(ApSecurity::WpaPsk {
            version: WpaVersion::Wpa2,
            passphrase: passphrase.into(),
        })
    }

    fn request(net: &SimulatedNetwork, auth: Authentication) -> ActivationRequest {
        let state = net.state();
        let device = state.device_by_interface("wlan1").unwrap().id.clone();
        let ap = state.access_points_of(&device)[0].id.clone();
        ActivationRequest {
            profile: ConnectionProfile::partial(LinkKind::Wifi, AddressingMode::Ipv4, None, auth),
            device,
            specific_object: Some(ap),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_boot_publishes_devices_and_loopback() {
        let net = network(SimulationConfig::default());
        net.boot(DaemonOptions::default());
        let state = net.state();
        assert!(state.networking_enabled);
        assert_eq!(state.devices.len(), 3);
        assert_eq!(state.device_by_interface("wlan0").unwrap().state, DeviceState::Unmanaged);
        assert_eq!(state.device_by_interface("eth42").unwrap().kind, DeviceKind::Veth);
        assert!(state.user_sessions().is_empty());
        assert_eq!(state.sessions.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_interface_is_not_published() {
        let net = network(SimulationConfig {
            hidden_interfaces: vec!["eth42".into()],
            ..SimulationConfig::default()
        });
        net.boot(DaemonOptions::default());
        assert!(net.state().device_by_interface("eth42").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_access_point_discovered_after_latency() {
        let net = network(SimulationConfig::default());
        net.start_access_point(&AccessPointConfig::open(HwMode::B), AddressingMode::Ipv4);
        net.boot(DaemonOptions::default());
        let device = net.state().device_by_interface("wlan1").unwrap().id.clone();
        assert!(net.state().access_points_of(&device).is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let state = net.state();
        let aps = state.access_points_of(&device);
        assert_eq!(aps.len(), 1);
        assert_eq!(aps[0].ssid, b"fake net");
        assert_eq!(aps[0].max_bitrate, 11000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_correct_key_activates_and_configures_link() {
        let net = network(SimulationConfig::default());
        net.start_access_point(&psk_ap("secret123"), AddressingMode::Ipv4);
        net.boot(DaemonOptions::default());
        tokio::time::sleep(Duration::from_secs(2)).await;

        let req = request(&net, Authentication::PreSharedKey { psk: Some("secret123".into()) });
        let session = net.add_and_activate(req, CancelSignal::never()).await.unwrap();
        assert_eq!(net.state().session(&session).unwrap().state, SessionState::Activating);

        tokio::time::sleep(Duration::from_secs(3)).await;
        let state = net.state();
        let info = state.session(&session).unwrap();
        assert_eq!(info.state, SessionState::Activated);
        let profile = net.profile(&info.profile).await.unwrap();
        assert_eq!(profile.ssid.as_deref(), Some("fake net"));
        assert_eq!(profile.auth, Authentication::PreSharedKey { psk: None });

        let link = net.link_state("wlan1").unwrap();
        assert!(link.up && link.ipv4 && link.associated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_key_is_rejected_and_session_removed() {
        let net = network(SimulationConfig::default());
        net.start_access_point(&psk_ap("secret123"), AddressingMode::Ipv4);
        net.boot(DaemonOptions::default());
        tokio::time::sleep(Duration::from_secs(2)).await;

        let req = request(&net, Authentication::PreSharedKey { psk: Some("nope".into()) });
        let session = net.add_and_activate(req, CancelSignal::never()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;

        let state = net.state();
        assert!(state.session(&session).is_none());
        assert_eq!(state.device_by_interface("wlan1").unwrap().state, DeviceState::Disconnected);
        assert!(!net.link_state("wlan1").unwrap().associated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_call_returns_cancelled() {
        let net = network(SimulationConfig {
            hang_activation_call: true,
            ..SimulationConfig::default()
        });
        net.start_access_point(&AccessPointConfig::open(HwMode::G), AddressingMode::Ipv4);
        net.boot(DaemonOptions::default());
        tokio::time::sleep(Duration::from_secs(2)).await;

        let (handle, signal) = crate::service::cancel_pair();
        let req = request(&net, Authentication::Open);
        let call = tokio::spawn(async move { net.add_and_activate(req, signal).await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.cancel();
        assert_eq!(call.await.unwrap(), Err(ServiceError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wired_auto_connect_needs_router_and_option() {
        let net = network(SimulationConfig::default());
        net.start_router(AddressingMode::Ipv6 {
            router: RouterMode::RaOnly,
        });
        net.boot(DaemonOptions {
            auto_connect: true,
            session_manager_mock: false,
        });
        tokio::time::sleep(Duration::from_secs(6)).await;

        let state = net.state();
        let sessions = state.user_sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].name, WIRED_PROFILE_NAME);
        assert_eq!(sessions[0].state, SessionState::Activated);
        let link = net.link_state("eth42").unwrap();
        assert_eq!(link.ipv6, Some((RouterMode::RaOnly, None)));
        assert!(!link.ipv4);

        let quiet = network(SimulationConfig::default());
        quiet.start_router(AddressingMode::Ipv4);
        quiet.boot(DaemonOptions::default());
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(quiet.state().user_sessions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_kill_switch_drops_and_restores_session() {
        let net = network(SimulationConfig::default());
        net.start_access_point(&AccessPointConfig::open(HwMode::G), AddressingMode::Ipv4);
        net.boot(DaemonOptions::default());
        tokio::time::sleep(Duration::from_secs(2)).await;
        let mut req = request(&net, Authentication::Open);
        req.profile.ip6_privacy = Some(Ip6Privacy::Disabled);
        net.add_and_activate(req, CancelSignal::never()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        net.set_blocked("wlan1", true);
        assert!(net.is_blocked("wlan1"));
        let state = net.state();
        assert_eq!(state.device_by_interface("wlan1").unwrap().state, DeviceState::Unavailable);
        assert!(state.user_sessions().is_empty());
        assert!(!net.link_state("wlan1").unwrap().up);

        net.set_blocked("wlan1", false);
        tokio::time::sleep(Duration::from_secs(3)).await;
        let state = net.state();
        assert_eq!(state.device_by_interface("wlan1").unwrap().state, DeviceState::Activated);
        assert_eq!(state.user_sessions().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deactivate_unknown_session_is_missing() {
        let net = network(SimulationConfig::default());
        net.boot(DaemonOptions::default());
        let missing = ObjectId::new("/org/freedesktop/NetworkManager/ActiveConnection/99");
        assert_eq!(
            net.deactivate(&missing).await,
            Err(ServiceError::ObjectMissing(missing.clone()))
        );
    }

    #[test]
    fn test_subscribe_only_once() {
        let net = network(SimulationConfig::default());
        assert!(net.subscribe().is_some());
        assert!(net.subscribe().is_none());
    }

    #[test]
    fn test_enterprise_credentials() {
        let peap = Authentication::Enterprise {
            eap: vec!["peap".into()],
            phase2: "mschapv2".into(),
            identity: "account1".into(),
            password: Some("password1".into()),
            client_certificate: None,
        };
        let eap = AccessPointConfig::open(HwMode::G).with_security(ApSecurity::WpaEap {
            client_certificate: false,
        });
        let tls = AccessPointConfig::open(HwMode::G).with_security(ApSecurity::WpaEap {
            client_certificate: true,
        });
        assert!(credentials_match(&eap, &peap));
        assert!(!credentials_match(&AccessPointConfig::open(HwMode::G), &peap));
        assert!(!credentials_match(&tls, &peap));
    }
}
