//! Scenario engine
//!
//! Runs one scenario as a fixed pipeline: peer, daemon, device resolution,
//! discovery, activation, fault injection, low-level verification. Teardown
//! always runs, whatever happened before it. Steps run strictly in order and
//! observe the daemon only through the client's waiter and bridge.

use tokio::time::Instant;

use super::model::{Activation, Expectation, Fault, Peer, Plug, Scenario};
use super::result::{ScenarioResult, StepLog, Verdict};
use crate::client::{Client, Outcome};
use crate::common::config::{Config, Timeouts};
use crate::common::{Error, Result};
use crate::profile::{AddressingMode, ConnectionProfile, Ip6Privacy, LinkKind};
use crate::registry::{
    all_present, resolve_active_profile, resolve_devices, DeviceRegistry, ExpectedDevice,
    HwExpectation, Role,
};
use crate::service::{
    ActivationRequest, DeviceKind, DeviceState, ObjectId, PeerMode, SessionState,
};
use crate::verify::{expected_patterns, LinkVerifier, Prefixes, WirelessLink};
use crate::world::{DaemonOptions, Testbed};

const HWSIM_DRIVER: &str = "mac80211_hwsim";
const VETH_DRIVER: &str = "veth";
const DAEMON_OBJECT_PREFIX: &str = "/org/freedesktop/NetworkManager";

fn assertion(message: impl Into<String>) -> Error {
    Error::Assertion(message.into())
}

/// The session under test and its profile
struct ActiveSession {
    id: ObjectId,
    profile: Option<ConnectionProfile>,
}

pub struct ScenarioEngine<T: Testbed> {
    testbed: T,
    config: Config,
    steps: StepLog,
    client: Option<Client<T::Service>>,
    registry: DeviceRegistry,
    verifier: Option<LinkVerifier>,
}

impl<T: Testbed> ScenarioEngine<T> {
    pub fn new(testbed: T, config: Config) -> Self {
        Self {
            testbed,
            config,
            steps: StepLog::new(),
            client: None,
            registry: DeviceRegistry::default(),
            verifier: None,
        }
    }

    pub fn testbed(&self) -> &T {
        &self.testbed
    }

    /// Devices resolved for the scenario in progress; empty between runs
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Run `scenario` and tear down, whatever the outcome
    pub async fn run(&mut self, scenario: &Scenario) -> ScenarioResult {
        let started = Instant::now();
        tracing::info!(scenario = %scenario.name, "Starting scenario");

        let outcome = self.pipeline(scenario).await;
        self.steps.close(if outcome.is_ok() {
            Verdict::Passed
        } else {
            Verdict::Failed
        });
        if let Err(e) = &outcome {
            tracing::error!(scenario = %scenario.name, kind = %e.kind(), "{}", e);
        }

        self.steps.begin("teardown");
        let teardown = self.teardown().await;
        self.steps.close(if teardown.is_ok() {
            Verdict::Passed
        } else {
            Verdict::Failed
        });

        let steps = self.steps.take();
        let elapsed = started.elapsed().as_millis() as u64;
        match (outcome, teardown) {
            (Ok(()), Ok(())) => {
                tracing::info!(scenario = %scenario.name, "Scenario passed");
                ScenarioResult::passed(&scenario.name, steps, elapsed)
            }
            (Ok(()), Err(e)) => ScenarioResult::from_error(&scenario.name, &e, steps, elapsed),
            (Err(e), teardown) => {
                if let Err(t) = teardown {
                    tracing::warn!(scenario = %scenario.name, "Teardown also failed: {}", t);
                }
                ScenarioResult::from_error(&scenario.name, &e, steps, elapsed)
            }
        }
    }

    fn client(&mut self) -> Result<&mut Client<T::Service>> {
        self.client
            .as_mut()
            .ok_or_else(|| Error::Internal("daemon client not attached".into()))
    }

    fn verifier(&self) -> Result<LinkVerifier> {
        self.verifier
            .clone()
            .ok_or_else(|| Error::Internal("verifier not set up".into()))
    }

    fn timeouts(&self) -> Timeouts {
        self.config.timeouts.clone()
    }

    fn client_role(link: LinkKind) -> Role {
        match link {
            LinkKind::Wifi => Role::WifiClient,
            LinkKind::Ethernet => Role::EthernetClient,
        }
    }

    fn client_interface(&self, link: LinkKind) -> String {
        let ifaces = self.testbed.interfaces();
        match link {
            LinkKind::Wifi => ifaces.wifi_client.clone(),
            LinkKind::Ethernet => ifaces.eth_client.clone(),
        }
    }

    fn expected_devices(&self) -> Vec<ExpectedDevice> {
        let ifaces = self.testbed.interfaces();
        vec![
            ExpectedDevice {
                role: Role::WifiAccessPoint,
                interface: ifaces.wifi_ap.clone(),
                kind: DeviceKind::Wifi,
                driver: HWSIM_DRIVER.into(),
                hw: HwExpectation::Exact(ifaces.wifi_ap_mac.clone()),
            },
            ExpectedDevice {
                role: Role::WifiClient,
                interface: ifaces.wifi_client.clone(),
                kind: DeviceKind::Wifi,
                driver: HWSIM_DRIVER.into(),
                // The daemon may randomize the client address while scanning
                hw: HwExpectation::NotEqual(ifaces.wifi_ap_mac.clone()),
            },
            ExpectedDevice {
                role: Role::EthernetClient,
                interface: ifaces.eth_client.clone(),
                kind: DeviceKind::Veth,
                driver: VETH_DRIVER.into(),
                hw: HwExpectation::Exact(ifaces.eth_client_mac.clone()),
            },
        ]
    }

    fn prefixes(&self) -> Prefixes {
        Prefixes {
            ipv4: self.config.network.ipv4_prefix.clone(),
            ipv6: self.config.network.ipv6_prefix.clone(),
        }
    }

    async fn pipeline(&mut self, scenario: &Scenario) -> Result<()> {
        scenario.validate()?;

        if scenario.plug == Plug::Coldplug {
            self.start_peer(scenario).await?;
        }
        self.start_daemon(scenario).await?;
        if scenario.plug == Plug::Hotplug {
            self.start_peer(scenario).await?;
        }

        if scenario.link == LinkKind::Wifi {
            match scenario.access_point() {
                Some(_) => self.discover(scenario).await?,
                None => self.check_idle_radio().await?,
            }
        }

        let session = match &scenario.activation {
            Activation::None => return Ok(()),
            Activation::Auto => self.await_auto_connect(scenario).await?,
            Activation::Manual { .. } => self.activate(scenario).await?,
        };

        match scenario.expect {
            Expectation::Activated => {
                self.await_activated(scenario, session).await?;
                match scenario.fault {
                    // Recovery is verified as part of the fault
                    Some(fault) => self.inject(scenario, fault).await,
                    None => self.verify_addresses(scenario).await,
                }
            }
            Expectation::NotActivated => self.await_rejected(scenario, session).await,
        }
    }

    async fn start_peer(&mut self, scenario: &Scenario) -> Result<()> {
        match &scenario.peer {
            Some(Peer::AccessPoint(ap)) => {
                self.steps.begin("start access point");
                self.testbed
                    .start_access_point(ap, scenario.addressing)
                    .await
            }
            Some(Peer::Router) => {
                self.steps.begin("start router");
                self.testbed.start_router(scenario.addressing).await
            }
            None => Ok(()),
        }
    }

    async fn start_daemon(&mut self, scenario: &Scenario) -> Result<()> {
        let t = self.timeouts();
        self.steps.begin("start daemon");
        let service = self
            .testbed
            .start_daemon(DaemonOptions {
                auto_connect: scenario.auto_connect(),
                session_manager_mock: scenario.needs_session_manager(),
            })
            .await?;
        let mut client = Client::attach(service, &t).await?;

        self.steps.begin("resolve devices");
        client
            .wait_until(
                Timeouts::secs(t.networking_enabled),
                "waiting for networking to be enabled",
                |s| s.networking_enabled,
            )
            .await?;
        let expected = self.expected_devices();
        // A device still missing after settling is reported by the registry
        if let Err(e) = client
            .wait_until(
                Timeouts::secs(t.device_settle),
                "waiting for the daemon to recognize all devices",
                |s| all_present(s, &expected),
            )
            .await
        {
            tracing::warn!("{}", e);
        }
        self.registry = resolve_devices(client.snapshot(), &expected)?;
        self.client = Some(client);

        let wireless = scenario.access_point().map(|ap| {
            let ifaces = self.testbed.interfaces();
            WirelessLink {
                client: ifaces.wifi_client.clone(),
                access_point: ifaces.wifi_ap.clone(),
                access_point_mac: ifaces.wifi_ap_mac.clone(),
                ssid: ap.ssid_or(&self.config.network.ssid).to_string(),
            }
        });
        self.verifier = Some(LinkVerifier::new(
            self.testbed.introspector(),
            self.prefixes(),
            wireless,
        ));
        Ok(())
    }

    /// Wait for the access point to show up on the client and check it
    async fn discover(&mut self, scenario: &Scenario) -> Result<()> {
        let t = self.timeouts();
        self.steps.begin("discover access point");
        let device = self.registry.get(Role::WifiClient)?.clone();
        let timeout = match (scenario.plug, scenario.fault) {
            (Plug::Hotplug, _) => t.hotplug_discovery,
            (Plug::Coldplug, Some(_)) => t.peer_discovery_slow,
            (Plug::Coldplug, None) => t.peer_discovery,
        };
        let expected_ssid = scenario
            .access_point()
            .map(|c| c.ssid_or(&self.config.network.ssid).to_string())
            .unwrap_or_default();
        let client = self.client()?;
        client
            .wait_until(
                Timeouts::secs(timeout),
                "waiting for the access point to be detected",
                |s| !s.access_points_of(&device).is_empty(),
            )
            .await?;

        let snapshot = client.snapshot();
        let ap = snapshot
            .access_points_of(&device)
            .into_iter()
            .next()
            .cloned()
            .ok_or_else(|| Error::Internal("access point vanished after discovery".into()))?;
        let active_access_point = snapshot
            .device(&device)
            .ok_or_else(|| Error::Internal("client device vanished".into()))?
            .active_access_point
            .clone();
        let sessions = snapshot.user_sessions().len();

        match scenario.plug {
            Plug::Coldplug => {
                if !ap.id.as_str().starts_with(DAEMON_OBJECT_PREFIX) {
                    return Err(assertion(format!("access point handle {} is not a daemon object", ap.id)));
                }
                if ap.mode != PeerMode::Infrastructure {
                    return Err(assertion(format!("access point mode is {:?}, expected infrastructure", ap.mode)));
                }
                if let Some(bitrate) = scenario.expected_bitrate {
                    if ap.max_bitrate != bitrate {
                        return Err(assertion(format!(
                            "access point advertises {} Kbit/s, expected {}",
                            ap.max_bitrate, bitrate
                        )));
                    }
                }
                if sessions > 0 {
                    return Err(assertion(format!(
                        "wifi must not auto-connect, but {} session(s) are active",
                        sessions
                    )));
                }
            }
            Plug::Hotplug => {
                if ap.ssid != expected_ssid.as_bytes() {
                    return Err(assertion(format!(
                        "discovered SSID '{}', expected '{}'",
                        ap.ssid_lossy(),
                        expected_ssid
                    )));
                }
                if let Some(active) = active_access_point {
                    return Err(assertion(format!("device already uses access point {}", active)));
                }
            }
        }
        tracing::info!(ap = %ap.id, ssid = %ap.ssid_lossy(), "Access point discovered");
        Ok(())
    }

    /// Checks on a wireless device with nothing to connect to
    async fn check_idle_radio(&mut self) -> Result<()> {
        self.steps.begin("check idle radio");
        let cli_version = self.testbed.daemon_version_cli().await?;
        let device = self.registry.get(Role::WifiClient)?.clone();
        let snapshot = self.client()?.snapshot();
        let info = snapshot
            .device(&device)
            .ok_or_else(|| Error::Internal("client device vanished".into()))?;

        if info.kind != DeviceKind::Wifi {
            return Err(assertion(format!("device type is {}, expected wifi", info.kind)));
        }
        if !info.managed {
            return Err(assertion("device is not managed"));
        }
        if info.firmware_missing {
            return Err(assertion("device reports missing firmware"));
        }
        if !info.udi.starts_with("/sys/devices/") {
            return Err(assertion(format!("unexpected device UDI {}", info.udi)));
        }
        if snapshot.version != cli_version {
            return Err(assertion(format!(
                "daemon reports version {}, command line client {}",
                snapshot.version, cli_version
            )));
        }
        if !snapshot.version.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(assertion(format!("implausible daemon version '{}'", snapshot.version)));
        }
        if !matches!(info.state, DeviceState::Disconnected | DeviceState::Unavailable) {
            return Err(assertion(format!("device is {}, expected disconnected or unavailable", info.state)));
        }
        if !info.access_points.is_empty() {
            return Err(assertion(format!("{} access point(s) visible", info.access_points.len())));
        }
        if !info.available_profiles.is_empty() {
            return Err(assertion(format!(
                "{} profile(s) available",
                info.available_profiles.len()
            )));
        }
        Ok(())
    }

    /// Create a profile from the scenario and activate it
    async fn activate(&mut self, scenario: &Scenario) -> Result<ActiveSession> {
        let t = self.timeouts();
        self.steps.begin("activate");
        let auth = scenario
            .auth()
            .cloned()
            .ok_or_else(|| Error::Internal("manual activation without authentication".into()))?;
        let role = Self::client_role(scenario.link);
        let device = self.registry.get(role)?.clone();

        let specific_object = match scenario.link {
            LinkKind::Wifi => {
                let snapshot = self.client()?.snapshot();
                snapshot.access_points_of(&device).first().map(|ap| ap.id.clone())
            }
            LinkKind::Ethernet => None,
        };
        let request = ActivationRequest {
            profile: ConnectionProfile::partial(scenario.link, scenario.addressing, scenario.privacy, auth.clone()),
            device,
            specific_object,
        };

        let timeout = Timeouts::secs(t.activation_call);
        let session = match self.client()?.add_and_activate(request, timeout).await? {
            Outcome::Completed(session) => session,
            Outcome::Cancelled { acknowledged } => {
                let observed = self.client()?.snapshot().summary();
                let observed = if acknowledged {
                    observed
                } else {
                    format!("{} (cancellation was not acknowledged)", observed)
                };
                return Err(Error::timeout(
                    "waiting for the create-and-activate call to return",
                    timeout,
                    observed,
                ));
            }
        };
        tracing::info!(%session, "Activation requested");

        // Wireless profiles are checked while still activating, so a
        // rejected key is still reported as a needed secret
        if scenario.link != LinkKind::Wifi {
            return Ok(ActiveSession {
                id: session,
                profile: None,
            });
        }
        let (_, profile) = resolve_active_profile(self.client()?, &session, &t).await?;
        profile.verify()?;
        match (profile.needed_secrets(), auth.setting_name()) {
            (None, None) => {}
            (Some((setting, secrets)), Some(expected)) => {
                if setting != expected {
                    return Err(assertion(format!(
                        "secrets needed for '{}', expected '{}'",
                        setting, expected
                    )));
                }
                match secrets.first() {
                    Some(first) if auth.required_secrets().contains(first) => {}
                    _ => {
                        return Err(assertion(format!(
                            "needed secrets {:?} do not include one of {:?}",
                            secrets,
                            auth.required_secrets()
                        )))
                    }
                }
            }
            (needed, _) => {
                return Err(assertion(format!(
                    "needed secrets {:?} do not match the {} authentication",
                    needed,
                    auth.setting_name().unwrap_or("open")
                )))
            }
        }
        Ok(ActiveSession {
            id: session,
            profile: Some(profile),
        })
    }

    /// Wait for the daemon to connect on its own
    async fn await_auto_connect(&mut self, scenario: &Scenario) -> Result<ActiveSession> {
        let t = self.timeouts();
        self.steps.begin("await auto-connect");
        let timeout = match scenario.plug {
            Plug::Coldplug => t.auto_connect,
            Plug::Hotplug => t.hotplug_auto_connect,
        };
        let client = self.client()?;
        client
            .wait_until(
                Timeouts::secs(timeout),
                "waiting for an automatic session",
                |s| !s.user_sessions().is_empty(),
            )
            .await?;
        let id = client
            .snapshot()
            .user_sessions()
            .first()
            .map(|s| s.id.clone())
            .ok_or_else(|| Error::Internal("automatic session vanished".into()))?;
        tracing::info!(session = %id, "Session appeared");
        Ok(ActiveSession { id, profile: None })
    }

    async fn await_activated(&mut self, scenario: &Scenario, session: ActiveSession) -> Result<()> {
        let t = self.timeouts();
        self.steps.begin("await activation");
        let timeout = match (scenario.link, scenario.plug) {
            (LinkKind::Wifi, _) => t.wifi_activation,
            (LinkKind::Ethernet, Plug::Coldplug) => t.ethernet_activation,
            (LinkKind::Ethernet, Plug::Hotplug) => t.hotplug_activation,
        };
        let device = self.registry.get(Self::client_role(scenario.link))?.clone();
        let client = self.client()?;
        let name = client
            .snapshot()
            .session(&session.id)
            .map(|s| s.profile.to_string())
            .unwrap_or_else(|| session.id.to_string());
        let id = session.id.clone();
        client
            .wait_until(
                Timeouts::secs(timeout),
                &format!("waiting for {} to get activated", name),
                |s| s.session(&id).is_some_and(|s| s.state == SessionState::Activated),
            )
            .await?;
        let state = client.snapshot().device(&device).map(|d| d.state);
        if state != Some(DeviceState::Activated) {
            return Err(assertion(format!(
                "session is activated but the device is {:?}",
                state
            )));
        }

        self.steps.begin("check session");
        let profile = match session.profile {
            Some(profile) => profile,
            None => {
                let (_, profile) = resolve_active_profile(self.client()?, &session.id, &t).await?;
                profile.verify()?;
                profile
            }
        };
        let expected_ssid = scenario
            .access_point()
            .map(|ap| ap.ssid_or(&self.config.network.ssid).to_string());
        let snapshot = self.client()?.snapshot();
        let info = snapshot
            .session(&session.id)
            .cloned()
            .ok_or_else(|| Error::Internal("session vanished after activation".into()))?;
        if !snapshot.user_sessions().iter().any(|s| s.uuid == info.uuid) {
            return Err(assertion(format!("session {} is not among the active sessions", info.uuid)));
        }
        if info.devices != [device.clone()] {
            return Err(assertion(format!(
                "session runs on {:?}, expected only {}",
                info.devices, device
            )));
        }

        if scenario.link == LinkKind::Wifi {
            if profile.ssid != expected_ssid {
                return Err(assertion(format!(
                    "profile SSID is {:?}, expected {:?}",
                    profile.ssid, expected_ssid
                )));
            }
            if profile.hidden {
                return Err(assertion("profile is marked hidden"));
            }
            let open = scenario.auth().map_or(true, |a| a.is_open());
            if profile.auth.is_open() != open {
                return Err(assertion(format!(
                    "profile security setting present: {}, expected: {}",
                    !profile.auth.is_open(),
                    !open
                )));
            }
        }
        self.check_privacy(scenario, &profile)?;
        tracing::info!(uuid = %info.uuid, "Session activated");
        Ok(())
    }

    fn check_privacy(&self, scenario: &Scenario, profile: &ConnectionProfile) -> Result<()> {
        // Without a requested privacy the profile carries the daemon's default
        let Some(requested) = scenario.privacy.filter(|_| scenario.addressing.is_ipv6()) else {
            return Ok(());
        };
        let skip = match scenario.link {
            LinkKind::Wifi => requested == Ip6Privacy::Unknown,
            LinkKind::Ethernet => matches!(requested, Ip6Privacy::Unknown | Ip6Privacy::Disabled),
        };
        if !skip && profile.ip6_privacy != Some(requested) {
            return Err(assertion(format!(
                "profile IPv6 privacy is {:?}, expected {:?}",
                profile.ip6_privacy, requested
            )));
        }
        Ok(())
    }

    /// Wait for a session that must never activate to give up
    async fn await_rejected(&mut self, scenario: &Scenario, session: ActiveSession) -> Result<()> {
        let t = self.timeouts();
        self.steps.begin("await rejection");
        let device = self.registry.get(Self::client_role(scenario.link))?.clone();
        let id = session.id.clone();
        let mut activated = false;
        let client = self.client()?;
        client
            .wait_until(
                Timeouts::secs(t.activation_failure),
                "waiting for the session to be rejected",
                |s| match s.session(&id) {
                    Some(info) if info.state == SessionState::Activated => {
                        activated = true;
                        true
                    }
                    Some(info) => info.state == SessionState::Deactivated,
                    None => true,
                },
            )
            .await?;
        if activated {
            return Err(assertion("session activated despite invalid credentials"));
        }
        let state = client.snapshot().device(&device).map(|d| d.state);
        if state == Some(DeviceState::Activated) {
            return Err(assertion("device activated despite invalid credentials"));
        }
        tracing::info!(session = %id, ?state, "Session rejected");
        Ok(())
    }

    /// Patterns confirming the interface got its address back after a fault
    fn restored_patterns(&self, addressing: AddressingMode) -> Vec<String> {
        match addressing {
            AddressingMode::Ipv4 => vec![format!(
                r"inet {}\.\d+/24",
                regex::escape(&self.config.network.ipv4_prefix)
            )],
            AddressingMode::Ipv6 { .. } => vec![format!(
                "inet6 {}",
                regex::escape(&self.config.network.ipv6_prefix)
            )],
        }
    }

    async fn inject(&mut self, scenario: &Scenario, fault: Fault) -> Result<()> {
        let t = self.timeouts();
        let iface = self.client_interface(scenario.link);
        let device = self.registry.get(Self::client_role(scenario.link))?.clone();
        let verifier = self.verifier()?;
        let restored = self.restored_patterns(scenario.addressing);

        let (down_state, down_timeout, up_timeout) = match fault {
            Fault::KillSwitch => {
                self.steps.begin("kill switch on");
                let ap = self.testbed.interfaces().wifi_ap.clone();
                for radio in [&iface, &ap] {
                    if self.testbed.kill_switch(radio).await? {
                        return Err(assertion(format!("radio {} is blocked before the test", radio)));
                    }
                }
                self.testbed.set_kill_switch(&iface, true).await?;
                (DeviceState::Unavailable, t.kill_switch_down, t.kill_switch_up)
            }
            Fault::Suspend => {
                self.steps.begin("suspend");
                self.testbed.announce_sleep(true).await?;
                (DeviceState::Unmanaged, t.suspend_down, t.resume_up)
            }
        };

        let intent = format!("waiting for the device to become {}", down_state);
        self.client()?
            .wait_until(Timeouts::secs(down_timeout), &intent, |s| {
                s.device(&device).is_some_and(|d| d.state == down_state)
            })
            .await?;
        verifier.assert_interface_down(&iface).await?;

        match fault {
            Fault::KillSwitch => {
                self.steps.begin("kill switch off");
                self.testbed.set_kill_switch(&iface, false).await?;
            }
            Fault::Suspend => {
                self.steps.begin("resume");
                self.testbed.announce_sleep(false).await?;
            }
        }
        self.client()?
            .wait_until(
                Timeouts::secs(up_timeout),
                "waiting for the device to be activated again",
                |s| s.device(&device).is_some_and(|d| d.state == DeviceState::Activated),
            )
            .await?;
        verifier.assert_interface_up(&iface, &restored, &[]).await
    }

    async fn verify_addresses(&mut self, scenario: &Scenario) -> Result<()> {
        self.steps.begin("verify addresses");
        let iface = self.client_interface(scenario.link);
        let (expected, unexpected) =
            expected_patterns(scenario.addressing, scenario.privacy, &self.prefixes());
        self.verifier()?
            .assert_interface_up(&iface, &expected, &unexpected)
            .await
    }

    /// Deactivate every session, check the clients went down, stop the world
    async fn teardown(&mut self) -> Result<()> {
        let mut result = self.shut_down_sessions().await;
        self.client = None;
        self.registry = DeviceRegistry::default();
        self.verifier = None;
        if let Err(e) = self.testbed.teardown().await {
            tracing::warn!("Testbed teardown failed: {}", e);
            if result.is_ok() {
                result = Err(e);
            }
        }
        result
    }

    async fn shut_down_sessions(&mut self) -> Result<()> {
        let t = self.timeouts();
        let Some(client) = self.client.as_mut() else {
            return Ok(());
        };
        let sessions: Vec<ObjectId> = client
            .snapshot()
            .user_sessions()
            .iter()
            .map(|s| s.id.clone())
            .collect();
        for session in &sessions {
            if let Err(e) = client.deactivate(session).await {
                tracing::warn!(%session, "Deactivation failed: {}", e);
            }
        }
        client
            .wait_until(
                Timeouts::secs(t.teardown),
                "waiting for all sessions to be deactivated",
                |s| s.user_sessions().is_empty(),
            )
            .await?;

        let verifier = self.verifier()?;
        for role in [Role::WifiClient, Role::EthernetClient] {
            if let Some(iface) = self.registry.interface(role) {
                verifier.assert_interface_down(iface).await?;
            }
        }
        Ok(())
    }
}

