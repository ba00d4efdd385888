//! Scenario definitions
//!
//! Built-in scenarios and YAML scenario files share this schema.

use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};
use crate::profile::{AddressingMode, Authentication, Ip6Privacy, LinkKind};

/// Whether the peer exists before the daemon starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plug {
    #[default]
    Coldplug,
    Hotplug,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HwMode {
    B,
    G,
}

impl HwMode {
    /// Maximum bitrate (Kbit/s) a client sees advertised in this mode
    pub fn max_bitrate(self) -> u32 {
        match self {
            Self::B => 11_000,
            Self::G => 54_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WpaVersion {
    Wpa1,
    Wpa2,
}

/// Security the emulated access point enforces
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum ApSecurity {
    #[default]
    Open,
    WpaPsk {
        version: WpaVersion,
        passphrase: String,
    },
    WpaEap {
        /// Clients authenticate with a certificate rather than a password
        #[serde(default)]
        client_certificate: bool,
    },
}

fn default_channel() -> u8 {
    1
}

/// Emulated access point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPointConfig {
    /// Defaults to the configured network SSID
    #[serde(default)]
    pub ssid: Option<String>,
    pub hw_mode: HwMode,
    #[serde(default = "default_channel")]
    pub channel: u8,
    #[serde(default)]
    pub security: ApSecurity,
    /// Raw lines appended to the generated configuration
    #[serde(default)]
    pub extra: Vec<String>,
}

impl AccessPointConfig {
    pub fn open(hw_mode: HwMode) -> Self {
        Self {
            ssid: None,
            hw_mode,
            channel: default_channel(),
            security: ApSecurity::Open,
            extra: Vec::new(),
        }
    }

    pub fn with_security(mut self, security: ApSecurity) -> Self {
        self.security = security;
        self
    }

    pub fn ssid_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.ssid.as_deref().unwrap_or(default)
    }

    pub fn needs_pki(&self) -> bool {
        matches!(self.security, ApSecurity::WpaEap { .. })
    }

    /// Render the hostapd configuration body
    ///
    /// The interface and driver lines are prepended by whoever launches the
    /// access point. `pki_dir` is where EAP material lives.
    pub fn to_hostapd_conf(&self, default_ssid: &str, pki_dir: &Path) -> String {
        let mut conf = String::new();
        let mode = match self.hw_mode {
            HwMode::B => "b",
            HwMode::G => "g",
        };
        let _ = writeln!(conf, "hw_mode={}", mode);
        let _ = writeln!(conf, "channel={}", self.channel);
        let _ = writeln!(conf, "ssid={}", self.ssid_or(default_ssid));

        match &self.security {
            ApSecurity::Open => {}
            ApSecurity::WpaPsk {
                version,
                passphrase,
            } => {
                let (wpa, pairwise) = match version {
                    WpaVersion::Wpa1 => (1, "TKIP"),
                    WpaVersion::Wpa2 => (2, "CCMP"),
                };
                let _ = writeln!(conf, "wpa={}", wpa);
                conf.push_str("wpa_key_mgmt=WPA-PSK\n");
                let _ = writeln!(conf, "wpa_pairwise={}", pairwise);
                let _ = writeln!(conf, "wpa_passphrase={}", passphrase);
            }
            ApSecurity::WpaEap { client_certificate } => {
                let pki = pki_dir.join("pki");
                let pairwise = if *client_certificate {
                    ("TKIP CCMP", "TKIP CCMP")
                } else {
                    ("TKIP", "CCMP")
                };
                conf.push_str("auth_algs=1\neap_server=1\nieee8021x=1\neapol_version=2\n");
                conf.push_str("wpa=2\nwpa_key_mgmt=WPA-EAP\n");
                let _ = writeln!(conf, "wpa_pairwise={}", pairwise.0);
                let _ = writeln!(conf, "rsn_pairwise={}", pairwise.1);
                let _ = writeln!(
                    conf,
                    "eap_user_file={}",
                    pki_dir.join("hostapd.eap_user").display()
                );
                let _ = writeln!(conf, "ca_cert={}", pki.join("ca.crt").display());
                let _ = writeln!(
                    conf,
                    "server_cert={}",
                    pki.join("issued").join("server.crt").display()
                );
                let _ = writeln!(
                    conf,
                    "private_key={}",
                    pki.join("private").join("server.key").display()
                );
                conf.push_str("private_key_passwd=passw0rd\n");
                let _ = writeln!(conf, "dh_file={}", pki.join("dh.pem").display());
                conf.push_str("ctrl_interface=/var/run/hostapd\nctrl_interface_group=0\n");
            }
        }

        for line in &self.extra {
            conf.push_str(line);
            conf.push('\n');
        }
        conf
    }

    /// Whether a pre-shared key would be accepted
    pub fn accepts_psk(&self, psk: &str) -> bool {
        match &self.security {
            ApSecurity::WpaPsk { passphrase, .. } => passphrase == psk,
            _ => false,
        }
    }
}

/// Counterpart network the client joins
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Peer {
    AccessPoint(AccessPointConfig),
    /// DHCP and router advertisements on the far end of the wired link
    Router,
}

/// How the session comes about
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum Activation {
    /// Only observe; nothing gets activated
    #[default]
    None,
    /// The daemon connects on its own, without a pre-created profile
    Auto,
    /// The harness creates and activates a profile
    Manual {
        #[serde(default = "open_auth")]
        auth: Authentication,
    },
}

fn open_auth() -> Authentication {
    Authentication::Open
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Expectation {
    #[default]
    Activated,
    NotActivated,
}

/// Fault injected while the session is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Fault {
    /// Block the client radio, then unblock it
    KillSwitch,
    /// Announce suspend through the session manager, then resume
    Suspend,
}

fn default_addressing() -> AddressingMode {
    AddressingMode::Ipv4
}

/// One named, parameterized run of the scenario pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub link: LinkKind,
    #[serde(default)]
    pub plug: Plug,
    #[serde(default)]
    pub peer: Option<Peer>,
    #[serde(default = "default_addressing")]
    pub addressing: AddressingMode,
    #[serde(default)]
    pub privacy: Option<Ip6Privacy>,
    #[serde(default)]
    pub activation: Activation,
    #[serde(default)]
    pub expect: Expectation,
    /// Bitrate the discovered access point must advertise
    #[serde(default)]
    pub expected_bitrate: Option<u32>,
    #[serde(default)]
    pub fault: Option<Fault>,
}

impl Scenario {
    pub fn access_point(&self) -> Option<&AccessPointConfig> {
        match &self.peer {
            Some(Peer::AccessPoint(ap)) => Some(ap),
            _ => None,
        }
    }

    /// Authentication used for a manual activation
    pub fn auth(&self) -> Option<&Authentication> {
        match &self.activation {
            Activation::Manual { auth } => Some(auth),
            _ => None,
        }
    }

    pub fn needs_session_manager(&self) -> bool {
        self.fault == Some(Fault::Suspend)
    }

    pub fn needs_pki(&self) -> bool {
        self.access_point().is_some_and(AccessPointConfig::needs_pki)
    }

    /// Whether the daemon may auto-connect wired devices
    pub fn auto_connect(&self) -> bool {
        !(self.link == LinkKind::Ethernet && matches!(self.activation, Activation::Manual { .. }))
    }

    /// Reject combinations the pipeline cannot run
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::Config(format!("scenario '{}': {}", self.name, msg)));

        if self.name.trim().is_empty() {
            return Err(Error::Config("scenario without a name".into()));
        }
        match (self.link, &self.peer) {
            (LinkKind::Wifi, Some(Peer::Router)) => {
                return invalid("wireless scenarios need an access point peer")
            }
            (LinkKind::Ethernet, Some(Peer::AccessPoint(_))) => {
                return invalid("wired scenarios need a router peer")
            }
            _ => {}
        }
        if self.peer.is_none() && self.activation != Activation::None {
            return invalid("cannot activate without a peer");
        }
        if self.link == LinkKind::Wifi && self.activation == Activation::Auto {
            return invalid("wireless links are never auto-connected");
        }
        if let Some(auth) = self.auth() {
            if self.link == LinkKind::Ethernet && !auth.is_open() {
                return invalid("wired links carry no authentication");
            }
        }
        if self.fault.is_some() {
            if self.activation == Activation::None || self.expect != Expectation::Activated {
                return invalid("faults are injected into an activated session");
            }
            if self.link != LinkKind::Wifi {
                return invalid("faults are only supported on wireless links");
            }
        }
        if self.expected_bitrate.is_some() && self.access_point().is_none() {
            return invalid("expected bitrate without an access point");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::RouterMode;

    #[test]
    fn test_open_conf_blob() {
        let conf = AccessPointConfig::open(HwMode::B).to_hostapd_conf("fake net", Path::new("/tmp/hostapd"));
        assert_eq!(conf, "hw_mode=b\nchannel=1\nssid=fake net\n");
    }

    #[test]
    fn test_wpa1_conf_blob() {
        let conf = AccessPointConfig::open(HwMode::G)
            .with_security(ApSecurity::WpaPsk {
                version: WpaVersion::Wpa1,
                passphrase: "12345678".into(),
            })
            .to_hostapd_conf("fake net", Path::new("/tmp/hostapd"));
        assert!(conf.contains("wpa=1\nwpa_key_mgmt=WPA-PSK\nwpa_pairwise=TKIP\nwpa_passphrase=12345678\n"));
    }

    #[test]
    fn test_eap_conf_references_pki() {
        let conf = AccessPointConfig::open(HwMode::G)
            .with_security(ApSecurity::WpaEap {
                client_certificate: true,
            })
            .to_hostapd_conf("fake net", Path::new("/tmp/hostapd"));
        assert!(conf.contains("eap_user_file=/tmp/hostapd/hostapd.eap_user\n"));
        assert!(conf.contains("server_cert=/tmp/hostapd/pki/issued/server.crt\n"));
        assert!(conf.contains("rsn_pairwise=TKIP CCMP\n"));
    }

    #[test]
    fn test_yaml_scenario() {
        let yaml = r#"
name: lab-wpa2-ip6
link: wifi
peer:
  kind: access-point
  hw_mode: g
  security:
    mode: wpa-psk
    version: wpa2
    passphrase: "12345678"
addressing:
  family: ipv6
  router: ra-only
privacy: prefer-temporary
activation:
  mode: manual
  auth:
    method: pre-shared-key
    psk: "12345678"
expected_bitrate: 54000
"#;
        let scenario: Scenario = serde_yaml::from_str(yaml).unwrap();
        scenario.validate().unwrap();
        assert_eq!(
            scenario.addressing,
            AddressingMode::Ipv6 {
                router: RouterMode::RaOnly
            }
        );
        assert_eq!(scenario.plug, Plug::Coldplug);
        assert_eq!(scenario.expect, Expectation::Activated);
        assert!(scenario.access_point().unwrap().accepts_psk("12345678"));
    }

    #[test]
    fn test_validation_rejects_mismatched_peer() {
        let scenario = Scenario {
            name: "bad".into(),
            description: None,
            link: LinkKind::Ethernet,
            plug: Plug::Coldplug,
            peer: Some(Peer::AccessPoint(AccessPointConfig::open(HwMode::B))),
            addressing: AddressingMode::Ipv4,
            privacy: None,
            activation: Activation::Auto,
            expect: Expectation::Activated,
            expected_bitrate: None,
            fault: None,
        };
        assert!(scenario.validate().is_err());
    }
}
