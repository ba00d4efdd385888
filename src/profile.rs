//! Declarative connection profiles
//!
//! A [`ConnectionProfile`] describes how to join a peer. It converts to and
//! from a backend-neutral [`SettingsMap`] (setting name → key → value), which
//! is what the daemon stores. Authentication is a closed set of variants that
//! each know their own setting name and required secrets.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONNECTION: &str = "connection";
pub const WIRELESS: &str = "802-11-wireless";
pub const WIRED: &str = "802-3-ethernet";
pub const WIRELESS_SECURITY: &str = "802-11-wireless-security";
pub const IEEE_8021X: &str = "802-1x";
pub const IPV4: &str = "ipv4";
pub const IPV6: &str = "ipv6";

/// Problems with a profile's settings
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProfileError {
    #[error("setting '{setting}' is missing key '{key}'")]
    MissingKey { setting: String, key: String },

    #[error("setting '{setting}' key '{key}' has invalid value {value}")]
    InvalidValue {
        setting: String,
        key: String,
        value: String,
    },

    #[error("profile is inconsistent: {0}")]
    Inconsistent(String),
}

fn missing(setting: &str, key: &str) -> ProfileError {
    ProfileError::MissingKey {
        setting: setting.to_string(),
        key: key.to_string(),
    }
}

fn invalid(setting: &str, key: &str, value: impl fmt::Debug) -> ProfileError {
    ProfileError::InvalidValue {
        setting: setting.to_string(),
        key: key.to_string(),
        value: format!("{:?}", value),
    }
}

/// A single settings value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingValue {
    Str(String),
    Int(i64),
    Bool(bool),
    StrList(Vec<String>),
    Bytes(Vec<u8>),
}

pub type Setting = BTreeMap<String, SettingValue>;

/// Setting name → key → value
pub type SettingsMap = BTreeMap<String, Setting>;

/// Physical link a profile applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    Wifi,
    Ethernet,
}

impl LinkKind {
    fn setting_name(self) -> &'static str {
        match self {
            Self::Wifi => WIRELESS,
            Self::Ethernet => WIRED,
        }
    }
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wifi => write!(f, "wifi"),
            Self::Ethernet => write!(f, "ethernet"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ipv4Method {
    Auto,
    Disabled,
}

impl Ipv4Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Disabled => "disabled",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(Self::Auto),
            "disabled" => Some(Self::Disabled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ipv6Method {
    Auto,
    Ignore,
}

impl Ipv6Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Ignore => "ignore",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(Self::Auto),
            "ignore" => Some(Self::Ignore),
            _ => None,
        }
    }
}

/// IPv6 privacy extensions (RFC 4941) preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Ip6Privacy {
    Unknown,
    Disabled,
    PreferPublic,
    PreferTemporary,
}

impl Ip6Privacy {
    pub fn as_raw(self) -> i64 {
        match self {
            Self::Unknown => -1,
            Self::Disabled => 0,
            Self::PreferPublic => 1,
            Self::PreferTemporary => 2,
        }
    }

    pub fn from_raw(raw: i64) -> Option<Self> {
        match raw {
            -1 => Some(Self::Unknown),
            0 => Some(Self::Disabled),
            1 => Some(Self::PreferPublic),
            2 => Some(Self::PreferTemporary),
            _ => None,
        }
    }

    /// Whether a temporary address is expected on the link
    pub fn wants_temporary_address(self) -> bool {
        matches!(self, Self::PreferPublic | Self::PreferTemporary)
    }
}

/// How the emulated router hands out IPv6 configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouterMode {
    /// Stateful DHCPv6
    Dhcp,
    RaOnly,
    Slaac,
    RaStateless,
}

impl RouterMode {
    /// Mode keyword of dnsmasq's `--dhcp-range`, `None` for plain DHCPv6
    pub fn dhcp_range_mode(self) -> Option<&'static str> {
        match self {
            Self::Dhcp => None,
            Self::RaOnly => Some("ra-only"),
            Self::Slaac => Some("slaac"),
            Self::RaStateless => Some("ra-stateless"),
        }
    }

    /// Whether the client gets its global address from the DHCP server
    /// rather than deriving it from its hardware address
    pub fn server_assigned(self) -> bool {
        matches!(self, Self::Dhcp | Self::Slaac)
    }
}

/// Address family a scenario exercises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "lowercase")]
pub enum AddressingMode {
    /// IPv4 via DHCP, IPv6 ignored
    Ipv4,
    /// IPv6 only, IPv4 disabled
    Ipv6 { router: RouterMode },
}

impl AddressingMode {
    pub fn methods(self) -> (Ipv4Method, Ipv6Method) {
        match self {
            Self::Ipv4 => (Ipv4Method::Auto, Ipv6Method::Ignore),
            Self::Ipv6 { .. } => (Ipv4Method::Disabled, Ipv6Method::Auto),
        }
    }

    pub fn is_ipv6(self) -> bool {
        matches!(self, Self::Ipv6 { .. })
    }
}

/// Certificate material for EAP-TLS
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCertificate {
    pub ca_cert: PathBuf,
    pub client_cert: PathBuf,
    pub private_key: PathBuf,
    #[serde(default)]
    pub private_key_password: Option<String>,
}

impl ClientCertificate {
    /// Material generated by easy-rsa under `pki_dir`
    pub fn from_pki(pki_dir: &Path, client: &str, password: Option<&str>) -> Self {
        let pki = pki_dir.join("pki");
        Self {
            ca_cert: pki.join("ca.crt"),
            client_cert: pki.join("issued").join(format!("{}.crt", client)),
            private_key: pki.join("private").join(format!("{}.key", client)),
            private_key_password: password.map(str::to_string),
        }
    }
}

/// Certificate paths are passed as NUL-terminated `file://` URIs
fn path_blob(path: &Path) -> SettingValue {
    SettingValue::Bytes(format!("file://{}\0", path.display()).into_bytes())
}

fn blob_path(setting: &str, key: &str, value: &SettingValue) -> Result<PathBuf, ProfileError> {
    let SettingValue::Bytes(bytes) = value else {
        return Err(invalid(setting, key, value));
    };
    let text = std::str::from_utf8(bytes).map_err(|_| invalid(setting, key, value))?;
    let text = text.trim_end_matches('\0');
    text.strip_prefix("file://")
        .map(PathBuf::from)
        .ok_or_else(|| invalid(setting, key, value))
}

/// How a client proves it may join the network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum Authentication {
    Open,
    PreSharedKey {
        #[serde(default)]
        psk: Option<String>,
    },
    Enterprise {
        /// Outer EAP methods, e.g. `peap` or `tls`
        eap: Vec<String>,
        /// Inner method, e.g. `mschapv2`; `tls` is an inner EAP method
        phase2: String,
        identity: String,
        #[serde(default)]
        password: Option<String>,
        #[serde(default)]
        client_certificate: Option<ClientCertificate>,
    },
}

impl Authentication {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Setting holding this method's secrets
    pub fn setting_name(&self) -> Option<&'static str> {
        match self {
            Self::Open => None,
            Self::PreSharedKey { .. } => Some(WIRELESS_SECURITY),
            Self::Enterprise { .. } => Some(IEEE_8021X),
        }
    }

    pub fn key_mgmt(&self) -> Option<&'static str> {
        match self {
            Self::Open => None,
            Self::PreSharedKey { .. } => Some("wpa-psk"),
            Self::Enterprise { .. } => Some("wpa-eap"),
        }
    }

    /// Secrets this method cannot work without
    pub fn required_secrets(&self) -> &'static [&'static str] {
        match self {
            Self::Open => &[],
            Self::PreSharedKey { .. } => &["psk"],
            Self::Enterprise {
                client_certificate: Some(_),
                ..
            } => &["private-key-password"],
            Self::Enterprise { .. } => &["password"],
        }
    }

    /// Required secrets that are absent from this value
    pub fn missing_secrets(&self) -> Vec<&'static str> {
        match self {
            Self::Open => Vec::new(),
            Self::PreSharedKey { psk } => {
                if psk.is_some() {
                    Vec::new()
                } else {
                    vec!["psk"]
                }
            }
            Self::Enterprise {
                password,
                client_certificate,
                ..
            } => match client_certificate {
                Some(cert) if cert.private_key_password.is_none() => vec!["private-key-password"],
                Some(_) => Vec::new(),
                None if password.is_none() => vec!["password"],
                None => Vec::new(),
            },
        }
    }

    /// Copy with all secrets removed, as the daemon hands profiles out
    pub fn without_secrets(&self) -> Self {
        match self {
            Self::Open => Self::Open,
            Self::PreSharedKey { .. } => Self::PreSharedKey { psk: None },
            Self::Enterprise {
                eap,
                phase2,
                identity,
                client_certificate,
                ..
            } => Self::Enterprise {
                eap: eap.clone(),
                phase2: phase2.clone(),
                identity: identity.clone(),
                password: None,
                client_certificate: client_certificate.as_ref().map(|c| ClientCertificate {
                    private_key_password: None,
                    ..c.clone()
                }),
            },
        }
    }

    fn write_settings(&self, map: &mut SettingsMap) {
        let Some(key_mgmt) = self.key_mgmt() else {
            return;
        };
        let security = map.entry(WIRELESS_SECURITY.to_string()).or_default();
        security.insert("key-mgmt".into(), SettingValue::Str(key_mgmt.into()));

        match self {
            Self::Open => {}
            Self::PreSharedKey { psk } => {
                if let Some(psk) = psk {
                    security.insert("psk".into(), SettingValue::Str(psk.clone()));
                }
            }
            Self::Enterprise {
                eap,
                phase2,
                identity,
                password,
                client_certificate,
            } => {
                let dot1x = map.entry(IEEE_8021X.to_string()).or_default();
                dot1x.insert("eap".into(), SettingValue::StrList(eap.clone()));
                dot1x.insert("identity".into(), SettingValue::Str(identity.clone()));
                if let Some(password) = password {
                    dot1x.insert("password".into(), SettingValue::Str(password.clone()));
                }
                let phase2_key = if phase2 == "tls" {
                    "phase2-autheap"
                } else {
                    "phase2-auth"
                };
                dot1x.insert(phase2_key.into(), SettingValue::Str(phase2.clone()));
                if let Some(cert) = client_certificate {
                    dot1x.insert("ca-cert".into(), path_blob(&cert.ca_cert));
                    dot1x.insert("client-cert".into(), path_blob(&cert.client_cert));
                    dot1x.insert("private-key".into(), path_blob(&cert.private_key));
                    if let Some(password) = &cert.private_key_password {
                        dot1x.insert(
                            "private-key-password".into(),
                            SettingValue::Str(password.clone()),
                        );
                    }
                }
            }
        }
    }

    fn read_settings(map: &SettingsMap) -> Result<Self, ProfileError> {
        let Some(security) = map.get(WIRELESS_SECURITY) else {
            return Ok(Self::Open);
        };
        let key_mgmt = get_str(security, WIRELESS_SECURITY, "key-mgmt")?;
        match key_mgmt.as_str() {
            "wpa-psk" => Ok(Self::PreSharedKey {
                psk: opt_str(security, WIRELESS_SECURITY, "psk")?,
            }),
            "wpa-eap" => {
                let dot1x = map
                    .get(IEEE_8021X)
                    .ok_or_else(|| missing(IEEE_8021X, "eap"))?;
                let eap = match dot1x.get("eap") {
                    Some(SettingValue::StrList(list)) => list.clone(),
                    Some(other) => return Err(invalid(IEEE_8021X, "eap", other)),
                    None => return Err(missing(IEEE_8021X, "eap")),
                };
                let phase2 = match opt_str(dot1x, IEEE_8021X, "phase2-autheap")? {
                    Some(p) => p,
                    None => opt_str(dot1x, IEEE_8021X, "phase2-auth")?.unwrap_or_default(),
                };
                let client_certificate = match dot1x.get("client-cert") {
                    Some(value) => Some(ClientCertificate {
                        ca_cert: match dot1x.get("ca-cert") {
                            Some(v) => blob_path(IEEE_8021X, "ca-cert", v)?,
                            None => PathBuf::new(),
                        },
                        client_cert: blob_path(IEEE_8021X, "client-cert", value)?,
                        private_key: match dot1x.get("private-key") {
                            Some(v) => blob_path(IEEE_8021X, "private-key", v)?,
                            None => return Err(missing(IEEE_8021X, "private-key")),
                        },
                        private_key_password: opt_str(dot1x, IEEE_8021X, "private-key-password")?,
                    }),
                    None => None,
                };
                Ok(Self::Enterprise {
                    eap,
                    phase2,
                    identity: get_str(dot1x, IEEE_8021X, "identity")?,
                    password: opt_str(dot1x, IEEE_8021X, "password")?,
                    client_certificate,
                })
            }
            other => Err(invalid(WIRELESS_SECURITY, "key-mgmt", other)),
        }
    }
}

fn get_str(setting: &Setting, name: &str, key: &str) -> Result<String, ProfileError> {
    opt_str(setting, name, key)?.ok_or_else(|| missing(name, key))
}

fn opt_str(setting: &Setting, name: &str, key: &str) -> Result<Option<String>, ProfileError> {
    match setting.get(key) {
        None => Ok(None),
        Some(SettingValue::Str(s)) => Ok(Some(s.clone())),
        Some(other) => Err(invalid(name, key, other)),
    }
}

/// A declarative description of how to join a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionProfile {
    /// Human-readable name, filled in by the daemon when left empty
    pub id: String,
    pub uuid: String,
    pub link: LinkKind,
    /// Network name for wireless profiles, filled in from the peer when empty
    pub ssid: Option<String>,
    pub hidden: bool,
    pub ipv4: Ipv4Method,
    pub ipv6: Ipv6Method,
    pub ip6_privacy: Option<Ip6Privacy>,
    pub auth: Authentication,
}

impl ConnectionProfile {
    /// A partial profile the daemon completes on create-and-activate
    pub fn partial(
        link: LinkKind,
        addressing: AddressingMode,
        ip6_privacy: Option<Ip6Privacy>,
        auth: Authentication,
    ) -> Self {
        let (ipv4, ipv6) = addressing.methods();
        Self {
            id: String::new(),
            uuid: String::new(),
            link,
            ssid: None,
            hidden: false,
            ipv4,
            ipv6,
            ip6_privacy,
            auth,
        }
    }

    /// Setting that still needs secrets, and which ones
    ///
    /// `None` for open networks.
    pub fn needed_secrets(&self) -> Option<(&'static str, Vec<&'static str>)> {
        let setting = self.auth.setting_name()?;
        Some((setting, self.auth.missing_secrets()))
    }

    /// Check internal consistency of a complete profile
    pub fn verify(&self) -> Result<(), ProfileError> {
        if self.id.is_empty() {
            return Err(ProfileError::Inconsistent("profile has no name".into()));
        }
        if self.uuid.is_empty() {
            return Err(ProfileError::Inconsistent("profile has no UUID".into()));
        }
        match self.link {
            LinkKind::Wifi => {
                if self.ssid.as_deref().map_or(true, str::is_empty) {
                    return Err(ProfileError::Inconsistent(
                        "wireless profile has no SSID".into(),
                    ));
                }
            }
            LinkKind::Ethernet => {
                if !self.auth.is_open() {
                    return Err(ProfileError::Inconsistent(
                        "wired profile carries wireless security".into(),
                    ));
                }
            }
        }
        if let Authentication::Enterprise { eap, identity, .. } = &self.auth {
            if eap.is_empty() {
                return Err(ProfileError::Inconsistent("802.1x without EAP method".into()));
            }
            if identity.is_empty() {
                return Err(ProfileError::Inconsistent("802.1x without identity".into()));
            }
        }
        Ok(())
    }

    pub fn to_settings(&self) -> SettingsMap {
        let mut map = SettingsMap::new();

        let connection = map.entry(CONNECTION.to_string()).or_default();
        if !self.id.is_empty() {
            connection.insert("id".into(), SettingValue::Str(self.id.clone()));
        }
        if !self.uuid.is_empty() {
            connection.insert("uuid".into(), SettingValue::Str(self.uuid.clone()));
        }
        connection.insert(
            "type".into(),
            SettingValue::Str(self.link.setting_name().into()),
        );

        let link = map.entry(self.link.setting_name().to_string()).or_default();
        if self.link == LinkKind::Wifi {
            if let Some(ssid) = &self.ssid {
                link.insert("ssid".into(), SettingValue::Bytes(ssid.as_bytes().to_vec()));
            }
            link.insert("hidden".into(), SettingValue::Bool(self.hidden));
        }

        map.entry(IPV4.to_string()).or_default().insert(
            "method".into(),
            SettingValue::Str(self.ipv4.as_str().into()),
        );
        let ipv6 = map.entry(IPV6.to_string()).or_default();
        ipv6.insert("method".into(), SettingValue::Str(self.ipv6.as_str().into()));
        if let Some(privacy) = self.ip6_privacy {
            ipv6.insert("ip6-privacy".into(), SettingValue::Int(privacy.as_raw()));
        }

        self.auth.write_settings(&mut map);
        map
    }

    pub fn from_settings(map: &SettingsMap) -> Result<Self, ProfileError> {
        let connection = map
            .get(CONNECTION)
            .ok_or_else(|| missing(CONNECTION, "type"))?;
        let link = match get_str(connection, CONNECTION, "type")?.as_str() {
            WIRELESS => LinkKind::Wifi,
            WIRED | "veth" => LinkKind::Ethernet,
            other => return Err(invalid(CONNECTION, "type", other)),
        };

        let (ssid, hidden) = match map.get(WIRELESS) {
            Some(wireless) => {
                let ssid = match wireless.get("ssid") {
                    Some(SettingValue::Bytes(b)) => Some(String::from_utf8_lossy(b).into_owned()),
                    Some(other) => return Err(invalid(WIRELESS, "ssid", other)),
                    None => None,
                };
                let hidden = match wireless.get("hidden") {
                    Some(SettingValue::Bool(b)) => *b,
                    Some(other) => return Err(invalid(WIRELESS, "hidden", other)),
                    None => false,
                };
                (ssid, hidden)
            }
            None => (None, false),
        };

        let ipv4 = match map.get(IPV4).map(|s| opt_str(s, IPV4, "method")).transpose()? {
            Some(Some(m)) => Ipv4Method::parse(&m).ok_or_else(|| invalid(IPV4, "method", &m))?,
            _ => Ipv4Method::Auto,
        };
        let (ipv6, ip6_privacy) = match map.get(IPV6) {
            Some(setting) => {
                let method = match opt_str(setting, IPV6, "method")? {
                    Some(m) => {
                        Ipv6Method::parse(&m).ok_or_else(|| invalid(IPV6, "method", &m))?
                    }
                    None => Ipv6Method::Auto,
                };
                let privacy = match setting.get("ip6-privacy") {
                    Some(SettingValue::Int(raw)) => Some(
                        Ip6Privacy::from_raw(*raw)
                            .ok_or_else(|| invalid(IPV6, "ip6-privacy", raw))?,
                    ),
                    Some(other) => return Err(invalid(IPV6, "ip6-privacy", other)),
                    None => None,
                };
                (method, privacy)
            }
            None => (Ipv6Method::Auto, None),
        };

        Ok(Self {
            id: opt_str(connection, CONNECTION, "id")?.unwrap_or_default(),
            uuid: opt_str(connection, CONNECTION, "uuid")?.unwrap_or_default(),
            link,
            ssid,
            hidden,
            ipv4,
            ipv6,
            ip6_privacy,
            auth: Authentication::read_settings(map)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(mut profile: ConnectionProfile) -> ConnectionProfile {
        profile.id = "fake net".into();
        profile.uuid = "6f1c7b0e-4c1a-4c83-9a52-1b2c3d4e5f60".into();
        if profile.link == LinkKind::Wifi {
            profile.ssid = Some("fake net".into());
        }
        profile
    }

    fn peap() -> Authentication {
        Authentication::Enterprise {
            eap: vec!["peap".into()],
            phase2: "mschapv2".into(),
            identity: "account1".into(),
            password: Some("password1".into()),
            client_certificate: None,
        }
    }

    #[test]
    fn test_open_profile_needs_no_secrets() {
        let profile = ConnectionProfile::partial(
            LinkKind::Wifi,
            AddressingMode::Ipv4,
            None,
            Authentication::Open,
        );
        assert_eq!(profile.needed_secrets(), None);
        assert!(!profile.to_settings().contains_key(WIRELESS_SECURITY));
    }

    #[test]
    fn test_stored_psk_profile_reports_missing_key() {
        let auth = Authentication::PreSharedKey {
            psk: Some("12345678".into()),
        };
        let stored = ConnectionProfile {
            auth: auth.without_secrets(),
            ..complete(ConnectionProfile::partial(
                LinkKind::Wifi,
                AddressingMode::Ipv4,
                None,
                auth,
            ))
        };
        let (setting, secrets) = stored.needed_secrets().unwrap();
        assert_eq!(setting, WIRELESS_SECURITY);
        assert_eq!(secrets, vec!["psk"]);
    }

    #[test]
    fn test_enterprise_required_secrets_depend_on_certificate() {
        assert_eq!(peap().required_secrets(), &["password"]);
        let tls = Authentication::Enterprise {
            eap: vec!["tls".into()],
            phase2: "tls".into(),
            identity: "client".into(),
            password: None,
            client_certificate: Some(ClientCertificate::from_pki(
                Path::new("/tmp/hostapd"),
                "client",
                Some("passw0rd"),
            )),
        };
        assert_eq!(tls.required_secrets(), &["private-key-password"]);
        assert!(tls.missing_secrets().is_empty());
        assert_eq!(tls.without_secrets().missing_secrets(), vec!["private-key-password"]);
        assert_eq!(tls.setting_name(), Some(IEEE_8021X));
    }

    #[test]
    fn test_tls_phase2_and_certificate_blobs() {
        let auth = Authentication::Enterprise {
            eap: vec!["tls".into()],
            phase2: "tls".into(),
            identity: "client".into(),
            password: None,
            client_certificate: Some(ClientCertificate::from_pki(
                Path::new("/tmp/hostapd"),
                "client",
                Some("passw0rd"),
            )),
        };
        let profile = complete(ConnectionProfile::partial(
            LinkKind::Wifi,
            AddressingMode::Ipv4,
            None,
            auth,
        ));
        let settings = profile.to_settings();
        let dot1x = &settings[IEEE_8021X];
        assert_eq!(
            dot1x.get("phase2-autheap"),
            Some(&SettingValue::Str("tls".into()))
        );
        assert!(!dot1x.contains_key("phase2-auth"));
        assert_eq!(
            dot1x.get("client-cert"),
            Some(&SettingValue::Bytes(
                b"file:///tmp/hostapd/pki/issued/client.crt\0".to_vec()
            ))
        );
        assert_eq!(ConnectionProfile::from_settings(&settings).unwrap(), profile);
    }

    #[test]
    fn test_ipv6_profile_settings() {
        let profile = ConnectionProfile::partial(
            LinkKind::Ethernet,
            AddressingMode::Ipv6 {
                router: RouterMode::RaOnly,
            },
            Some(Ip6Privacy::PreferTemporary),
            Authentication::Open,
        );
        let settings = profile.to_settings();
        assert_eq!(
            settings[IPV4].get("method"),
            Some(&SettingValue::Str("disabled".into()))
        );
        assert_eq!(
            settings[IPV6].get("ip6-privacy"),
            Some(&SettingValue::Int(2))
        );
        assert!(settings.contains_key(WIRED));
    }

    #[test]
    fn test_verify_catches_inconsistencies() {
        let wifi = complete(ConnectionProfile::partial(
            LinkKind::Wifi,
            AddressingMode::Ipv4,
            None,
            peap(),
        ));
        assert!(wifi.verify().is_ok());

        let no_ssid = ConnectionProfile {
            ssid: None,
            ..wifi.clone()
        };
        assert!(no_ssid.verify().is_err());

        let wired_psk = ConnectionProfile {
            link: LinkKind::Ethernet,
            auth: Authentication::PreSharedKey { psk: None },
            ..wifi
        };
        assert!(wired_psk.verify().is_err());

        let partial = ConnectionProfile::partial(
            LinkKind::Ethernet,
            AddressingMode::Ipv4,
            None,
            Authentication::Open,
        );
        assert!(partial.verify().is_err());
    }

    #[test]
    fn test_unknown_key_mgmt_is_rejected() {
        let mut settings = complete(ConnectionProfile::partial(
            LinkKind::Wifi,
            AddressingMode::Ipv4,
            None,
            Authentication::PreSharedKey { psk: None },
        ))
        .to_settings();
        settings
            .get_mut(WIRELESS_SECURITY)
            .unwrap()
            .insert("key-mgmt".into(), SettingValue::Str("sae".into()));
        assert!(matches!(
            ConnectionProfile::from_settings(&settings),
            Err(ProfileError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_router_modes() {
        assert_eq!(RouterMode::Dhcp.dhcp_range_mode(), None);
        assert_eq!(RouterMode::RaOnly.dhcp_range_mode(), Some("ra-only"));
        assert!(RouterMode::Slaac.server_assigned());
        assert!(!RouterMode::RaStateless.server_assigned());
    }
}
