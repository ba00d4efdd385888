//! Built-in scenarios and scenario files

use std::path::Path;

use super::model::{
    AccessPointConfig, Activation, ApSecurity, Expectation, Fault, HwMode, Peer, Plug, Scenario,
    WpaVersion,
};
use crate::common::{paths, Error, Result};
use crate::profile::{
    AddressingMode, Authentication, ClientCertificate, Ip6Privacy, LinkKind, RouterMode,
};
use crate::world::pki;

const PSK: &str = "12345678";

fn base(name: &str, description: &str, link: LinkKind) -> Scenario {
    Scenario {
        name: name.to_string(),
        description: Some(description.to_string()),
        link,
        plug: Plug::Coldplug,
        peer: None,
        addressing: AddressingMode::Ipv4,
        privacy: None,
        activation: Activation::None,
        expect: Expectation::Activated,
        expected_bitrate: None,
        fault: None,
    }
}

fn ipv6(router: RouterMode) -> AddressingMode {
    AddressingMode::Ipv6 { router }
}

fn wifi(
    name: &str,
    description: &str,
    ap: AccessPointConfig,
    addressing: AddressingMode,
    privacy: Option<Ip6Privacy>,
    auth: Authentication,
) -> Scenario {
    Scenario {
        expected_bitrate: Some(ap.hw_mode.max_bitrate()),
        peer: Some(Peer::AccessPoint(ap)),
        addressing,
        privacy,
        activation: Activation::Manual { auth },
        ..base(name, description, LinkKind::Wifi)
    }
}

fn wpa(version: WpaVersion) -> AccessPointConfig {
    AccessPointConfig::open(HwMode::G).with_security(ApSecurity::WpaPsk {
        version,
        passphrase: PSK.to_string(),
    })
}

fn psk(key: &str) -> Authentication {
    Authentication::PreSharedKey {
        psk: Some(key.to_string()),
    }
}

fn ethernet(
    name: &str,
    description: &str,
    activation: Activation,
    addressing: AddressingMode,
    privacy: Option<Ip6Privacy>,
) -> Scenario {
    Scenario {
        peer: Some(Peer::Router),
        addressing,
        privacy,
        activation,
        ..base(name, description, LinkKind::Ethernet)
    }
}

fn manual_open() -> Activation {
    Activation::Manual {
        auth: Authentication::Open,
    }
}

fn peap() -> Authentication {
    let (user, password) = pki::ACCOUNTS[0];
    Authentication::Enterprise {
        eap: vec!["peap".into()],
        phase2: "mschapv2".into(),
        identity: user.to_string(),
        password: Some(password.to_string()),
        client_certificate: None,
    }
}

fn tls() -> Authentication {
    Authentication::Enterprise {
        eap: vec!["tls".into()],
        phase2: "tls".into(),
        identity: pki::CLIENT.to_string(),
        password: None,
        client_certificate: Some(ClientCertificate::from_pki(
            &paths::pki_dir(),
            pki::CLIENT,
            Some(pki::KEY_PASSWORD),
        )),
    }
}

/// Every built-in scenario, in run order
pub fn builtin() -> Vec<Scenario> {
    let open_b = || AccessPointConfig::open(HwMode::B);
    let mut all = vec![
        base("wifi-no-ap", "Wifi device without any access point around", LinkKind::Wifi),
        wifi(
            "wifi-open-b-ip4",
            "Open 802.11b network, IPv4",
            open_b(),
            AddressingMode::Ipv4,
            None,
            Authentication::Open,
        ),
        wifi(
            "wifi-open-b-ip6-raonly-tmpaddr",
            "Open 802.11b network, IPv6 with only RA, preferring temporary address",
            open_b(),
            ipv6(RouterMode::RaOnly),
            Some(Ip6Privacy::PreferTemporary),
            Authentication::Open,
        ),
        wifi(
            "wifi-open-b-ip6-raonly-pubaddr",
            "Open 802.11b network, IPv6 with only RA, preferring public address",
            open_b(),
            ipv6(RouterMode::RaOnly),
            Some(Ip6Privacy::PreferPublic),
            Authentication::Open,
        ),
        wifi(
            "wifi-open-b-ip6-raonly-no-pe",
            "Open 802.11b network, IPv6 with only RA, privacy disabled",
            open_b(),
            ipv6(RouterMode::RaOnly),
            Some(Ip6Privacy::Disabled),
            Authentication::Open,
        ),
        wifi(
            "wifi-open-b-ip6-dhcp",
            "Open 802.11b network, IPv6 with DHCP, privacy unspecified",
            open_b(),
            ipv6(RouterMode::Dhcp),
            Some(Ip6Privacy::Unknown),
            Authentication::Open,
        ),
        wifi(
            "wifi-open-g-ip4",
            "Open 802.11g network, IPv4",
            AccessPointConfig::open(HwMode::G),
            AddressingMode::Ipv4,
            None,
            Authentication::Open,
        ),
        wifi(
            "wifi-wpa1-ip4",
            "WPA1 protected network, IPv4",
            wpa(WpaVersion::Wpa1),
            AddressingMode::Ipv4,
            None,
            psk(PSK),
        ),
        wifi(
            "wifi-wpa2-ip4",
            "WPA2 protected network, IPv4",
            wpa(WpaVersion::Wpa2),
            AddressingMode::Ipv4,
            None,
            psk(PSK),
        ),
        wifi(
            "wifi-wpa2-ip6",
            "WPA2 protected network, IPv6 with only RA",
            wpa(WpaVersion::Wpa2),
            ipv6(RouterMode::RaOnly),
            Some(Ip6Privacy::PreferTemporary),
            psk(PSK),
        ),
        Scenario {
            expect: Expectation::NotActivated,
            ..wifi(
                "wifi-wpa2-wrong-key",
                "WPA2 protected network with the wrong key must not activate",
                wpa(WpaVersion::Wpa2),
                AddressingMode::Ipv4,
                None,
                psk("87654321"),
            )
        },
        wifi(
            "wifi-eap-peap-ip4",
            "WPA2 enterprise network with PEAP/MSCHAPv2, IPv4",
            AccessPointConfig::open(HwMode::G).with_security(ApSecurity::WpaEap {
                client_certificate: false,
            }),
            AddressingMode::Ipv4,
            None,
            peap(),
        ),
        wifi(
            "wifi-eap-tls-ip4",
            "WPA2 enterprise network with TLS client certificate, IPv4",
            AccessPointConfig::open(HwMode::G).with_security(ApSecurity::WpaEap {
                client_certificate: true,
            }),
            AddressingMode::Ipv4,
            None,
            tls(),
        ),
        Scenario {
            fault: Some(Fault::KillSwitch),
            ..wifi(
                "wifi-rfkill",
                "Kill switch takes the connection down and back up",
                open_b(),
                AddressingMode::Ipv4,
                None,
                Authentication::Open,
            )
        },
        ethernet(
            "eth-auto-ip4",
            "Wired auto-connection, IPv4",
            Activation::Auto,
            AddressingMode::Ipv4,
            None,
        ),
        ethernet(
            "eth-auto-ip6-raonly-no-pe",
            "Wired auto-connection, IPv6 with only RA, privacy disabled",
            Activation::Auto,
            ipv6(RouterMode::RaOnly),
            Some(Ip6Privacy::Disabled),
        ),
        ethernet(
            "eth-auto-ip6-dhcp",
            "Wired auto-connection, IPv6 with DHCP",
            Activation::Auto,
            ipv6(RouterMode::Dhcp),
            Some(Ip6Privacy::Unknown),
        ),
        ethernet(
            "eth-manual-ip4",
            "Wired manual connection, IPv4",
            manual_open(),
            AddressingMode::Ipv4,
            None,
        ),
        ethernet(
            "eth-manual-ip6-raonly-tmpaddr",
            "Wired manual connection, IPv6 with only RA, preferring temporary address",
            manual_open(),
            ipv6(RouterMode::RaOnly),
            Some(Ip6Privacy::PreferTemporary),
        ),
        ethernet(
            "eth-manual-ip6-raonly-pubaddr",
            "Wired manual connection, IPv6 with only RA, preferring public address",
            manual_open(),
            ipv6(RouterMode::RaOnly),
            Some(Ip6Privacy::PreferPublic),
        ),
        Scenario {
            plug: Plug::Hotplug,
            peer: Some(Peer::AccessPoint(open_b())),
            ..base(
                "hotplug-wifi-ap",
                "Access point appearing after the daemon started is discovered",
                LinkKind::Wifi,
            )
        },
        Scenario {
            plug: Plug::Hotplug,
            ..ethernet(
                "hotplug-eth",
                "Router appearing after the daemon started is auto-connected",
                Activation::Auto,
                AddressingMode::Ipv4,
                None,
            )
        },
    ];

    for (name, description, addressing, privacy) in [
        (
            "suspend-wifi-ip4",
            "Suspend and resume an open wifi connection, IPv4",
            AddressingMode::Ipv4,
            None,
        ),
        (
            "suspend-wifi-ip6",
            "Suspend and resume an open wifi connection, IPv6 with only RA",
            ipv6(RouterMode::RaOnly),
            None,
        ),
    ] {
        all.push(Scenario {
            fault: Some(Fault::Suspend),
            ..wifi(name, description, open_b(), addressing, privacy, Authentication::Open)
        });
    }
    all
}

/// Look up a built-in scenario by name
pub fn find(name: &str) -> Result<Scenario> {
    builtin()
        .into_iter()
        .find(|s| s.name == name)
        .ok_or_else(|| Error::UnknownScenario(name.to_string()))
}

/// Load a YAML list of scenarios
pub fn load_file(path: &Path) -> Result<Vec<Scenario>> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;
    let scenarios: Vec<Scenario> = serde_yaml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
    for scenario in &scenarios {
        scenario.validate()?;
    }
    Ok(scenarios)
}

/// Scenarios from `file` if given, the built-in catalog otherwise
pub fn available(file: Option<&Path>) -> Result<Vec<Scenario>> {
    match file {
        Some(path) => load_file(path),
        None => Ok(builtin()),
    }
}

/// Resolve `names` against the available scenarios; all of them if empty
pub fn select(file: Option<&Path>, names: &[String]) -> Result<Vec<Scenario>> {
    let all = available(file)?;
    if names.is_empty() {
        return Ok(all);
    }
    names
        .iter()
        .map(|name| {
            all.iter()
                .find(|s| &s.name == name)
                .cloned()
                .ok_or_else(|| Error::UnknownScenario(name.clone()))
        })
        .collect()
}
