//! `ip` and `iw` output rendered from the simulated interfaces

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;

use super::network::{LinkState, SimulatedNetwork};
use crate::common::{Error, Result};
use crate::profile::{AddressingMode, RouterMode};
use crate::verify::{Introspector, Prefixes};

pub struct SimulatedLinks {
    network: Arc<SimulatedNetwork>,
    prefixes: Prefixes,
    access_point_mac: String,
}

impl SimulatedLinks {
    pub fn new(network: Arc<SimulatedNetwork>, prefixes: Prefixes, access_point_mac: &str) -> Self {
        Self {
            network,
            prefixes,
            access_point_mac: access_point_mac.to_string(),
        }
    }

    fn link(&self, iface: &str, tool: &str) -> Result<LinkState> {
        self.network
            .link_state(iface)
            .ok_or_else(|| Error::CommandFailed {
                command: format!("{} {}", tool, iface),
                code: Some(1),
                stderr: format!("Device \"{}\" does not exist.", iface),
            })
    }
}

/// Render `ip a show dev` output for one interface
pub fn render_addresses(iface: &str, link: &LinkState, prefixes: &Prefixes) -> String {
    let (v4, v6) = (&prefixes.ipv4, &prefixes.ipv6);
    let mut out = String::new();
    if link.up {
        let _ = writeln!(
            out,
            "{}: {}: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc mq state UP group default qlen 1000",
            link.index, iface
        );
    } else {
        let _ = writeln!(
            out,
            "{}: {}: <BROADCAST,MULTICAST> mtu 1500 qdisc noop state DOWN group default qlen 1000",
            link.index, iface
        );
    }
    let _ = writeln!(out, "    link/ether {} brd ff:ff:ff:ff:ff:ff", link.mac);

    match link.peer {
        Some(AddressingMode::Ipv4) => {
            let _ = writeln!(out, "    inet {v4}.1/24 brd {v4}.255 scope global {iface}");
            let _ = writeln!(out, "       valid_lft forever preferred_lft forever");
        }
        Some(AddressingMode::Ipv6 { .. }) => {
            let _ = writeln!(out, "    inet6 {v6}1/64 scope global ");
            let _ = writeln!(out, "       valid_lft forever preferred_lft forever");
        }
        None => {}
    }
    if link.ipv4 {
        let _ = writeln!(
            out,
            "    inet {v4}.{}/24 brd {v4}.255 scope global dynamic noprefixroute {iface}",
            100 + link.index
        );
        let _ = writeln!(out, "       valid_lft 3599sec preferred_lft 3599sec");
    }
    if let Some((router, privacy)) = link.ipv6 {
        if router.server_assigned() {
            let _ = writeln!(
                out,
                "    inet6 {v6}{:x}/128 scope global dynamic noprefixroute ",
                0x10 + link.index
            );
            let _ = writeln!(out, "       valid_lft 3599sec preferred_lft 3599sec");
        } else if privacy.is_some_and(|p| p.wants_temporary_address()) {
            let _ = writeln!(
                out,
                "    inet6 {v6}5c1e:a1b2:c3d4:{:x}/64 scope global temporary dynamic ",
                link.index
            );
            let _ = writeln!(out, "       valid_lft 604794sec preferred_lft 86394sec");
        }
        if router != RouterMode::Dhcp {
            let _ = writeln!(
                out,
                "    inet6 {v6}ff:fe00:{:x}/64 scope global dynamic mngtmpaddr noprefixroute ",
                link.index
            );
            let _ = writeln!(out, "       valid_lft 86399sec preferred_lft 14399sec");
        }
    }
    if link.up {
        let _ = writeln!(out, "    inet6 fe80::ff:fe00:{:x}/64 scope link ", link.index);
        let _ = writeln!(out, "       valid_lft forever preferred_lft forever");
    }
    out
}

#[async_trait]
impl Introspector for SimulatedLinks {
    async fn addresses(&self, iface: &str) -> Result<String> {
        let link = self.link(iface, "ip a show dev")?;
        Ok(render_addresses(iface, &link, &self.prefixes))
    }

    async fn wireless_link(&self, iface: &str) -> Result<String> {
        let link = self.link(iface, "iw dev")?;
        match (link.associated, self.network.ssid()) {
            (true, Some(ssid)) => Ok(format!(
                "Connected to {} (on {})\n\tSSID: {}\n\tfreq: 2412\n",
                self.access_point_mac, iface, ssid
            )),
            _ => Ok("Not connected.\n".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Ip6Privacy;
    use crate::verify::expected_patterns;
    use regex::Regex;

    fn prefixes() -> Prefixes {
        Prefixes {
            ipv4: "192.168.5".into(),
            ipv6: "2600::".into(),
        }
    }

    fn assert_matches(out: &str, addressing: AddressingMode, privacy: Option<Ip6Privacy>) {
        let (expected, unexpected) = expected_patterns(addressing, privacy, &prefixes());
        for pattern in expected {
            assert!(Regex::new(&pattern).unwrap().is_match(out), "{} missing in\n{}", pattern, out);
        }
        for pattern in unexpected {
            assert!(!Regex::new(&pattern).unwrap().is_match(out), "{} present in\n{}", pattern, out);
        }
    }

    #[test]
    fn test_ipv4_rendering_satisfies_patterns() {
        let link = LinkState {
            index: 3,
            up: true,
            mac: "02:00:00:00:01:00".into(),
            ipv4: true,
            ..LinkState::default()
        };
        let out = render_addresses("wlan1", &link, &prefixes());
        assert!(out.contains("state UP"));
        assert_matches(&out, AddressingMode::Ipv4, None);
    }

    #[test]
    fn test_ipv6_rendering_satisfies_patterns_for_every_router_mode() {
        for router in [
            RouterMode::Dhcp,
            RouterMode::RaOnly,
            RouterMode::Slaac,
            RouterMode::RaStateless,
        ] {
            for privacy in [Ip6Privacy::Disabled, Ip6Privacy::PreferTemporary] {
                let link = LinkState {
                    index: 4,
                    up: true,
                    mac: "0e:42:00:00:00:01".into(),
                    ipv6: Some((router, Some(privacy))),
                    ..LinkState::default()
                };
                let out = render_addresses("eth42", &link, &prefixes());
                assert_matches(&out, AddressingMode::Ipv6 { router }, Some(privacy));
            }
        }
    }

    #[test]
    fn test_down_link_has_no_addresses() {
        let link = LinkState {
            index: 3,
            mac: "02:00:00:00:01:00".into(),
            ..LinkState::default()
        };
        let out = render_addresses("wlan1", &link, &prefixes());
        assert!(out.contains("state DOWN"));
        assert!(!out.contains("inet"));
    }
}
