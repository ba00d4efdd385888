//! Low-level state verifier
//!
//! Cross-checks what the daemon claims against what the kernel shows, using
//! the textual output of `ip` and `iw`. Mismatches fail the scenario
//! immediately; nothing here is retried.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;

use crate::common::{Error, Result};
use crate::profile::{AddressingMode, Ip6Privacy};
use crate::world::supervisor::run;

/// OS introspection the verifier relies on
#[async_trait]
pub trait Introspector: Send + Sync {
    /// Output of `ip a show dev <iface>`
    async fn addresses(&self, iface: &str) -> Result<String>;

    /// Output of `iw dev <iface> link`
    async fn wireless_link(&self, iface: &str) -> Result<String>;
}

/// Introspection through the iproute2 and iw command line tools
#[derive(Debug, Default, Clone, Copy)]
pub struct IpTools;

#[async_trait]
impl Introspector for IpTools {
    async fn addresses(&self, iface: &str) -> Result<String> {
        run("ip", &["a", "show", "dev", iface]).await
    }

    async fn wireless_link(&self, iface: &str) -> Result<String> {
        run("iw", &["dev", iface, "link"]).await
    }
}

/// Wireless link details checked alongside addressing
#[derive(Debug, Clone)]
pub struct WirelessLink {
    pub client: String,
    pub access_point: String,
    pub access_point_mac: String,
    pub ssid: String,
}

/// Address prefixes the emulated peer hands out
#[derive(Debug, Clone)]
pub struct Prefixes {
    /// First three octets, e.g. `192.168.5`
    pub ipv4: String,
    /// Routed prefix, e.g. `2600::`
    pub ipv6: String,
}

impl Prefixes {
    /// Leading group of the IPv6 prefix, matching both the compressed public
    /// address and temporary addresses
    fn ipv6_head(&self) -> &str {
        self.ipv6.split(':').next().unwrap_or(&self.ipv6)
    }
}

/// Patterns `ip a` output must and must not match after activation
pub fn expected_patterns(
    addressing: AddressingMode,
    privacy: Option<Ip6Privacy>,
    prefixes: &Prefixes,
) -> (Vec<String>, Vec<String>) {
    let v4 = regex::escape(&prefixes.ipv4);
    let v6 = regex::escape(&prefixes.ipv6);
    let head = regex::escape(prefixes.ipv6_head());

    let mut expected = Vec::new();
    let mut unexpected = Vec::new();
    match addressing {
        AddressingMode::Ipv4 => {
            expected.push(format!(r"inet {}\.\d+/24", v4));
            unexpected.push(format!(r"inet6 {}:", head));
        }
        AddressingMode::Ipv6 { router } => {
            if router.server_assigned() {
                expected.push(format!("inet6 {}[0-9a-f]+/", v6));
            } else {
                // Public address derived from the prefix and hardware address
                expected.push(format!(
                    r"inet6 {}[0-9a-f:]+/64 scope global (?:tentative )?(?:mngtmpaddr )?(?:noprefixroute )?(dynamic|\n\s*valid_lft forever preferred_lft forever)",
                    v6
                ));
                if privacy.is_some_and(Ip6Privacy::wants_temporary_address) {
                    expected.push(format!(
                        "inet6 {}:[0-9a-f:]+/64 scope global temporary (?:tentative )?(?:mngtmpaddr )?dynamic",
                        head
                    ));
                }
            }
            expected.push(r"inet6 fe80::[0-9a-f:]+/64 scope link".to_string());
            unexpected.push(format!(r"inet {}\.", v4));
        }
    }
    (expected, unexpected)
}

/// Checks interface state with an [`Introspector`]
#[derive(Clone)]
pub struct LinkVerifier {
    introspector: Arc<dyn Introspector>,
    prefixes: Prefixes,
    wireless: Option<WirelessLink>,
}

impl LinkVerifier {
    pub fn new(
        introspector: Arc<dyn Introspector>,
        prefixes: Prefixes,
        wireless: Option<WirelessLink>,
    ) -> Self {
        Self {
            introspector,
            prefixes,
            wireless,
        }
    }

    fn wireless_client(&self, iface: &str) -> Option<&WirelessLink> {
        self.wireless.as_ref().filter(|w| w.client == iface)
    }

    pub async fn assert_interface_up(
        &self,
        iface: &str,
        expected: &[String],
        unexpected: &[String],
    ) -> Result<()> {
        let out = self.introspector.addresses(iface).await?;
        if !out.contains("state UP") {
            return Err(Error::verification(iface, "link is not up", &out));
        }
        for pattern in expected {
            if !Regex::new(pattern)?.is_match(&out) {
                return Err(Error::verification(
                    iface,
                    format!("expected /{}/", pattern),
                    &out,
                ));
            }
        }
        for pattern in unexpected {
            if Regex::new(pattern)?.is_match(&out) {
                return Err(Error::verification(
                    iface,
                    format!("unexpected /{}/", pattern),
                    &out,
                ));
            }
        }

        if let Some(link) = self.wireless_client(iface) {
            let out = self.introspector.wireless_link(iface).await?;
            let connected = format!("Connected to {}", link.access_point_mac);
            if !out.contains(&connected) {
                return Err(Error::verification(
                    iface,
                    format!("not associated with {}", link.access_point_mac),
                    &out,
                ));
            }
            if !out.contains(&format!("SSID: {}", link.ssid)) {
                return Err(Error::verification(
                    iface,
                    format!("not associated with SSID '{}'", link.ssid),
                    &out,
                ));
            }
        }
        tracing::debug!(iface, "Interface is up as expected");
        Ok(())
    }

    pub async fn assert_interface_down(&self, iface: &str) -> Result<()> {
        let out = self.introspector.addresses(iface).await?;
        for leftover in [
            format!("inet {}", self.prefixes.ipv4),
            format!("inet6 {}", self.prefixes.ipv6_head()),
        ] {
            if out.contains(&leftover) {
                return Err(Error::verification(
                    iface,
                    format!("still has an address matching '{}'", leftover),
                    &out,
                ));
            }
        }

        if let Some(link) = self.wireless_client(iface) {
            let out = self.introspector.wireless_link(iface).await?;
            if !out.contains("Not connected") {
                return Err(Error::verification(iface, "still associated", &out));
            }

            // The daemon must never touch the access point side
            let ap = self.introspector.addresses(&link.access_point).await?;
            if !ap.contains("state UP") {
                return Err(Error::verification(
                    &link.access_point,
                    "access point interface went down",
                    &ap,
                ));
            }
        }
        tracing::debug!(iface, "Interface is down as expected");
        Ok(())
    }
}
