//! Environment capability detection
//!
//! Decides up front whether a scenario can run here. Missing root is an
//! error; a missing optional facility turns the scenario into a skip.

use std::path::PathBuf;

use super::supervisor::run;
use super::sys;
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::scenario::{Peer, Scenario};

/// Path of the easy-rsa helper used for enterprise certificates
pub const EASY_RSA: &str = "/usr/share/easy-rsa/easyrsa";

/// What this machine offers
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    pub root: bool,
    pub wireless_emulation: bool,
    pub daemon: Option<PathBuf>,
    pub nmcli: Option<PathBuf>,
    pub hostapd: Option<PathBuf>,
    pub dnsmasq: Option<PathBuf>,
    pub wpa_supplicant: Option<PathBuf>,
    pub dbus_daemon: Option<PathBuf>,
    pub dbusmock: bool,
    pub easy_rsa: bool,
}

/// One line of the capability report
#[derive(Debug, Clone)]
pub struct CapabilityLine {
    pub name: &'static str,
    pub available: bool,
    pub detail: Option<String>,
}

fn tool(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

impl Capabilities {
    pub async fn detect(config: &Config) -> Self {
        Self {
            root: sys::is_root(),
            wireless_emulation: run("modinfo", &["mac80211_hwsim"]).await.is_ok(),
            daemon: tool(&config.daemon.program),
            nmcli: tool("nmcli"),
            hostapd: tool("hostapd"),
            dnsmasq: tool("dnsmasq"),
            wpa_supplicant: tool("wpa_supplicant"),
            dbus_daemon: tool("dbus-daemon"),
            dbusmock: run("python3", &["-c", "import dbusmock"]).await.is_ok(),
            easy_rsa: std::path::Path::new(EASY_RSA).exists(),
        }
    }

    /// Fail or skip if `scenario` cannot run here
    pub fn require(&self, scenario: &Scenario) -> Result<()> {
        if !self.root {
            return Err(Error::NotRoot);
        }
        if !self.wireless_emulation {
            return Err(Error::Unsupported(
                "no wireless support (mac80211_hwsim module is not available)".into(),
            ));
        }
        if self.daemon.is_none() {
            return Err(Error::Unsupported("the daemon under test is not installed".into()));
        }

        let mut missing = Vec::new();
        match &scenario.peer {
            Some(Peer::AccessPoint(_)) if self.hostapd.is_none() => missing.push("hostapd"),
            Some(Peer::Router) if self.dnsmasq.is_none() => missing.push("dnsmasq"),
            _ => {}
        }
        if scenario.access_point().is_some() && self.dnsmasq.is_none() {
            missing.push("dnsmasq");
        }
        if scenario.needs_pki() && !self.easy_rsa {
            missing.push("easy-rsa");
        }
        if scenario.needs_session_manager() {
            if !self.dbusmock {
                missing.push("python3-dbusmock");
            }
            if self.dbus_daemon.is_none() {
                missing.push("dbus-daemon");
            }
            if self.wpa_supplicant.is_none() {
                missing.push("wpa_supplicant");
            }
        }
        if scenario.name == "wifi-no-ap" && self.nmcli.is_none() {
            missing.push("nmcli");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Unsupported(format!("missing {}", missing.join(", "))))
        }
    }

    pub fn report(&self) -> Vec<CapabilityLine> {
        let path = |p: &Option<PathBuf>| p.as_ref().map(|p| p.display().to_string());
        vec![
            CapabilityLine {
                name: "root",
                available: self.root,
                detail: None,
            },
            CapabilityLine {
                name: "mac80211_hwsim",
                available: self.wireless_emulation,
                detail: None,
            },
            CapabilityLine {
                name: "NetworkManager",
                available: self.daemon.is_some(),
                detail: path(&self.daemon),
            },
            CapabilityLine {
                name: "nmcli",
                available: self.nmcli.is_some(),
                detail: path(&self.nmcli),
            },
            CapabilityLine {
                name: "hostapd",
                available: self.hostapd.is_some(),
                detail: path(&self.hostapd),
            },
            CapabilityLine {
                name: "dnsmasq",
                available: self.dnsmasq.is_some(),
                detail: path(&self.dnsmasq),
            },
            CapabilityLine {
                name: "wpa_supplicant",
                available: self.wpa_supplicant.is_some(),
                detail: path(&self.wpa_supplicant),
            },
            CapabilityLine {
                name: "dbus-daemon",
                available: self.dbus_daemon.is_some(),
                detail: path(&self.dbus_daemon),
            },
            CapabilityLine {
                name: "python3-dbusmock",
                available: self.dbusmock,
                detail: None,
            },
            CapabilityLine {
                name: "easy-rsa",
                available: self.easy_rsa,
                detail: self.easy_rsa.then(|| EASY_RSA.to_string()),
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::catalog;

    fn full() -> Capabilities {
        let bin = Some(PathBuf::from("/usr/bin/x"));
        Capabilities {
            root: true,
            wireless_emulation: true,
            daemon: bin.clone(),
            nmcli: bin.clone(),
            hostapd: bin.clone(),
            dnsmasq: bin.clone(),
            wpa_supplicant: bin.clone(),
            dbus_daemon: bin,
            dbusmock: true,
            easy_rsa: true,
        }
    }

    fn scenario(name: &str) -> Scenario {
        catalog::find(name).unwrap()
    }

    #[test]
    fn test_everything_available() {
        for s in catalog::builtin() {
            full().require(&s).unwrap();
        }
    }

    #[test]
    fn test_not_root_is_an_error() {
        let caps = Capabilities {
            root: false,
            ..full()
        };
        let err = caps.require(&scenario("wifi-open-b-ip4")).unwrap_err();
        assert!(matches!(err, Error::NotRoot));
        assert!(!err.is_skip());
    }

    #[test]
    fn test_no_wireless_emulation_skips() {
        let caps = Capabilities {
            wireless_emulation: false,
            ..full()
        };
        assert!(caps.require(&scenario("eth-auto-ip4")).unwrap_err().is_skip());
    }

    #[test]
    fn test_suspend_needs_dbusmock() {
        let caps = Capabilities {
            dbusmock: false,
            ..full()
        };
        let err = caps.require(&scenario("suspend-wifi-ip4")).unwrap_err();
        assert!(err.is_skip());
        assert!(err.to_string().contains("python3-dbusmock"));
        caps.require(&scenario("wifi-rfkill")).unwrap();
    }

    #[test]
    fn test_report_lists_every_tool() {
        let report = full().report();
        assert!(report.iter().all(|l| l.available));
        assert!(report.iter().any(|l| l.name == "hostapd"));
    }
}
