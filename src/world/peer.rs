//! Emulated peers: radios, the wired link, access point and router
//!
//! Two `mac80211_hwsim` radios provide the wireless side; the first one runs
//! hostapd, the second is the client the daemon manages. A veth pair provides
//! the wired side; its far end runs dnsmasq. Every step registers its undo
//! action with the supervisor.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;

use super::supervisor::{run, Cleanup, ProcessSupervisor};
use crate::client::Waiter;
use crate::common::config::NetworkConfig;
use crate::common::{Error, Result};
use crate::profile::AddressingMode;
use crate::scenario::AccessPointConfig;

const HWSIM_MODULE: &str = "mac80211_hwsim";
const HWSIM_SYSFS: &str = "/sys/devices/virtual/mac80211_hwsim";

/// Whether the supervised process `name` announced readiness in its log
///
/// `Ok(false)` means it exited; `Err` describes a process still starting.
pub(super) fn logged_ready(
    sup: &mut ProcessSupervisor,
    name: &str,
    log: &Path,
    marker: &str,
) -> std::result::Result<bool, String> {
    if !sup.is_running(name) {
        return Ok(false);
    }
    match std::fs::read_to_string(log) {
        Ok(content) if content.contains(marker) => Ok(true),
        _ => Err(format!("{} is running, no '{}' in its log yet", name, marker)),
    }
}

/// Last lines of a log file, for error messages
pub(super) fn log_tail(path: &Path, lines: usize) -> String {
    let content = std::fs::read_to_string(path).unwrap_or_default();
    let all: Vec<&str> = content.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

pub(super) fn hw_address(iface: &str) -> Result<String> {
    let path = format!("/sys/class/net/{}/address", iface);
    std::fs::read_to_string(&path)
        .map(|s| s.trim().to_string())
        .map_err(|e| Error::FileRead {
            path,
            error: e.to_string(),
        })
}

fn radio_interface(index: usize) -> Option<String> {
    let dir = PathBuf::from(HWSIM_SYSFS)
        .join(format!("hwsim{}", index))
        .join("net");
    std::fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .next()
}

/// Load two emulated radios; returns the (access point, client) interfaces
pub async fn create_radios(
    sup: &mut ProcessSupervisor,
    waiter: Waiter,
    timeout: Duration,
) -> Result<(String, String)> {
    run("modprobe", &[HWSIM_MODULE, "radios=2"]).await?;
    sup.push(Cleanup::UnloadModule(HWSIM_MODULE.to_string()));

    let (ap, client) = waiter
        .until_ready(timeout, "waiting for the emulated radios", || {
            std::future::ready(match (radio_interface(0), radio_interface(1)) {
                (Some(ap), Some(client)) => Ok((ap, client)),
                (ap, client) => Err(format!("radio interfaces: {:?}, {:?}", ap, client)),
            })
        })
        .await?;
    tracing::info!(ap = %ap, client = %client, "Emulated radios ready");
    Ok((ap, client))
}

/// Create the wired link; the client end is left to the daemon
pub async fn create_wired_link(sup: &mut ProcessSupervisor, network: &NetworkConfig) -> Result<()> {
    run(
        "ip",
        &[
            "link",
            "add",
            "name",
            &network.eth_client,
            "type",
            "veth",
            "peer",
            "name",
            &network.eth_router,
        ],
    )
    .await?;
    sup.push(Cleanup::DeleteLink(network.eth_client.clone()));
    run("ip", &["link", "set", &network.eth_router, "up"]).await?;
    tracing::info!(client = %network.eth_client, router = %network.eth_router, "Wired link ready");
    Ok(())
}

/// Address the peer side takes on its interface
pub fn router_address(addressing: AddressingMode, network: &NetworkConfig) -> String {
    match addressing {
        AddressingMode::Ipv4 => format!("{}.1/24", network.ipv4_prefix),
        AddressingMode::Ipv6 { .. } => format!("{}1/64", network.ipv6_prefix),
    }
}

/// dnsmasq command line serving `iface`
pub fn dnsmasq_args(
    iface: &str,
    addressing: AddressingMode,
    network: &NetworkConfig,
    workdir: &Path,
) -> Vec<String> {
    let mut args = vec![
        "--keep-in-foreground".to_string(),
        "--conf-file=/dev/null".to_string(),
        "--no-resolv".to_string(),
        "--bind-interfaces".to_string(),
        format!("--interface={}", iface),
        "--except-interface=lo".to_string(),
        format!("--pid-file={}", workdir.join(format!("dnsmasq-{}.pid", iface)).display()),
        format!("--log-facility={}", workdir.join(format!("dnsmasq-{}.log", iface)).display()),
    ];
    match addressing {
        AddressingMode::Ipv4 => args.push(format!(
            "--dhcp-range={p}.10,{p}.200",
            p = network.ipv4_prefix
        )),
        AddressingMode::Ipv6 { router } => {
            let mut range = format!("--dhcp-range={p}10,{p}20", p = network.ipv6_prefix);
            if let Some(mode) = router.dhcp_range_mode() {
                range.push(',');
                range.push_str(mode);
            }
            args.push(range);
            args.push("--enable-ra".to_string());
        }
    }
    args
}

/// Address `iface` and run dnsmasq on it
pub async fn start_dhcp(
    sup: &mut ProcessSupervisor,
    iface: &str,
    addressing: AddressingMode,
    network: &NetworkConfig,
    workdir: &Path,
    waiter: Waiter,
    timeout: Duration,
) -> Result<()> {
    let address = router_address(addressing, network);
    run("ip", &["a", "add", &address, "dev", iface]).await?;

    let args = dnsmasq_args(iface, addressing, network, workdir);
    let name = format!("dnsmasq-{}", iface);
    let log_path = workdir.join(format!("{}.log", name));
    sup.spawn(&name, Command::new("dnsmasq").args(&args))?;

    // Logged once the listening sockets are bound
    let serving = waiter
        .until_ready(timeout, "waiting for dnsmasq to start serving", || {
            std::future::ready(logged_ready(sup, &name, &log_path, "started"))
        })
        .await?;
    if !serving {
        return Err(Error::PeerStartFailed(format!(
            "dnsmasq on {} exited: {}",
            iface,
            log_tail(&log_path, 10)
        )));
    }
    tracing::info!(iface, %address, "Router ready");
    Ok(())
}

/// Full hostapd configuration for the radio `iface`
pub fn hostapd_conf(iface: &str, config: &AccessPointConfig, default_ssid: &str, pki_dir: &Path) -> String {
    format!(
        "interface={}\ndriver=nl80211\n{}",
        iface,
        config.to_hostapd_conf(default_ssid, pki_dir)
    )
}

/// Start hostapd and wait until the access point is enabled
pub async fn start_access_point(
    sup: &mut ProcessSupervisor,
    iface: &str,
    config: &AccessPointConfig,
    network: &NetworkConfig,
    pki_dir: &Path,
    workdir: &Path,
    waiter: Waiter,
    timeout: Duration,
) -> Result<()> {
    let conf_path = workdir.join("hostapd.conf");
    let log_path = workdir.join("hostapd.log");
    std::fs::write(&conf_path, hostapd_conf(iface, config, &network.ssid, pki_dir))?;

    sup.spawn(
        "hostapd",
        Command::new("hostapd")
            .arg("-e")
            .arg(workdir.join("hostapd.rand"))
            .arg("-f")
            .arg(&log_path)
            .arg(&conf_path),
    )?;

    let enabled = waiter
        .until_ready(timeout, "waiting for the access point to be enabled", || {
            std::future::ready(logged_ready(sup, "hostapd", &log_path, "AP-ENABLED"))
        })
        .await?;
    if !enabled {
        return Err(Error::PeerStartFailed(format!(
            "hostapd on {} exited: {}",
            iface,
            log_tail(&log_path, 15)
        )));
    }
    tracing::info!(iface, ssid = config.ssid_or(&network.ssid), "Access point enabled");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::RouterMode;
    use crate::scenario::HwMode;

    fn network() -> NetworkConfig {
        NetworkConfig::default()
    }

    #[test]
    fn test_router_addresses() {
        assert_eq!(router_address(AddressingMode::Ipv4, &network()), "192.168.5.1/24");
        assert_eq!(
            router_address(
                AddressingMode::Ipv6 {
                    router: RouterMode::RaOnly
                },
                &network()
            ),
            "2600::1/64"
        );
    }

    #[test]
    fn test_dnsmasq_ipv4_range() {
        let args = dnsmasq_args("veth42", AddressingMode::Ipv4, &network(), Path::new("/w"));
        assert!(args.contains(&"--dhcp-range=192.168.5.10,192.168.5.200".to_string()));
        assert!(args.contains(&"--interface=veth42".to_string()));
        assert!(!args.contains(&"--enable-ra".to_string()));
    }

    #[test]
    fn test_dnsmasq_ipv6_modes() {
        let ra_only = dnsmasq_args(
            "wlan0",
            AddressingMode::Ipv6 {
                router: RouterMode::RaOnly,
            },
            &network(),
            Path::new("/w"),
        );
        assert!(ra_only.contains(&"--dhcp-range=2600::10,2600::20,ra-only".to_string()));
        assert!(ra_only.contains(&"--enable-ra".to_string()));

        let dhcp = dnsmasq_args(
            "wlan0",
            AddressingMode::Ipv6 {
                router: RouterMode::Dhcp,
            },
            &network(),
            Path::new("/w"),
        );
        assert!(dhcp.contains(&"--dhcp-range=2600::10,2600::20".to_string()));
    }

    #[test]
    fn test_hostapd_conf_header() {
        let conf = hostapd_conf("wlan0", &AccessPointConfig::open(HwMode::B), "fake net", Path::new("/tmp/hostapd"));
        assert!(conf.starts_with("interface=wlan0\ndriver=nl80211\nhw_mode=b\n"));
    }

    #[test]
    fn test_log_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");
        std::fs::write(&path, "a\nb\nc\n").unwrap();
        assert_eq!(log_tail(&path, 2), "b\nc");
        assert_eq!(log_tail(&dir.path().join("missing"), 2), "");
    }

    #[tokio::test]
    async fn test_logged_ready_follows_process_and_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("peer.log");
        let mut sup = ProcessSupervisor::new(Duration::from_secs(1));
        sup.spawn("peer", Command::new("sleep").arg("60")).unwrap();

        let starting = logged_ready(&mut sup, "peer", &log, "AP-ENABLED").unwrap_err();
        assert!(starting.contains("AP-ENABLED"));
        std::fs::write(&log, "wlan0: interface state COUNTRY_UPDATE->ENABLED\nwlan0: AP-ENABLED\n").unwrap();
        assert_eq!(logged_ready(&mut sup, "peer", &log, "AP-ENABLED"), Ok(true));

        sup.teardown().await;
        assert_eq!(logged_ready(&mut sup, "peer", &log, "AP-ENABLED"), Ok(false));
    }
}
