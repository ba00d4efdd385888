//! Launching the daemon under test
//!
//! The daemon gets fresh, empty configuration directories (tmpfs mounts in
//! the scenario's private mount namespace) and a generated configuration
//! that leaves every interface except the client ones alone.

use std::fmt::Write as _;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;

use super::peer::log_tail;
use super::supervisor::{Cleanup, ProcessSupervisor};
use super::sys;
use super::DaemonOptions;
use crate::client::Waiter;
use crate::common::config::DaemonConfig;
use crate::common::{Error, Result};
use crate::service::nm::NmService;

pub const DAEMON_LOG: &str = "NetworkManager.log";
const PROCESS_NAME: &str = "NetworkManager";

/// Mount empty tmpfs over each configuration directory
pub fn prepare_config_dirs(sup: &mut ProcessSupervisor, dirs: &[PathBuf]) -> Result<()> {
    for dir in dirs {
        std::fs::create_dir_all(dir)?;
        sys::mount_tmpfs(dir).map_err(|e| {
            Error::DaemonStartFailed(format!("cannot mount tmpfs on {}: {}", dir.display(), e))
        })?;
        sup.push(Cleanup::Unmount(dir.clone()));
    }
    if let Some(etc) = dirs.first() {
        std::fs::create_dir_all(etc.join("system-connections"))?;
    }
    Ok(())
}

/// `unmanaged-devices` value covering every interface but `clients`
///
/// `interfaces` pairs each interface name with its hardware address.
pub fn unmanaged_devices(interfaces: &[(String, String)], clients: &[&str]) -> String {
    interfaces
        .iter()
        .filter(|(iface, _)| iface != "bonding_masters" && !clients.contains(&iface.as_str()))
        .filter(|(_, mac)| !mac.is_empty())
        .map(|(_, mac)| format!("mac:{}", mac))
        .collect::<Vec<_>>()
        .join(";")
}

/// Interfaces currently known to the kernel, with their hardware addresses
pub fn system_interfaces() -> Result<Vec<(String, String)>> {
    let mut interfaces = Vec::new();
    for entry in std::fs::read_dir("/sys/class/net")? {
        let name = entry?.file_name().to_string_lossy().into_owned();
        let mac = std::fs::read_to_string(format!("/sys/class/net/{}/address", name))
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        interfaces.push((name, mac));
    }
    interfaces.sort();
    Ok(interfaces)
}

/// Render the daemon configuration file
pub fn daemon_conf(options: DaemonOptions, unmanaged: &str) -> String {
    let mut conf = String::from("[main]\nplugins=keyfile\n");
    if !options.auto_connect {
        conf.push_str("no-auto-default=*\n");
    }
    let _ = write!(conf, "\n[keyfile]\nunmanaged-devices={}\n", unmanaged);
    conf
}

/// Daemon command line, without the program name
pub fn daemon_args(config: &DaemonConfig, conf_path: &Path) -> Vec<String> {
    let mut args = vec![
        "--log-level=debug".to_string(),
        "--debug".to_string(),
        format!("--config={}", conf_path.display()),
    ];
    args.extend(config.extra_args.iter().cloned());
    args
}

/// Start the daemon and connect to it once it is online
#[allow(clippy::too_many_arguments)]
pub async fn start(
    sup: &mut ProcessSupervisor,
    config: &DaemonConfig,
    options: DaemonOptions,
    clients: &[&str],
    workdir: &Path,
    bus_address: Option<&str>,
    waiter: Waiter,
    online_timeout: Duration,
) -> Result<Arc<NmService>> {
    prepare_config_dirs(sup, &config.config_dirs)?;

    let unmanaged = unmanaged_devices(&system_interfaces()?, clients);
    let conf_path = workdir.join("NetworkManager.conf");
    std::fs::write(&conf_path, daemon_conf(options, &unmanaged))?;
    tracing::debug!(%unmanaged, auto_connect = options.auto_connect, "Daemon configuration written");

    let log_path = workdir.join(DAEMON_LOG);
    let mut command = Command::new(&config.program);
    command.args(daemon_args(config, &conf_path));
    if let Some(address) = bus_address {
        command.env("DBUS_SYSTEM_BUS_ADDRESS", address);
    }
    if !config.log_stdout {
        let log = File::create(&log_path)?;
        command.stdout(Stdio::from(log.try_clone()?)).stderr(Stdio::from(log));
    }
    sup.spawn(PROCESS_NAME, &mut command)?;

    let service = waiter
        .until_ready(online_timeout, "waiting for the daemon to come online", || {
            let exited = (!sup.is_running(PROCESS_NAME)).then(|| log_tail(&log_path, 15));
            async move {
                if let Some(log) = exited {
                    return Ok(Err(Error::DaemonStartFailed(format!(
                        "exited during startup: {}",
                        log
                    ))));
                }
                NmService::connect(bus_address)
                    .await
                    .map(Ok)
                    .map_err(|e| format!("not reachable on the bus: {}", e))
            }
        })
        .await??;
    tracing::info!(log = %log_path.display(), "Daemon online");
    Ok(Arc::new(service))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interfaces() -> Vec<(String, String)> {
        [
            ("bonding_masters", ""),
            ("eth0", "52:54:00:12:34:56"),
            ("eth42", "aa:bb:cc:dd:ee:ff"),
            ("lo", "00:00:00:00:00:00"),
            ("veth42", "aa:bb:cc:dd:ee:00"),
            ("wlan0", "02:00:00:00:00:00"),
            ("wlan1", "02:00:00:00:01:00"),
        ]
        .iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect()
    }

    #[test]
    fn test_blacklist_excludes_clients() {
        let list = unmanaged_devices(&interfaces(), &["wlan1", "eth42"]);
        assert_eq!(
            list,
            "mac:52:54:00:12:34:56;mac:00:00:00:00:00:00;mac:aa:bb:cc:dd:ee:00;mac:02:00:00:00:00:00"
        );
    }

    #[test]
    fn test_conf_without_auto_connect() {
        let conf = daemon_conf(
            DaemonOptions {
                auto_connect: false,
                session_manager_mock: false,
            },
            "mac:02:00:00:00:00:00",
        );
        assert_eq!(
            conf,
            "[main]\nplugins=keyfile\nno-auto-default=*\n\n[keyfile]\nunmanaged-devices=mac:02:00:00:00:00:00\n"
        );
    }

    #[test]
    fn test_conf_with_auto_connect() {
        let conf = daemon_conf(
            DaemonOptions {
                auto_connect: true,
                session_manager_mock: false,
            },
            "",
        );
        assert!(!conf.contains("no-auto-default"));
    }

    #[test]
    fn test_extra_args_are_appended() {
        let config = DaemonConfig {
            extra_args: vec!["--no-daemon".into()],
            ..Default::default()
        };
        let args = daemon_args(&config, Path::new("/w/NetworkManager.conf"));
        assert_eq!(
            args,
            vec![
                "--log-level=debug",
                "--debug",
                "--config=/w/NetworkManager.conf",
                "--no-daemon"
            ]
        );
    }
}
