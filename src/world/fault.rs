//! Fault injection: radio kill switch and suspend/resume
//!
//! Suspend is announced through a mocked login manager. Since the real one
//! cannot be replaced on the system bus, suspend scenarios run the daemon on
//! a private system bus together with python-dbusmock templates for logind
//! and polkit, plus a manually started wpa_supplicant.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use zbus::names::BusName;
use zbus::zvariant::Value;
use zbus::{Connection, ConnectionBuilder};

use super::peer::log_tail;
use super::supervisor::{Cleanup, ProcessSupervisor};
use crate::client::Waiter;
use crate::common::{Error, Result};

const MOCK_INTERFACE: &str = "org.freedesktop.DBus.Mock";
const LOGIN_SERVICE: &str = "org.freedesktop.login1";
const LOGIN_PATH: &str = "/org/freedesktop/login1";
const POLKIT_SERVICE: &str = "org.freedesktop.PolicyKit1";
const POLKIT_PATH: &str = "/org/freedesktop/PolicyKit1/Authority";
const SUPPLICANT_SERVICE: &str = "fi.w1.wpa_supplicant1";

fn rfkill_file(iface: &str) -> Result<PathBuf> {
    let phy = PathBuf::from(format!("/sys/class/net/{}/phy80211", iface));
    std::fs::read_dir(&phy)
        .map_err(|e| Error::FileRead {
            path: phy.display().to_string(),
            error: e.to_string(),
        })?
        .filter_map(|entry| entry.ok())
        .find(|entry| entry.file_name().to_string_lossy().starts_with("rfkill"))
        .map(|entry| entry.path().join("soft"))
        .ok_or_else(|| Error::Internal(format!("no rfkill switch for {}", iface)))
}

/// Whether the radio behind `iface` is soft-blocked
pub fn kill_switch(iface: &str) -> Result<bool> {
    let path = rfkill_file(iface)?;
    let value = std::fs::read_to_string(&path).map_err(|e| Error::FileRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;
    Ok(value.trim() == "1")
}

/// Block or unblock the radio behind `iface`
///
/// Blocking registers an unblock with the supervisor so the radio is never
/// left blocked.
pub fn set_kill_switch(sup: &mut ProcessSupervisor, iface: &str, blocked: bool) -> Result<()> {
    let path = rfkill_file(iface)?;
    std::fs::write(&path, if blocked { "1" } else { "0" })?;
    if blocked {
        sup.push(Cleanup::Command {
            program: "sh".into(),
            args: vec![
                "-c".into(),
                format!("echo 0 > {}", path.display()),
            ],
        });
    }
    tracing::info!(iface, blocked, "Kill switch toggled");
    Ok(())
}

/// Configuration for a private, permissive system bus
pub fn bus_config(socket: &Path) -> String {
    format!(
        r#"<!DOCTYPE busconfig PUBLIC "-//freedesktop//DTD D-Bus Bus Configuration 1.0//EN"
 "http://www.freedesktop.org/standards/dbus/1.0/busconfig.dtd">
<busconfig>
  <type>system</type>
  <listen>unix:path={}</listen>
  <auth>EXTERNAL</auth>
  <policy context="default">
    <allow user="*"/>
    <allow own="*"/>
    <allow send_destination="*" eavesdrop="true"/>
    <allow eavesdrop="true"/>
  </policy>
</busconfig>
"#,
        socket.display()
    )
}

/// Resolves once `service` has an owner on the bus behind `dbus`
fn on_bus(
    dbus: &zbus::fdo::DBusProxy<'static>,
    service: &'static str,
) -> impl std::future::Future<Output = std::result::Result<(), String>> {
    let dbus = dbus.clone();
    async move {
        let name = BusName::try_from(service).map_err(|e| e.to_string())?;
        match dbus.name_has_owner(name).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(format!("{} has no owner yet", service)),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// Private system bus with mocked logind and polkit
pub struct SessionManagerMock {
    address: String,
    conn: Connection,
}

impl SessionManagerMock {
    pub async fn start(
        sup: &mut ProcessSupervisor,
        workdir: &Path,
        waiter: Waiter,
        timeout: Duration,
    ) -> Result<Self> {
        let socket = workdir.join("system_bus_socket");
        let conf = workdir.join("system-bus.conf");
        std::fs::write(&conf, bus_config(&socket))?;
        sup.spawn(
            "dbus-daemon",
            Command::new("dbus-daemon")
                .arg(format!("--config-file={}", conf.display()))
                .arg("--nofork"),
        )?;
        waiter
            .until_ready(timeout, "waiting for the private system bus", || {
                std::future::ready(if socket.exists() {
                    Ok(())
                } else {
                    Err(format!("no socket at {}", socket.display()))
                })
            })
            .await?;
        let address = format!("unix:path={}", socket.display());

        for template in ["polkitd", "logind"] {
            let log = std::fs::File::create(workdir.join(format!("dbusmock-{}.log", template)))?;
            sup.spawn(
                &format!("dbusmock-{}", template),
                Command::new("python3")
                    .args(["-m", "dbusmock", "--system", "--template", template])
                    .env("DBUS_SYSTEM_BUS_ADDRESS", &address)
                    .stdout(log.try_clone()?)
                    .stderr(log),
            )?;
        }

        let conn = ConnectionBuilder::address(address.as_str())?.build().await?;
        let dbus = zbus::fdo::DBusProxy::new(&conn).await?;
        for service in [POLKIT_SERVICE, LOGIN_SERVICE] {
            let intent = format!("waiting for the {} mock", service);
            waiter
                .until_ready(timeout, &intent, || on_bus(&dbus, service))
                .await?;
        }

        conn.call_method(
            Some(POLKIT_SERVICE),
            POLKIT_PATH,
            Some(MOCK_INTERFACE),
            "AllowUnknown",
            &(true,),
        )
        .await?;

        // Normally activated on the system bus; nothing does that here
        let supplicant_log = workdir.join("wpasupplicant.log");
        sup.spawn(
            "wpa_supplicant",
            Command::new("wpa_supplicant")
                .arg("-u")
                .arg("-d")
                .arg("-e")
                .arg(workdir.join("wpasupplicant.rand"))
                .arg("-f")
                .arg(&supplicant_log)
                .env("DBUS_SYSTEM_BUS_ADDRESS", &address),
        )?;
        let registered = waiter
            .until_ready(timeout, "waiting for wpa_supplicant on the private bus", || {
                let alive = sup.is_running("wpa_supplicant");
                let registered = on_bus(&dbus, SUPPLICANT_SERVICE);
                async move {
                    if !alive {
                        return Ok(false);
                    }
                    registered.await.map(|()| true)
                }
            })
            .await?;
        if !registered {
            return Err(Error::PeerStartFailed(format!(
                "wpa_supplicant exited: {}",
                log_tail(&supplicant_log, 10)
            )));
        }

        tracing::info!(%address, "Session manager mock ready");
        Ok(Self { address, conn })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Emit `PrepareForSleep(sleeping)` from the mocked login manager
    pub async fn announce_sleep(&self, sleeping: bool) -> Result<()> {
        self.conn
            .call_method(
                Some(LOGIN_SERVICE),
                LOGIN_PATH,
                Some(MOCK_INTERFACE),
                "EmitSignal",
                &("", "PrepareForSleep", "b", vec![Value::from(sleeping)]),
            )
            .await?;
        tracing::info!(sleeping, "Announced PrepareForSleep");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_config_listens_on_socket() {
        let conf = bus_config(Path::new("/tmp/w/system_bus_socket"));
        assert!(conf.contains("<listen>unix:path=/tmp/w/system_bus_socket</listen>"));
        assert!(conf.contains("<type>system</type>"));
        assert!(conf.contains(r#"<allow own="*"/>"#));
    }

    #[test]
    fn test_missing_radio_has_no_kill_switch() {
        assert!(kill_switch("does-not-exist0").is_err());
    }
}
