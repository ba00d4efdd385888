//! Testbed on the real kernel
//!
//! Requires root and a private mount namespace; see
//! [`crate::cli::isolate`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::fault::{self, SessionManagerMock};
use super::supervisor::{run, ProcessSupervisor};
use super::{daemon, peer, pki, DaemonOptions, Interfaces, Testbed};
use crate::client::Waiter;
use crate::common::config::{Config, Timeouts};
use crate::common::{paths, Error, Result};
use crate::profile::AddressingMode;
use crate::scenario::AccessPointConfig;
use crate::service::nm::NmService;
use crate::verify::{Introspector, IpTools};

pub struct LinuxTestbed {
    config: Config,
    workdir: PathBuf,
    sup: ProcessSupervisor,
    interfaces: Interfaces,
    session_manager: Option<SessionManagerMock>,
}

async fn create_links(sup: &mut ProcessSupervisor, config: &Config) -> Result<Interfaces> {
    let (wifi_ap, wifi_client) = peer::create_radios(
        sup,
        Waiter::new(config.timeouts.poll_interval()),
        Timeouts::secs(config.timeouts.peer_ready),
    )
    .await?;
    peer::create_wired_link(sup, &config.network).await?;
    Ok(Interfaces {
        wifi_ap_mac: peer::hw_address(&wifi_ap)?,
        wifi_ap,
        wifi_client,
        eth_client_mac: peer::hw_address(&config.network.eth_client)?,
        eth_client: config.network.eth_client.clone(),
        eth_router: config.network.eth_router.clone(),
    })
}

impl LinuxTestbed {
    /// Create the emulated radios and the wired link
    pub async fn create(config: Config, workdir: &Path) -> Result<Self> {
        let mut sup = ProcessSupervisor::new(Timeouts::secs(config.timeouts.teardown));
        let interfaces = match create_links(&mut sup, &config).await {
            Ok(interfaces) => interfaces,
            Err(e) => {
                sup.teardown().await;
                return Err(e);
            }
        };
        tracing::debug!(?interfaces, "Testbed created");
        Ok(Self {
            config,
            workdir: workdir.to_path_buf(),
            sup,
            interfaces,
            session_manager: None,
        })
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn waiter(&self) -> Waiter {
        Waiter::new(self.config.timeouts.poll_interval())
    }

    fn peer_ready(&self) -> Duration {
        Timeouts::secs(self.config.timeouts.peer_ready)
    }
}

#[async_trait]
impl Testbed for LinuxTestbed {
    type Service = NmService;

    fn interfaces(&self) -> &Interfaces {
        &self.interfaces
    }

    async fn start_access_point(
        &mut self,
        config: &AccessPointConfig,
        addressing: AddressingMode,
    ) -> Result<()> {
        let pki_dir = paths::pki_dir();
        if config.needs_pki() {
            pki::prepare(&mut self.sup, &pki_dir).await?;
        }
        let iface = self.interfaces.wifi_ap.clone();
        let (waiter, timeout) = (self.waiter(), self.peer_ready());
        peer::start_access_point(
            &mut self.sup,
            &iface,
            config,
            &self.config.network,
            &pki_dir,
            &self.workdir,
            waiter,
            timeout,
        )
        .await?;
        peer::start_dhcp(
            &mut self.sup,
            &iface,
            addressing,
            &self.config.network,
            &self.workdir,
            waiter,
            timeout,
        )
        .await
    }

    async fn start_router(&mut self, addressing: AddressingMode) -> Result<()> {
        let iface = self.interfaces.eth_router.clone();
        let (waiter, timeout) = (self.waiter(), self.peer_ready());
        peer::start_dhcp(
            &mut self.sup,
            &iface,
            addressing,
            &self.config.network,
            &self.workdir,
            waiter,
            timeout,
        )
        .await
    }

    async fn start_daemon(&mut self, options: DaemonOptions) -> Result<Arc<NmService>> {
        if options.session_manager_mock && self.session_manager.is_none() {
            let (waiter, timeout) = (self.waiter(), self.peer_ready());
            let mock = SessionManagerMock::start(&mut self.sup, &self.workdir, waiter, timeout).await?;
            self.session_manager = Some(mock);
        }
        let bus = self
            .session_manager
            .as_ref()
            .map(|m| m.address().to_string());
        let clients = [
            self.interfaces.wifi_client.as_str(),
            self.interfaces.eth_client.as_str(),
        ];
        let waiter = self.waiter();
        daemon::start(
            &mut self.sup,
            &self.config.daemon,
            options,
            &clients,
            &self.workdir,
            bus.as_deref(),
            waiter,
            Timeouts::secs(self.config.timeouts.daemon_online),
        )
        .await
    }

    async fn kill_switch(&self, iface: &str) -> Result<bool> {
        fault::kill_switch(iface)
    }

    async fn set_kill_switch(&mut self, iface: &str, blocked: bool) -> Result<()> {
        fault::set_kill_switch(&mut self.sup, iface, blocked)
    }

    async fn announce_sleep(&mut self, sleeping: bool) -> Result<()> {
        match &self.session_manager {
            Some(mock) => mock.announce_sleep(sleeping).await,
            None => Err(Error::Internal(
                "suspend requested without a session manager mock".into(),
            )),
        }
    }

    fn introspector(&self) -> Arc<dyn Introspector> {
        Arc::new(IpTools)
    }

    async fn daemon_version_cli(&self) -> Result<String> {
        let out = run("nmcli", &["--version"]).await?;
        out.split_whitespace()
            .last()
            .map(str::to_string)
            .ok_or_else(|| Error::Internal("nmcli --version printed nothing".into()))
    }

    async fn teardown(&mut self) -> Result<()> {
        self.session_manager = None;
        let errors = self.sup.teardown().await;
        if errors.is_empty() {
            return Ok(());
        }
        Err(Error::Internal(format!(
            "{} cleanup action(s) failed: {}",
            errors.len(),
            errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ")
        )))
    }
}
