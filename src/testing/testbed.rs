//! Testbed backed by the in-memory daemon

use std::sync::Arc;

use async_trait::async_trait;

use super::links::SimulatedLinks;
use super::network::{SimulatedNetwork, SimulationConfig};
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::profile::AddressingMode;
use crate::scenario::AccessPointConfig;
use crate::verify::{Introspector, Prefixes};
use crate::world::{DaemonOptions, Interfaces, Testbed};

/// Interface names and addresses the simulated radios and veth pair use
pub fn sample_interfaces() -> Interfaces {
    Interfaces {
        wifi_ap: "wlan0".to_string(),
        wifi_ap_mac: "02:00:00:00:00:00".to_string(),
        wifi_client: "wlan1".to_string(),
        eth_client: "eth42".to_string(),
        eth_client_mac: "0e:42:00:00:00:01".to_string(),
        eth_router: "veth42".to_string(),
    }
}

pub struct SimulatedTestbed {
    network: Arc<SimulatedNetwork>,
    interfaces: Interfaces,
    prefixes: Prefixes,
    options: Option<DaemonOptions>,
    teardowns: usize,
}

impl SimulatedTestbed {
    pub fn new(config: &Config, simulation: SimulationConfig) -> Self {
        let interfaces = Interfaces {
            eth_client: config.network.eth_client.clone(),
            eth_router: config.network.eth_router.clone(),
            ..sample_interfaces()
        };
        let network = SimulatedNetwork::new(simulation, &interfaces, &config.network.ssid);
        Self {
            network: Arc::new(network),
            interfaces,
            prefixes: Prefixes {
                ipv4: config.network.ipv4_prefix.clone(),
                ipv6: config.network.ipv6_prefix.clone(),
            },
            options: None,
            teardowns: 0,
        }
    }

    pub fn network(&self) -> &Arc<SimulatedNetwork> {
        &self.network
    }

    /// Options the daemon was started with, if it was
    pub fn daemon_options(&self) -> Option<DaemonOptions> {
        self.options
    }

    pub fn teardowns(&self) -> usize {
        self.teardowns
    }
}

#[async_trait]
impl Testbed for SimulatedTestbed {
    type Service = SimulatedNetwork;

    fn interfaces(&self) -> &Interfaces {
        &self.interfaces
    }

    async fn start_access_point(
        &mut self,
        config: &AccessPointConfig,
        addressing: AddressingMode,
    ) -> Result<()> {
        self.network.start_access_point(config, addressing);
        Ok(())
    }

    async fn start_router(&mut self, addressing: AddressingMode) -> Result<()> {
        self.network.start_router(addressing);
        Ok(())
    }

    async fn start_daemon(&mut self, options: DaemonOptions) -> Result<Arc<SimulatedNetwork>> {
        if self.network.is_running() {
            return Err(Error::DaemonStartFailed("daemon is already running".into()));
        }
        self.network.boot(options);
        self.options = Some(options);
        Ok(Arc::clone(&self.network))
    }

    async fn kill_switch(&self, iface: &str) -> Result<bool> {
        Ok(self.network.is_blocked(iface))
    }

    async fn set_kill_switch(&mut self, iface: &str, blocked: bool) -> Result<()> {
        self.network.set_blocked(iface, blocked);
        Ok(())
    }

    async fn announce_sleep(&mut self, sleeping: bool) -> Result<()> {
        if !self.options.is_some_and(|o| o.session_manager_mock) {
            return Err(Error::Internal(
                "suspend requested without a session manager mock".into(),
            ));
        }
        self.network.set_sleeping(sleeping);
        Ok(())
    }

    fn introspector(&self) -> Arc<dyn Introspector> {
        Arc::new(SimulatedLinks::new(
            Arc::clone(&self.network),
            self.prefixes.clone(),
            &self.interfaces.wifi_ap_mac,
        ))
    }

    async fn daemon_version_cli(&self) -> Result<String> {
        Ok(self.network.config().version.clone())
    }

    async fn teardown(&mut self) -> Result<()> {
        self.teardowns += 1;
        self.network.shutdown();
        Ok(())
    }
}
