//! Emulated hardware and the daemon under test
//!
//! [`Testbed`] is everything the scenario engine needs from the operating
//! system: peers to connect to, the daemon itself, fault injection and
//! interface introspection. [`LinuxTestbed`] drives real kernel emulation;
//! the in-memory simulator in [`crate::testing`] stands in for it in tests.

pub mod capabilities;
pub mod daemon;
pub mod fault;
pub mod linux;
pub mod peer;
pub mod pki;
pub mod supervisor;
pub mod sys;

use std::sync::Arc;

use async_trait::async_trait;

pub use linux::LinuxTestbed;

use crate::common::Result;
use crate::profile::AddressingMode;
use crate::scenario::AccessPointConfig;
use crate::service::NetworkService;
use crate::verify::Introspector;

/// Interface names and addresses of the emulated hardware
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interfaces {
    pub wifi_ap: String,
    pub wifi_ap_mac: String,
    pub wifi_client: String,
    pub eth_client: String,
    pub eth_client_mac: String,
    /// Far end of the wired link, where the router runs
    pub eth_router: String,
}

/// How the daemon under test is launched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DaemonOptions {
    /// Let the daemon create default wired profiles on its own
    pub auto_connect: bool,
    /// Run against a private system bus with mocked polkit and logind
    pub session_manager_mock: bool,
}

#[async_trait]
pub trait Testbed: Send {
    type Service: NetworkService;

    fn interfaces(&self) -> &Interfaces;

    /// Start an access point on the AP radio
    async fn start_access_point(
        &mut self,
        config: &AccessPointConfig,
        addressing: AddressingMode,
    ) -> Result<()>;

    /// Start DHCP and router advertisements on the far end of the wired link
    async fn start_router(&mut self, addressing: AddressingMode) -> Result<()>;

    /// Start the daemon and wait until it is reachable
    async fn start_daemon(&mut self, options: DaemonOptions) -> Result<Arc<Self::Service>>;

    /// Whether the radio behind `iface` is soft-blocked
    async fn kill_switch(&self, iface: &str) -> Result<bool>;

    async fn set_kill_switch(&mut self, iface: &str, blocked: bool) -> Result<()>;

    /// Announce an upcoming suspend (`true`) or a resume (`false`)
    async fn announce_sleep(&mut self, sleeping: bool) -> Result<()>;

    fn introspector(&self) -> Arc<dyn Introspector>;

    /// Version reported by the daemon's command line client
    async fn daemon_version_cli(&self) -> Result<String>;

    /// Stop everything that was started, newest first
    ///
    /// Must be safe to call more than once.
    async fn teardown(&mut self) -> Result<()>;
}
