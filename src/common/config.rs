//! Configuration file handling

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use super::paths::config_path;
use super::Result;

/// Environment variable holding extra daemon command line arguments
pub const DAEMON_ARGS_ENV: &str = "NM_TEST_DAEMON_ARGS";

/// Environment variable that makes the daemon log straight to stdout
pub const LOG_STDOUT_ENV: &str = "NM_LOG_STDOUT";

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Daemon under test
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Emulated network layout
    #[serde(default)]
    pub network: NetworkConfig,
}

/// Timeout settings in seconds unless noted otherwise
///
/// These are deliberately generous: DHCP and association latency on loaded
/// CI machines regularly runs into tens of seconds.
#[derive(Debug, Deserialize, Clone)]
pub struct Timeouts {
    /// Sleep between predicate evaluations (milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Coldplug/hotplug settling window for device recognition
    #[serde(default = "default_device_settle")]
    pub device_settle: u64,

    /// Peer discovery when the peer was up before the daemon
    #[serde(default = "default_peer_discovery")]
    pub peer_discovery: u64,

    /// Peer discovery for fault-injection scenarios
    #[serde(default = "default_peer_discovery_slow")]
    pub peer_discovery_slow: u64,

    /// Peer discovery when the peer appears after the daemon
    #[serde(default = "default_hotplug_discovery")]
    pub hotplug_discovery: u64,

    /// The create-and-activate call itself
    #[serde(default = "default_activation_call")]
    pub activation_call: u64,

    /// Wireless session reaching `activated`
    #[serde(default = "default_wifi_activation")]
    pub wifi_activation: u64,

    /// Wired session reaching `activated`
    #[serde(default = "default_ethernet_activation")]
    pub ethernet_activation: u64,

    /// Wired session reaching `activated` after hotplug
    #[serde(default = "default_hotplug_activation")]
    pub hotplug_activation: u64,

    /// Auto-connected session appearing on coldplug
    #[serde(default = "default_auto_connect")]
    pub auto_connect: u64,

    /// Auto-connected session appearing on hotplug
    #[serde(default = "default_hotplug_auto_connect")]
    pub hotplug_auto_connect: u64,

    /// Session giving up when activation is expected to fail
    #[serde(default = "default_activation_failure")]
    pub activation_failure: u64,

    /// Device reaching `unavailable` after the kill switch is set
    #[serde(default = "default_kill_switch_down")]
    pub kill_switch_down: u64,

    /// Device back to `activated` after the kill switch is released
    #[serde(default = "default_kill_switch_up")]
    pub kill_switch_up: u64,

    /// Device reaching `unmanaged` after the suspend announcement
    #[serde(default = "default_suspend_down")]
    pub suspend_down: u64,

    /// Device back to `activated` after resume
    #[serde(default = "default_resume_up")]
    pub resume_up: u64,

    /// All sessions gone during teardown
    #[serde(default = "default_teardown")]
    pub teardown: u64,

    /// Global networking flag turning on
    #[serde(default = "default_networking_enabled")]
    pub networking_enabled: u64,

    /// Daemon answering on the bus after launch
    #[serde(default = "default_daemon_online")]
    pub daemon_online: u64,

    /// Emulated peer becoming operational after launch
    #[serde(default = "default_peer_ready")]
    pub peer_ready: u64,

    /// Hard fallback for an operation acknowledging its cancellation
    #[serde(default = "default_cancel_ack")]
    pub cancel_ack: u64,

    /// Attempts to resolve a session's profile object
    #[serde(default = "default_profile_retry_attempts")]
    pub profile_retry_attempts: u32,

    /// Delay between profile resolution attempts (milliseconds)
    #[serde(default = "default_profile_retry_delay_ms")]
    pub profile_retry_delay_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            device_settle: default_device_settle(),
            peer_discovery: default_peer_discovery(),
            peer_discovery_slow: default_peer_discovery_slow(),
            hotplug_discovery: default_hotplug_discovery(),
            activation_call: default_activation_call(),
            wifi_activation: default_wifi_activation(),
            ethernet_activation: default_ethernet_activation(),
            hotplug_activation: default_hotplug_activation(),
            auto_connect: default_auto_connect(),
            hotplug_auto_connect: default_hotplug_auto_connect(),
            activation_failure: default_activation_failure(),
            kill_switch_down: default_kill_switch_down(),
            kill_switch_up: default_kill_switch_up(),
            suspend_down: default_suspend_down(),
            resume_up: default_resume_up(),
            teardown: default_teardown(),
            networking_enabled: default_networking_enabled(),
            daemon_online: default_daemon_online(),
            peer_ready: default_peer_ready(),
            cancel_ack: default_cancel_ack(),
            profile_retry_attempts: default_profile_retry_attempts(),
            profile_retry_delay_ms: default_profile_retry_delay_ms(),
        }
    }
}

impl Timeouts {
    /// Convert a seconds field to a Duration
    pub fn secs(value: u64) -> Duration {
        Duration::from_secs(value)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn profile_retry_delay(&self) -> Duration {
        Duration::from_millis(self.profile_retry_delay_ms)
    }
}

fn default_poll_interval_ms() -> u64 {
    100
}
fn default_device_settle() -> u64 {
    10
}
fn default_peer_discovery() -> u64 {
    10
}
fn default_peer_discovery_slow() -> u64 {
    180
}
fn default_hotplug_discovery() -> u64 {
    30
}
fn default_activation_call() -> u64 {
    300
}
fn default_wifi_activation() -> u64 {
    60
}
fn default_ethernet_activation() -> u64 {
    15
}
fn default_hotplug_activation() -> u64 {
    8
}
fn default_auto_connect() -> u64 {
    10
}
fn default_hotplug_auto_connect() -> u64 {
    30
}
fn default_activation_failure() -> u64 {
    60
}
fn default_kill_switch_down() -> u64 {
    10
}
fn default_kill_switch_up() -> u64 {
    20
}
fn default_suspend_down() -> u64 {
    1
}
fn default_resume_up() -> u64 {
    10
}
fn default_teardown() -> u64 {
    5
}
fn default_networking_enabled() -> u64 {
    2
}
fn default_daemon_online() -> u64 {
    20
}
fn default_peer_ready() -> u64 {
    10
}
fn default_cancel_ack() -> u64 {
    5
}
fn default_profile_retry_attempts() -> u32 {
    3
}
fn default_profile_retry_delay_ms() -> u64 {
    100
}

/// Daemon launch settings
#[derive(Debug, Deserialize, Clone)]
pub struct DaemonConfig {
    /// Daemon executable
    #[serde(default = "default_daemon_program")]
    pub program: String,

    /// Additional arguments appended to the daemon command line
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// Stream daemon logs to stdout instead of capturing them to a file
    #[serde(default)]
    pub log_stdout: bool,

    /// Directories covered with a fresh tmpfs before every launch
    #[serde(default = "default_config_dirs")]
    pub config_dirs: Vec<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            program: default_daemon_program(),
            extra_args: Vec::new(),
            log_stdout: false,
            config_dirs: default_config_dirs(),
        }
    }
}

fn default_daemon_program() -> String {
    "NetworkManager".to_string()
}

fn default_config_dirs() -> Vec<PathBuf> {
    [
        "/etc/NetworkManager",
        "/var/lib/NetworkManager",
        "/run/NetworkManager",
        "/etc/netplan",
    ]
    .iter()
    .map(PathBuf::from)
    .collect()
}

/// Emulated network layout
#[derive(Debug, Deserialize, Clone)]
pub struct NetworkConfig {
    /// SSID broadcast by the emulated access point
    #[serde(default = "default_ssid")]
    pub ssid: String,

    /// First three octets of the IPv4 subnet handed out by the peer
    #[serde(default = "default_ipv4_prefix")]
    pub ipv4_prefix: String,

    /// IPv6 prefix advertised by the peer
    #[serde(default = "default_ipv6_prefix")]
    pub ipv6_prefix: String,

    /// Client side of the wired veth pair
    #[serde(default = "default_eth_client")]
    pub eth_client: String,

    /// Router side of the wired veth pair
    #[serde(default = "default_eth_router")]
    pub eth_router: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ssid: default_ssid(),
            ipv4_prefix: default_ipv4_prefix(),
            ipv6_prefix: default_ipv6_prefix(),
            eth_client: default_eth_client(),
            eth_router: default_eth_router(),
        }
    }
}

fn default_ssid() -> String {
    "fake net".to_string()
}
fn default_ipv4_prefix() -> String {
    "192.168.5".to_string()
}
fn default_ipv6_prefix() -> String {
    "2600::".to_string()
}
fn default_eth_client() -> String {
    "eth42".to_string()
}
fn default_eth_router() -> String {
    "veth42".to_string()
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist. Environment
    /// overrides are applied on top either way.
    pub fn load() -> Result<Self> {
        let mut config = Self::default();
        if let Some(path) = config_path() {
            if path.exists() {
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    super::Error::FileRead {
                        path: path.display().to_string(),
                        error: e.to_string(),
                    }
                })?;
                config = Self::parse(&content)?;
            }
        }
        config.apply_env(
            std::env::var(DAEMON_ARGS_ENV).ok().as_deref(),
            std::env::var(LOG_STDOUT_ENV).ok().as_deref(),
        );
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }

    /// Apply the daemon-args and log-streaming environment toggles
    pub fn apply_env(&mut self, daemon_args: Option<&str>, log_stdout: Option<&str>) {
        if let Some(args) = daemon_args {
            self.daemon
                .extra_args
                .extend(args.split_whitespace().map(str::to_string));
        }
        if log_stdout.is_some_and(|v| !v.is_empty()) {
            self.daemon.log_stdout = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.timeouts.activation_call, 300);
        assert_eq!(config.timeouts.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.network.ssid, "fake net");
        assert_eq!(config.daemon.config_dirs.len(), 4);
    }

    #[test]
    fn test_partial_override() {
        let config = Config::parse(
            r#"
            [timeouts]
            wifi_activation = 120

            [network]
            ssid = "lab net"
            "#,
        )
        .unwrap();
        assert_eq!(config.timeouts.wifi_activation, 120);
        assert_eq!(config.timeouts.kill_switch_up, 20);
        assert_eq!(config.network.ssid, "lab net");
        assert_eq!(config.network.eth_client, "eth42");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(Some("  --log-domains=ALL  --no-daemon "), Some("1"));
        assert_eq!(config.daemon.extra_args, vec!["--log-domains=ALL", "--no-daemon"]);
        assert!(config.daemon.log_stdout);

        let mut config = Config::default();
        config.apply_env(None, Some(""));
        assert!(!config.daemon.log_stdout);
    }

    #[test]
    fn test_invalid_toml_is_config_parse_error() {
        let err = Config::parse("[timeouts\n").unwrap_err();
        assert!(matches!(err, super::super::Error::ConfigParse(_)));
    }
}
