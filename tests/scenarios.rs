//! Scenario engine against the in-memory daemon
//!
//! These tests run the full pipeline (peer, daemon, device resolution,
//! discovery, activation, faults, verification, teardown) on the simulated
//! testbed, with tokio's clock paused so the long scenario timeouts cost
//! nothing.

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nm_harness::common::config::Config;
use nm_harness::common::FailureKind;
use nm_harness::profile::{AddressingMode, Authentication, LinkKind};
use nm_harness::registry::Role;
use nm_harness::scenario::{
    catalog, AccessPointConfig, Activation, ApSecurity, Expectation, HwMode, Peer, Plug,
    Scenario, ScenarioEngine, ScenarioResult, Verdict, WpaVersion,
};
use nm_harness::service::{ServiceError, SessionState};
use nm_harness::testing::{SimulatedTestbed, SimulationConfig};

/// Engine plus the simulated testbed it drives
struct TestContext {
    engine: ScenarioEngine<SimulatedTestbed>,
}

impl TestContext {
    fn new(simulation: SimulationConfig) -> Self {
        let config = Config::default();
        let testbed = SimulatedTestbed::new(&config, simulation);
        Self {
            engine: ScenarioEngine::new(testbed, config),
        }
    }

    fn simulated() -> Self {
        Self::new(SimulationConfig::default())
    }

    async fn run(&mut self, scenario: &Scenario) -> ScenarioResult {
        self.engine.run(scenario).await
    }

    async fn run_builtin(&mut self, name: &str) -> ScenarioResult {
        let scenario = catalog::find(name).expect("scenario should exist");
        self.run(&scenario).await
    }

    fn testbed(&self) -> &SimulatedTestbed {
        self.engine.testbed()
    }
}

/// Formatted log output collected in memory
#[derive(Clone, Default)]
struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn assert_passed(result: &ScenarioResult) {
    assert_eq!(
        result.verdict,
        Verdict::Passed,
        "{} failed: {:?} {:?}\nsteps: {:?}",
        result.name,
        result.failure,
        result.error,
        result.steps
    );
}

fn step_names(result: &ScenarioResult) -> Vec<&str> {
    result.steps.iter().map(|s| s.name.as_str()).collect()
}

fn wpa2_scenario(name: &str, passphrase: &str, psk: &str, expect: Expectation) -> Scenario {
    let ap = AccessPointConfig::open(HwMode::G).with_security(ApSecurity::WpaPsk {
        version: WpaVersion::Wpa2,
        passphrase: passphrase.into(),
    });
    Scenario {
        name: name.into(),
        description: None,
        link: LinkKind::Wifi,
        plug: Plug::Coldplug,
        peer: Some(Peer::AccessPoint(ap)),
        addressing: AddressingMode::Ipv4,
        privacy: None,
        activation: Activation::Manual {
            auth: Authentication::PreSharedKey {
                psk: Some(psk.into()),
            },
        },
        expect,
        expected_bitrate: None,
        fault: None,
    }
}

#[tokio::test(start_paused = true)]
async fn test_every_builtin_scenario_passes_against_simulator() {
    for scenario in catalog::builtin() {
        let mut ctx = TestContext::simulated();
        let result = ctx.run(&scenario).await;
        assert_passed(&result);
        assert_eq!(ctx.testbed().teardowns(), 1, "{}", scenario.name);
        assert!(
            ctx.testbed().network().state().user_sessions().is_empty(),
            "{} left sessions behind",
            scenario.name
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_open_wifi_runs_full_pipeline() {
    let mut ctx = TestContext::simulated();
    let result = ctx.run_builtin("wifi-open-b-ip4").await;
    assert_passed(&result);
    assert_eq!(
        step_names(&result),
        [
            "start access point",
            "start daemon",
            "resolve devices",
            "discover access point",
            "activate",
            "await activation",
            "check session",
            "verify addresses",
            "teardown",
        ]
    );
    assert!(result.steps.iter().all(|s| s.verdict == Verdict::Passed));
}

#[tokio::test(start_paused = true)]
async fn test_hotplug_starts_peer_after_daemon() {
    let mut ctx = TestContext::simulated();
    let result = ctx.run_builtin("hotplug-wifi-ap").await;
    assert_passed(&result);
    let steps = step_names(&result);
    let daemon = steps.iter().position(|s| *s == "start daemon").unwrap();
    let peer = steps.iter().position(|s| *s == "start access point").unwrap();
    assert!(daemon < peer);
}

#[tokio::test(start_paused = true)]
async fn test_manual_ethernet_disables_auto_connect() {
    let mut ctx = TestContext::simulated();
    let result = ctx.run_builtin("eth-manual-ip4").await;
    assert_passed(&result);
    let options = ctx.testbed().daemon_options().unwrap();
    assert!(!options.auto_connect);
    assert!(!options.session_manager_mock);
}

#[tokio::test(start_paused = true)]
async fn test_suspend_uses_session_manager_mock() {
    let mut ctx = TestContext::simulated();
    let result = ctx.run_builtin("suspend-wifi-ip6").await;
    assert_passed(&result);
    assert!(ctx.testbed().daemon_options().unwrap().session_manager_mock);
    assert!(step_names(&result).contains(&"resume"));
}

#[tokio::test(start_paused = true)]
async fn test_correct_key_in_negative_scenario_fails() {
    let mut ctx = TestContext::simulated();
    let scenario = wpa2_scenario("wpa2-right-key", "12345678", "12345678", Expectation::NotActivated);
    let result = ctx.run(&scenario).await;
    assert_eq!(result.verdict, Verdict::Failed);
    assert_eq!(result.failure, Some(FailureKind::Verification));
    assert!(result.error.unwrap().contains("despite invalid credentials"));
    assert_eq!(ctx.testbed().teardowns(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_wrong_key_in_positive_scenario_times_out() {
    let mut ctx = TestContext::new(SimulationConfig {
        // Keeps the session activating past the activation timeout
        rejection_latency: Duration::from_secs(600),
        ..SimulationConfig::default()
    });
    let scenario = wpa2_scenario("wpa2-bad-key", "12345678", "87654321", Expectation::Activated);
    let result = ctx.run(&scenario).await;
    assert_eq!(result.verdict, Verdict::Failed);
    assert_eq!(result.failure, Some(FailureKind::Timeout));
    let error = result.error.unwrap();
    assert!(error.contains("to get activated"), "{}", error);
    assert!(error.contains("activating"), "{}", error);
    assert!(ctx.testbed().network().state().user_sessions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_missing_device_is_a_setup_failure() {
    let mut ctx = TestContext::new(SimulationConfig {
        hidden_interfaces: vec!["eth42".into()],
        ..SimulationConfig::default()
    });
    let result = ctx.run_builtin("wifi-open-b-ip4").await;
    assert_eq!(result.verdict, Verdict::Failed);
    assert_eq!(result.failure, Some(FailureKind::Setup));
    assert!(result.error.unwrap().contains("eth42"));
    assert_eq!(ctx.testbed().teardowns(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_activation_call_is_cancelled() {
    let mut ctx = TestContext::new(SimulationConfig {
        hang_activation_call: true,
        ..SimulationConfig::default()
    });
    let result = ctx.run_builtin("eth-manual-ip4").await;
    assert_eq!(result.verdict, Verdict::Failed);
    assert_eq!(result.failure, Some(FailureKind::Timeout));
    let error = result.error.unwrap();
    assert!(error.contains("create-and-activate"), "{}", error);
    assert!(!error.contains("not acknowledged"), "{}", error);
}

#[tokio::test(start_paused = true)]
async fn test_unacknowledged_cancellation_is_reported() {
    let mut ctx = TestContext::new(SimulationConfig {
        hang_activation_call: true,
        ignore_cancellation: true,
        ..SimulationConfig::default()
    });
    let result = ctx.run_builtin("eth-manual-ip4").await;
    assert_eq!(result.failure, Some(FailureKind::Timeout));
    assert!(result.error.unwrap().contains("not acknowledged"));
}

#[tokio::test(start_paused = true)]
async fn test_daemon_error_is_an_async_operation_failure() {
    let mut ctx = TestContext::new(SimulationConfig {
        activation_error: Some(ServiceError::Daemon {
            name: "org.freedesktop.NetworkManager.PermissionDenied".into(),
            message: "not authorized".into(),
        }),
        ..SimulationConfig::default()
    });
    let result = ctx.run_builtin("wifi-open-g-ip4").await;
    assert_eq!(result.verdict, Verdict::Failed);
    assert_eq!(result.failure, Some(FailureKind::AsyncOperation));
    assert!(result.error.unwrap().contains("not authorized"));
}

#[tokio::test(start_paused = true)]
async fn test_unpublished_profile_escalates_after_retries() {
    let mut ctx = TestContext::new(SimulationConfig {
        profile_lag: Duration::from_secs(30),
        ..SimulationConfig::default()
    });
    let result = ctx.run_builtin("wifi-open-b-ip4").await;
    assert_eq!(result.verdict, Verdict::Failed);
    assert_eq!(result.failure, Some(FailureKind::Setup));
    assert!(result.error.unwrap().contains("after 3 attempts"));
}

#[tokio::test(start_paused = true)]
async fn test_slow_profile_publication_is_retried() {
    let mut ctx = TestContext::new(SimulationConfig {
        profile_lag: Duration::from_millis(150),
        ..SimulationConfig::default()
    });
    let result = ctx.run_builtin("wifi-wpa2-ip4").await;
    assert_passed(&result);
}

#[tokio::test(start_paused = true)]
async fn test_wrong_bitrate_fails_discovery() {
    let mut ctx = TestContext::simulated();
    let mut scenario = catalog::find("wifi-open-g-ip4").unwrap();
    scenario.expected_bitrate = Some(11000);
    let result = ctx.run(&scenario).await;
    assert_eq!(result.verdict, Verdict::Failed);
    assert!(result.error.unwrap().contains("54000 Kbit/s"));
    let failed = result
        .steps
        .iter()
        .find(|s| s.verdict == Verdict::Failed)
        .unwrap();
    assert_eq!(failed.name, "discover access point");
}

#[tokio::test(start_paused = true)]
async fn test_version_mismatch_fails_idle_radio_check() {
    let mut ctx = TestContext::new(SimulationConfig {
        version: "unknown".into(),
        ..SimulationConfig::default()
    });
    let result = ctx.run_builtin("wifi-no-ap").await;
    assert_eq!(result.verdict, Verdict::Failed);
    assert!(result.error.unwrap().contains("implausible daemon version"));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_scenario_fails_before_touching_testbed() {
    let mut ctx = TestContext::simulated();
    let mut scenario = catalog::find("eth-auto-ip4").unwrap();
    scenario.peer = Some(Peer::AccessPoint(AccessPointConfig::open(HwMode::B)));
    let result = ctx.run(&scenario).await;
    assert_eq!(result.verdict, Verdict::Failed);
    assert!(ctx.testbed().daemon_options().is_none());
    assert_eq!(ctx.testbed().teardowns(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_yaml_scenario_runs_like_builtin() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("custom.yaml");
    std::fs::write(
        &path,
        r#"
- name: custom-wpa1
  description: WPA1 with a custom SSID
  link: wifi
  peer:
    kind: access-point
    ssid: harness net
    hw_mode: g
    security:
      mode: wpa-psk
      version: wpa1
      passphrase: custompass
  activation:
    mode: manual
    auth:
      method: pre-shared-key
      psk: custompass
  expected_bitrate: 54000
"#,
    )
    .unwrap();

    let scenarios = catalog::load_file(&path).unwrap();
    assert_eq!(scenarios.len(), 1);
    let mut ctx = TestContext::simulated();
    let result = ctx.run(&scenarios[0]).await;
    assert_passed(&result);
}

#[tokio::test(start_paused = true)]
async fn test_teardown_deactivates_every_session() {
    let mut ctx = TestContext::simulated();
    let result = ctx.run_builtin("eth-auto-ip6-raonly-no-pe").await;
    assert_passed(&result);
    let state = ctx.testbed().network().state();
    assert!(state
        .sessions
        .values()
        .all(|s| s.name == "lo" && s.state == SessionState::Activated));
    let link = ctx.testbed().network().link_state("eth42").unwrap();
    assert!(link.ipv6.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_registry_is_cleared_by_teardown() {
    let mut ctx = TestContext::simulated();
    let result = ctx.run_builtin("wifi-open-b-ip4").await;
    assert_passed(&result);
    assert_eq!(ctx.engine.registry().roles().count(), 0);
    assert!(ctx.engine.registry().interface(Role::WifiClient).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_refused_deactivation_is_logged_and_fails_teardown() {
    let logs = LogCapture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::INFO)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let mut ctx = TestContext::new(SimulationConfig {
        deactivation_error: Some(ServiceError::Daemon {
            name: "org.freedesktop.NetworkManager.PermissionDenied".into(),
            message: "Not authorized to deactivate connections".into(),
        }),
        ..SimulationConfig::default()
    });
    let result = ctx.run_builtin("eth-auto-ip4").await;
    assert_eq!(result.verdict, Verdict::Failed);
    assert_eq!(result.failure, Some(FailureKind::Timeout));
    assert!(result
        .error
        .as_deref()
        .unwrap()
        .contains("waiting for all sessions to be deactivated"));
    assert_eq!(step_names(&result).last(), Some(&"teardown"));

    let output = logs.contents();
    let warning = output
        .lines()
        .find(|line| line.contains("Deactivation failed"))
        .expect("deactivation failure should be logged");
    assert!(warning.contains("WARN"), "{}", warning);
    assert!(warning.contains("Not authorized to deactivate connections"));
}
