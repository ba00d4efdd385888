//! Common utilities shared between the runner and scenario processes

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, FailureKind, Result};

/// Exit status reported by a scenario process that was skipped
///
/// Matches the automake/autopkgtest convention for "test skipped".
pub const EXIT_SKIP: i32 = 77;

/// Exit status reported by a failed scenario
pub const EXIT_FAIL: i32 = 1;

/// Format a hardware address the way the daemon and `ip` print it
pub fn normalize_mac(mac: &str) -> String {
    mac.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_mac() {
        assert_eq!(normalize_mac(" 02:00:00:00:01:00\n"), "02:00:00:00:01:00");
        assert_eq!(normalize_mac("AA:BB:CC:DD:EE:FF"), "aa:bb:cc:dd:ee:ff");
    }
}
