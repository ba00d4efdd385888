//! NetworkManager integration harness
//!
//! Drives the network daemon through its D-Bus API against emulated radios,
//! a veth pair and emulated peers, one scenario per process, and checks
//! what the daemon reports against what the kernel shows.

pub mod cli;
pub mod client;
pub mod commands;
pub mod common;
pub mod profile;
pub mod registry;
pub mod scenario;
pub mod service;
pub mod testing;
pub mod verify;
pub mod world;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use scenario::{Scenario, ScenarioEngine, ScenarioResult, Verdict};
