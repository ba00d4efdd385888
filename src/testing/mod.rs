//! Simulated world for exercising the scenario engine without root
//!
//! [`SimulatedTestbed`] stands in for the kernel, the peers and the daemon:
//! the engine drives it through the same [`Testbed`](crate::world::Testbed)
//! and [`NetworkService`](crate::service::NetworkService) seams it uses on a
//! real machine.

mod links;
mod network;
mod testbed;

pub use links::{render_addresses, SimulatedLinks};
pub use network::{LinkState, SimulatedNetwork, SimulationConfig, WIRED_PROFILE_NAME};
pub use testbed::{sample_interfaces, SimulatedTestbed};
