//! Scenarios: what to run and how it went

pub mod catalog;
pub mod engine;
pub mod model;
pub mod result;

pub use engine::ScenarioEngine;
pub use model::{
    AccessPointConfig, Activation, ApSecurity, Expectation, Fault, HwMode, Peer, Plug, Scenario,
    WpaVersion,
};
pub use result::{ScenarioResult, StepRecord, Summary, Verdict};
