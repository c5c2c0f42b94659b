//! ---
//! tsim_section: "01-core-functionality"
//! tsim_subsection: "module"
//! tsim_type: "source"
//! tsim_scope: "code"
//! tsim_description: "Scenario lifecycle and execution."
//! tsim_version: "v0.0.0-prealpha"
//! tsim_owner: "tbd"
//! ---
//! Scenario lifecycle for telesim.
//!
//! [`ScenarioStateMachine`] owns the durable run state of every container and
//! [`ScenarioEngine`] drives the device tasks that generate and deliver
//! telemetry while respecting it.

pub mod engine;
pub mod error;
pub mod retry;
pub mod state;
mod worker;

pub use engine::{EngineSettings, ScenarioEngine};
pub use error::{Result, ScenarioError};
pub use retry::RetryPolicy;
pub use state::{can_transition, ScenarioStateMachine};
