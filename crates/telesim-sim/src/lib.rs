//! ---
//! tsim_section: "11-simulation"
//! tsim_subsection: "01-bootstrap"
//! tsim_type: "source"
//! tsim_scope: "code"
//! tsim_description: "Simulation module exports and shared types."
//! tsim_version: "v0.1.0"
//! tsim_owner: "tbd"
//! ---
//! Sensor value generation for telesim.
//!
//! [`SensorSimulator`] walks a sensor's value around its base within the
//! configured variation window and optionally injects faults described by an
//! [`ErrorDefinition`]. [`TelemetryMessage`] is the record handed to sinks.

pub mod faults;
pub mod frames;
pub mod generator;

pub use faults::ErrorDefinition;
pub use frames::TelemetryMessage;
pub use generator::{derive_seed, Sample, SensorSimulator};
