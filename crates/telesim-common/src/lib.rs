//! ---
//! tsim_section: "01-core-functionality"
//! tsim_subsection: "module"
//! tsim_type: "source"
//! tsim_scope: "code"
//! tsim_description: "Configuration, logging and clock shared by telesim crates."
//! tsim_version: "v0.0.0-prealpha"
//! tsim_owner: "tbd"
//! ---
//! Core shared primitives for the telesim workspace.
//! This crate exposes configuration loading, logging bootstrap and the
//! monotonic clock used to stamp generated telemetry.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{
    ApiConfig, AppConfig, CatalogBackend, CatalogConfig, EngineConfig, LoggingConfig,
    MetricsConfig, MqttConfig, SinkConfig, SinkKind,
};
pub use logging::{init_cli_logging, init_tracing, LogFormat};
pub use time::MonotonicClock;
