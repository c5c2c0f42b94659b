//! ---
//! tsim_section: "03-persistence"
//! tsim_subsection: "module"
//! tsim_type: "source"
//! tsim_scope: "code"
//! tsim_description: "Catalog of containers, devices, sensors and options."
//! tsim_version: "v0.0.0-prealpha"
//! tsim_owner: "tbd"
//! ---
//! Catalog store for the telemetry simulator.
//!
//! The catalog owns the durable definition of every scenario: containers,
//! the devices assigned to them, the sensors on each device and the global
//! option table. Two backends are provided: [`MemoryCatalog`] for tests and
//! ephemeral runs, and [`SqliteCatalog`] for the daemon.

mod memory;
pub mod model;
mod sqlite;
mod store;

use thiserror::Error;

pub use memory::MemoryCatalog;
pub use model::{
    parse_option_bool, Container, ContainerId, ContainerStatus, Device, DeviceId, NewContainer,
    NewDevice, NewSensor, OptionEntry, Sensor, SensorId, DEFAULT_OPTIONS,
};
pub use sqlite::SqliteCatalog;
pub use store::{CatalogStore, SharedCatalog};

/// Errors raised by catalog backends.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i64 },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid record: {0}")]
    Invalid(String),
    #[error("corrupt catalog row: {0}")]
    Corrupt(String),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl CatalogError {
    pub fn not_found(kind: &'static str, id: i64) -> Self {
        Self::NotFound { kind, id }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Convenience alias for catalog results.
pub type Result<T> = std::result::Result<T, CatalogError>;
