//! ---
//! tsim_section: "03-persistence"
//! tsim_subsection: "module"
//! tsim_type: "source"
//! tsim_scope: "code"
//! tsim_description: "Catalog records and container run-state bookkeeping."
//! tsim_version: "v0.0.0-prealpha"
//! tsim_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::{CatalogError, Result};

/// Identifier of a container row.
pub type ContainerId = i64;
/// Identifier of a device row.
pub type DeviceId = i64;
/// Identifier of a sensor row.
pub type SensorId = i64;

/// Option entries seeded into a fresh catalog.
pub const DEFAULT_OPTIONS: &[(&str, &str)] = &[
    ("demo_mode", "false"),
    ("telemetry_interval", "5000"),
    ("gateway_endpoint", ""),
];

/// Durable run state of a container.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ContainerStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl ContainerStatus {
    /// `is_active` is derived from the status and never stored independently.
    pub fn is_active(self) -> bool {
        matches!(self, ContainerStatus::Running)
    }
}

/// A named scenario instance grouping devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub id: ContainerId,
    pub name: String,
    /// Simulation profile label.
    pub container_type: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub status: ContainerStatus,
    pub is_active: bool,
    pub error_detail: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub message_count: u64,
    pub created_at: DateTime<Utc>,
}

impl Container {
    pub(crate) fn from_new(id: ContainerId, new: NewContainer, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: new.name,
            container_type: new.container_type,
            description: new.description,
            location: new.location,
            status: ContainerStatus::Stopped,
            is_active: false,
            error_detail: None,
            start_time: None,
            message_count: 0,
            created_at: now,
        }
    }

    /// Apply a run-state change to the in-memory row.
    ///
    /// `error_detail` is only retained for the `error` status. Entering
    /// `starting` resets the message counter, entering `running` stamps the
    /// start time and `stopped`/`error` clear it.
    pub fn apply_state(
        &mut self,
        status: ContainerStatus,
        error_detail: Option<&str>,
        now: DateTime<Utc>,
    ) {
        self.status = status;
        self.is_active = status.is_active();
        self.error_detail = match status {
            ContainerStatus::Error => error_detail.map(str::to_owned),
            _ => None,
        };
        match status {
            ContainerStatus::Starting => {
                self.message_count = 0;
            }
            ContainerStatus::Running => {
                self.start_time.get_or_insert(now);
            }
            ContainerStatus::Stopped | ContainerStatus::Error => {
                self.start_time = None;
            }
            ContainerStatus::Stopping => {}
        }
    }

    /// Containers may only be deleted while no scenario owns them.
    pub fn is_deletable(&self) -> bool {
        matches!(
            self.status,
            ContainerStatus::Stopped | ContainerStatus::Error
        )
    }
}

/// Insert payload for [`Container`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewContainer {
    pub name: String,
    #[serde(default = "NewContainer::default_type")]
    pub container_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

impl NewContainer {
    fn default_type() -> String {
        "default".to_owned()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            container_type: Self::default_type(),
            description: None,
            location: None,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CatalogError::Invalid("container name must not be empty".into()));
        }
        Ok(())
    }
}

/// A simulated physical endpoint owning sensors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub container_id: Option<ContainerId>,
    pub name: String,
    pub device_type: String,
    pub description: Option<String>,
    pub location: Option<String>,
}

/// Insert payload for [`Device`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDevice {
    pub name: String,
    #[serde(default)]
    pub container_id: Option<ContainerId>,
    #[serde(default = "NewDevice::default_type")]
    pub device_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

impl NewDevice {
    fn default_type() -> String {
        "generic".to_owned()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            container_id: None,
            device_type: Self::default_type(),
            description: None,
            location: None,
        }
    }

    pub fn in_container(mut self, container_id: ContainerId) -> Self {
        self.container_id = Some(container_id);
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CatalogError::Invalid("device name must not be empty".into()));
        }
        Ok(())
    }

    pub(crate) fn into_device(self, id: DeviceId) -> Device {
        Device {
            id,
            container_id: self.container_id,
            name: self.name,
            device_type: self.device_type,
            description: self.description,
            location: self.location,
        }
    }
}

/// A single telemetry-value generator attached to a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub id: SensorId,
    pub device_id: DeviceId,
    pub name: String,
    pub sensor_type: String,
    pub unit: String,
    pub min_value: f64,
    pub max_value: f64,
    pub base_value: f64,
    pub variation_range: f64,
    pub change_rate: f64,
    pub interval_secs: u64,
    /// JSON encoded fault definition applied by the simulator.
    pub error_definition: Option<String>,
}

impl Sensor {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Insert payload for [`Sensor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSensor {
    pub device_id: DeviceId,
    pub name: String,
    #[serde(default = "NewSensor::default_type")]
    pub sensor_type: String,
    #[serde(default)]
    pub unit: String,
    pub min_value: f64,
    pub max_value: f64,
    pub base_value: f64,
    #[serde(default = "NewSensor::default_variation")]
    pub variation_range: f64,
    #[serde(default = "NewSensor::default_change_rate")]
    pub change_rate: f64,
    #[serde(default = "NewSensor::default_interval")]
    pub interval_secs: u64,
    #[serde(default)]
    pub error_definition: Option<String>,
}

impl NewSensor {
    fn default_type() -> String {
        "generic".to_owned()
    }

    fn default_variation() -> f64 {
        1.0
    }

    fn default_change_rate() -> f64 {
        0.1
    }

    fn default_interval() -> u64 {
        5
    }

    /// Sensor centred in `[min, max]` that may roam across the whole range.
    pub fn ranged(device_id: DeviceId, name: impl Into<String>, min: f64, max: f64) -> Self {
        let base = (min + max) / 2.0;
        Self {
            device_id,
            name: name.into(),
            sensor_type: Self::default_type(),
            unit: String::new(),
            min_value: min,
            max_value: max,
            base_value: base,
            variation_range: (max - min) / 2.0,
            change_rate: Self::default_change_rate(),
            interval_secs: Self::default_interval(),
            error_definition: None,
        }
    }

    pub fn with_interval(mut self, interval_secs: u64) -> Self {
        self.interval_secs = interval_secs;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CatalogError::Invalid("sensor name must not be empty".into()));
        }
        if !(self.min_value.is_finite() && self.max_value.is_finite()) {
            return Err(CatalogError::Invalid("sensor bounds must be finite".into()));
        }
        if self.min_value > self.max_value {
            return Err(CatalogError::Invalid(format!(
                "sensor {} has min_value {} above max_value {}",
                self.name, self.min_value, self.max_value
            )));
        }
        if !(self.base_value.is_finite()
            && self.variation_range.is_finite()
            && self.change_rate.is_finite())
        {
            return Err(CatalogError::Invalid(
                "base_value, variation_range and change_rate must be finite".into(),
            ));
        }
        if self.variation_range < 0.0 || self.change_rate < 0.0 {
            return Err(CatalogError::Invalid(
                "variation_range and change_rate must be non-negative".into(),
            ));
        }
        if self.interval_secs == 0 {
            return Err(CatalogError::Invalid("sensor interval must be at least 1s".into()));
        }
        if let Some(definition) = &self.error_definition {
            serde_json::from_str::<serde_json::Value>(definition).map_err(|err| {
                CatalogError::Invalid(format!("error_definition is not valid JSON: {err}"))
            })?;
        }
        Ok(())
    }

    pub(crate) fn into_sensor(self, id: SensorId) -> Sensor {
        Sensor {
            id,
            device_id: self.device_id,
            name: self.name,
            sensor_type: self.sensor_type,
            unit: self.unit,
            min_value: self.min_value,
            max_value: self.max_value,
            base_value: self.base_value,
            variation_range: self.variation_range,
            change_rate: self.change_rate,
            interval_secs: self.interval_secs,
            error_definition: self.error_definition,
        }
    }
}

/// Global key/value configuration entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionEntry {
    pub name: String,
    pub value: String,
}

/// Boolean options accept `1` and `true` (case-insensitive).
pub fn parse_option_bool(value: &str) -> bool {
    let value = value.trim();
    value == "1" || value.eq_ignore_ascii_case("true")
}
