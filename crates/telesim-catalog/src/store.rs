//! ---
//! tsim_section: "03-persistence"
//! tsim_subsection: "module"
//! tsim_type: "source"
//! tsim_scope: "code"
//! tsim_description: "Backend-neutral catalog store interface."
//! tsim_version: "v0.0.0-prealpha"
//! tsim_owner: "tbd"
//! ---
use std::sync::Arc;

use tracing::debug;

use crate::model::{
    parse_option_bool, Container, ContainerId, ContainerStatus, Device, DeviceId, NewContainer,
    NewDevice, NewSensor, OptionEntry, Sensor, SensorId, DEFAULT_OPTIONS,
};
use crate::Result;

/// Shared handle passed to the engine, API and CLI.
pub type SharedCatalog = Arc<dyn CatalogStore>;

/// Persistent catalog of scenario definitions and run state.
///
/// Implementations must make every method atomic with respect to the others:
/// a reader never observes a container whose `status` and `is_active` disagree,
/// and a cascading delete is either fully applied or not at all.
pub trait CatalogStore: Send + Sync {
    fn create_container(&self, new: NewContainer) -> Result<Container>;
    fn container(&self, id: ContainerId) -> Result<Container>;
    fn list_containers(&self) -> Result<Vec<Container>>;
    fn containers_by_state(&self, status: ContainerStatus) -> Result<Vec<Container>>;
    fn container_name_in_use(&self, name: &str) -> Result<bool>;

    /// Persist a run-state change; `is_active` is derived from `status`.
    fn set_container_state(
        &self,
        id: ContainerId,
        status: ContainerStatus,
        error_detail: Option<&str>,
    ) -> Result<Container>;

    fn increment_message_count(&self, id: ContainerId, delta: u64) -> Result<()>;

    /// Delete a container together with its devices and their sensors.
    ///
    /// Fails with `Conflict` while the container is starting, running or stopping.
    fn delete_container(&self, id: ContainerId) -> Result<()>;

    fn create_device(&self, new: NewDevice) -> Result<Device>;
    fn device(&self, id: DeviceId) -> Result<Device>;
    fn list_devices(&self) -> Result<Vec<Device>>;
    fn devices_by_container(&self, id: ContainerId) -> Result<Vec<Device>>;
    /// Device names are not unique in storage; callers check with this first.
    fn device_name_in_use(&self, name: &str) -> Result<bool>;
    fn assign_device(&self, id: DeviceId, container: Option<ContainerId>) -> Result<Device>;
    /// Delete a device together with its sensors.
    fn delete_device(&self, id: DeviceId) -> Result<()>;

    fn create_sensor(&self, new: NewSensor) -> Result<Sensor>;
    fn sensor(&self, id: SensorId) -> Result<Sensor>;
    fn sensors_by_device(&self, id: DeviceId) -> Result<Vec<Sensor>>;
    fn delete_sensor(&self, id: SensorId) -> Result<()>;

    fn option(&self, name: &str) -> Result<Option<String>>;
    fn set_option(&self, name: &str, value: &str) -> Result<()>;
    fn options(&self) -> Result<Vec<OptionEntry>>;

    /// Read a boolean option, treating a missing entry as `false`.
    fn option_bool(&self, name: &str) -> Result<bool> {
        Ok(self
            .option(name)?
            .map(|value| parse_option_bool(&value))
            .unwrap_or(false))
    }

    /// Insert default option rows that are not present yet.
    fn seed_default_options(&self) -> Result<usize> {
        let mut seeded = 0;
        for (name, value) in DEFAULT_OPTIONS {
            if self.option(name)?.is_none() {
                self.set_option(name, value)?;
                seeded += 1;
            }
        }
        if seeded > 0 {
            debug!(seeded, "seeded default catalog options");
        }
        Ok(seeded)
    }
}
