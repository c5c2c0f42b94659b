//! ---
//! tsim_section: "03-persistence"
//! tsim_subsection: "module"
//! tsim_type: "source"
//! tsim_scope: "code"
//! tsim_description: "In-memory catalog backend."
//! tsim_version: "v0.0.0-prealpha"
//! tsim_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use chrono::Utc;
use parking_lot::RwLock;

use crate::model::{
    Container, ContainerId, ContainerStatus, Device, DeviceId, NewContainer, NewDevice, NewSensor,
    OptionEntry, Sensor, SensorId,
};
use crate::store::CatalogStore;
use crate::{CatalogError, Result};

#[derive(Debug, Default)]
struct Tables {
    containers: BTreeMap<ContainerId, Container>,
    devices: BTreeMap<DeviceId, Device>,
    sensors: BTreeMap<SensorId, Sensor>,
    options: BTreeMap<String, String>,
    next_container: i64,
    next_device: i64,
    next_sensor: i64,
}

impl Tables {
    fn container_mut(&mut self, id: ContainerId) -> Result<&mut Container> {
        self.containers
            .get_mut(&id)
            .ok_or_else(|| CatalogError::not_found("container", id))
    }

    fn ensure_container(&self, id: ContainerId) -> Result<()> {
        if self.containers.contains_key(&id) {
            Ok(())
        } else {
            Err(CatalogError::not_found("container", id))
        }
    }

    fn remove_device_cascade(&mut self, id: DeviceId) {
        self.devices.remove(&id);
        self.sensors.retain(|_, sensor| sensor.device_id != id);
    }
}

/// Catalog held entirely in process memory. All tables sit behind one lock so
/// every operation, cascades included, is atomic.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    tables: RwLock<Tables>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CatalogStore for MemoryCatalog {
    fn create_container(&self, new: NewContainer) -> Result<Container> {
        new.validate()?;
        let mut tables = self.tables.write();
        if tables.containers.values().any(|c| c.name == new.name) {
            return Err(CatalogError::Conflict(format!(
                "container name '{}' already exists",
                new.name
            )));
        }
        tables.next_container += 1;
        let id = tables.next_container;
        let container = Container::from_new(id, new, Utc::now());
        tables.containers.insert(id, container.clone());
        Ok(container)
    }

    fn container(&self, id: ContainerId) -> Result<Container> {
        self.tables
            .read()
            .containers
            .get(&id)
            .cloned()
            .ok_or_else(|| CatalogError::not_found("container", id))
    }

    fn list_containers(&self) -> Result<Vec<Container>> {
        Ok(self.tables.read().containers.values().cloned().collect())
    }

    fn containers_by_state(&self, status: ContainerStatus) -> Result<Vec<Container>> {
        Ok(self
            .tables
            .read()
            .containers
            .values()
            .filter(|c| c.status == status)
            .cloned()
            .collect())
    }

    fn container_name_in_use(&self, name: &str) -> Result<bool> {
        Ok(self.tables.read().containers.values().any(|c| c.name == name))
    }

    fn set_container_state(
        &self,
        id: ContainerId,
        status: ContainerStatus,
        error_detail: Option<&str>,
    ) -> Result<Container> {
        let mut tables = self.tables.write();
        let container = tables.container_mut(id)?;
        container.apply_state(status, error_detail, Utc::now());
        Ok(container.clone())
    }

    fn increment_message_count(&self, id: ContainerId, delta: u64) -> Result<()> {
        let mut tables = self.tables.write();
        let container = tables.container_mut(id)?;
        container.message_count = container.message_count.saturating_add(delta);
        Ok(())
    }

    fn delete_container(&self, id: ContainerId) -> Result<()> {
        let mut tables = self.tables.write();
        let container = tables
            .containers
            .get(&id)
            .ok_or_else(|| CatalogError::not_found("container", id))?;
        if !container.is_deletable() {
            return Err(CatalogError::Conflict(format!(
                "container {id} is {} and cannot be deleted",
                container.status
            )));
        }
        let owned: Vec<DeviceId> = tables
            .devices
            .values()
            .filter(|d| d.container_id == Some(id))
            .map(|d| d.id)
            .collect();
        for device in owned {
            tables.remove_device_cascade(device);
        }
        tables.containers.remove(&id);
        Ok(())
    }

    fn create_device(&self, new: NewDevice) -> Result<Device> {
        new.validate()?;
        let mut tables = self.tables.write();
        if let Some(container) = new.container_id {
            tables.ensure_container(container)?;
        }
        tables.next_device += 1;
        let id = tables.next_device;
        let device = new.into_device(id);
        tables.devices.insert(id, device.clone());
        Ok(device)
    }

    fn device(&self, id: DeviceId) -> Result<Device> {
        self.tables
            .read()
            .devices
            .get(&id)
            .cloned()
            .ok_or_else(|| CatalogError::not_found("device", id))
    }

    fn list_devices(&self) -> Result<Vec<Device>> {
        Ok(self.tables.read().devices.values().cloned().collect())
    }

    fn devices_by_container(&self, id: ContainerId) -> Result<Vec<Device>> {
        let tables = self.tables.read();
        tables.ensure_container(id)?;
        Ok(tables
            .devices
            .values()
            .filter(|d| d.container_id == Some(id))
            .cloned()
            .collect())
    }

    fn device_name_in_use(&self, name: &str) -> Result<bool> {
        Ok(self.tables.read().devices.values().any(|d| d.name == name))
    }

    fn assign_device(&self, id: DeviceId, container: Option<ContainerId>) -> Result<Device> {
        let mut tables = self.tables.write();
        if let Some(container) = container {
            tables.ensure_container(container)?;
        }
        let device = tables
            .devices
            .get_mut(&id)
            .ok_or_else(|| CatalogError::not_found("device", id))?;
        device.container_id = container;
        Ok(device.clone())
    }

    fn delete_device(&self, id: DeviceId) -> Result<()> {
        let mut tables = self.tables.write();
        if !tables.devices.contains_key(&id) {
            return Err(CatalogError::not_found("device", id));
        }
        tables.remove_device_cascade(id);
        Ok(())
    }

    fn create_sensor(&self, new: NewSensor) -> Result<Sensor> {
        new.validate()?;
        let mut tables = self.tables.write();
        if !tables.devices.contains_key(&new.device_id) {
            return Err(CatalogError::not_found("device", new.device_id));
        }
        tables.next_sensor += 1;
        let id = tables.next_sensor;
        let sensor = new.into_sensor(id);
        tables.sensors.insert(id, sensor.clone());
        Ok(sensor)
    }

    fn sensor(&self, id: SensorId) -> Result<Sensor> {
        self.tables
            .read()
            .sensors
            .get(&id)
            .cloned()
            .ok_or_else(|| CatalogError::not_found("sensor", id))
    }

    fn sensors_by_device(&self, id: DeviceId) -> Result<Vec<Sensor>> {
        let tables = self.tables.read();
        if !tables.devices.contains_key(&id) {
            return Err(CatalogError::not_found("device", id));
        }
        Ok(tables
            .sensors
            .values()
            .filter(|s| s.device_id == id)
            .cloned()
            .collect())
    }

    fn delete_sensor(&self, id: SensorId) -> Result<()> {
        self.tables
            .write()
            .sensors
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| CatalogError::not_found("sensor", id))
    }

    fn option(&self, name: &str) -> Result<Option<String>> {
        Ok(self.tables.read().options.get(name).cloned())
    }

    fn set_option(&self, name: &str, value: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(CatalogError::Invalid("option name must not be empty".into()));
        }
        self.tables
            .write()
            .options
            .insert(name.to_owned(), value.to_owned());
        Ok(())
    }

    fn options(&self) -> Result<Vec<OptionEntry>> {
        Ok(self
            .tables
            .read()
            .options
            .iter()
            .map(|(name, value)| OptionEntry {
                name: name.clone(),
                value: value.clone(),
            })
            .collect())
    }
}
