//! ---
//! tsim_section: "05-networking-external-interfaces"
//! tsim_subsection: "binary"
//! tsim_type: "source"
//! tsim_scope: "code"
//! tsim_description: "Catalog administration subcommands."
//! tsim_version: "v0.0.0-prealpha"
//! tsim_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use telesim_catalog::{
    CatalogStore, ContainerId, DeviceId, NewContainer, NewDevice, NewSensor, SensorId,
    SharedCatalog,
};
use tracing::warn;

#[derive(Debug, Subcommand)]
pub enum ContainerCommand {
    /// Create a container.
    Add(ContainerAdd),
    /// List containers with their run state.
    List,
    /// Delete a stopped container together with its devices and sensors.
    Delete {
        #[arg(value_name = "ID")]
        id: ContainerId,
    },
}

#[derive(Debug, Args)]
pub struct ContainerAdd {
    #[arg(long)]
    name: String,
    /// Simulation profile label.
    #[arg(long = "type", default_value = "default")]
    container_type: String,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    location: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum DeviceCommand {
    /// Create a device, optionally inside a container.
    Add(DeviceAdd),
    /// Move a device into a container, or out of any container.
    Assign {
        #[arg(value_name = "ID")]
        id: DeviceId,
        #[arg(long, conflicts_with = "unassign", required_unless_present = "unassign")]
        container: Option<ContainerId>,
        #[arg(long)]
        unassign: bool,
    },
    /// List devices, optionally restricted to one container.
    List {
        #[arg(long)]
        container: Option<ContainerId>,
    },
    /// Delete a device and its sensors.
    Delete {
        #[arg(value_name = "ID")]
        id: DeviceId,
    },
}

#[derive(Debug, Args)]
pub struct DeviceAdd {
    #[arg(long)]
    name: String,
    #[arg(long)]
    container: Option<ContainerId>,
    #[arg(long = "type", default_value = "generic")]
    device_type: String,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    location: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum SensorCommand {
    /// Attach a sensor to a device.
    Add(SensorAdd),
    /// List the sensors of a device.
    List {
        #[arg(long)]
        device: DeviceId,
    },
    Delete {
        #[arg(value_name = "ID")]
        id: SensorId,
    },
}

#[derive(Debug, Args)]
pub struct SensorAdd {
    #[arg(long)]
    device: DeviceId,
    #[arg(long)]
    name: String,
    #[arg(long = "type", default_value = "generic")]
    sensor_type: String,
    #[arg(long, default_value = "")]
    unit: String,
    #[arg(long, allow_hyphen_values = true)]
    min: f64,
    #[arg(long, allow_hyphen_values = true)]
    max: f64,
    /// Centre of the random walk; defaults to the middle of the range.
    #[arg(long, allow_hyphen_values = true)]
    base: Option<f64>,
    /// Maximum distance from the base value; defaults to half the range.
    #[arg(long)]
    variation: Option<f64>,
    #[arg(long = "change-rate")]
    change_rate: Option<f64>,
    /// Seconds between readings; defaults to the `telemetry_interval` option.
    #[arg(long)]
    interval: Option<u64>,
    /// Fault definition as inline JSON.
    #[arg(long = "error-definition", conflicts_with = "error_definition_file")]
    error_definition: Option<String>,
    /// Fault definition read from a JSON file.
    #[arg(long = "error-definition-file", value_name = "FILE")]
    error_definition_file: Option<PathBuf>,
}

impl SensorAdd {
    fn into_new_sensor(self, default_interval: u64) -> Result<NewSensor> {
        let error_definition = match (self.error_definition, self.error_definition_file) {
            (Some(inline), _) => Some(inline),
            (None, Some(path)) => Some(
                std::fs::read_to_string(&path)
                    .with_context(|| format!("unable to read {}", path.display()))?,
            ),
            (None, None) => None,
        };
        let mut sensor = NewSensor::ranged(self.device, self.name, self.min, self.max)
            .with_interval(self.interval.unwrap_or(default_interval));
        sensor.sensor_type = self.sensor_type;
        sensor.unit = self.unit;
        if let Some(base) = self.base {
            sensor.base_value = base;
        }
        if let Some(variation) = self.variation {
            sensor.variation_range = variation;
        }
        if let Some(rate) = self.change_rate {
            sensor.change_rate = rate;
        }
        sensor.error_definition = error_definition;
        Ok(sensor)
    }
}

#[derive(Debug, Subcommand)]
pub enum OptionCommand {
    Get {
        name: String,
    },
    Set {
        name: String,
        value: String,
    },
    List,
}

pub fn run_container(catalog: SharedCatalog, command: ContainerCommand) -> Result<()> {
    match command {
        ContainerCommand::Add(args) => {
            if catalog.container_name_in_use(&args.name)? {
                return Err(anyhow!("container name {} is already in use", args.name));
            }
            let container = catalog.create_container(NewContainer {
                name: args.name,
                container_type: args.container_type,
                description: args.description,
                location: args.location,
            })?;
            print_json(&container)
        }
        ContainerCommand::List => {
            for container in catalog.list_containers()? {
                println!(
                    "{:>4}  {:<24} {:<9} messages={}{}",
                    container.id,
                    container.name,
                    container.status,
                    container.message_count,
                    container
                        .error_detail
                        .map(|detail| format!("  error: {detail}"))
                        .unwrap_or_default()
                );
            }
            Ok(())
        }
        ContainerCommand::Delete { id } => {
            catalog.delete_container(id)?;
            println!("deleted container {id}");
            Ok(())
        }
    }
}

pub fn run_device(catalog: SharedCatalog, command: DeviceCommand) -> Result<()> {
    match command {
        DeviceCommand::Add(args) => {
            if catalog.device_name_in_use(&args.name)? {
                return Err(anyhow!("device name {} is already in use", args.name));
            }
            let device = catalog.create_device(NewDevice {
                name: args.name,
                container_id: args.container,
                device_type: args.device_type,
                description: args.description,
                location: args.location,
            })?;
            print_json(&device)
        }
        DeviceCommand::Assign {
            id,
            container,
            unassign,
        } => {
            let target = if unassign { None } else { container };
            print_json(&catalog.assign_device(id, target)?)
        }
        DeviceCommand::List { container } => {
            let devices = match container {
                Some(id) => catalog.devices_by_container(id)?,
                None => catalog.list_devices()?,
            };
            print_json(&devices)
        }
        DeviceCommand::Delete { id } => {
            catalog.delete_device(id)?;
            println!("deleted device {id}");
            Ok(())
        }
    }
}

const TELEMETRY_INTERVAL_OPTION: &str = "telemetry_interval";
const FALLBACK_INTERVAL_SECS: u64 = 5;

/// Sensor interval implied by the `telemetry_interval` option (milliseconds),
/// rounded up to whole seconds.
fn default_interval_secs(catalog: &dyn CatalogStore) -> Result<u64> {
    let Some(raw) = catalog.option(TELEMETRY_INTERVAL_OPTION)? else {
        return Ok(FALLBACK_INTERVAL_SECS);
    };
    match raw.trim().parse::<u64>() {
        Ok(millis) => Ok(millis.div_ceil(1000).max(1)),
        Err(err) => {
            warn!(value = %raw, error = %err, "ignoring unparsable telemetry_interval option");
            Ok(FALLBACK_INTERVAL_SECS)
        }
    }
}

pub fn run_sensor(catalog: SharedCatalog, command: SensorCommand) -> Result<()> {
    match command {
        SensorCommand::Add(args) => {
            let default_interval = default_interval_secs(catalog.as_ref())?;
            let sensor = catalog.create_sensor(args.into_new_sensor(default_interval)?)?;
            print_json(&sensor)
        }
        SensorCommand::List { device } => print_json(&catalog.sensors_by_device(device)?),
        SensorCommand::Delete { id } => {
            catalog.delete_sensor(id)?;
            println!("deleted sensor {id}");
            Ok(())
        }
    }
}

pub fn run_option(catalog: SharedCatalog, command: OptionCommand) -> Result<()> {
    match command {
        OptionCommand::Get { name } => match catalog.option(&name)? {
            Some(value) => {
                println!("{value}");
                Ok(())
            }
            None => Err(anyhow!("option {name} is not set")),
        },
        OptionCommand::Set { name, value } => {
            catalog.set_option(&name, &value)?;
            println!("{name}={value}");
            Ok(())
        }
        OptionCommand::List => {
            for entry in catalog.options()? {
                println!("{}={}", entry.name, entry.value);
            }
            Ok(())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render output")?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use telesim_catalog::MemoryCatalog;

    use super::*;

    #[test]
    fn sensor_defaults_follow_the_range() {
        let args = SensorAdd {
            device: 1,
            name: "temp".into(),
            sensor_type: "thermo".into(),
            unit: "C".into(),
            min: -10.0,
            max: 30.0,
            base: None,
            variation: Some(5.0),
            change_rate: None,
            interval: Some(2),
            error_definition: Some(r#"{"type":"mcar","probability":0.1}"#.into()),
            error_definition_file: None,
        };
        let sensor = args.into_new_sensor(7).unwrap();
        assert_eq!(sensor.base_value, 10.0);
        assert_eq!(sensor.variation_range, 5.0);
        assert_eq!(sensor.interval_secs, 2);
        assert!(sensor.error_definition.is_some());
    }

    #[test]
    fn interval_falls_back_to_telemetry_interval_option() {
        let catalog = MemoryCatalog::new();
        assert_eq!(default_interval_secs(&catalog).unwrap(), 5);
        catalog.set_option("telemetry_interval", "2500").unwrap();
        assert_eq!(default_interval_secs(&catalog).unwrap(), 3);
        catalog.set_option("telemetry_interval", "200").unwrap();
        assert_eq!(default_interval_secs(&catalog).unwrap(), 1);
        catalog.set_option("telemetry_interval", "soon").unwrap();
        assert_eq!(default_interval_secs(&catalog).unwrap(), 5);
    }

    #[test]
    fn duplicate_container_names_are_refused_before_insert() {
        let catalog: SharedCatalog = Arc::new(MemoryCatalog::new());
        let add = || ContainerAdd {
            name: "plant".into(),
            container_type: "default".into(),
            description: None,
            location: None,
        };
        run_container(catalog.clone(), ContainerCommand::Add(add())).unwrap();
        assert!(run_container(catalog.clone(), ContainerCommand::Add(add())).is_err());
        assert_eq!(catalog.list_containers().unwrap().len(), 1);
    }
}
