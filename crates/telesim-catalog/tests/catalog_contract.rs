//! ---
//! tsim_section: "12-testing"
//! tsim_subsection: "test"
//! tsim_type: "test"
//! tsim_scope: "code"
//! tsim_description: "Behaviour shared by every catalog backend."
//! tsim_version: "v0.0.0-prealpha"
//! tsim_owner: "tbd"
//! ---
use telesim_catalog::{
    CatalogError, CatalogStore, ContainerStatus, MemoryCatalog, NewContainer, NewDevice,
    NewSensor, SqliteCatalog,
};

fn backends() -> Vec<(&'static str, Box<dyn CatalogStore>)> {
    vec![
        ("memory", Box::new(MemoryCatalog::new())),
        ("sqlite", Box::new(SqliteCatalog::in_memory().unwrap())),
    ]
}

#[test]
fn container_names_are_unique() {
    for (backend, catalog) in backends() {
        catalog.create_container(NewContainer::named("line-1")).unwrap();
        let err = catalog
            .create_container(NewContainer::named("line-1"))
            .unwrap_err();
        assert!(matches!(err, CatalogError::Conflict(_)), "{backend}");
    }
}

#[test]
fn new_containers_start_stopped_and_inactive() {
    for (backend, catalog) in backends() {
        let container = catalog.create_container(NewContainer::named("fresh")).unwrap();
        assert_eq!(container.status, ContainerStatus::Stopped, "{backend}");
        assert!(!container.is_active, "{backend}");
        assert_eq!(container.message_count, 0, "{backend}");
    }
}

#[test]
fn state_changes_keep_active_flag_consistent() {
    for (backend, catalog) in backends() {
        let id = catalog
            .create_container(NewContainer::named("plant"))
            .unwrap()
            .id;
        for status in [
            ContainerStatus::Starting,
            ContainerStatus::Running,
            ContainerStatus::Stopping,
            ContainerStatus::Stopped,
            ContainerStatus::Error,
        ] {
            let returned = catalog.set_container_state(id, status, Some("boom")).unwrap();
            let stored = catalog.container(id).unwrap();
            assert_eq!(returned.status, stored.status, "{backend}");
            assert_eq!(stored.is_active, status == ContainerStatus::Running, "{backend}");
            assert_eq!(
                stored.error_detail.is_some(),
                status == ContainerStatus::Error,
                "{backend}"
            );
        }
    }
}

#[test]
fn containers_by_state_filters() {
    for (backend, catalog) in backends() {
        let a = catalog.create_container(NewContainer::named("a")).unwrap().id;
        let b = catalog.create_container(NewContainer::named("b")).unwrap().id;
        catalog
            .set_container_state(a, ContainerStatus::Running, None)
            .unwrap();
        let running = catalog.containers_by_state(ContainerStatus::Running).unwrap();
        assert_eq!(running.len(), 1, "{backend}");
        assert_eq!(running[0].id, a, "{backend}");
        let stopped = catalog.containers_by_state(ContainerStatus::Stopped).unwrap();
        assert_eq!(stopped.iter().map(|c| c.id).collect::<Vec<_>>(), vec![b]);
    }
}

#[test]
fn message_count_accumulates_and_resets_on_start() {
    for (backend, catalog) in backends() {
        let id = catalog
            .create_container(NewContainer::named("counter"))
            .unwrap()
            .id;
        catalog.increment_message_count(id, 5).unwrap();
        catalog.increment_message_count(id, 7).unwrap();
        assert_eq!(catalog.container(id).unwrap().message_count, 12, "{backend}");
        catalog
            .set_container_state(id, ContainerStatus::Starting, None)
            .unwrap();
        assert_eq!(catalog.container(id).unwrap().message_count, 0, "{backend}");
        assert!(catalog.increment_message_count(999, 1).unwrap_err().is_not_found());
    }
}

#[test]
fn deleting_container_cascades_to_devices_and_sensors() {
    for (backend, catalog) in backends() {
        let container = catalog.create_container(NewContainer::named("site")).unwrap();
        let other = catalog.create_container(NewContainer::named("other")).unwrap();
        let device = catalog
            .create_device(NewDevice::named("pump").in_container(container.id))
            .unwrap();
        let kept = catalog
            .create_device(NewDevice::named("valve").in_container(other.id))
            .unwrap();
        let sensor = catalog
            .create_sensor(NewSensor::ranged(device.id, "pressure", 0.0, 10.0))
            .unwrap();
        let kept_sensor = catalog
            .create_sensor(NewSensor::ranged(kept.id, "flow", 0.0, 5.0))
            .unwrap();

        catalog.delete_container(container.id).unwrap();

        assert!(catalog.container(container.id).unwrap_err().is_not_found(), "{backend}");
        assert!(catalog.device(device.id).unwrap_err().is_not_found(), "{backend}");
        assert!(catalog.sensor(sensor.id).unwrap_err().is_not_found(), "{backend}");
        assert!(catalog.device(kept.id).is_ok(), "{backend}");
        assert!(catalog.sensor(kept_sensor.id).is_ok(), "{backend}");
    }
}

#[test]
fn deleting_device_cascades_to_sensors() {
    for (backend, catalog) in backends() {
        let device = catalog.create_device(NewDevice::named("meter")).unwrap();
        let sensor = catalog
            .create_sensor(NewSensor::ranged(device.id, "kwh", 0.0, 100.0))
            .unwrap();
        catalog.delete_device(device.id).unwrap();
        assert!(catalog.sensor(sensor.id).unwrap_err().is_not_found(), "{backend}");
        assert!(catalog.delete_device(device.id).unwrap_err().is_not_found(), "{backend}");
    }
}

#[test]
fn devices_and_sensors_require_existing_parents() {
    for (backend, catalog) in backends() {
        let err = catalog
            .create_device(NewDevice::named("ghost").in_container(404))
            .unwrap_err();
        assert!(err.is_not_found(), "{backend}");
        let err = catalog
            .create_sensor(NewSensor::ranged(404, "orphan", 0.0, 1.0))
            .unwrap_err();
        assert!(err.is_not_found(), "{backend}");
        assert!(catalog.devices_by_container(404).unwrap_err().is_not_found());
    }
}

#[test]
fn assigning_device_moves_it_between_containers() {
    for (backend, catalog) in backends() {
        let a = catalog.create_container(NewContainer::named("a")).unwrap().id;
        let b = catalog.create_container(NewContainer::named("b")).unwrap().id;
        let device = catalog
            .create_device(NewDevice::named("mover").in_container(a))
            .unwrap();
        catalog.assign_device(device.id, Some(b)).unwrap();
        assert!(catalog.devices_by_container(a).unwrap().is_empty(), "{backend}");
        assert_eq!(catalog.devices_by_container(b).unwrap().len(), 1, "{backend}");
        let detached = catalog.assign_device(device.id, None).unwrap();
        assert_eq!(detached.container_id, None, "{backend}");
    }
}

#[test]
fn options_seed_once_and_update() {
    for (backend, catalog) in backends() {
        assert_eq!(catalog.seed_default_options().unwrap(), 3, "{backend}");
        assert_eq!(catalog.seed_default_options().unwrap(), 0, "{backend}");
        assert!(!catalog.option_bool("demo_mode").unwrap(), "{backend}");
        catalog.set_option("demo_mode", "1").unwrap();
        assert!(catalog.option_bool("demo_mode").unwrap(), "{backend}");
        assert_eq!(
            catalog.option("telemetry_interval").unwrap().as_deref(),
            Some("5000"),
            "{backend}"
        );
        assert!(catalog.option("missing").unwrap().is_none(), "{backend}");
        assert_eq!(catalog.options().unwrap().len(), 3, "{backend}");
    }
}

#[test]
fn name_in_use_queries_see_existing_rows() {
    for (backend, catalog) in backends() {
        assert!(!catalog.container_name_in_use("hall").unwrap(), "{backend}");
        catalog.create_container(NewContainer::named("hall")).unwrap();
        assert!(catalog.container_name_in_use("hall").unwrap(), "{backend}");

        catalog.create_device(NewDevice::named("fan")).unwrap();
        assert!(catalog.device_name_in_use("fan").unwrap(), "{backend}");
        // storage itself allows duplicate device names
        catalog.create_device(NewDevice::named("fan")).unwrap();
        assert_eq!(catalog.list_devices().unwrap().len(), 2, "{backend}");
    }
}
