//! ---
//! tsim_section: "03-persistence"
//! tsim_subsection: "module"
//! tsim_type: "source"
//! tsim_scope: "code"
//! tsim_description: "SQLite catalog backend."
//! tsim_version: "v0.0.0-prealpha"
//! tsim_owner: "tbd"
//! ---
//! SQLite-backed implementation of [`CatalogStore`].
//!
//! Uses a single connection behind a mutex. Cascading deletes and run-state
//! changes execute inside one transaction each.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use crate::model::{
    Container, ContainerId, ContainerStatus, Device, DeviceId, NewContainer, NewDevice, NewSensor,
    OptionEntry, Sensor, SensorId,
};
use crate::store::CatalogStore;
use crate::{CatalogError, Result};

/// Idempotent DDL for catalog tables.
const CREATE_TABLES: &str = r"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS containers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    container_type TEXT NOT NULL DEFAULT 'default',
    description TEXT,
    location TEXT,
    status TEXT NOT NULL DEFAULT 'stopped',
    is_active INTEGER NOT NULL DEFAULT 0,
    error_detail TEXT,
    start_time TEXT,
    message_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS devices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    container_id INTEGER REFERENCES containers(id),
    name TEXT NOT NULL,
    device_type TEXT NOT NULL,
    description TEXT,
    location TEXT
);

CREATE TABLE IF NOT EXISTS sensors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    device_id INTEGER NOT NULL REFERENCES devices(id),
    name TEXT NOT NULL,
    sensor_type TEXT NOT NULL,
    unit TEXT NOT NULL DEFAULT '',
    min_value REAL NOT NULL,
    max_value REAL NOT NULL,
    base_value REAL NOT NULL,
    variation_range REAL NOT NULL,
    change_rate REAL NOT NULL,
    interval_secs INTEGER NOT NULL,
    error_definition TEXT
);

CREATE TABLE IF NOT EXISTS options (
    name TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_devices_container ON devices (container_id);
CREATE INDEX IF NOT EXISTS idx_sensors_device ON sensors (device_id);
CREATE INDEX IF NOT EXISTS idx_containers_status ON containers (status);
";

const CONTAINER_COLUMNS: &str = "id, name, container_type, description, location, status, \
     is_active, error_detail, start_time, message_count, created_at";
const DEVICE_COLUMNS: &str = "id, container_id, name, device_type, description, location";
const SENSOR_COLUMNS: &str = "id, device_id, name, sensor_type, unit, min_value, max_value, \
     base_value, variation_range, change_rate, interval_secs, error_definition";

/// SQLite catalog storage.
///
/// Create with [`SqliteCatalog::open`] for file-backed persistence or
/// [`SqliteCatalog::in_memory`] for tests.
pub struct SqliteCatalog {
    conn: Mutex<Connection>,
}

impl SqliteCatalog {
    /// Open or create a catalog database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(CREATE_TABLES)?;
        info!(path = %path.display(), "catalog database opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| conversion_error(idx, err))
}

fn container_from_row(row: &Row<'_>) -> rusqlite::Result<Container> {
    let status: String = row.get(5)?;
    let status = status
        .parse::<ContainerStatus>()
        .map_err(|err| conversion_error(5, err))?;
    let start_time: Option<String> = row.get(8)?;
    let start_time = start_time
        .as_deref()
        .map(|raw| parse_timestamp(8, raw))
        .transpose()?;
    let created_at: String = row.get(10)?;
    let message_count: i64 = row.get(9)?;
    Ok(Container {
        id: row.get(0)?,
        name: row.get(1)?,
        container_type: row.get(2)?,
        description: row.get(3)?,
        location: row.get(4)?,
        status,
        is_active: row.get(6)?,
        error_detail: row.get(7)?,
        start_time,
        message_count: u64::try_from(message_count).unwrap_or(0),
        created_at: parse_timestamp(10, &created_at)?,
    })
}

fn device_from_row(row: &Row<'_>) -> rusqlite::Result<Device> {
    Ok(Device {
        id: row.get(0)?,
        container_id: row.get(1)?,
        name: row.get(2)?,
        device_type: row.get(3)?,
        description: row.get(4)?,
        location: row.get(5)?,
    })
}

fn sensor_from_row(row: &Row<'_>) -> rusqlite::Result<Sensor> {
    let interval: i64 = row.get(10)?;
    Ok(Sensor {
        id: row.get(0)?,
        device_id: row.get(1)?,
        name: row.get(2)?,
        sensor_type: row.get(3)?,
        unit: row.get(4)?,
        min_value: row.get(5)?,
        max_value: row.get(6)?,
        base_value: row.get(7)?,
        variation_range: row.get(8)?,
        change_rate: row.get(9)?,
        interval_secs: u64::try_from(interval).unwrap_or(1),
        error_definition: row.get(11)?,
    })
}

fn load_container(conn: &Connection, id: ContainerId) -> Result<Container> {
    conn.query_row(
        &format!("SELECT {CONTAINER_COLUMNS} FROM containers WHERE id = ?1"),
        [id],
        container_from_row,
    )
    .optional()?
    .ok_or_else(|| CatalogError::not_found("container", id))
}

fn load_device(conn: &Connection, id: DeviceId) -> Result<Device> {
    conn.query_row(
        &format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE id = ?1"),
        [id],
        device_from_row,
    )
    .optional()?
    .ok_or_else(|| CatalogError::not_found("device", id))
}

fn load_sensor(conn: &Connection, id: SensorId) -> Result<Sensor> {
    conn.query_row(
        &format!("SELECT {SENSOR_COLUMNS} FROM sensors WHERE id = ?1"),
        [id],
        sensor_from_row,
    )
    .optional()?
    .ok_or_else(|| CatalogError::not_found("sensor", id))
}

fn exists(conn: &Connection, sql: &str, id: i64) -> Result<bool> {
    Ok(conn
        .query_row(sql, [id], |_| Ok(()))
        .optional()?
        .is_some())
}

fn name_taken(conn: &Connection, sql: &str, name: &str) -> Result<bool> {
    Ok(conn
        .query_row(sql, [name], |_| Ok(()))
        .optional()?
        .is_some())
}

fn ensure_container(conn: &Connection, id: ContainerId) -> Result<()> {
    if exists(conn, "SELECT 1 FROM containers WHERE id = ?1", id)? {
        Ok(())
    } else {
        Err(CatalogError::not_found("container", id))
    }
}

fn ensure_device(conn: &Connection, id: DeviceId) -> Result<()> {
    if exists(conn, "SELECT 1 FROM devices WHERE id = ?1", id)? {
        Ok(())
    } else {
        Err(CatalogError::not_found("device", id))
    }
}

fn clamp_count(count: u64) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

impl CatalogStore for SqliteCatalog {
    fn create_container(&self, new: NewContainer) -> Result<Container> {
        new.validate()?;
        let conn = self.conn.lock();
        if name_taken(&conn, "SELECT 1 FROM containers WHERE name = ?1", &new.name)? {
            return Err(CatalogError::Conflict(format!(
                "container name '{}' already exists",
                new.name
            )));
        }
        let now = Utc::now();
        conn.execute(
            "INSERT INTO containers (name, container_type, description, location, status, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            params![
                new.name,
                new.container_type,
                new.description,
                new.location,
                ContainerStatus::Stopped.as_ref(),
                now.to_rfc3339(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        load_container(&conn, id)
    }

    fn container(&self, id: ContainerId) -> Result<Container> {
        load_container(&self.conn.lock(), id)
    }

    fn list_containers(&self) -> Result<Vec<Container>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare(&format!("SELECT {CONTAINER_COLUMNS} FROM containers ORDER BY id"))?;
        let rows = stmt
            .query_map([], container_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn containers_by_state(&self, status: ContainerStatus) -> Result<Vec<Container>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONTAINER_COLUMNS} FROM containers WHERE status = ?1 ORDER BY id"
        ))?;
        let rows = stmt
            .query_map([status.as_ref()], container_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn container_name_in_use(&self, name: &str) -> Result<bool> {
        name_taken(&self.conn.lock(), "SELECT 1 FROM containers WHERE name = ?1", name)
    }

    fn set_container_state(
        &self,
        id: ContainerId,
        status: ContainerStatus,
        error_detail: Option<&str>,
    ) -> Result<Container> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut container = load_container(&tx, id)?;
        container.apply_state(status, error_detail, Utc::now());
        tx.execute(
            "UPDATE containers
                SET status = ?2, is_active = ?3, error_detail = ?4, start_time = ?5, message_count = ?6
              WHERE id = ?1",
            params![
                id,
                container.status.as_ref(),
                container.is_active,
                container.error_detail,
                container.start_time.map(|ts| ts.to_rfc3339()),
                clamp_count(container.message_count),
            ],
        )?;
        tx.commit()?;
        debug!(container_id = id, status = %container.status, "container state persisted");
        Ok(container)
    }

    fn increment_message_count(&self, id: ContainerId, delta: u64) -> Result<()> {
        let changed = self.conn.lock().execute(
            "UPDATE containers SET message_count = message_count + ?2 WHERE id = ?1",
            params![id, clamp_count(delta)],
        )?;
        if changed == 0 {
            return Err(CatalogError::not_found("container", id));
        }
        Ok(())
    }

    fn delete_container(&self, id: ContainerId) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let container = load_container(&tx, id)?;
        if !container.is_deletable() {
            return Err(CatalogError::Conflict(format!(
                "container {id} is {} and cannot be deleted",
                container.status
            )));
        }
        let sensors = tx.execute(
            "DELETE FROM sensors WHERE device_id IN (SELECT id FROM devices WHERE container_id = ?1)",
            [id],
        )?;
        let devices = tx.execute("DELETE FROM devices WHERE container_id = ?1", [id])?;
        tx.execute("DELETE FROM containers WHERE id = ?1", [id])?;
        tx.commit()?;
        debug!(container_id = id, devices, sensors, "container deleted with dependents");
        Ok(())
    }

    fn create_device(&self, new: NewDevice) -> Result<Device> {
        new.validate()?;
        let conn = self.conn.lock();
        if let Some(container) = new.container_id {
            ensure_container(&conn, container)?;
        }
        conn.execute(
            "INSERT INTO devices (container_id, name, device_type, description, location)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                new.container_id,
                new.name,
                new.device_type,
                new.description,
                new.location
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(new.into_device(id))
    }

    fn device(&self, id: DeviceId) -> Result<Device> {
        load_device(&self.conn.lock(), id)
    }

    fn list_devices(&self) -> Result<Vec<Device>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("SELECT {DEVICE_COLUMNS} FROM devices ORDER BY id"))?;
        let rows = stmt
            .query_map([], device_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn devices_by_container(&self, id: ContainerId) -> Result<Vec<Device>> {
        let conn = self.conn.lock();
        ensure_container(&conn, id)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE container_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt
            .query_map([id], device_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn device_name_in_use(&self, name: &str) -> Result<bool> {
        name_taken(&self.conn.lock(), "SELECT 1 FROM devices WHERE name = ?1 LIMIT 1", name)
    }

    fn assign_device(&self, id: DeviceId, container: Option<ContainerId>) -> Result<Device> {
        let conn = self.conn.lock();
        if let Some(container) = container {
            ensure_container(&conn, container)?;
        }
        let changed = conn.execute(
            "UPDATE devices SET container_id = ?2 WHERE id = ?1",
            params![id, container],
        )?;
        if changed == 0 {
            return Err(CatalogError::not_found("device", id));
        }
        load_device(&conn, id)
    }

    fn delete_device(&self, id: DeviceId) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        ensure_device(&tx, id)?;
        tx.execute("DELETE FROM sensors WHERE device_id = ?1", [id])?;
        tx.execute("DELETE FROM devices WHERE id = ?1", [id])?;
        tx.commit()?;
        Ok(())
    }

    fn create_sensor(&self, new: NewSensor) -> Result<Sensor> {
        new.validate()?;
        let conn = self.conn.lock();
        ensure_device(&conn, new.device_id)?;
        conn.execute(
            "INSERT INTO sensors (device_id, name, sensor_type, unit, min_value, max_value, base_value,
                                  variation_range, change_rate, interval_secs, error_definition)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                new.device_id,
                new.name,
                new.sensor_type,
                new.unit,
                new.min_value,
                new.max_value,
                new.base_value,
                new.variation_range,
                new.change_rate,
                clamp_count(new.interval_secs),
                new.error_definition,
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(new.into_sensor(id))
    }

    fn sensor(&self, id: SensorId) -> Result<Sensor> {
        load_sensor(&self.conn.lock(), id)
    }

    fn sensors_by_device(&self, id: DeviceId) -> Result<Vec<Sensor>> {
        let conn = self.conn.lock();
        ensure_device(&conn, id)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SENSOR_COLUMNS} FROM sensors WHERE device_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt
            .query_map([id], sensor_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn delete_sensor(&self, id: SensorId) -> Result<()> {
        let changed = self
            .conn
            .lock()
            .execute("DELETE FROM sensors WHERE id = ?1", [id])?;
        if changed == 0 {
            return Err(CatalogError::not_found("sensor", id));
        }
        Ok(())
    }

    fn option(&self, name: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .lock()
            .query_row("SELECT value FROM options WHERE name = ?1", [name], |row| {
                row.get(0)
            })
            .optional()?)
    }

    fn set_option(&self, name: &str, value: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(CatalogError::Invalid("option name must not be empty".into()));
        }
        self.conn.lock().execute(
            "INSERT INTO options (name, value) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET value = excluded.value",
            params![name, value],
        )?;
        Ok(())
    }

    fn options(&self) -> Result<Vec<OptionEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT name, value FROM options ORDER BY name")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(OptionEntry {
                    name: row.get(0)?,
                    value: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
