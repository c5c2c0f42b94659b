//! ---
//! tsim_section: "11-simulation"
//! tsim_subsection: "module"
//! tsim_type: "source"
//! tsim_scope: "code"
//! tsim_description: "Telemetry records emitted by running scenarios."
//! tsim_version: "v0.0.0-prealpha"
//! tsim_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use telesim_catalog::{ContainerId, DeviceId, Sensor, SensorId};

/// One sensor reading as delivered to the gateway.
///
/// `sequence` is monotonic per device task; sinks may use it together with
/// `sensorId` to discard redelivered records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryMessage {
    pub timestamp: DateTime<Utc>,
    pub sensor_id: SensorId,
    pub sensor_name: String,
    pub device_id: DeviceId,
    pub device_name: String,
    pub container_id: ContainerId,
    /// `None` when the reading went missing.
    pub value: Option<f64>,
    pub unit: String,
    pub sequence: u64,
}

impl TelemetryMessage {
    pub fn reading(
        sensor: &Sensor,
        device_name: &str,
        container_id: ContainerId,
        timestamp: DateTime<Utc>,
        value: Option<f64>,
        sequence: u64,
    ) -> Self {
        Self {
            timestamp,
            sensor_id: sensor.id,
            sensor_name: sensor.name.clone(),
            device_id: sensor.device_id,
            device_name: device_name.to_owned(),
            container_id,
            value,
            unit: sensor.unit.clone(),
            sequence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sensor() -> Sensor {
        Sensor {
            id: 7,
            device_id: 3,
            name: "temperature".into(),
            sensor_type: "thermal".into(),
            unit: "°C".into(),
            min_value: -10.0,
            max_value: 40.0,
            base_value: 21.0,
            variation_range: 2.0,
            change_rate: 0.1,
            interval_secs: 1,
            error_definition: None,
        }
    }

    #[test]
    fn serialises_with_gateway_field_names() {
        let ts = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let message = TelemetryMessage::reading(&sensor(), "boiler", 1, ts, None, 9);
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({
                "timestamp": "2024-05-01T12:00:00Z",
                "sensorId": 7,
                "sensorName": "temperature",
                "deviceId": 3,
                "deviceName": "boiler",
                "containerId": 1,
                "value": null,
                "unit": "°C",
                "sequence": 9
            })
        );
    }
}
