//! ---
//! tsim_section: "11-simulation"
//! tsim_subsection: "module"
//! tsim_type: "source"
//! tsim_scope: "code"
//! tsim_description: "Fault definitions injected into simulated sensor values."
//! tsim_version: "v0.0.0-prealpha"
//! tsim_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};

/// Faults a sensor may exhibit, stored as JSON on the sensor row.
///
/// ```json
/// {"type": "mcar", "probability": 0.1}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ErrorDefinition {
    NoError,
    /// Occasional spikes above and dips below the walked value.
    Anomaly {
        #[serde(default)]
        probability_pos_anomaly: f64,
        #[serde(default)]
        probability_neg_anomaly: f64,
        #[serde(default)]
        pos_anomaly_lower_range: f64,
        #[serde(default)]
        pos_anomaly_upper_range: f64,
        #[serde(default)]
        neg_anomaly_lower_range: f64,
        #[serde(default)]
        neg_anomaly_upper_range: f64,
    },
    /// Values missing completely at random.
    Mcar {
        #[serde(default)]
        probability: f64,
    },
    DuplicateData {
        #[serde(default)]
        probability: f64,
    },
    /// Base value creeps away once the sensor has run long enough.
    Drift {
        #[serde(default)]
        after_n_iterations: u64,
        #[serde(default)]
        average_drift_rate: f64,
        #[serde(default)]
        variation_range: f64,
    },
}

impl ErrorDefinition {
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ErrorDefinition::NoError => "no_error",
            ErrorDefinition::Anomaly { .. } => "anomaly",
            ErrorDefinition::Mcar { .. } => "mcar",
            ErrorDefinition::DuplicateData { .. } => "duplicate_data",
            ErrorDefinition::Drift { .. } => "drift",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_definitions() {
        let mcar = ErrorDefinition::from_json(r#"{"type":"mcar","probability":0.25}"#).unwrap();
        assert_eq!(mcar, ErrorDefinition::Mcar { probability: 0.25 });

        let drift = ErrorDefinition::from_json(
            r#"{"type":"drift","after_n_iterations":5,"average_drift_rate":0.5,"variation_range":0.1}"#,
        )
        .unwrap();
        assert_eq!(drift.kind(), "drift");
    }

    #[test]
    fn missing_fields_default_to_zero() {
        let anomaly = ErrorDefinition::from_json(r#"{"type":"anomaly"}"#).unwrap();
        match anomaly {
            ErrorDefinition::Anomaly {
                probability_pos_anomaly,
                probability_neg_anomaly,
                ..
            } => {
                assert_eq!(probability_pos_anomaly, 0.0);
                assert_eq!(probability_neg_anomaly, 0.0);
            }
            other => panic!("unexpected definition {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(ErrorDefinition::from_json(r#"{"type":"gremlins"}"#).is_err());
    }
}
