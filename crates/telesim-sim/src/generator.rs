//! ---
//! tsim_section: "11-simulation"
//! tsim_subsection: "module"
//! tsim_type: "source"
//! tsim_scope: "code"
//! tsim_description: "Bounded random-walk sensor simulator with fault injection."
//! tsim_version: "v0.0.0-prealpha"
//! tsim_owner: "tbd"
//! ---
use rand::prelude::*;
use telesim_catalog::{Sensor, SensorId};
use tracing::{debug, warn};

use crate::faults::ErrorDefinition;

/// Drift is applied once every this many iterations.
const DRIFT_ITERATIONS: u64 = 10;
/// Minimum distance, in iterations, between two duplicated readings.
const DUPLICATE_SPACING: u64 = 3;

/// Per-sensor seed so every sensor in a scenario walks independently while
/// staying reproducible for a fixed engine seed.
pub fn derive_seed(seed: u64, sensor_id: SensorId) -> u64 {
    seed ^ (sensor_id as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Outcome of one simulation step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub value: Option<f64>,
    /// The reading should be delivered twice.
    pub duplicate: bool,
}

/// Generates successive readings for a single sensor.
#[derive(Debug)]
pub struct SensorSimulator {
    sensor: Sensor,
    base_value: f64,
    last_value: f64,
    iteration: u64,
    last_duplicate: Option<u64>,
    drifting: bool,
    fault: Option<ErrorDefinition>,
    rng: StdRng,
}

impl SensorSimulator {
    pub fn new(sensor: Sensor, seed: u64) -> Self {
        let fault = sensor
            .error_definition
            .as_deref()
            .and_then(|raw| match ErrorDefinition::from_json(raw) {
                Ok(ErrorDefinition::NoError) => None,
                Ok(definition) => Some(definition),
                Err(err) => {
                    warn!(sensor_id = sensor.id, error = %err, "ignoring unreadable error definition");
                    None
                }
            });
        debug!(sensor_id = sensor.id, sensor = %sensor.name, fault = fault.as_ref().map(ErrorDefinition::kind), "sensor simulator ready");
        Self {
            base_value: sensor.base_value,
            last_value: sensor.base_value,
            iteration: 0,
            last_duplicate: None,
            drifting: false,
            fault,
            rng: StdRng::seed_from_u64(derive_seed(seed, sensor.id)),
            sensor,
        }
    }

    pub fn sensor(&self) -> &Sensor {
        &self.sensor
    }

    /// Current centre of the walk; moves only under a drift fault.
    pub fn base_value(&self) -> f64 {
        self.base_value
    }

    pub fn next_sample(&mut self) -> Sample {
        let max_change = self.sensor.variation_range * self.sensor.change_rate;
        let step = uniform(&mut self.rng, -max_change, max_change);
        let window_low = self.base_value - self.sensor.variation_range;
        let window_high = self.base_value + self.sensor.variation_range;
        let walked = (self.last_value + step)
            .clamp(window_low.min(window_high), window_high.max(window_low))
            .clamp(self.sensor.min_value, self.sensor.max_value);
        self.last_value = walked;

        let mut sample = Sample {
            value: Some(walked),
            duplicate: false,
        };
        if let Some(fault) = self.fault.clone() {
            self.apply_fault(&fault, &mut sample);
        }
        sample.value = sample.value.map(round2);
        self.iteration += 1;
        sample
    }

    fn apply_fault(&mut self, fault: &ErrorDefinition, sample: &mut Sample) {
        match *fault {
            ErrorDefinition::NoError => {}
            ErrorDefinition::Anomaly {
                probability_pos_anomaly,
                probability_neg_anomaly,
                pos_anomaly_lower_range,
                pos_anomaly_upper_range,
                neg_anomaly_lower_range,
                neg_anomaly_upper_range,
            } => {
                let Some(value) = sample.value.as_mut() else {
                    return;
                };
                if self.rng.gen::<f64>() < probability_pos_anomaly {
                    *value += uniform(&mut self.rng, pos_anomaly_lower_range, pos_anomaly_upper_range);
                    debug!(sensor_id = self.sensor.id, value = *value, "positive anomaly");
                }
                if self.rng.gen::<f64>() < probability_neg_anomaly {
                    *value -= uniform(&mut self.rng, neg_anomaly_lower_range, neg_anomaly_upper_range);
                    debug!(sensor_id = self.sensor.id, value = *value, "negative anomaly");
                }
            }
            ErrorDefinition::Mcar { probability } => {
                if self.rng.gen::<f64>() < probability {
                    sample.value = None;
                }
            }
            ErrorDefinition::DuplicateData { probability } => {
                let spaced = self
                    .last_duplicate
                    .map_or(true, |last| self.iteration - last >= DUPLICATE_SPACING);
                if spaced && self.rng.gen::<f64>() < probability {
                    self.last_duplicate = Some(self.iteration);
                    sample.duplicate = true;
                }
            }
            ErrorDefinition::Drift {
                after_n_iterations,
                average_drift_rate,
                variation_range,
            } => {
                if self.drifting || self.iteration >= after_n_iterations {
                    self.drifting = true;
                    if self.iteration % DRIFT_ITERATIONS == 0 {
                        let change = average_drift_rate
                            + uniform(&mut self.rng, -variation_range, variation_range);
                        self.base_value += change;
                        debug!(sensor_id = self.sensor.id, change, base = self.base_value, "drift applied");
                    }
                }
            }
        }
    }
}

fn uniform(rng: &mut StdRng, a: f64, b: f64) -> f64 {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    let span = high - low;
    if !span.is_finite() || span <= f64::EPSILON {
        return low;
    }
    rng.gen_range(low..=high)
}

fn round2(value: f64) -> f64 {
    let scaled = value * 100.0;
    if scaled.is_finite() {
        scaled.round() / 100.0
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sensor(error_definition: Option<&str>) -> Sensor {
        Sensor {
            id: 1,
            device_id: 1,
            name: "temp".into(),
            sensor_type: "thermal".into(),
            unit: "°C".into(),
            min_value: 0.0,
            max_value: 100.0,
            base_value: 50.0,
            variation_range: 10.0,
            change_rate: 0.5,
            interval_secs: 1,
            error_definition: error_definition.map(str::to_owned),
        }
    }

    #[test]
    fn walk_stays_inside_variation_window() {
        let mut sim = SensorSimulator::new(sensor(None), 42);
        for _ in 0..2_000 {
            let value = sim.next_sample().value.unwrap();
            assert!((40.0..=60.0).contains(&value), "{value}");
        }
    }

    #[test]
    fn walk_respects_sensor_bounds() {
        let mut narrow = sensor(None);
        narrow.min_value = 45.0;
        narrow.max_value = 52.0;
        let mut sim = SensorSimulator::new(narrow, 7);
        for _ in 0..1_000 {
            let value = sim.next_sample().value.unwrap();
            assert!((45.0..=52.0).contains(&value), "{value}");
        }
    }

    #[test]
    fn values_are_rounded_to_two_decimals() {
        let mut sim = SensorSimulator::new(sensor(None), 3);
        for _ in 0..100 {
            let value = sim.next_sample().value.unwrap();
            assert!(((value * 100.0).round() - value * 100.0).abs() < 1e-6);
        }
    }

    #[test]
    fn same_seed_same_sequence() {
        let mut a = SensorSimulator::new(sensor(None), 99);
        let mut b = SensorSimulator::new(sensor(None), 99);
        for _ in 0..50 {
            assert_eq!(a.next_sample(), b.next_sample());
        }
    }

    #[test]
    fn zero_change_rate_holds_base_value() {
        let mut flat = sensor(None);
        flat.change_rate = 0.0;
        let mut sim = SensorSimulator::new(flat, 1);
        assert_eq!(sim.next_sample().value, Some(50.0));
    }

    #[test]
    fn certain_mcar_drops_every_value() {
        let mut sim = SensorSimulator::new(sensor(Some(r#"{"type":"mcar","probability":1.0}"#)), 5);
        for _ in 0..20 {
            assert_eq!(sim.next_sample().value, None);
        }
    }

    #[test]
    fn duplicates_are_spaced_apart() {
        let mut sim = SensorSimulator::new(
            sensor(Some(r#"{"type":"duplicate_data","probability":1.0}"#)),
            5,
        );
        let flags: Vec<bool> = (0..9).map(|_| sim.next_sample().duplicate).collect();
        assert_eq!(
            flags,
            vec![true, false, false, true, false, false, true, false, false]
        );
    }

    #[test]
    fn certain_positive_anomaly_leaves_window() {
        let mut sim = SensorSimulator::new(
            sensor(Some(
                r#"{"type":"anomaly","probability_pos_anomaly":1.0,"pos_anomaly_lower_range":100.0,"pos_anomaly_upper_range":200.0}"#,
            )),
            11,
        );
        let value = sim.next_sample().value.unwrap();
        assert!(value >= 140.0, "{value}");
    }

    #[test]
    fn drift_moves_base_every_ten_iterations() {
        let mut sim = SensorSimulator::new(
            sensor(Some(
                r#"{"type":"drift","after_n_iterations":0,"average_drift_rate":1.0,"variation_range":0.0}"#,
            )),
            13,
        );
        sim.next_sample();
        assert_eq!(sim.base_value(), 51.0);
        for _ in 1..10 {
            sim.next_sample();
        }
        assert_eq!(sim.base_value(), 51.0);
        sim.next_sample();
        assert_eq!(sim.base_value(), 52.0);
    }

    #[test]
    fn uniform_degenerates_to_low_on_unsampleable_ranges() {
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(uniform(&mut rng, -1e308, 1e308), -1e308);
        assert_eq!(uniform(&mut rng, 0.0, f64::INFINITY), 0.0);
        assert_eq!(uniform(&mut rng, 4.0, 4.0), 4.0);
        let value = uniform(&mut rng, 1.0, 2.0);
        assert!((1.0..=2.0).contains(&value));
    }

    #[test]
    fn huge_variation_does_not_panic() {
        let mut wide = sensor(None);
        wide.min_value = -1e308;
        wide.max_value = 1e308;
        wide.base_value = 0.0;
        wide.variation_range = 1e308;
        wide.change_rate = 1.0;
        let mut sim = SensorSimulator::new(wide, 9);
        for _ in 0..5 {
            let value = sim.next_sample().value.unwrap();
            assert!(value.is_finite());
        }
    }

    #[test]
    fn unreadable_definition_is_ignored() {
        let mut sim = SensorSimulator::new(sensor(Some(r#"{"type":"gremlins"}"#)), 1);
        assert!(sim.next_sample().value.is_some());
    }
}
