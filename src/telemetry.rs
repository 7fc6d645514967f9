use crate::utils::monotonic_unix_secs;

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_SENSOR_IDS: [&str; 4] = ["sensor-10", "sensor-11", "sensor-12", "sensor-13"];

#[derive(Debug, Error, PartialEq)]
#[error("invalid humidity range [{min}, {max}]")]
pub struct InvalidRange {
    pub min: f64,
    pub max: f64,
}

/// Inclusive range of plausible relative humidity values.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HumidityRange {
    min: f64,
    max: f64,
}

impl HumidityRange {
    pub fn new(min: f64, max: f64) -> Result<Self, InvalidRange> {
        if !min.is_finite() || !max.is_finite() || min > max {
            return Err(InvalidRange { min, max });
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> f64 { self.min }
    pub fn max(&self) -> f64 { self.max }

    pub fn contains(&self, value: f64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

impl Default for HumidityRange {
    fn default() -> Self {
        Self { min: 40.0, max: 80.0 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    #[serde(rename = "id")]
    pub sensor_id: String,
    #[serde(rename = "humidity")]
    pub value:     f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryBatch {
    pub gateway_id: String,
    #[serde(rename = "userId", alias = "ownerId")]
    pub owner_id:   String,
    pub timestamp:  i64,            // unix epoch secs
    pub readings:   Vec<Reading>,
}

/// Anything that can hand the publisher a batch on demand; the simulator
/// below is one, a real sensor bus would be another.
pub trait TelemetrySource: Send {
    fn next_batch(&mut self) -> TelemetryBatch;
}

/// One reading per sensor id, in order, each drawn uniformly from `range`
/// and rounded to two decimals.
pub fn generate_batch<R: Rng + ?Sized>(
    rng: &mut R,
    gateway_id: &str,
    owner_id: &str,
    sensor_ids: &[String],
    range: HumidityRange,
) -> TelemetryBatch {
    let readings = sensor_ids
        .iter()
        .map(|id| {
            let raw: f64 = rng.gen_range(range.min..=range.max);
            let value = ((raw * 100.0).round() / 100.0).clamp(range.min, range.max);
            debug_assert!(range.contains(value));
            Reading { sensor_id: id.clone(), value }
        })
        .collect();

    TelemetryBatch {
        gateway_id: gateway_id.to_owned(),
        owner_id:   owner_id.to_owned(),
        timestamp:  monotonic_unix_secs(),
        readings,
    }
}

pub struct HumiditySimulator {
    gateway_id: String,
    owner_id:   String,
    sensor_ids: Vec<String>,
    range:      HumidityRange,
    rng:        StdRng,
}

impl HumiditySimulator {
    pub fn new(
        gateway_id: impl Into<String>,
        owner_id: impl Into<String>,
        sensor_ids: Vec<String>,
        range: HumidityRange,
    ) -> Self {
        Self::with_rng(gateway_id, owner_id, sensor_ids, range, StdRng::from_entropy())
    }

    pub fn with_rng(
        gateway_id: impl Into<String>,
        owner_id: impl Into<String>,
        sensor_ids: Vec<String>,
        range: HumidityRange,
        rng: StdRng,
    ) -> Self {
        let sensor_ids = if sensor_ids.is_empty() {
            DEFAULT_SENSOR_IDS.iter().map(|s| s.to_string()).collect()
        } else {
            sensor_ids
        };
        Self {
            gateway_id: gateway_id.into(),
            owner_id: owner_id.into(),
            sensor_ids,
            range,
            rng,
        }
    }
}

impl TelemetrySource for HumiditySimulator {
    fn next_batch(&mut self) -> TelemetryBatch {
        generate_batch(
            &mut self.rng,
            &self.gateway_id,
            &self.owner_id,
            &self.sensor_ids,
            self.range,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("sensor-{}", 10 + i)).collect()
    }

    #[test]
    fn values_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let range = HumidityRange::default();
        for _ in 0..500 {
            let batch = generate_batch(&mut rng, "gw", "owner", &ids(4), range);
            assert!(batch.readings.iter().all(|r| range.contains(r.value)));
        }

        let narrow = HumidityRange::new(40.001, 40.004).unwrap();
        for _ in 0..200 {
            let batch = generate_batch(&mut rng, "gw", "owner", &ids(3), narrow);
            assert!(batch.readings.iter().all(|r| narrow.contains(r.value)));
        }
    }

    #[test]
    fn one_reading_per_sensor_in_order() {
        let mut rng = StdRng::seed_from_u64(1);
        for n in [0, 1, 4, 17] {
            let sensors = ids(n);
            let batch = generate_batch(&mut rng, "device-007", "ownerA", &sensors, HumidityRange::default());
            assert_eq!(batch.readings.len(), n);
            let got: Vec<_> = batch.readings.iter().map(|r| r.sensor_id.clone()).collect();
            assert_eq!(got, sensors);
            assert_eq!(batch.gateway_id, "device-007");
            assert_eq!(batch.owner_id, "ownerA");
        }
    }

    #[test]
    fn timestamps_are_non_decreasing() {
        let mut sim = HumiditySimulator::with_rng(
            "gw", "owner", vec![], HumidityRange::default(), StdRng::seed_from_u64(3),
        );
        let mut last = sim.next_batch().timestamp;
        for _ in 0..100 {
            let ts = sim.next_batch().timestamp;
            assert!(ts >= last);
            last = ts;
        }
    }

    #[test]
    fn simulator_defaults_sensor_ids() {
        let mut sim = HumiditySimulator::new("gw", "owner", vec![], HumidityRange::default());
        let batch = sim.next_batch();
        let got: Vec<_> = batch.readings.iter().map(|r| r.sensor_id.as_str()).collect();
        assert_eq!(got, DEFAULT_SENSOR_IDS);
    }

    #[test]
    fn invalid_ranges_are_refused() {
        assert!(HumidityRange::new(80.0, 40.0).is_err());
        assert!(HumidityRange::new(f64::NAN, 40.0).is_err());
        assert!(HumidityRange::new(0.0, f64::INFINITY).is_err());
        assert!(HumidityRange::new(55.0, 55.0).is_ok());
    }

    #[test]
    fn wire_shape_matches_gateway_payload() {
        let batch = TelemetryBatch {
            gateway_id: "device-007".into(),
            owner_id:   "ownerA".into(),
            timestamp:  1_700_000_000,
            readings:   vec![Reading { sensor_id: "sensor-10".into(), value: 55.3 }],
        };
        assert_eq!(
            serde_json::to_value(&batch).unwrap(),
            json!({
                "gatewayId": "device-007",
                "userId": "ownerA",
                "timestamp": 1700000000,
                "readings": [{"id": "sensor-10", "humidity": 55.3}]
            })
        );

        let from_owner_key: TelemetryBatch = serde_json::from_value(json!({
            "gatewayId": "device-007",
            "ownerId": "ownerA",
            "timestamp": 1700000000,
            "readings": []
        }))
        .unwrap();
        assert_eq!(from_owner_key.owner_id, "ownerA");
    }
}
