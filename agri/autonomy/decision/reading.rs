//! Sensor readings and the static prediction model.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::knowledge::expr::Value;

/// Target used when a reading does not name its field.
pub const UNKNOWN_TARGET: &str = "unknown";

/// Prediction labels produced by [`ThresholdModel`].
pub mod labels {
    /// Dry soil under heat stress.
    pub const CRITICAL_DROUGHT: &str = "Critical Drought Warning";
    /// Soil below the irrigation band.
    pub const IRRIGATION_RECOMMENDED: &str = "Optimal Irrigation Recommended";
    /// Soil above the drainage band.
    pub const WATERLOGGING_RISK: &str = "Waterlogging Risk Detected";
    /// Nothing stands out.
    pub const STABLE: &str = "All Metrics Stable";
}

/// One validated record from a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "serde_json::Map<String, serde_json::Value>",
    into = "serde_json::Map<String, serde_json::Value>"
)]
pub struct SensorReading {
    /// Target the reading applies to.
    pub field_id: String,
    /// Named measurements in arrival order.
    pub values: IndexMap<String, Value>,
}

impl SensorReading {
    /// Empty reading for a target.
    #[must_use]
    pub fn new(field_id: impl Into<String>) -> Self {
        Self {
            field_id: field_id.into(),
            values: IndexMap::new(),
        }
    }

    /// Adds a measurement.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Numeric measurement by name.
    #[must_use]
    pub fn number(&self, name: &str) -> Option<f64> {
        self.values.get(name).and_then(Value::as_f64)
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for SensorReading {
    fn from(mut map: serde_json::Map<String, serde_json::Value>) -> Self {
        let field_id = ["field_id", "target_id"]
            .iter()
            .find_map(|key| match map.remove(*key) {
                Some(serde_json::Value::String(id)) => Some(id),
                Some(serde_json::Value::Number(id)) => Some(id.to_string()),
                _ => None,
            })
            .unwrap_or_else(|| UNKNOWN_TARGET.into());
        let values = map
            .iter()
            .filter_map(|(key, value)| Value::from_json(value).map(|value| (key.clone(), value)))
            .collect();
        Self { field_id, values }
    }
}

impl From<SensorReading> for serde_json::Map<String, serde_json::Value> {
    fn from(reading: SensorReading) -> Self {
        let mut map = Self::new();
        map.insert("field_id".into(), reading.field_id.into());
        for (key, value) in reading.values {
            let json = match value {
                Value::Bool(flag) => serde_json::Value::Bool(flag),
                Value::Number(number) => serde_json::Number::from_f64(number)
                    .map_or(serde_json::Value::Null, serde_json::Value::Number),
                Value::Text(text) => serde_json::Value::String(text),
            };
            map.insert(key, json);
        }
        map
    }
}

/// Supplies the prediction label fed to the decision engine.
pub trait PredictionModel: Send + Sync {
    /// Label for a reading.
    fn predict(&self, reading: &SensorReading) -> String;
}

/// Static moisture/temperature lookup.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThresholdModel;

impl PredictionModel for ThresholdModel {
    fn predict(&self, reading: &SensorReading) -> String {
        let moisture = reading.number("moisture").unwrap_or(70.0);
        let temp = reading.number("temp").unwrap_or(25.0);
        let label = if moisture < 50.0 && temp > 30.0 {
            labels::CRITICAL_DROUGHT
        } else if moisture < 65.0 {
            labels::IRRIGATION_RECOMMENDED
        } else if moisture > 85.0 {
            labels::WATERLOGGING_RISK
        } else {
            labels::STABLE
        };
        label.to_owned()
    }
}
