//! Validator configuration: weights, threshold and per-type field tables.
//!
//! Tables are keyed by the canonical data type name (`DataType::as_str`), so
//! `[quality.required_fields]` in TOML reads naturally:
//!
//! ```toml
//! [quality]
//! threshold = 0.75
//!
//! [quality.required_fields]
//! glucose = ["timestamp", "glucose_mg_dl"]
//!
//! [quality.plausibility.glucose]
//! field = "glucose_mg_dl"
//! min = 20.0
//! max = 600.0
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use vitalflow_protocol::defaults::{DEFAULT_QUALITY_THRESHOLD, DEFAULT_TIMESTAMP_FIELD};
use vitalflow_protocol::DataType;

#[derive(Debug, Error, PartialEq)]
pub enum QualityError {
    #[error("Quality threshold must be within [0, 1], got {0}")]
    InvalidThreshold(f64),

    #[error("Quality weight '{name}' must be finite and >= 0, got {value}")]
    InvalidWeight { name: &'static str, value: f64 },

    #[error("Plausibility range for '{data_type}' is empty: min {min} > max {max}")]
    InvalidRange { data_type: String, min: f64, max: f64 },
}

/// Relative weight of each scoring dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityWeights {
    #[serde(default = "default_schema_weight")]
    pub schema: f64,
    #[serde(default = "default_completeness_weight")]
    pub completeness: f64,
    #[serde(default = "default_physiological_weight")]
    pub physiological: f64,
    #[serde(default = "default_temporal_weight")]
    pub temporal: f64,
}

fn default_schema_weight() -> f64 {
    0.3
}

fn default_completeness_weight() -> f64 {
    0.3
}

fn default_physiological_weight() -> f64 {
    0.2
}

fn default_temporal_weight() -> f64 {
    0.2
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            schema: default_schema_weight(),
            completeness: default_completeness_weight(),
            physiological: default_physiological_weight(),
            temporal: default_temporal_weight(),
        }
    }
}

impl QualityWeights {
    pub fn sum(&self) -> f64 {
        self.schema + self.completeness + self.physiological + self.temporal
    }

    /// Scale weights so they sum to 1. All-zero weights fall back to defaults.
    pub fn normalized(&self) -> Self {
        let total = self.sum();
        if total <= f64::EPSILON {
            return Self::default();
        }
        if (total - 1.0).abs() < 1e-9 {
            return *self;
        }
        Self {
            schema: self.schema / total,
            completeness: self.completeness / total,
            physiological: self.physiological / total,
            temporal: self.temporal / total,
        }
    }

    fn check(&self) -> Result<(), QualityError> {
        for (name, value) in [
            ("schema", self.schema),
            ("completeness", self.completeness),
            ("physiological", self.physiological),
            ("temporal", self.temporal),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(QualityError::InvalidWeight { name, value });
            }
        }
        Ok(())
    }
}

/// Inclusive plausibility range for one numeric field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlausibilityRange {
    /// Dotted field path holding the numeric value
    pub field: String,
    pub min: f64,
    pub max: f64,
}

impl PlausibilityRange {
    pub fn new(field: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            field: field.into(),
            min,
            max,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Complete validator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Minimum weighted score for a batch to be accepted
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    #[serde(default)]
    pub weights: QualityWeights,

    /// data_type -> dotted paths every record must populate
    #[serde(default = "default_required_fields")]
    pub required_fields: BTreeMap<String, Vec<String>>,

    /// data_type -> plausible numeric range
    #[serde(default = "default_plausibility")]
    pub plausibility: BTreeMap<String, PlausibilityRange>,

    /// data_type -> timestamp field (falls back to `timestamp`)
    #[serde(default)]
    pub timestamp_fields: BTreeMap<String, String>,
}

fn default_threshold() -> f64 {
    DEFAULT_QUALITY_THRESHOLD
}

fn default_required_fields() -> BTreeMap<String, Vec<String>> {
    let table: [(DataType, &[&str]); 4] = [
        (DataType::Glucose, &["timestamp", "glucose_mg_dl"]),
        (DataType::HeartRate, &["timestamp", "bpm"]),
        (DataType::Sleep, &["timestamp", "stage", "duration_minutes"]),
        (DataType::Activity, &["timestamp", "steps"]),
    ];
    table
        .into_iter()
        .map(|(data_type, fields)| {
            (
                data_type.as_str().to_string(),
                fields.iter().map(|f| f.to_string()).collect(),
            )
        })
        .collect()
}

fn default_plausibility() -> BTreeMap<String, PlausibilityRange> {
    let mut ranges = BTreeMap::new();
    ranges.insert(
        DataType::Glucose.as_str().to_string(),
        PlausibilityRange::new("glucose_mg_dl", 20.0, 600.0),
    );
    ranges.insert(
        DataType::HeartRate.as_str().to_string(),
        PlausibilityRange::new("bpm", 30.0, 220.0),
    );
    ranges
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            weights: QualityWeights::default(),
            required_fields: default_required_fields(),
            plausibility: default_plausibility(),
            timestamp_fields: BTreeMap::new(),
        }
    }
}

impl QualityConfig {
    /// Reject configurations that cannot produce a meaningful score.
    pub fn validate(&self) -> Result<(), QualityError> {
        if !self.threshold.is_finite() || !(0.0..=1.0).contains(&self.threshold) {
            return Err(QualityError::InvalidThreshold(self.threshold));
        }
        self.weights.check()?;
        for (data_type, range) in &self.plausibility {
            if range.min > range.max {
                return Err(QualityError::InvalidRange {
                    data_type: data_type.clone(),
                    min: range.min,
                    max: range.max,
                });
            }
        }
        Ok(())
    }

    pub fn required_fields_for(&self, data_type: &DataType) -> &[String] {
        self.required_fields
            .get(data_type.as_str())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn plausibility_for(&self, data_type: &DataType) -> Option<&PlausibilityRange> {
        self.plausibility.get(data_type.as_str())
    }

    pub fn timestamp_field_for(&self, data_type: &DataType) -> &str {
        self.timestamp_fields
            .get(data_type.as_str())
            .map(String::as_str)
            .unwrap_or(DEFAULT_TIMESTAMP_FIELD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QualityConfig::default();
        assert_eq!(config.threshold, 0.7);
        assert!((config.weights.sum() - 1.0).abs() < 1e-12);
        assert_eq!(
            config.required_fields_for(&DataType::Glucose),
            &["timestamp".to_string(), "glucose_mg_dl".to_string()]
        );
        assert!(config
            .required_fields_for(&DataType::Other("spo2".into()))
            .is_empty());
        assert_eq!(config.timestamp_field_for(&DataType::Sleep), "timestamp");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_weights_are_normalized() {
        let weights = QualityWeights {
            schema: 3.0,
            completeness: 3.0,
            physiological: 2.0,
            temporal: 2.0,
        };
        let normalized = weights.normalized();
        assert!((normalized.sum() - 1.0).abs() < 1e-12);
        assert!((normalized.schema - 0.3).abs() < 1e-12);

        let zero = QualityWeights {
            schema: 0.0,
            completeness: 0.0,
            physiological: 0.0,
            temporal: 0.0,
        };
        assert_eq!(zero.normalized(), QualityWeights::default());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = QualityConfig {
            threshold: 1.5,
            ..QualityConfig::default()
        };
        assert_eq!(config.validate(), Err(QualityError::InvalidThreshold(1.5)));

        config.threshold = 0.7;
        config.weights.temporal = -0.1;
        assert!(matches!(
            config.validate(),
            Err(QualityError::InvalidWeight { name: "temporal", .. })
        ));

        config.weights = QualityWeights::default();
        config
            .plausibility
            .insert("glucose".into(), PlausibilityRange::new("glucose_mg_dl", 600.0, 20.0));
        assert!(matches!(config.validate(), Err(QualityError::InvalidRange { .. })));
    }

    #[test]
    fn test_parse_from_toml_keeps_defaults_for_missing_sections() {
        let config: QualityConfig = toml::from_str(
            r#"
            threshold = 0.8

            [weights]
            schema = 0.5
            completeness = 0.5
            physiological = 0.0
            temporal = 0.0

            [required_fields]
            sleep = ["start", "stage"]

            [timestamp_fields]
            sleep = "start"
            "#,
        )
        .unwrap();

        assert_eq!(config.threshold, 0.8);
        assert_eq!(config.weights.schema, 0.5);
        assert_eq!(config.required_fields_for(&DataType::Sleep).len(), 2);
        assert!(config.required_fields_for(&DataType::Glucose).is_empty());
        assert_eq!(config.timestamp_field_for(&DataType::Sleep), "start");
        // Table not given in TOML keeps its defaults.
        assert!(config.plausibility_for(&DataType::HeartRate).is_some());
    }
}
