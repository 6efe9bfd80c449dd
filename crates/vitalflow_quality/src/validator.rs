use crate::config::{QualityConfig, QualityError, QualityWeights};
use crate::fields::{is_populated, lookup_path, numeric_value, parse_timestamp};
use serde_json::Value;
use vitalflow_protocol::defaults::DEGRADED_TEMPORAL_SCORE;
use vitalflow_protocol::keys;
use vitalflow_protocol::{DataType, InsightMap, Record, ValidationResult};

/// Scores decoded batches against the configured weights and field tables.
#[derive(Debug, Clone)]
pub struct QualityValidator {
    config: QualityConfig,
    weights: QualityWeights,
}

impl Default for QualityValidator {
    fn default() -> Self {
        let config = QualityConfig::default();
        let weights = config.weights.normalized();
        Self { config, weights }
    }
}

impl QualityValidator {
    pub fn new(config: QualityConfig) -> Result<Self, QualityError> {
        config.validate()?;
        let weights = config.weights.normalized();
        Ok(Self { config, weights })
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    pub fn threshold(&self) -> f64 {
        self.config.threshold
    }

    /// Score a batch. Deterministic: same input, same result.
    pub fn validate(
        &self,
        records: &[Record],
        data_type: &DataType,
        payload_size: u64,
    ) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let required = self.config.required_fields_for(data_type);

        if records.is_empty() {
            errors.push("no records".to_string());
        }

        // Schema: the first record must carry every required path.
        let schema_validity = match records.first() {
            Some(first) if required.iter().all(|path| lookup_path(first, path).is_some()) => 1.0,
            Some(_) => 0.0,
            None => 0.0,
        };

        // Completeness, plus a per-field miss count for diagnostics.
        let mut missing: Vec<(&str, usize)> = required.iter().map(|p| (p.as_str(), 0)).collect();
        let completeness = if required.is_empty() {
            1.0
        } else if records.is_empty() {
            0.0
        } else {
            let mut total = 0.0;
            for record in records {
                let mut populated = 0usize;
                for (path, misses) in missing.iter_mut() {
                    if is_populated(record, path) {
                        populated += 1;
                    } else {
                        *misses += 1;
                    }
                }
                total += populated as f64 / required.len() as f64;
            }
            total / records.len() as f64
        };

        let missing_fields: Vec<&str> = missing
            .iter()
            .filter(|(_, misses)| *misses > 0)
            .map(|(path, _)| *path)
            .collect();
        for (path, misses) in missing.iter().filter(|(_, misses)| *misses > 0) {
            errors.push(format!(
                "missing required field '{}' in {} of {} records",
                path,
                misses,
                records.len()
            ));
        }

        let physiological_validity = match self.config.plausibility_for(data_type) {
            Some(range) => {
                let values: Vec<f64> = records
                    .iter()
                    .filter_map(|r| numeric_value(r, &range.field))
                    .collect();
                if values.is_empty() {
                    1.0
                } else {
                    let plausible = values.iter().filter(|v| range.contains(**v)).count();
                    let implausible = values.len() - plausible;
                    if implausible > 0 {
                        warnings.push(format!(
                            "{} of {} '{}' values outside plausible range [{}, {}]",
                            implausible,
                            values.len(),
                            range.field,
                            range.min,
                            range.max
                        ));
                    }
                    plausible as f64 / values.len() as f64
                }
            }
            None => 1.0,
        };

        let temporal_consistency = {
            let field = self.config.timestamp_field_for(data_type);
            let mut unparseable = 0usize;
            let mut previous = None;
            let mut monotonic = true;
            for record in records {
                let parsed = match lookup_path(record, field) {
                    None | Some(Value::Null) => None,
                    Some(value) => {
                        let ts = parse_timestamp(value);
                        if ts.is_none() {
                            unparseable += 1;
                        }
                        ts
                    }
                };
                if let Some(ts) = parsed {
                    if previous.is_some_and(|prev| ts < prev) {
                        monotonic = false;
                    }
                    previous = Some(ts);
                }
            }
            if unparseable > 0 {
                warnings.push(format!(
                    "{} records have an unparseable '{}' value",
                    unparseable, field
                ));
            }
            if monotonic {
                1.0
            } else {
                warnings.push(format!("'{}' values are not in ascending order", field));
                DEGRADED_TEMPORAL_SCORE
            }
        };

        let quality_score = (self.weights.schema * schema_validity
            + self.weights.completeness * completeness
            + self.weights.physiological * physiological_validity
            + self.weights.temporal * temporal_consistency)
            .clamp(0.0, 1.0);

        let is_valid = !records.is_empty()
            && schema_validity >= 1.0
            && quality_score >= self.config.threshold;

        if !records.is_empty() && quality_score < self.config.threshold {
            errors.push(format!(
                "quality score {:.3} below threshold {:.3}",
                quality_score, self.config.threshold
            ));
        }

        let mut metadata = InsightMap::new();
        metadata.insert(keys::SCHEMA_VALIDITY.into(), Value::from(schema_validity));
        metadata.insert(keys::COMPLETENESS.into(), Value::from(completeness));
        metadata.insert(
            keys::PHYSIOLOGICAL_VALIDITY.into(),
            Value::from(physiological_validity),
        );
        metadata.insert(
            keys::TEMPORAL_CONSISTENCY.into(),
            Value::from(temporal_consistency),
        );
        metadata.insert(keys::RECORD_COUNT.into(), Value::from(records.len()));
        metadata.insert(keys::PAYLOAD_BYTES.into(), Value::from(payload_size));
        metadata.insert(keys::THRESHOLD.into(), Value::from(self.config.threshold));
        metadata.insert(
            keys::MISSING_FIELDS.into(),
            Value::from(missing_fields.into_iter().map(String::from).collect::<Vec<_>>()),
        );

        tracing::debug!(
            data_type = %data_type,
            records = records.len(),
            quality_score,
            is_valid,
            "validated batch"
        );

        ValidationResult {
            is_valid,
            errors,
            warnings,
            quality_score,
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records(values: Vec<Value>) -> Vec<Record> {
        values
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect()
    }

    fn glucose_batch() -> Vec<Record> {
        records(vec![
            json!({"timestamp": "2024-03-01T10:00:00Z", "glucose_mg_dl": 110}),
            json!({"timestamp": "2024-03-01T10:05:00Z", "glucose_mg_dl": 118}),
            json!({"timestamp": "2024-03-01T10:10:00Z", "glucose_mg_dl": 125}),
        ])
    }

    #[test]
    fn test_clean_batch_scores_one() {
        let validator = QualityValidator::default();
        let result = validator.validate(&glucose_batch(), &DataType::Glucose, 512);
        assert!(result.is_valid);
        assert!((result.quality_score - 1.0).abs() < 1e-9);
        assert!(result.errors.is_empty());
        assert!(result.warnings.is_empty());
        assert_eq!(result.metadata[keys::RECORD_COUNT], json!(3));
        assert_eq!(result.metadata[keys::PAYLOAD_BYTES], json!(512));
        assert_eq!(result.metadata[keys::MISSING_FIELDS], json!([]));
    }

    #[test]
    fn test_empty_batch_is_invalid() {
        let validator = QualityValidator::default();
        let result = validator.validate(&[], &DataType::Glucose, 0);
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e == "no records"));
    }

    #[test]
    fn test_out_of_order_timestamps_degrade_temporal_score() {
        let mut batch = glucose_batch();
        batch.swap(0, 2);
        let result = QualityValidator::default().validate(&batch, &DataType::Glucose, 0);
        assert_eq!(result.metadata[keys::TEMPORAL_CONSISTENCY], json!(0.7));
        // 0.3 + 0.3 + 0.2 + 0.2 * 0.7
        assert!((result.quality_score - 0.94).abs() < 1e-9);
        assert!(result.is_valid);
        assert!(result.warnings.iter().any(|w| w.contains("ascending")));
    }

    #[test]
    fn test_implausible_values_reduce_physiological_score() {
        let batch = records(vec![
            json!({"timestamp": 1_709_287_200, "bpm": 70}),
            json!({"timestamp": 1_709_287_260, "bpm": 500}),
        ]);
        let result = QualityValidator::default().validate(&batch, &DataType::HeartRate, 0);
        assert_eq!(result.metadata[keys::PHYSIOLOGICAL_VALIDITY], json!(0.5));
        assert!((result.quality_score - 0.9).abs() < 1e-9);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_schema_failure_is_invalid_even_above_threshold() {
        let config = QualityConfig {
            threshold: 0.5,
            ..QualityConfig::default()
        };
        let validator = QualityValidator::new(config).unwrap();
        let batch = records(vec![
            json!({"timestamp": "2024-03-01T10:00:00Z"}),
            json!({"timestamp": "2024-03-01T10:05:00Z", "glucose_mg_dl": 100}),
        ]);
        let result = validator.validate(&batch, &DataType::Glucose, 0);
        assert_eq!(result.metadata[keys::SCHEMA_VALIDITY], json!(0.0));
        assert!(result.quality_score >= 0.5);
        assert!(!result.is_valid);
    }

    #[test]
    fn test_unknown_type_has_no_requirements() {
        let batch = records(vec![json!({"spo2": 97})]);
        let result =
            QualityValidator::default().validate(&batch, &DataType::Other("spo2".into()), 10);
        assert!(result.is_valid);
        assert!((result.quality_score - 1.0).abs() < 1e-9);
    }
}
