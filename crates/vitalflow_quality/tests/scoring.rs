//! Batch-level scoring behaviour.

use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use vitalflow_protocol::{keys, DataType, Record};
use vitalflow_quality::{QualityConfig, QualityValidator};

fn as_record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

fn five_field_validator() -> QualityValidator {
    let mut required_fields = BTreeMap::new();
    required_fields.insert(
        "glucose".to_string(),
        vec![
            "timestamp".to_string(),
            "glucose_mg_dl".to_string(),
            "device_id".to_string(),
            "trend".to_string(),
            "unit".to_string(),
        ],
    );
    QualityValidator::new(QualityConfig {
        required_fields,
        ..QualityConfig::default()
    })
    .unwrap()
}

#[test]
fn test_partial_records_are_rejected_with_missing_fields() {
    let validator = five_field_validator();
    let batch: Vec<Record> = (0..4)
        .map(|i| {
            as_record(json!({
                "timestamp": format!("2024-03-01T10:{:02}:00Z", i * 5),
                "glucose_mg_dl": 100 + i,
                "device_id": "g7-001",
            }))
        })
        .collect();

    let result = validator.validate(&batch, &DataType::Glucose, 2048);

    let completeness = result.metadata[keys::COMPLETENESS].as_f64().unwrap();
    assert!((completeness - 0.6).abs() < 1e-9);
    assert!(result.quality_score < 0.7);
    assert!(!result.is_valid);
    assert_eq!(result.metadata[keys::MISSING_FIELDS], json!(["trend", "unit"]));
    assert!(result
        .errors
        .iter()
        .any(|e| e.contains("'trend'") && e.contains("4 of 4")));
    assert!(result.errors.iter().any(|e| e.contains("'unit'")));
}

#[test]
fn test_null_and_empty_values_count_as_missing() {
    let validator = QualityValidator::default();
    let batch = vec![
        as_record(json!({"timestamp": "2024-03-01T10:00:00Z", "steps": 12})),
        as_record(json!({"timestamp": "", "steps": null})),
    ];
    let result = validator.validate(&batch, &DataType::Activity, 0);
    let completeness = result.metadata[keys::COMPLETENESS].as_f64().unwrap();
    assert!((completeness - 0.5).abs() < 1e-9);
}

fn arb_glucose_record() -> impl Strategy<Value = Record> {
    (
        proptest::option::of(0i64..2_000_000_000),
        proptest::option::of(0.0f64..800.0),
    )
        .prop_map(|(ts, value)| {
            let mut record = Record::new();
            if let Some(ts) = ts {
                record.insert("timestamp".into(), json!(ts));
            }
            if let Some(value) = value {
                record.insert("glucose_mg_dl".into(), json!(value));
            }
            record
        })
}

proptest! {
    #[test]
    fn prop_validate_is_deterministic_and_bounded(
        batch in proptest::collection::vec(arb_glucose_record(), 0..20)
    ) {
        let validator = QualityValidator::default();
        let first = validator.validate(&batch, &DataType::Glucose, 100);
        let second = validator.validate(&batch, &DataType::Glucose, 100);
        prop_assert_eq!(&first, &second);
        prop_assert!((0.0..=1.0).contains(&first.quality_score));
        if first.is_valid {
            prop_assert!(first.quality_score >= validator.threshold());
            prop_assert!(!batch.is_empty());
        }
    }
}
