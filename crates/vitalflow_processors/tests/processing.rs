//! End-to-end processor behavior through the router.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Value};
use vitalflow_processors::{ProcessorRegistry, ProcessorRouter, ProcessorsConfig};
use vitalflow_protocol::keys;
use vitalflow_protocol::{DataType, MessageContext, Record};
use vitalflow_quality::QualityValidator;

fn router() -> ProcessorRouter {
    ProcessorRegistry::with_defaults(&ProcessorsConfig::default())
        .unwrap()
        .build()
        .unwrap()
}

fn context(data_type: DataType) -> MessageContext {
    MessageContext {
        correlation_id: "corr-42".into(),
        owner_id: "owner-7".into(),
        data_type,
        storage_locator: "incoming/owner-7/batch.json".into(),
        retry_count: 0,
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
}

fn series(field: &str, values: &[f64]) -> Vec<Record> {
    values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| {
            json!({
                "timestamp": (t0() + Duration::minutes(i as i64)).to_rfc3339(),
                field: v,
            })
            .as_object()
            .cloned()
        })
        .collect()
}

#[test]
fn test_valid_glucose_batch_produces_narrative_and_statistics() {
    let values: Vec<f64> = (0..60).map(|i| 110.0 + (i % 10) as f64 * 4.0).collect();
    let records = series("glucose_mg_dl", &values);
    let validation = QualityValidator::default().validate(&records, &DataType::Glucose, 4096);
    assert!(validation.is_valid);
    assert!(validation.quality_score >= 0.95);

    let processor = router().get_processor(&DataType::Glucose);
    let result = processor
        .process(&records, &context(DataType::Glucose), &validation)
        .unwrap();

    assert!(result.success);
    assert_eq!(result.records_processed, 60);
    assert_eq!(result.quality_score, validation.quality_score);
    let narrative = result.narrative.unwrap();
    assert!(!narrative.is_empty());
    assert!(narrative.contains("owner-7"));

    let insights = &result.clinical_insights;
    for key in [
        keys::SAMPLE_COUNT,
        keys::MEAN,
        keys::STD_DEV,
        keys::MIN,
        keys::MAX,
        keys::PERCENT_IN_RANGE,
        keys::COEFFICIENT_OF_VARIATION,
    ] {
        assert!(insights.contains_key(key), "missing insight {key}");
    }
    assert_eq!(insights[keys::SAMPLE_COUNT], json!(60));
    assert_eq!(insights[keys::MIN], json!(110.0));
    assert_eq!(insights[keys::MAX], json!(146.0));
    assert_eq!(insights[keys::PERCENT_IN_RANGE], json!(100.0));
    assert_eq!(insights[&keys::band_key("in_range")], json!(100.0));
    assert_eq!(insights["hyperglycemia_events"], json!(0));
}

#[test]
fn test_unregistered_type_yields_unsuccessful_result() {
    let data_type = DataType::parse("blood_oxygen");
    let records = series("spo2", &[97.0, 98.0]);
    let validation = QualityValidator::default().validate(&records, &data_type, 128);

    let processor = router().get_processor(&data_type);
    let result = processor
        .process(&records, &context(data_type), &validation)
        .unwrap();

    assert!(!result.success);
    let message = result.error_message.unwrap();
    assert!(!message.is_empty());
    assert!(message.contains("blood_oxygen"));
}

#[test]
fn test_sustained_tachycardia_detected_and_short_excursion_ignored() {
    let mut bpm = vec![72.0; 5];
    bpm.extend(vec![128.0; 12]);
    bpm.extend(vec![75.0; 5]);
    bpm.extend(vec![131.0; 5]);
    bpm.extend(vec![74.0; 5]);
    let records = series("bpm", &bpm);
    let validation = QualityValidator::default().validate(&records, &DataType::HeartRate, 2048);

    let processor = router().get_processor(&DataType::HeartRate);
    let result = processor
        .process(&records, &context(DataType::HeartRate), &validation)
        .unwrap();

    assert!(result.success);
    assert_eq!(result.clinical_insights["tachycardia_events"], json!(1));
    let events = result.clinical_insights[keys::EVENTS].as_array().unwrap();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event["kind"], json!("tachycardia"));
    assert_eq!(event["duration_minutes"], json!(12.0));
    assert_eq!(event["sample_count"], json!(12));
    assert_eq!(event["extreme"], json!(128.0));
    assert_eq!(event["recovery_delta"], json!(53.0));
}

#[test]
fn test_sleep_night_with_long_wake_episode() {
    let segments = [
        ("awake", 15.0),
        ("light", 90.0),
        ("deep", 60.0),
        ("awake", 30.0),
        ("rem", 45.0),
        ("light", 60.0),
    ];
    let mut start = Utc.with_ymd_and_hms(2024, 3, 1, 22, 0, 0).unwrap();
    let mut records = Vec::new();
    for (stage, minutes) in segments {
        let record: Value = json!({
            "timestamp": start.to_rfc3339(),
            "stage": stage,
            "duration_minutes": minutes,
        });
        records.extend(record.as_object().cloned());
        start += Duration::minutes(minutes as i64);
    }
    let validation = QualityValidator::default().validate(&records, &DataType::Sleep, 512);
    assert!(validation.is_valid);

    let processor = router().get_processor(&DataType::Sleep);
    let result = processor
        .process(&records, &context(DataType::Sleep), &validation)
        .unwrap();

    assert!(result.success);
    let insights = &result.clinical_insights;
    assert_eq!(insights["time_in_bed_minutes"], json!(300.0));
    assert_eq!(insights["total_sleep_minutes"], json!(255.0));
    assert_eq!(insights["sleep_efficiency"], json!(85.0));
    assert_eq!(insights["efficiency_band"], json!("good"));
    // The 15-minute settling period is below the wake-episode minimum.
    assert_eq!(insights["wake_episodes"], json!(1));
    assert_eq!(insights["stage_minutes"]["awake"], json!(45.0));
}
