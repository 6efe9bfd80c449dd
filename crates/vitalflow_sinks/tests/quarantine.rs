//! Quarantine atomicity and layout.

use chrono::{TimeZone, Utc};
use std::sync::Arc;
use vitalflow_protocol::{DataType, QuarantineRecord, ValidationResult};
use vitalflow_sinks::{
    LocalObjectStore, MemoryObjectStore, ObjectStore, QuarantineManager, SinkError,
    StorageLocator,
};

fn rejected() -> ValidationResult {
    ValidationResult {
        is_valid: false,
        errors: vec![
            "missing required field 'trend' in 5 of 5 records".into(),
            "quality score 0.520 below threshold 0.700".into(),
        ],
        warnings: Vec::new(),
        quality_score: 0.52,
        metadata: Default::default(),
    }
}

#[tokio::test]
async fn test_quarantine_writes_payload_and_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::open(dir.path()).await.unwrap());
    let manager = QuarantineManager::new(Arc::clone(&store), "quarantine", "rejected");
    let original = StorageLocator::parse("s3://landing/owner-1/cgm.json").unwrap();
    let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 30, 0).unwrap();

    let placement = manager
        .quarantine(&original, b"[{\"x\":1}]", &DataType::Glucose, &rejected(), at)
        .await
        .unwrap();

    assert_eq!(placement.payload.key, "rejected/glucose/2024/03/09/cgm.json");
    assert_eq!(
        placement.metadata.key,
        "rejected/glucose/2024/03/09/cgm.json.metadata.json"
    );
    assert_eq!(
        store.get("quarantine", &placement.payload.key).await.unwrap(),
        b"[{\"x\":1}]"
    );
    let metadata = store.get("quarantine", &placement.metadata.key).await.unwrap();
    let record: QuarantineRecord = serde_json::from_slice(&metadata).unwrap();
    assert_eq!(record.original_locator, "landing/owner-1/cgm.json");
    assert_eq!(record.reason.len(), 2);
    assert_eq!(record.quality_score, 0.52);
    assert_eq!(record.quarantined_at, at);
}

#[tokio::test]
async fn test_metadata_failure_leaves_nothing_behind() {
    let memory = Arc::new(MemoryObjectStore::new());
    memory.fail_puts_ending_with(".metadata.json");
    let manager = QuarantineManager::new(memory.clone(), "quarantine", "quarantine");
    let original = StorageLocator::new("landing", "owner-2/hr.json");

    let err = manager
        .quarantine(
            &original,
            b"not json",
            &DataType::HeartRate,
            &ValidationResult::rejected("decode failed"),
            Utc::now(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SinkError::QuarantineRolledBack { .. }));
    assert!(memory.list("quarantine", "").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_payload_failure_surfaces_store_error() {
    let memory = Arc::new(MemoryObjectStore::new());
    memory.set_unavailable(true);
    let manager = QuarantineManager::new(memory.clone(), "quarantine", "quarantine");

    let err = manager
        .quarantine(
            &StorageLocator::new("landing", "a.json"),
            b"{}",
            &DataType::Sleep,
            &rejected(),
            Utc::now(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SinkError::Store(_)));
    assert!(memory.is_empty());
}
