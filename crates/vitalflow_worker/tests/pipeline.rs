//! Message handling through the full pipeline with in-memory collaborators.

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use vitalflow_db::{DedupGate, SqliteDedupStore};
use vitalflow_processors::{ProcessorRegistry, ProcessorsConfig};
use vitalflow_protocol::{keys, DataType, InboundMessage, ProcessingStatus, QuarantineRecord};
use vitalflow_quality::QualityValidator;
use vitalflow_sinks::{
    ArtifactSink, MemoryArtifactSink, MemoryObjectStore, ObjectStore, OutputConfig,
    OutputFormatter, QuarantineManager,
};
use vitalflow_worker::retry::reasons;
use vitalflow_worker::{
    JsonRecordDecoder, MemoryMessageSource, MessageSource, Metrics, Outcome, Pipeline,
    PipelineParts, RetryConfig, RetryPolicy, Worker, WorkerOptions,
};

const LANDING: &str = "landing";

struct Harness {
    gate: DedupGate,
    payloads: Arc<MemoryObjectStore>,
    artifacts: Arc<MemoryArtifactSink>,
    source: Arc<MemoryMessageSource>,
    metrics: Arc<Metrics>,
}

impl Harness {
    async fn new() -> Self {
        Self::with_ttl(Duration::from_secs(3600)).await
    }

    async fn with_ttl(ttl: Duration) -> Self {
        let store = SqliteDedupStore::open_in_memory().await.unwrap();
        Self {
            gate: DedupGate::new(Arc::new(store), ttl),
            payloads: Arc::new(MemoryObjectStore::new()),
            artifacts: Arc::new(MemoryArtifactSink::new()),
            source: Arc::new(MemoryMessageSource::new()),
            metrics: Arc::new(Metrics::new()),
        }
    }

    fn pipeline(&self) -> Pipeline {
        self.pipeline_with_limit(1024 * 1024)
    }

    fn pipeline_with_limit(&self, max_payload_bytes: u64) -> Pipeline {
        let payload_store: Arc<dyn ObjectStore> = self.payloads.clone();
        let artifact_sink: Arc<dyn ArtifactSink> = self.artifacts.clone();
        let source: Arc<dyn MessageSource> = self.source.clone();
        let retry = RetryConfig {
            max_retries: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
            jitter_ms: 0,
        };
        Pipeline::new(PipelineParts {
            gate: self.gate.clone(),
            payload_store: payload_store.clone(),
            decoder: Arc::new(JsonRecordDecoder),
            validator: QualityValidator::default(),
            router: ProcessorRegistry::with_defaults(&ProcessorsConfig::default())
                .unwrap()
                .build()
                .unwrap(),
            formatter: OutputFormatter::new(OutputConfig::default()),
            artifact_sink,
            quarantine: QuarantineManager::new(payload_store, "quarantine", "rejected"),
            retry: RetryPolicy::with_seed(retry, 7),
            source,
            metrics: self.metrics.clone(),
            max_payload_bytes,
            in_flight_recheck: Duration::from_millis(20),
        })
    }

    fn land(&self, key: &str, payload: Value) {
        self.payloads
            .insert(LANDING, key, serde_json::to_vec(&payload).unwrap());
    }
}

fn message(correlation_id: &str, data_type: DataType, key: &str) -> InboundMessage {
    InboundMessage {
        storage_locator: format!("s3://{LANDING}/{key}"),
        data_type,
        owner_id: "owner-7".into(),
        correlation_id: correlation_id.into(),
        enqueue_time: Utc::now(),
        retry_count: 0,
    }
}

fn glucose_batch() -> Value {
    let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
    let readings: Vec<Value> = (0..60)
        .map(|i| {
            json!({
                "timestamp": (t0 + ChronoDuration::minutes(i)).to_rfc3339(),
                "glucose_mg_dl": 110.0 + (i % 10) as f64 * 4.0,
            })
        })
        .collect();
    Value::Array(readings)
}

fn incomplete_glucose_batch() -> Value {
    json!([
        {"timestamp": "2024-03-01T08:00:00Z", "device": "cgm"},
        {"timestamp": "2024-03-01T08:01:00Z", "device": "cgm"},
    ])
}

#[tokio::test]
async fn test_valid_batch_produces_one_artifact() {
    let h = Harness::new().await;
    h.land("owner-7/cgm.json", glucose_batch());
    h.source
        .push(message("corr-1", DataType::Glucose, "owner-7/cgm.json"))
        .await;
    let pipeline = h.pipeline();

    let delivery = h.source.recv().await.unwrap().unwrap();
    assert_eq!(pipeline.handle(delivery).await, Outcome::Completed);

    let artifacts = h.artifacts.artifacts().await;
    assert_eq!(artifacts.len(), 1);
    let (partition, artifact) = &artifacts[0];
    assert_eq!(partition.category, "metabolic");
    assert!(artifact.output.contains("owner-7"));
    assert_eq!(artifact.metadata[keys::CORRELATION_ID], json!("corr-1"));
    assert_eq!(artifact.metadata[keys::RECORDS_PROCESSED], json!(60));
    assert_eq!(artifact.metadata[keys::INSIGHTS][keys::MAX], json!(146.0));

    let record = h.gate.get_record("corr-1").await.unwrap().unwrap();
    assert_eq!(record.status, ProcessingStatus::Completed);
    assert_eq!(h.source.acked().await.len(), 1);
    assert_eq!(h.metrics.snapshot().processed, 1);
}

#[tokio::test]
async fn test_duplicate_delivery_in_flight_yields_single_artifact() {
    let h = Harness::new().await;
    h.land("owner-7/cgm.json", glucose_batch());
    let msg = message("corr-dup", DataType::Glucose, "owner-7/cgm.json");
    h.source.push(msg.clone()).await;
    h.source.push(msg).await;
    let pipeline = h.pipeline();

    h.source.close().await;

    let first = h.source.recv().await.unwrap().unwrap();
    let second = h.source.recv().await.unwrap().unwrap();
    let (a, b) = tokio::join!(pipeline.handle(first), pipeline.handle(second));
    let mut outcomes = vec![a, b];

    // A copy that lost the race to a live claim comes back later
    while let Some(delivery) = h.source.recv().await.unwrap() {
        outcomes.push(pipeline.handle(delivery).await);
    }

    assert_eq!(
        outcomes.iter().filter(|o| **o == Outcome::Completed).count(),
        1
    );
    assert_eq!(
        outcomes.iter().filter(|o| **o == Outcome::Duplicate).count(),
        1
    );
    assert_eq!(h.artifacts.len().await, 1);
    assert_eq!(h.source.acked().await.len(), 2);
    assert!(h.source.nacked().await.is_empty());
    assert_eq!(h.metrics.snapshot().duplicates, 1);
    assert!(h.gate.is_already_processed("corr-dup").await.unwrap());
}

#[tokio::test]
async fn test_delivery_blocked_by_live_claim_is_deferred_not_dropped() {
    let h = Harness::new().await;
    h.land("owner-7/cgm.json", glucose_batch());
    let msg = message("corr-held", DataType::Glucose, "owner-7/cgm.json");
    let pipeline = h.pipeline();

    // Another worker holds the claim
    assert!(h.gate.mark_processing_started("corr-held").await.is_claimed());
    h.source.push(msg).await;
    let delivery = h.source.recv().await.unwrap().unwrap();
    assert_eq!(pipeline.handle(delivery).await, Outcome::Deferred);

    let deferred = h.source.deferred().await;
    assert_eq!(deferred.len(), 1);
    assert_eq!(deferred[0].1, Duration::from_millis(20));
    assert!(h.source.acked().await.is_empty());

    // The holder finishes; the deferred copy is now a plain duplicate
    h.gate.mark_processing_completed("corr-held").await.unwrap();
    let again = h.source.recv().await.unwrap().unwrap();
    assert_eq!(again.message.retry_count, 0);
    assert_eq!(pipeline.handle(again).await, Outcome::Duplicate);
    assert_eq!(h.source.acked().await.len(), 1);
    assert_eq!(h.artifacts.len().await, 0);
}

#[tokio::test]
async fn test_abandoned_claim_is_processed_after_ttl() {
    let h = Harness::with_ttl(Duration::from_millis(150)).await;
    h.land("owner-7/cgm.json", glucose_batch());

    // A crashed worker left a live claim behind
    assert!(h.gate.mark_processing_started("corr-x").await.is_claimed());
    h.source
        .push(message("corr-x", DataType::Glucose, "owner-7/cgm.json"))
        .await;
    h.source.close().await;

    let worker = Worker::new(
        h.pipeline(),
        WorkerOptions {
            concurrency: 1,
            ..WorkerOptions::default()
        },
    );
    let run = worker.run(CancellationToken::new());
    let snapshot = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(snapshot.processed, 1);
    assert!(snapshot.deferred >= 1);
    assert_eq!(snapshot.duplicates, 0);
    assert_eq!(h.artifacts.len().await, 1);
    assert!(h.source.nacked().await.is_empty());

    let acked = h.source.acked().await;
    assert_eq!(acked.len(), 1);
    assert_eq!(acked[0].retry_count, 0);
    let record = h.gate.get_record("corr-x").await.unwrap().unwrap();
    assert_eq!(record.status, ProcessingStatus::Completed);
}

#[tokio::test]
async fn test_redelivery_after_completion_is_dropped() {
    let h = Harness::new().await;
    h.land("owner-7/cgm.json", glucose_batch());
    let msg = message("corr-again", DataType::Glucose, "owner-7/cgm.json");
    let pipeline = h.pipeline();

    h.source.push(msg.clone()).await;
    let delivery = h.source.recv().await.unwrap().unwrap();
    assert_eq!(pipeline.handle(delivery).await, Outcome::Completed);

    h.source.push(msg.redelivered()).await;
    let delivery = h.source.recv().await.unwrap().unwrap();
    assert_eq!(pipeline.handle(delivery).await, Outcome::Duplicate);
    assert_eq!(h.artifacts.len().await, 1);
}

#[tokio::test]
async fn test_low_quality_batch_is_quarantined_with_reason() {
    let h = Harness::new().await;
    h.land("owner-7/partial.json", incomplete_glucose_batch());
    h.source
        .push(message("corr-q", DataType::Glucose, "owner-7/partial.json"))
        .await;
    let pipeline = h.pipeline();

    let delivery = h.source.recv().await.unwrap().unwrap();
    assert_eq!(pipeline.handle(delivery).await, Outcome::Quarantined);

    let keys = h.payloads.list("quarantine", "rejected/glucose/").await.unwrap();
    assert_eq!(keys.len(), 2);
    let metadata_key = keys
        .iter()
        .find(|k| k.ends_with("partial.json.metadata.json"))
        .unwrap();
    let record: QuarantineRecord = serde_json::from_slice(
        &h.payloads.get("quarantine", metadata_key).await.unwrap(),
    )
    .unwrap();
    assert_eq!(record.original_locator, "landing/owner-7/partial.json");
    assert!(record
        .reason
        .iter()
        .any(|r| r.contains("missing required field 'glucose_mg_dl'")));

    let status = h.gate.get_record("corr-q").await.unwrap().unwrap().status;
    assert_eq!(status, ProcessingStatus::Failed);
    assert_eq!(h.artifacts.len().await, 0);
    assert_eq!(h.source.acked().await.len(), 1);
    assert_eq!(h.metrics.snapshot().quarantined, 1);
}

#[tokio::test]
async fn test_undecodable_payload_is_quarantined() {
    let h = Harness::new().await;
    h.payloads
        .insert(LANDING, "owner-7/garbled.json", b"[{\"timestamp\": ".to_vec());
    h.source
        .push(message("corr-bad", DataType::Glucose, "owner-7/garbled.json"))
        .await;
    let pipeline = h.pipeline();

    let delivery = h.source.recv().await.unwrap().unwrap();
    assert_eq!(pipeline.handle(delivery).await, Outcome::Quarantined);
    assert!(h.source.nacked().await.is_empty());
    assert_eq!(
        h.payloads.list("quarantine", "rejected/").await.unwrap().len(),
        2
    );
}

#[tokio::test]
async fn test_unknown_data_type_fails_without_retry() {
    let h = Harness::new().await;
    h.land(
        "owner-7/spo2.json",
        json!([{"timestamp": "2024-03-01T08:00:00Z", "spo2": 97}]),
    );
    h.source
        .push(message(
            "corr-spo2",
            DataType::parse("blood_oxygen"),
            "owner-7/spo2.json",
        ))
        .await;
    let pipeline = h.pipeline();

    let delivery = h.source.recv().await.unwrap().unwrap();
    assert_eq!(pipeline.handle(delivery).await, Outcome::ProcessorFailed);

    let status = h.gate.get_record("corr-spo2").await.unwrap().unwrap().status;
    assert_eq!(status, ProcessingStatus::Failed);
    assert_eq!(h.source.acked().await.len(), 1);
    assert!(h.source.nacked().await.is_empty());
    assert_eq!(h.metrics.snapshot().failed, 1);
}

#[tokio::test]
async fn test_transient_failure_retried_exactly_max_retries_then_dead_lettered() {
    let h = Harness::new().await;
    // Payload never lands: every fetch is NotFound
    h.source
        .push(message("corr-missing", DataType::Glucose, "owner-7/late.json"))
        .await;
    h.source.close().await;

    let worker = Worker::new(
        h.pipeline(),
        WorkerOptions {
            concurrency: 1,
            ..WorkerOptions::default()
        },
    );
    let snapshot = worker.run(CancellationToken::new()).await.unwrap();

    assert_eq!(snapshot.received, 4);
    assert_eq!(snapshot.retried, 3);
    assert_eq!(snapshot.dead_lettered, 1);

    let nacked = h.source.nacked().await;
    let retry_counts: Vec<u32> = nacked.iter().map(|(m, _)| m.retry_count).collect();
    assert_eq!(retry_counts, vec![0, 1, 2]);

    let dead = h.source.dead_lettered().await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].0.retry_count, 3);
    assert_eq!(dead[0].1, reasons::MAX_RETRIES_EXCEEDED);

    let status = h.gate.get_record("corr-missing").await.unwrap().unwrap().status;
    assert_eq!(status, ProcessingStatus::Failed);
}

#[tokio::test]
async fn test_oversized_payload_is_dead_lettered() {
    let h = Harness::new().await;
    h.land("owner-7/cgm.json", glucose_batch());
    h.source
        .push(message("corr-big", DataType::Glucose, "owner-7/cgm.json"))
        .await;
    let pipeline = h.pipeline_with_limit(64);

    let delivery = h.source.recv().await.unwrap().unwrap();
    assert_eq!(pipeline.handle(delivery).await, Outcome::DeadLettered);
    let dead = h.source.dead_lettered().await;
    assert_eq!(dead[0].1, reasons::RESOURCE_EXCEEDED);
    assert!(h.source.nacked().await.is_empty());
}

#[tokio::test]
async fn test_invalid_locator_is_dead_lettered_without_payload() {
    let h = Harness::new().await;
    let mut msg = message("corr-loc", DataType::Glucose, "x");
    msg.storage_locator = "no-key-here".into();
    h.source.push(msg).await;
    let pipeline = h.pipeline();

    let delivery = h.source.recv().await.unwrap().unwrap();
    assert_eq!(pipeline.handle(delivery).await, Outcome::DeadLettered);
    assert_eq!(h.source.dead_lettered().await[0].1, reasons::UNQUARANTINABLE);
}

#[tokio::test]
async fn test_quarantine_write_failure_is_retried() {
    let h = Harness::new().await;
    h.land("owner-7/partial.json", incomplete_glucose_batch());
    h.payloads.fail_puts_ending_with(".metadata.json");
    h.source
        .push(message("corr-qf", DataType::Glucose, "owner-7/partial.json"))
        .await;
    let pipeline = h.pipeline();

    let delivery = h.source.recv().await.unwrap().unwrap();
    assert_eq!(pipeline.handle(delivery).await, Outcome::Retried);
    assert!(h.payloads.list("quarantine", "").await.unwrap().is_empty());
    assert_eq!(h.source.nacked().await.len(), 1);
}

#[tokio::test]
async fn test_worker_drains_mixed_batch() {
    let h = Harness::new().await;
    h.land("owner-7/cgm.json", glucose_batch());
    h.land("owner-7/partial.json", incomplete_glucose_batch());
    h.land(
        "owner-7/spo2.json",
        json!([{"timestamp": "2024-03-01T08:00:00Z", "spo2": 97}]),
    );
    for msg in [
        message("m-1", DataType::Glucose, "owner-7/cgm.json"),
        message("m-2", DataType::Glucose, "owner-7/partial.json"),
        message("m-3", DataType::parse("blood_oxygen"), "owner-7/spo2.json"),
        message("m-1", DataType::Glucose, "owner-7/cgm.json"),
    ] {
        h.source.push(msg).await;
    }
    h.source.close().await;

    let worker = Worker::new(
        h.pipeline(),
        WorkerOptions {
            concurrency: 3,
            ..WorkerOptions::default()
        },
    );
    let snapshot = worker.run(CancellationToken::new()).await.unwrap();

    // The second m-1 may be deferred once if it races the first
    assert!(snapshot.received >= 4);
    assert_eq!(snapshot.received, 4 + snapshot.deferred);
    assert_eq!(snapshot.processed, 1);
    assert_eq!(snapshot.quarantined, 1);
    assert_eq!(snapshot.failed, 1);
    assert_eq!(snapshot.duplicates, 1);
    assert_eq!(h.artifacts.len().await, 1);
}

#[tokio::test]
async fn test_worker_stops_on_cancellation() {
    let h = Harness::new().await;
    let worker = Worker::new(h.pipeline(), WorkerOptions::default());
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(worker.run(cancel.clone()));

    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();
    let snapshot = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.received, 0);
}
