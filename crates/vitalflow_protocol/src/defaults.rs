//! Canonical default values shared across the pipeline.

/// Default dedup store URL (embedded backend).
pub const DEFAULT_DEDUP_STORE_URL: &str = "sqlite:dedup.sqlite";
/// Processing records live this long after their last transition.
pub const DEFAULT_DEDUP_TTL_SECS: u64 = 24 * 60 * 60;
/// How often expired processing records are swept.
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 300;
/// Delay before a delivery blocked by another worker's claim comes back.
pub const DEFAULT_IN_FLIGHT_RECHECK_MS: u64 = 60_000;

/// Maximum number of messages handled concurrently by one worker.
pub const DEFAULT_CONCURRENCY: usize = 8;
/// Payloads larger than this are rejected as resource-exceeded.
pub const DEFAULT_MAX_PAYLOAD_BYTES: u64 = 64 * 1024 * 1024;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1_000;
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 60_000;
pub const DEFAULT_RETRY_JITTER_MS: u64 = 250;

/// Minimum composite quality score accepted by the validator.
pub const DEFAULT_QUALITY_THRESHOLD: f64 = 0.7;
/// Temporal consistency score applied when timestamps go backwards.
pub const DEGRADED_TEMPORAL_SCORE: f64 = 0.7;

pub const DEFAULT_QUARANTINE_BUCKET: &str = "quarantine";
pub const DEFAULT_QUARANTINE_NAMESPACE: &str = "quarantine";
pub const QUARANTINE_METADATA_SUFFIX: &str = ".metadata.json";
pub const DEFAULT_ARTIFACT_FILE: &str = "training.jsonl";
/// Category used when a data type has no entry in the category table.
pub const DEFAULT_CATEGORY: &str = "general";

pub const DEFAULT_HEALTH_BIND_ADDR: &str = "127.0.0.1:9464";
pub const DEFAULT_TIMESTAMP_FIELD: &str = "timestamp";
