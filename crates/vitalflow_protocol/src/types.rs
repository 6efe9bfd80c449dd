//! Pipeline payload types shared by every stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// One decoded sensor record: a generic field map.
pub type Record = serde_json::Map<String, Value>;

/// Ordered key/value map used for metadata and insights.
///
/// BTreeMap keeps serialized output stable across runs.
pub type InsightMap = BTreeMap<String, Value>;

// ============================================================================
// Canonical Enums (used across all crates)
// ============================================================================

/// Sensor data type discriminant.
///
/// Unknown names are preserved in `Other` so they can still be routed
/// (to the fallback processor) and reported verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DataType {
    /// Continuous glucose monitoring readings
    Glucose,
    /// Heart rate samples (beats per minute)
    HeartRate,
    /// Sleep stage segments
    Sleep,
    /// Step counts / activity intervals
    Activity,
    /// Anything the pipeline has no processor for
    Other(String),
}

impl DataType {
    /// All data types with a dedicated processor.
    pub const KNOWN: [DataType; 4] = [
        DataType::Glucose,
        DataType::HeartRate,
        DataType::Sleep,
        DataType::Activity,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            DataType::Glucose => "glucose",
            DataType::HeartRate => "heart_rate",
            DataType::Sleep => "sleep",
            DataType::Activity => "activity",
            DataType::Other(name) => name.as_str(),
        }
    }

    /// Parse a discriminant. Never fails: unknown names become `Other`.
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_lowercase().replace('-', "_");
        match normalized.as_str() {
            "glucose" | "cgm" => DataType::Glucose,
            "heart_rate" | "heartrate" | "hr" => DataType::HeartRate,
            "sleep" => DataType::Sleep,
            "activity" | "steps" => DataType::Activity,
            _ => DataType::Other(raw.trim().to_string()),
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, DataType::Other(_))
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DataType {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(DataType::parse(s))
    }
}

impl From<String> for DataType {
    fn from(value: String) -> Self {
        DataType::parse(&value)
    }
}

impl From<&str> for DataType {
    fn from(value: &str) -> Self {
        DataType::parse(value)
    }
}

impl From<DataType> for String {
    fn from(value: DataType) -> Self {
        value.as_str().to_string()
    }
}

/// Lifecycle of a processing record in the dedup store.
///
/// `Pending -> Processing -> {Completed | Failed}`. A failed record may be
/// claimed again; a completed one never is (until its TTL expires).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    /// Seen but not yet claimed by a worker
    #[default]
    Pending,
    /// Claimed by exactly one worker
    Processing,
    /// Finished successfully
    Completed,
    /// Finished unsuccessfully (quarantined, retried or dead-lettered)
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStatus::Completed | ProcessingStatus::Failed)
    }

    /// Whether a live record in this status blocks a new claim.
    pub fn blocks_claim(&self) -> bool {
        matches!(self, ProcessingStatus::Processing | ProcessingStatus::Completed)
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ProcessingStatus::Pending),
            "processing" => Ok(ProcessingStatus::Processing),
            "completed" | "complete" => Ok(ProcessingStatus::Completed),
            "failed" => Ok(ProcessingStatus::Failed),
            _ => Err(format!("Invalid processing status: '{}'", s)),
        }
    }
}

// ============================================================================
// Intake
// ============================================================================

/// Notification that a sensor data file has landed in the payload store.
///
/// Immutable once received; redelivery produces a new value via
/// [`InboundMessage::redelivered`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub storage_locator: String,
    pub data_type: DataType,
    pub owner_id: String,
    pub correlation_id: String,
    pub enqueue_time: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
}

impl InboundMessage {
    /// Copy of this message as it will look on its next delivery.
    pub fn redelivered(&self) -> Self {
        Self {
            retry_count: self.retry_count.saturating_add(1),
            ..self.clone()
        }
    }

    pub fn context(&self) -> MessageContext {
        MessageContext {
            correlation_id: self.correlation_id.clone(),
            owner_id: self.owner_id.clone(),
            data_type: self.data_type.clone(),
            storage_locator: self.storage_locator.clone(),
            retry_count: self.retry_count,
        }
    }
}

/// The slice of an inbound message a processor is allowed to see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageContext {
    pub correlation_id: String,
    pub owner_id: String,
    pub data_type: DataType,
    pub storage_locator: String,
    pub retry_count: u32,
}

// ============================================================================
// Dedup
// ============================================================================

/// Dedup store row, keyed by correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingRecord {
    pub correlation_id: String,
    pub status: ProcessingStatus,
    pub first_seen_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ProcessingRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// True when this record prevents another worker from claiming the key.
    pub fn is_live_claim(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired(now) && self.status.blocks_claim()
    }
}

// ============================================================================
// Validation & Processing
// ============================================================================

/// Outcome of a quality validation pass. Never persisted on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub quality_score: f64,
    pub metadata: InsightMap,
}

impl ValidationResult {
    /// A result for input that could not be scored at all (e.g. decode failure).
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            errors: vec![reason.into()],
            warnings: Vec::new(),
            quality_score: 0.0,
            metadata: InsightMap::new(),
        }
    }
}

/// Output of one domain processor invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub success: bool,
    pub narrative: Option<String>,
    pub error_message: Option<String>,
    #[serde(rename = "processing_time_ms", with = "duration_ms")]
    pub processing_time: Duration,
    pub records_processed: usize,
    pub quality_score: f64,
    pub clinical_insights: InsightMap,
}

impl ProcessingResult {
    pub fn succeeded(
        narrative: String,
        clinical_insights: InsightMap,
        records_processed: usize,
        quality_score: f64,
    ) -> Self {
        Self {
            success: true,
            narrative: Some(narrative),
            error_message: None,
            processing_time: Duration::ZERO,
            records_processed,
            quality_score,
            clinical_insights,
        }
    }

    pub fn failed(error_message: impl Into<String>, quality_score: f64) -> Self {
        Self {
            success: false,
            narrative: None,
            error_message: Some(error_message.into()),
            processing_time: Duration::ZERO,
            records_processed: 0,
            quality_score,
            clinical_insights: InsightMap::new(),
        }
    }

    pub fn with_processing_time(mut self, elapsed: Duration) -> Self {
        self.processing_time = elapsed;
        self
    }
}

// ============================================================================
// Output
// ============================================================================

/// Diagnostic sibling written next to every quarantined payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineRecord {
    pub original_locator: String,
    pub reason: Vec<String>,
    pub quality_score: f64,
    pub warnings: Vec<String>,
    pub quarantined_at: DateTime<Utc>,
}

/// One line of the training artifact stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingArtifact {
    pub instruction: String,
    pub output: String,
    pub metadata: InsightMap,
}

impl TrainingArtifact {
    /// Serialize as a single NDJSON line (trailing newline included).
    pub fn to_ndjson_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(value.as_secs_f64() * 1_000.0)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = f64::deserialize(deserializer)?;
        if !millis.is_finite() || millis < 0.0 {
            return Err(serde::de::Error::custom("processing_time_ms must be >= 0"));
        }
        Ok(Duration::from_secs_f64(millis / 1_000.0))
    }
}
