//! Canonical keys for validation metadata, insights maps and artifact metadata.
//!
//! Use these constants everywhere to avoid stringly-typed drift between the
//! validator, the processors and the output formatter.

// Validation metadata
pub const SCHEMA_VALIDITY: &str = "schema_validity";
pub const COMPLETENESS: &str = "completeness";
pub const PHYSIOLOGICAL_VALIDITY: &str = "physiological_validity";
pub const TEMPORAL_CONSISTENCY: &str = "temporal_consistency";
pub const RECORD_COUNT: &str = "record_count";
pub const PAYLOAD_BYTES: &str = "payload_bytes";
pub const THRESHOLD: &str = "threshold";
pub const MISSING_FIELDS: &str = "missing_fields";

// Shared insight keys (every processor emits these)
pub const SAMPLE_COUNT: &str = "sample_count";
pub const DROPPED_SAMPLES: &str = "dropped_samples";
pub const MEAN: &str = "mean";
pub const STD_DEV: &str = "std_dev";
pub const MIN: &str = "min";
pub const MAX: &str = "max";
pub const PERCENT_IN_RANGE: &str = "percent_in_range";
pub const COEFFICIENT_OF_VARIATION: &str = "coefficient_of_variation";
pub const EVENTS: &str = "events";
pub const TREND: &str = "trend";

// Artifact metadata
pub const SOURCE_LOCATOR: &str = "source_locator";
pub const DATA_TYPE: &str = "data_type";
pub const QUALITY_SCORE: &str = "quality_score";
pub const CORRELATION_ID: &str = "correlation_id";
pub const OWNER_ID: &str = "owner_id";
pub const RECORDS_PROCESSED: &str = "records_processed";
pub const PROCESSING_TIME_MS: &str = "processing_time_ms";
pub const INSIGHTS: &str = "insights";

/// Prefix for per-band share keys inside an insights map.
pub const BAND_PREFIX: &str = "band.";

/// Build a per-band percentage key, e.g. `band.in_range`.
pub fn band_key(band: &str) -> String {
    let mut key = String::with_capacity(BAND_PREFIX.len() + band.len());
    key.push_str(BAND_PREFIX);
    key.push_str(band);
    key
}

/// Parse a per-band key, returning the band label.
pub fn parse_band_key(key: &str) -> Option<&str> {
    key.strip_prefix(BAND_PREFIX)
}
