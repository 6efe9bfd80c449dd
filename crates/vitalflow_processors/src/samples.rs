//! Typed sample extraction from decoded field maps.

use chrono::{DateTime, Utc};
use vitalflow_protocol::Record;
use vitalflow_quality::{lookup_path, numeric_value, parse_timestamp};

/// One timestamped numeric reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Samples that survived extraction, oldest first, plus how many were dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub samples: Vec<Sample>,
    pub dropped: usize,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn values(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.value).collect()
    }
}

/// Pull `(timestamp, value)` pairs out of `records`.
///
/// Records with a missing or unreadable timestamp or value are dropped and
/// counted. The result is sorted by timestamp (stable for ties).
pub fn extract_samples(records: &[Record], value_field: &str, timestamp_field: &str) -> Extraction {
    let mut samples = Vec::with_capacity(records.len());
    let mut dropped = 0;

    for record in records {
        let timestamp = lookup_path(record, timestamp_field).and_then(parse_timestamp);
        let value = numeric_value(record, value_field);
        match (timestamp, value) {
            (Some(timestamp), Some(value)) => samples.push(Sample { timestamp, value }),
            _ => dropped += 1,
        }
    }

    samples.sort_by_key(|s| s.timestamp);
    Extraction { samples, dropped }
}

/// Step series over `(start, end, value)` spans ordered by start.
///
/// Each span contributes a sample at its start. A closing zero sample is
/// added at its end unless the next span has already started by then, so a
/// recording gap reads as zero instead of stretching the previous value.
pub fn span_samples(spans: &[(DateTime<Utc>, DateTime<Utc>, f64)]) -> Vec<Sample> {
    let mut samples = Vec::with_capacity(spans.len() * 2);
    for (i, (start, end, value)) in spans.iter().enumerate() {
        samples.push(Sample::new(*start, *value));
        let covered = spans.get(i + 1).is_some_and(|(next, _, _)| next <= end);
        if !covered {
            samples.push(Sample::new(*end, 0.0));
        }
    }
    samples
}
