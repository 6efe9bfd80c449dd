//! Field access helpers shared by the validator and the domain processors.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use vitalflow_protocol::Record;

/// Epoch values above this are read as milliseconds (year 5138 in seconds).
const EPOCH_MILLIS_CUTOFF: f64 = 1e11;

/// Resolve a dotted path (`device.reading.value`) inside a record.
pub fn lookup_path<'a>(record: &'a Record, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = record.get(first)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// A field is populated when present, non-null, and not an empty string.
pub fn is_populated(record: &Record, path: &str) -> bool {
    match lookup_path(record, path) {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

/// Numeric value at `path`. Numeric strings are accepted; NaN/inf are not.
pub fn numeric_value(record: &Record, path: &str) -> Option<f64> {
    let value = match lookup_path(record, path)? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    value.is_finite().then_some(value)
}

/// Parse an RFC 3339 string or an epoch number (seconds or milliseconds).
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
                return Some(parsed.with_timezone(&Utc));
            }
            trimmed.parse::<f64>().ok().and_then(epoch_to_datetime)
        }
        Value::Number(n) => n.as_f64().and_then(epoch_to_datetime),
        _ => None,
    }
}

fn epoch_to_datetime(raw: f64) -> Option<DateTime<Utc>> {
    if !raw.is_finite() || raw < 0.0 {
        return None;
    }
    let millis = if raw >= EPOCH_MILLIS_CUTOFF {
        raw
    } else {
        raw * 1_000.0
    };
    Utc.timestamp_millis_opt(millis.round() as i64).single()
}
