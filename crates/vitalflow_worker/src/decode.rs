//! Payload decoding into generic records.

use serde_json::Value;
use thiserror::Error;
use vitalflow_protocol::Record;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is empty")]
    Empty,

    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("invalid JSON at line {line}: {source}")]
    Json {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// An element of the record list is not a JSON object
    #[error("record {index} is not an object (found {found})")]
    NotAnObject { index: usize, found: &'static str },
}

/// Turns payload bytes into records.
pub trait RecordDecoder: Send + Sync {
    fn name(&self) -> &'static str;

    fn decode(&self, payload: &[u8]) -> Result<Vec<Record>, DecodeError>;
}

/// Accepts a JSON array of objects, an object with a `records` array, or NDJSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRecordDecoder;

impl JsonRecordDecoder {
    fn records_from_array(items: Vec<Value>) -> Result<Vec<Record>, DecodeError> {
        items
            .into_iter()
            .enumerate()
            .map(|(index, item)| match item {
                Value::Object(map) => Ok(map),
                other => Err(DecodeError::NotAnObject {
                    index,
                    found: json_type_name(&other),
                }),
            })
            .collect()
    }

    fn decode_ndjson(text: &str) -> Result<Vec<Record>, DecodeError> {
        let mut records = Vec::new();
        for (i, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(line)
                .map_err(|source| DecodeError::Json { line: i + 1, source })?;
            match value {
                Value::Object(map) => records.push(map),
                other => {
                    return Err(DecodeError::NotAnObject {
                        index: records.len(),
                        found: json_type_name(&other),
                    })
                }
            }
        }
        if records.is_empty() {
            return Err(DecodeError::Empty);
        }
        Ok(records)
    }
}

impl RecordDecoder for JsonRecordDecoder {
    fn name(&self) -> &'static str {
        "json"
    }

    fn decode(&self, payload: &[u8]) -> Result<Vec<Record>, DecodeError> {
        let text = std::str::from_utf8(payload)?;
        let trimmed = text.trim_start_matches('\u{feff}').trim();
        if trimmed.is_empty() {
            return Err(DecodeError::Empty);
        }

        if trimmed.starts_with('[') {
            let items: Vec<Value> = serde_json::from_str(trimmed)
                .map_err(|source| DecodeError::Json {
                    line: source.line(),
                    source,
                })?;
            return Self::records_from_array(items);
        }

        // A single document: either a wrapper with `records` or one record.
        if let Ok(Value::Object(mut map)) = serde_json::from_str::<Value>(trimmed) {
            return match map.remove("records") {
                Some(Value::Array(items)) => Self::records_from_array(items),
                Some(other) => {
                    map.insert("records".to_string(), other);
                    Ok(vec![map])
                }
                None => Ok(vec![map]),
            };
        }

        Self::decode_ndjson(trimmed)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_array() {
        let records = JsonRecordDecoder
            .decode(br#"[{"bpm": 60}, {"bpm": 62}]"#)
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["bpm"], 62);
    }

    #[test]
    fn test_decode_wrapper_object() {
        let records = JsonRecordDecoder
            .decode(br#"{"device": "x", "records": [{"steps": 10}]}"#)
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["steps"], 10);
    }

    #[test]
    fn test_decode_ndjson() {
        let payload = b"{\"bpm\": 60}\n\n{\"bpm\": 61}\n{\"bpm\": 62}\n";
        let records = JsonRecordDecoder.decode(payload).unwrap();
        assert_eq!(records.len(), 3);
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(JsonRecordDecoder.decode(b"  \n"), Err(DecodeError::Empty)));
        assert!(matches!(
            JsonRecordDecoder.decode(b"[1, 2]"),
            Err(DecodeError::NotAnObject { index: 0, found: "number" })
        ));
        assert!(matches!(
            JsonRecordDecoder.decode(b"{\"a\":1}\nnot json"),
            Err(DecodeError::Json { line: 2, .. })
        ));
        assert!(matches!(
            JsonRecordDecoder.decode(&[0xff, 0xfe]),
            Err(DecodeError::Utf8(_))
        ));
    }
}
