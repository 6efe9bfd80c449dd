//! `[output]` configuration section.

use crate::error::{SinkError, SinkResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use vitalflow_protocol::defaults::{
    DEFAULT_ARTIFACT_FILE, DEFAULT_CATEGORY, DEFAULT_QUARANTINE_BUCKET,
    DEFAULT_QUARANTINE_NAMESPACE,
};
use vitalflow_protocol::paths::{default_artifact_root, default_payload_root};
use vitalflow_protocol::DataType;

/// Placeholder replaced with the data type name in the instruction template.
pub const DATA_TYPE_PLACEHOLDER: &str = "{data_type}";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Root of the local payload store (`<root>/<bucket>/<key>`)
    #[serde(default = "default_payload_root")]
    pub payload_root: PathBuf,
    /// Root of the artifact partitions
    #[serde(default = "default_artifact_root")]
    pub artifact_root: PathBuf,
    #[serde(default = "default_artifact_file")]
    pub artifact_file: String,
    #[serde(default = "default_quarantine_bucket")]
    pub quarantine_bucket: String,
    #[serde(default = "default_quarantine_namespace")]
    pub quarantine_namespace: String,
    /// data_type -> artifact category
    #[serde(default = "default_categories")]
    pub categories: BTreeMap<String, String>,
    #[serde(default = "default_instruction")]
    pub instruction: String,
}

fn default_artifact_file() -> String {
    DEFAULT_ARTIFACT_FILE.to_string()
}

fn default_quarantine_bucket() -> String {
    DEFAULT_QUARANTINE_BUCKET.to_string()
}

fn default_quarantine_namespace() -> String {
    DEFAULT_QUARANTINE_NAMESPACE.to_string()
}

fn default_categories() -> BTreeMap<String, String> {
    [
        (DataType::Glucose, "metabolic"),
        (DataType::HeartRate, "cardiovascular"),
        (DataType::Sleep, "sleep"),
        (DataType::Activity, "fitness"),
    ]
    .into_iter()
    .map(|(data_type, category)| (data_type.as_str().to_string(), category.to_string()))
    .collect()
}

fn default_instruction() -> String {
    format!(
        "Analyze the following {} sensor data and summarize the clinically relevant patterns.",
        DATA_TYPE_PLACEHOLDER
    )
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            payload_root: default_payload_root(),
            artifact_root: default_artifact_root(),
            artifact_file: default_artifact_file(),
            quarantine_bucket: default_quarantine_bucket(),
            quarantine_namespace: default_quarantine_namespace(),
            categories: default_categories(),
            instruction: default_instruction(),
        }
    }
}

impl OutputConfig {
    pub fn validate(&self) -> SinkResult<()> {
        if self.artifact_file.is_empty() || self.artifact_file.contains('/') {
            return Err(SinkError::message(format!(
                "output.artifact_file must be a plain file name, got '{}'",
                self.artifact_file
            )));
        }
        if self.quarantine_bucket.is_empty() || self.quarantine_bucket.contains('/') {
            return Err(SinkError::message(format!(
                "output.quarantine_bucket must be a single bucket name, got '{}'",
                self.quarantine_bucket
            )));
        }
        if self.quarantine_namespace.trim_matches('/').is_empty() {
            return Err(SinkError::message("output.quarantine_namespace is empty"));
        }
        if let Some((data_type, _)) = self
            .categories
            .iter()
            .find(|(_, category)| category.is_empty() || category.contains('/'))
        {
            return Err(SinkError::message(format!(
                "output.categories.{} must be a single path segment",
                data_type
            )));
        }
        Ok(())
    }

    /// Category for a data type, `general` when unmapped.
    pub fn category_for(&self, data_type: &DataType) -> &str {
        self.categories
            .get(data_type.as_str())
            .map(String::as_str)
            .unwrap_or(DEFAULT_CATEGORY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_categories() {
        let config = OutputConfig::default();
        assert_eq!(config.category_for(&DataType::Glucose), "metabolic");
        assert_eq!(config.category_for(&DataType::HeartRate), "cardiovascular");
        assert_eq!(config.category_for(&DataType::Sleep), "sleep");
        assert_eq!(config.category_for(&DataType::Activity), "fitness");
        assert_eq!(config.category_for(&DataType::parse("spo2")), "general");
        config.validate().unwrap();
    }

    #[test]
    fn test_rejects_nested_artifact_file() {
        let config = OutputConfig {
            artifact_file: "a/b.jsonl".into(),
            ..OutputConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
