//! Training-artifact formatting and the append-only artifact stream.
//!
//! Artifacts are NDJSON lines appended to
//! `<category>/<year>/<month>/<artifact-file>`. Appends to one partition are
//! serialized; different partitions proceed in parallel.

use crate::config::{OutputConfig, DATA_TYPE_PLACEHOLDER};
use crate::error::{SinkError, SinkResult};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use vitalflow_protocol::keys;
use vitalflow_protocol::{InsightMap, MessageContext, ProcessingResult, TrainingArtifact};

/// `(category, year, month)` partition of the artifact stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactPartition {
    pub category: String,
    pub year: i32,
    pub month: u32,
}

impl ArtifactPartition {
    pub fn new(category: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            category: category.into(),
            year: at.year(),
            month: at.month(),
        }
    }

    /// Relative directory, e.g. `metabolic/2024/03`.
    pub fn relative_dir(&self) -> PathBuf {
        Path::new(&self.category)
            .join(format!("{:04}", self.year))
            .join(format!("{:02}", self.month))
    }
}

impl fmt::Display for ArtifactPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:04}/{:02}", self.category, self.year, self.month)
    }
}

// ============================================================================
// Formatter
// ============================================================================

/// Builds artifacts and picks their partition.
#[derive(Debug, Clone)]
pub struct OutputFormatter {
    config: OutputConfig,
}

impl OutputFormatter {
    pub fn new(config: OutputConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OutputConfig {
        &self.config
    }

    /// Format a successful processing result.
    pub fn format(
        &self,
        result: &ProcessingResult,
        context: &MessageContext,
    ) -> SinkResult<TrainingArtifact> {
        let narrative = result
            .narrative
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| {
                SinkError::message(format!(
                    "refusing to format artifact for {} without a narrative",
                    context.correlation_id
                ))
            })?;

        let mut metadata = InsightMap::new();
        metadata.insert(
            keys::SOURCE_LOCATOR.into(),
            Value::from(context.storage_locator.clone()),
        );
        metadata.insert(keys::DATA_TYPE.into(), Value::from(context.data_type.as_str()));
        metadata.insert(keys::QUALITY_SCORE.into(), Value::from(result.quality_score));
        metadata.insert(
            keys::CORRELATION_ID.into(),
            Value::from(context.correlation_id.clone()),
        );
        metadata.insert(keys::OWNER_ID.into(), Value::from(context.owner_id.clone()));
        metadata.insert(
            keys::RECORDS_PROCESSED.into(),
            Value::from(result.records_processed),
        );
        metadata.insert(
            keys::PROCESSING_TIME_MS.into(),
            Value::from(result.processing_time.as_secs_f64() * 1_000.0),
        );
        metadata.insert(
            keys::INSIGHTS.into(),
            serde_json::to_value(&result.clinical_insights)?,
        );

        Ok(TrainingArtifact {
            instruction: self
                .config
                .instruction
                .replace(DATA_TYPE_PLACEHOLDER, context.data_type.as_str()),
            output: narrative.to_string(),
            metadata,
        })
    }

    pub fn partition_for(&self, context: &MessageContext, at: DateTime<Utc>) -> ArtifactPartition {
        ArtifactPartition::new(self.config.category_for(&context.data_type), at)
    }
}

// ============================================================================
// Sinks
// ============================================================================

#[async_trait]
pub trait ArtifactSink: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Append one artifact as a single line. A line is written whole or not at all.
    async fn append(
        &self,
        partition: &ArtifactPartition,
        artifact: &TrainingArtifact,
    ) -> SinkResult<()>;

    async fn ping(&self) -> SinkResult<()>;
}

/// NDJSON files under `root/<category>/<year>/<month>/<file_name>`.
#[derive(Debug)]
pub struct FsArtifactSink {
    root: PathBuf,
    file_name: String,
    /// One append lock per partition file
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl FsArtifactSink {
    pub fn new(root: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            file_name: file_name.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &OutputConfig) -> Self {
        Self::new(&config.artifact_root, &config.artifact_file)
    }

    pub fn path_for(&self, partition: &ArtifactPartition) -> PathBuf {
        self.root
            .join(partition.relative_dir())
            .join(&self.file_name)
    }

    fn lock_for(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(path.to_path_buf()).or_default())
    }
}

#[async_trait]
impl ArtifactSink for FsArtifactSink {
    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    async fn append(
        &self,
        partition: &ArtifactPartition,
        artifact: &TrainingArtifact,
    ) -> SinkResult<()> {
        let line = artifact.to_ndjson_line()?;
        let path = self.path_for(partition);
        let lock = self.lock_for(&path);
        let _guard = lock.lock().await;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SinkError::io(parent, e))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| SinkError::io(&path, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| SinkError::io(&path, e))?;
        file.flush().await.map_err(|e| SinkError::io(&path, e))?;

        debug!("Appended {} bytes to {}", line.len(), path.display());
        Ok(())
    }

    async fn ping(&self) -> SinkResult<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| SinkError::io(&self.root, e))
    }
}

/// Collects artifacts in memory.
#[derive(Debug, Default)]
pub struct MemoryArtifactSink {
    artifacts: tokio::sync::Mutex<Vec<(ArtifactPartition, TrainingArtifact)>>,
}

impl MemoryArtifactSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn artifacts(&self) -> Vec<(ArtifactPartition, TrainingArtifact)> {
        self.artifacts.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.artifacts.lock().await.len()
    }
}

#[async_trait]
impl ArtifactSink for MemoryArtifactSink {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn append(
        &self,
        partition: &ArtifactPartition,
        artifact: &TrainingArtifact,
    ) -> SinkResult<()> {
        self.artifacts
            .lock()
            .await
            .push((partition.clone(), artifact.clone()));
        Ok(())
    }

    async fn ping(&self) -> SinkResult<()> {
        Ok(())
    }
}
