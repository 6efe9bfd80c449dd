//! Quarantine of rejected payloads.
//!
//! A quarantined payload is copied to
//! `<namespace>/<data_type>/<year>/<month>/<day>/<file>` in the quarantine
//! bucket, next to `<file>.metadata.json` holding the [`QuarantineRecord`].
//! The pair is written payload first; if the metadata write fails the payload
//! copy is deleted again, so a reader never finds a payload without its
//! metadata.

use crate::error::{SinkError, SinkResult};
use crate::locator::StorageLocator;
use crate::store::ObjectStore;
use chrono::{DateTime, Datelike, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};
use vitalflow_protocol::defaults::QUARANTINE_METADATA_SUFFIX;
use vitalflow_protocol::{DataType, QuarantineRecord, ValidationResult};

/// Where a quarantined payload ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarantinePlacement {
    pub payload: StorageLocator,
    pub metadata: StorageLocator,
}

pub struct QuarantineManager {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    namespace: String,
}

impl QuarantineManager {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            namespace: namespace.into().trim_matches('/').to_string(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Key of the quarantined payload copy.
    pub fn payload_key(&self, data_type: &DataType, at: DateTime<Utc>, file_name: &str) -> String {
        format!(
            "{}/{}/{:04}/{:02}/{:02}/{}",
            self.namespace,
            sanitize_segment(data_type.as_str()),
            at.year(),
            at.month(),
            at.day(),
            sanitize_segment(file_name)
        )
    }

    /// Build the diagnostic record for a rejected payload.
    pub fn record_for(
        original: &StorageLocator,
        validation: &ValidationResult,
        at: DateTime<Utc>,
    ) -> QuarantineRecord {
        let reason = if validation.errors.is_empty() {
            vec![format!(
                "quality score {:.3} below threshold",
                validation.quality_score
            )]
        } else {
            validation.errors.clone()
        };
        QuarantineRecord {
            original_locator: original.to_string(),
            reason,
            quality_score: validation.quality_score,
            warnings: validation.warnings.clone(),
            quarantined_at: at,
        }
    }

    /// Write payload and metadata as one unit.
    pub async fn quarantine(
        &self,
        original: &StorageLocator,
        payload: &[u8],
        data_type: &DataType,
        validation: &ValidationResult,
        at: DateTime<Utc>,
    ) -> SinkResult<QuarantinePlacement> {
        let record = Self::record_for(original, validation, at);
        let metadata_bytes = serde_json::to_vec_pretty(&record)?;
        let payload_key = self.payload_key(data_type, at, original.file_name());
        let metadata_key = format!("{}{}", payload_key, QUARANTINE_METADATA_SUFFIX);

        self.store.put(&self.bucket, &payload_key, payload).await?;

        if let Err(e) = self
            .store
            .put(&self.bucket, &metadata_key, &metadata_bytes)
            .await
        {
            warn!(
                original = %original,
                error = %e,
                "Quarantine metadata write failed; removing payload copy"
            );
            if let Err(cleanup) = self.store.delete(&self.bucket, &payload_key).await {
                error!(
                    key = %payload_key,
                    error = %cleanup,
                    "Failed to remove orphaned quarantine payload"
                );
            }
            return Err(SinkError::QuarantineRolledBack {
                locator: original.to_string(),
                source: e,
            });
        }

        info!(
            original = %original,
            data_type = %data_type,
            quality_score = record.quality_score,
            reasons = record.reason.len(),
            "Quarantined payload to {}/{}",
            self.bucket,
            payload_key
        );
        Ok(QuarantinePlacement {
            payload: StorageLocator::new(&self.bucket, payload_key),
            metadata: StorageLocator::new(&self.bucket, metadata_key),
        })
    }
}

/// Keep one path segment: `/` and `..` never reach the key.
fn sanitize_segment(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        cleaned
    }
}
