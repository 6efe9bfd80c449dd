//! Backend trait shared by the sqlite and postgres dedup stores.
//!
//! All timestamps cross this boundary as milliseconds since the Unix epoch.
//! The caller supplies `now` so every backend applies the same clock, and
//! tests can drive expiry without sleeping.

use crate::error::{DbError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::str::FromStr;
use vitalflow_protocol::{ProcessingRecord, ProcessingStatus};

#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Short backend name for logs and health output.
    fn backend_name(&self) -> &'static str;

    /// Insert a `pending` record if none exists. Returns true when inserted.
    async fn insert_pending(&self, key: &str, now_ms: i64, expires_at_ms: i64) -> Result<bool>;

    /// Atomically move `key` into `processing`.
    ///
    /// Succeeds when the record is absent, `pending`, `failed`, or expired.
    /// Returns false when another live claim or a completion exists.
    async fn try_claim(&self, key: &str, now_ms: i64, expires_at_ms: i64) -> Result<bool>;

    /// Move a `processing` record to `to`. Returns false (and changes nothing)
    /// when the record is missing or not currently `processing`.
    async fn finish(
        &self,
        key: &str,
        to: ProcessingStatus,
        now_ms: i64,
        expires_at_ms: i64,
    ) -> Result<bool>;

    async fn get(&self, key: &str) -> Result<Option<ProcessingRecord>>;

    /// Delete every record with `expires_at <= now`. Returns the count removed.
    async fn delete_expired(&self, now_ms: i64) -> Result<u64>;

    /// Cheap round-trip used by health checks.
    async fn ping(&self) -> Result<()>;
}

/// Convert milliseconds to DateTime.
pub fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Build a record from raw column values.
pub(crate) fn record_from_columns(
    correlation_id: String,
    status: &str,
    first_seen_at: i64,
    last_updated_at: i64,
    expires_at: i64,
) -> Result<ProcessingRecord> {
    let status = ProcessingStatus::from_str(status).map_err(DbError::invalid_state)?;
    Ok(ProcessingRecord {
        correlation_id,
        status,
        first_seen_at: millis_to_datetime(first_seen_at),
        last_updated_at: millis_to_datetime(last_updated_at),
        expires_at: millis_to_datetime(expires_at),
    })
}

pub(crate) fn ensure_terminal(to: ProcessingStatus) -> Result<()> {
    if to.is_terminal() {
        Ok(())
    } else {
        Err(DbError::invalid_state(format!(
            "processing can only finish as completed or failed, not {}",
            to
        )))
    }
}
