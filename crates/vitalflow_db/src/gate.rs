use crate::error::{DbError, Result};
use crate::store::DedupStore;
use crate::url::DedupStoreUrl;
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use vitalflow_protocol::{ProcessingRecord, ProcessingStatus};

/// Result of trying to take the processing claim for a correlation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This worker now owns the key
    Claimed,
    /// Another worker holds a live `processing` claim. It may have been
    /// abandoned; the claim becomes takeable again once its TTL elapses.
    InFlight,
    /// The key already completed
    AlreadyCompleted,
    /// The store could not be reached; treated as not claimed
    StoreUnavailable { error: String },
}

impl ClaimOutcome {
    pub fn is_claimed(&self) -> bool {
        matches!(self, ClaimOutcome::Claimed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimOutcome::Claimed => "claimed",
            ClaimOutcome::InFlight => "in_flight",
            ClaimOutcome::AlreadyCompleted => "already_completed",
            ClaimOutcome::StoreUnavailable { .. } => "store_unavailable",
        }
    }
}

impl fmt::Display for ClaimOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Idempotency gate over a [`DedupStore`].
///
/// Every write stamps `expires_at = now + ttl`.
#[derive(Clone)]
pub struct DedupGate {
    store: Arc<dyn DedupStore>,
    ttl_ms: i64,
}

impl DedupGate {
    pub fn new(store: Arc<dyn DedupStore>, ttl: Duration) -> Self {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        Self { store, ttl_ms }
    }

    /// Open the backend named by `url` and wrap it.
    pub async fn connect(url: &str, ttl: Duration) -> Result<Self> {
        let parsed = DedupStoreUrl::parse(url)?;
        let store = crate::open_store(&parsed).await?;
        info!(
            store = %parsed,
            backend = store.backend_name(),
            ttl_secs = ttl.as_secs(),
            "Dedup gate connected"
        );
        Ok(Self::new(store, ttl))
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    pub fn store(&self) -> &Arc<dyn DedupStore> {
        &self.store
    }

    fn stamps(&self) -> (i64, i64) {
        let now = Utc::now().timestamp_millis();
        (now, now.saturating_add(self.ttl_ms))
    }

    /// Record first sight of `key` as `pending`. Never overwrites.
    pub async fn observe(&self, key: &str) -> Result<bool> {
        let (now, expires) = self.stamps();
        let inserted = self.store.insert_pending(key, now, expires).await?;
        debug!(correlation_id = key, inserted, "observed message");
        Ok(inserted)
    }

    /// Try to take the processing claim.
    ///
    /// Fails closed: a store error yields `StoreUnavailable`, never `Claimed`.
    pub async fn mark_processing_started(&self, key: &str) -> ClaimOutcome {
        let (now, expires) = self.stamps();
        match self.store.try_claim(key, now, expires).await {
            Ok(true) => {
                debug!(correlation_id = key, "claim acquired");
                ClaimOutcome::Claimed
            }
            Ok(false) => self.rejected_claim(key).await,
            Err(err) => {
                error!(correlation_id = key, error = %err, "dedup store unavailable during claim");
                ClaimOutcome::StoreUnavailable {
                    error: err.to_string(),
                }
            }
        }
    }

    /// Tell a live claim held elsewhere apart from a finished key.
    async fn rejected_claim(&self, key: &str) -> ClaimOutcome {
        match self.store.get(key).await {
            Ok(Some(record)) if record.status == ProcessingStatus::Completed => {
                debug!(correlation_id = key, "claim rejected, already completed");
                ClaimOutcome::AlreadyCompleted
            }
            // Anything else lost the race to a live claim, including a
            // record that expired or was cleaned up since the claim attempt.
            Ok(_) => {
                debug!(correlation_id = key, "claim rejected, held by another worker");
                ClaimOutcome::InFlight
            }
            Err(err) => {
                error!(correlation_id = key, error = %err, "dedup store unavailable after claim");
                ClaimOutcome::StoreUnavailable {
                    error: err.to_string(),
                }
            }
        }
    }

    pub async fn mark_processing_completed(&self, key: &str) -> Result<()> {
        self.finish(key, ProcessingStatus::Completed).await
    }

    pub async fn mark_processing_failed(&self, key: &str) -> Result<()> {
        self.finish(key, ProcessingStatus::Failed).await
    }

    async fn finish(&self, key: &str, to: ProcessingStatus) -> Result<()> {
        let (now, expires) = self.stamps();
        if self.store.finish(key, to, now, expires).await? {
            debug!(correlation_id = key, status = %to, "record finished");
            return Ok(());
        }

        let current = self.store.get(key).await?;
        let message = match current {
            Some(record) => format!(
                "cannot mark {} as {}: record is {}",
                key, to, record.status
            ),
            None => format!("cannot mark {} as {}: no record", key, to),
        };
        warn!(correlation_id = key, target_status = %to, "illegal dedup transition");
        Err(DbError::invalid_state(message))
    }

    /// True iff a live record is `processing` or `completed`.
    pub async fn is_already_processed(&self, key: &str) -> Result<bool> {
        let now = Utc::now();
        Ok(self
            .store
            .get(key)
            .await?
            .is_some_and(|record| record.is_live_claim(now)))
    }

    pub async fn get_record(&self, key: &str) -> Result<Option<ProcessingRecord>> {
        self.store.get(key).await
    }

    /// Delete expired records. Returns how many were removed.
    pub async fn cleanup_expired_records(&self) -> Result<u64> {
        let now = Utc::now().timestamp_millis();
        let removed = self.store.delete_expired(now).await?;
        if removed > 0 {
            info!(removed, "expired dedup records cleaned up");
        }
        Ok(removed)
    }

    pub async fn ping(&self) -> Result<()> {
        self.store.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SqliteDedupStore;

    async fn gate(ttl: Duration) -> DedupGate {
        let store = SqliteDedupStore::open_in_memory().await.unwrap();
        DedupGate::new(Arc::new(store), ttl)
    }

    #[tokio::test]
    async fn test_claim_complete_lifecycle() {
        let gate = gate(Duration::from_secs(3600)).await;

        assert!(gate.observe("c1").await.unwrap());
        assert!(!gate.observe("c1").await.unwrap());
        assert!(!gate.is_already_processed("c1").await.unwrap());

        assert_eq!(gate.mark_processing_started("c1").await, ClaimOutcome::Claimed);
        assert!(gate.is_already_processed("c1").await.unwrap());
        assert_eq!(gate.mark_processing_started("c1").await, ClaimOutcome::InFlight);

        gate.mark_processing_completed("c1").await.unwrap();
        let record = gate.get_record("c1").await.unwrap().unwrap();
        assert_eq!(record.status, ProcessingStatus::Completed);
        assert_eq!(
            gate.mark_processing_started("c1").await,
            ClaimOutcome::AlreadyCompleted
        );
    }

    #[tokio::test]
    async fn test_failed_record_can_be_reclaimed() {
        let gate = gate(Duration::from_secs(3600)).await;

        assert!(gate.mark_processing_started("c2").await.is_claimed());
        gate.mark_processing_failed("c2").await.unwrap();
        assert!(!gate.is_already_processed("c2").await.unwrap());
        assert!(gate.mark_processing_started("c2").await.is_claimed());
    }

    #[tokio::test]
    async fn test_completed_is_never_overwritten() {
        let gate = gate(Duration::from_secs(3600)).await;

        assert!(gate.mark_processing_started("c3").await.is_claimed());
        gate.mark_processing_completed("c3").await.unwrap();

        let err = gate.mark_processing_failed("c3").await.unwrap_err();
        assert!(matches!(err, DbError::InvalidState(_)));
        let err = gate.mark_processing_completed("c3").await.unwrap_err();
        assert!(matches!(err, DbError::InvalidState(_)));
        let record = gate.get_record("c3").await.unwrap().unwrap();
        assert_eq!(record.status, ProcessingStatus::Completed);
    }

    #[tokio::test]
    async fn test_finish_without_claim_is_invalid() {
        let gate = gate(Duration::from_secs(3600)).await;
        assert!(matches!(
            gate.mark_processing_completed("missing").await,
            Err(DbError::InvalidState(_))
        ));
        gate.observe("pending").await.unwrap();
        assert!(matches!(
            gate.mark_processing_failed("pending").await,
            Err(DbError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_zero_ttl_records_expire_immediately() {
        let gate = gate(Duration::ZERO).await;

        assert!(gate.mark_processing_started("c4").await.is_claimed());
        // expires_at == now, so the stale claim no longer blocks.
        assert!(!gate.is_already_processed("c4").await.unwrap());
        assert!(gate.mark_processing_started("c4").await.is_claimed());
        assert_eq!(gate.cleanup_expired_records().await.unwrap(), 1);
        assert!(gate.get_record("c4").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_abandoned_claim_is_in_flight_until_ttl() {
        let gate = gate(Duration::from_millis(150)).await;

        assert!(gate.mark_processing_started("c6").await.is_claimed());
        assert_eq!(gate.mark_processing_started("c6").await, ClaimOutcome::InFlight);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(gate.mark_processing_started("c6").await.is_claimed());
    }

    #[tokio::test]
    async fn test_closed_store_fails_closed() {
        let store = SqliteDedupStore::open_in_memory().await.unwrap();
        let pool = store.pool().clone();
        let gate = DedupGate::new(Arc::new(store), Duration::from_secs(60));
        pool.close().await;

        let outcome = gate.mark_processing_started("c5").await;
        assert!(matches!(outcome, ClaimOutcome::StoreUnavailable { .. }));
        assert!(!outcome.is_claimed());
        assert!(gate.ping().await.is_err());
    }
}
