//! Dedup gate for the VitalFlow pipeline.
//!
//! A [`DedupGate`] guarantees that, for a given correlation id, at most one
//! worker holds a live `processing` claim and that a completed message is
//! never processed again until its record expires.
//!
//! # Usage
//!
//! ```rust,ignore
//! use vitalflow_db::{ClaimOutcome, DedupGate};
//! use std::time::Duration;
//!
//! let ttl = Duration::from_secs(86_400);
//! let gate = DedupGate::connect("sqlite:/var/lib/vitalflow/dedup.sqlite", ttl).await?;
//!
//! match gate.mark_processing_started("corr-1").await {
//!     ClaimOutcome::Claimed => { /* do the work */ }
//!     ClaimOutcome::AlreadyCompleted => { /* ack and drop */ }
//!     ClaimOutcome::InFlight => { /* redeliver later; the claim may be abandoned */ }
//!     ClaimOutcome::StoreUnavailable { .. } => { /* nack for redelivery */ }
//! }
//! ```
//!
//! Backends are selected at runtime from the store URL and at compile time
//! via the `sqlite` / `postgres` features.

mod error;
mod gate;
mod schema;
mod store;
mod url;

#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use error::{DbError, Result};
pub use gate::{ClaimOutcome, DedupGate};
pub use store::{millis_to_datetime, DedupStore};
pub use url::DedupStoreUrl;

use std::sync::Arc;

#[cfg(feature = "postgres")]
pub use postgres::PostgresDedupStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDedupStore;

/// Open the store named by `url`, creating its schema if needed.
pub async fn open_store(url: &DedupStoreUrl) -> Result<Arc<dyn DedupStore>> {
    match url {
        #[cfg(feature = "sqlite")]
        DedupStoreUrl::Sqlite(path) => Ok(Arc::new(SqliteDedupStore::open(path).await?)),
        #[cfg(feature = "sqlite")]
        DedupStoreUrl::SqliteMemory => Ok(Arc::new(SqliteDedupStore::open_in_memory().await?)),
        #[cfg(feature = "postgres")]
        DedupStoreUrl::Postgres(conn) => Ok(Arc::new(PostgresDedupStore::connect(conn).await?)),
        #[allow(unreachable_patterns)]
        other => Err(DbError::NotCompiled {
            backend: other.backend_name().to_string(),
            feature: other.backend_name().to_string(),
        }),
    }
}
