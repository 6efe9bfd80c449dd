//! Embedded single-node dedup store.

use crate::error::Result;
use crate::schema::{sqlite_ddl, RECORDS_TABLE};
use crate::store::{ensure_terminal, record_from_columns, DedupStore};
use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::Row;
use std::path::Path;
use std::time::Duration;
use tracing::info;
use vitalflow_protocol::{ProcessingRecord, ProcessingStatus};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct SqliteDedupStore {
    pool: SqlitePool,
}

impl SqliteDedupStore {
    /// Open or create a store at `path`, creating the table if needed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;
        info!(path = %path.display(), "Dedup store opened");
        Ok(store)
    }

    /// In-memory store (tests, single-process dry runs).
    ///
    /// A single connection, since every in-memory connection is its own database.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new().in_memory(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    async fn ensure_schema(&self) -> Result<()> {
        for statement in sqlite_ddl(RECORDS_TABLE) {
            sqlx::query(&statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl DedupStore for SqliteDedupStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn insert_pending(&self, key: &str, now_ms: i64, expires_at_ms: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO vf_processing_records
                (correlation_id, status, first_seen_at, last_updated_at, expires_at)
            VALUES (?, 'pending', ?, ?, ?)
            ON CONFLICT(correlation_id) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(now_ms)
        .bind(now_ms)
        .bind(expires_at_ms)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn try_claim(&self, key: &str, now_ms: i64, expires_at_ms: i64) -> Result<bool> {
        // One statement: the row lock taken by the upsert is the claim.
        let result = sqlx::query(
            r#"
            INSERT INTO vf_processing_records
                (correlation_id, status, first_seen_at, last_updated_at, expires_at)
            VALUES (?, 'processing', ?, ?, ?)
            ON CONFLICT(correlation_id) DO UPDATE SET
                status = 'processing',
                first_seen_at = CASE
                    WHEN vf_processing_records.expires_at <= excluded.last_updated_at
                    THEN excluded.first_seen_at
                    ELSE vf_processing_records.first_seen_at
                END,
                last_updated_at = excluded.last_updated_at,
                expires_at = excluded.expires_at
            WHERE vf_processing_records.status IN ('pending', 'failed')
               OR vf_processing_records.expires_at <= excluded.last_updated_at
            "#,
        )
        .bind(key)
        .bind(now_ms)
        .bind(now_ms)
        .bind(expires_at_ms)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn finish(
        &self,
        key: &str,
        to: ProcessingStatus,
        now_ms: i64,
        expires_at_ms: i64,
    ) -> Result<bool> {
        ensure_terminal(to)?;
        let result = sqlx::query(
            r#"
            UPDATE vf_processing_records SET
                status = ?,
                last_updated_at = ?,
                expires_at = ?
            WHERE correlation_id = ? AND status = 'processing'
            "#,
        )
        .bind(to.as_str())
        .bind(now_ms)
        .bind(expires_at_ms)
        .bind(key)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, key: &str) -> Result<Option<ProcessingRecord>> {
        let row = sqlx::query(
            r#"
            SELECT correlation_id, status, first_seen_at, last_updated_at, expires_at
            FROM vf_processing_records
            WHERE correlation_id = ?
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let status: String = row.try_get("status")?;
                Ok(Some(record_from_columns(
                    row.try_get("correlation_id")?,
                    &status,
                    row.try_get("first_seen_at")?,
                    row.try_get("last_updated_at")?,
                    row.try_get("expires_at")?,
                )?))
            }
            None => Ok(None),
        }
    }

    async fn delete_expired(&self, now_ms: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM vf_processing_records WHERE expires_at <= ?")
            .bind(now_ms)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
