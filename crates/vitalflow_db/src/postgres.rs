//! Shared dedup store for multi-node deployments.

use crate::error::{DbError, Result};
use crate::schema::{is_valid_table_name, postgres_ddl, RECORDS_TABLE};
use crate::store::{ensure_terminal, record_from_columns, DedupStore};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;
use tracing::info;
use vitalflow_protocol::{ProcessingRecord, ProcessingStatus};

#[derive(Clone)]
pub struct PostgresDedupStore {
    pool: PgPool,
    table: String,
    sql: Statements,
}

/// Statements rendered once for the configured table.
#[derive(Clone)]
struct Statements {
    insert_pending: String,
    try_claim: String,
    finish: String,
    get: String,
    delete_expired: String,
}

impl Statements {
    fn for_table(table: &str) -> Self {
        Self {
            insert_pending: format!(
                r#"
                INSERT INTO {table}
                    (correlation_id, status, first_seen_at, last_updated_at, expires_at)
                VALUES ($1, 'pending', $2, $2, $3)
                ON CONFLICT (correlation_id) DO NOTHING
                "#
            ),
            try_claim: format!(
                r#"
                INSERT INTO {table} AS existing
                    (correlation_id, status, first_seen_at, last_updated_at, expires_at)
                VALUES ($1, 'processing', $2, $2, $3)
                ON CONFLICT (correlation_id) DO UPDATE SET
                    status = 'processing',
                    first_seen_at = CASE
                        WHEN existing.expires_at <= EXCLUDED.last_updated_at
                        THEN EXCLUDED.first_seen_at
                        ELSE existing.first_seen_at
                    END,
                    last_updated_at = EXCLUDED.last_updated_at,
                    expires_at = EXCLUDED.expires_at
                WHERE existing.status IN ('pending', 'failed')
                   OR existing.expires_at <= EXCLUDED.last_updated_at
                "#
            ),
            finish: format!(
                r#"
                UPDATE {table} SET
                    status = $1,
                    last_updated_at = $2,
                    expires_at = $3
                WHERE correlation_id = $4 AND status = 'processing'
                "#
            ),
            get: format!(
                r#"
                SELECT correlation_id, status, first_seen_at, last_updated_at, expires_at
                FROM {table}
                WHERE correlation_id = $1
                "#
            ),
            delete_expired: format!("DELETE FROM {table} WHERE expires_at <= $1"),
        }
    }
}

impl PostgresDedupStore {
    /// Connect and create the default table if needed.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await?;
        Self::with_table(pool, RECORDS_TABLE).await
    }

    /// Use an existing pool and a custom (optionally schema-qualified) table.
    pub async fn with_table(pool: PgPool, table: &str) -> Result<Self> {
        if !is_valid_table_name(table) {
            return Err(DbError::invalid_state(format!(
                "invalid dedup table name: {table}"
            )));
        }
        let store = Self {
            pool,
            table: table.to_string(),
            sql: Statements::for_table(table),
        };
        store.ensure_schema().await?;
        info!(table = %store.table, "Postgres dedup store ready");
        Ok(store)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    async fn ensure_schema(&self) -> Result<()> {
        for statement in postgres_ddl(&self.table) {
            sqlx::query(&statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl DedupStore for PostgresDedupStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn insert_pending(&self, key: &str, now_ms: i64, expires_at_ms: i64) -> Result<bool> {
        let result = sqlx::query(&self.sql.insert_pending)
            .bind(key)
            .bind(now_ms)
            .bind(expires_at_ms)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn try_claim(&self, key: &str, now_ms: i64, expires_at_ms: i64) -> Result<bool> {
        let result = sqlx::query(&self.sql.try_claim)
            .bind(key)
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
        let result = sqlx::query(&self.sql.finish)
            .bind(to.as_str())
            .bind(now_ms)
            .bind(expires_at_ms)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, key: &str) -> Result<Option<ProcessingRecord>> {
        let row = sqlx::query(&self.sql.get)
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
        let result = sqlx::query(&self.sql.delete_expired)
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
