//! PostgreSQL test pool factory.

use crate::config::{DbVersion, TestDbConfig, TEST_DATABASE_URL_ENV};
use crate::containers::lifecycle::ensure_container_running;
use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::info;

/// A PostgreSQL connection pool for testing.
#[derive(Debug, Clone)]
pub struct TestPgPool {
    /// The underlying sqlx pool
    pub pool: PgPool,
    /// The database version this pool connects to
    pub version: DbVersion,
}

impl TestPgPool {
    /// Connect to a test PostgreSQL server.
    ///
    /// When `VITALFLOW_TEST_PG_URL` is set that server is used as-is (CI
    /// service containers). Otherwise the docker-compose service for
    /// `version` is started and awaited first.
    pub async fn new(version: DbVersion) -> Result<Self> {
        let conn_str = match std::env::var(TEST_DATABASE_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => url,
            _ => {
                ensure_container_running(version).await?;
                TestDbConfig::new(version).postgres_connection_string()
            }
        };

        info!("Creating PostgreSQL test pool for {}", version);

        let pool = PgPoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&conn_str)
            .await
            .with_context(|| format!("Failed to connect to {}", version))?;

        Ok(Self { pool, version })
    }

    /// Execute a query that doesn't return rows.
    pub async fn execute(&self, query: &str) -> Result<()> {
        sqlx::query(query).execute(&self.pool).await?;
        Ok(())
    }

    pub fn inner(&self) -> &PgPool {
        &self.pool
    }
}
