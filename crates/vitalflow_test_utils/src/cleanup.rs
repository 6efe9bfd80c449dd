//! Schema-per-test isolation.

use anyhow::Result;
use sqlx::PgPool;
use tracing::{debug, warn};
use uuid::Uuid;

/// RAII guard owning a uniquely named schema.
///
/// Tables are created schema-qualified (`<schema>.<table>`), so the guard
/// does not depend on `search_path` and works across every pooled
/// connection. The schema is dropped on Drop.
pub struct PostgresTestGuard {
    pool: PgPool,
    schema_name: String,
    dropped: bool,
}

impl PostgresTestGuard {
    pub async fn new(pool: PgPool) -> Result<Self> {
        let schema_name = format!("test_{}", Uuid::new_v4().simple());
        debug!("Creating test schema: {}", schema_name);

        sqlx::query(&format!("CREATE SCHEMA {}", schema_name))
            .execute(&pool)
            .await?;

        Ok(Self {
            pool,
            schema_name,
            dropped: false,
        })
    }

    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    /// Qualify `table` with this guard's schema.
    pub fn table(&self, table: &str) -> String {
        format!("{}.{}", self.schema_name, table)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Drop the schema now. Drop becomes a no-op afterwards.
    pub async fn cleanup(mut self) -> Result<()> {
        debug!("Dropping test schema: {}", self.schema_name);
        sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", self.schema_name))
            .execute(&self.pool)
            .await?;
        self.dropped = true;
        Ok(())
    }
}

impl Drop for PostgresTestGuard {
    fn drop(&mut self) {
        if self.dropped {
            return;
        }
        let pool = self.pool.clone();
        let schema_name = self.schema_name.clone();

        // Async cleanup needs a live runtime; outside one the schema is leaked.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let sql = format!("DROP SCHEMA IF EXISTS {} CASCADE", schema_name);
                if let Err(e) = sqlx::query(&sql).execute(&pool).await {
                    warn!("Failed to drop test schema {}: {}", schema_name, e);
                }
            });
        } else {
            warn!(
                "Not in async context, cannot cleanup schema: {}",
                self.schema_name
            );
        }
    }
}
