//! VitalFlow Test Utilities
//!
//! Docker-backed PostgreSQL for exercising the shared dedup store.
//!
//! # Features
//!
//! - `docker-tests`: Enable tests that require Docker containers
//!
//! # Usage
//!
//! ```rust,ignore
//! use vitalflow_test_utils::{DbVersion, TestPgPool, PostgresTestGuard};
//!
//! #[tokio::test]
//! #[cfg(feature = "docker-tests")]
//! async fn test_dedup_on_postgres() {
//!     let pool = TestPgPool::new(DbVersion::Postgres16).await.unwrap();
//!     let guard = PostgresTestGuard::new(pool.pool.clone()).await.unwrap();
//!
//!     // Point the store at a table inside the guard's schema
//!     let table = guard.table("processing_records");
//!     // ...
//!
//!     // Schema dropped on Drop (or call guard.cleanup())
//! }
//! ```

pub mod cleanup;
pub mod config;
pub mod containers;
pub mod pools;

pub use cleanup::PostgresTestGuard;
pub use config::{DbVersion, TestDbConfig};
pub use containers::lifecycle::{ensure_container_running, wait_for_healthy};
pub use pools::postgres::TestPgPool;
