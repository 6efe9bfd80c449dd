//! PostgreSQL backend against the shared dedup conformance suite.
//!
//! Requires Docker: `cargo test -p vitalflow_db --features docker-tests`.

#![cfg(feature = "docker-tests")]

mod common;

use std::sync::Arc;
use vitalflow_db::{DedupStore, PostgresDedupStore};
use vitalflow_test_utils::{DbVersion, PostgresTestGuard, TestPgPool};

async fn isolated_store() -> (PostgresDedupStore, PostgresTestGuard) {
    let pool = TestPgPool::new(DbVersion::Postgres16).await.unwrap();
    let guard = PostgresTestGuard::new(pool.pool.clone()).await.unwrap();
    let table = guard.table("processing_records");
    let store = PostgresDedupStore::with_table(pool.pool.clone(), &table)
        .await
        .unwrap();
    (store, guard)
}

#[tokio::test]
async fn test_postgres_scripted_suite() {
    let (store, guard) = isolated_store().await;
    common::run_scripted_suite(&store).await;
    guard.cleanup().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_postgres_concurrent_claims_single_winner() {
    let (store, guard) = isolated_store().await;
    common::concurrent_claims_have_single_winner(Arc::new(store), 32).await;
    guard.cleanup().await.unwrap();
}

#[test]
fn test_postgres_matches_model() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let (store, guard) = rt.block_on(isolated_store());
    let store: Arc<dyn DedupStore> = Arc::new(store);
    common::run_model_property(&rt, store, 32);
    rt.block_on(guard.cleanup()).unwrap();
}
