//! Conformance suite shared by every dedup backend.
//!
//! Each backend test file opens a store and hands it to these helpers, so
//! sqlite and postgres are held to exactly the same contract.

#![allow(dead_code)]

use proptest::prelude::*;
use proptest::test_runner::{Config, TestCaseError, TestRunner};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use vitalflow_db::{ClaimOutcome, DedupGate, DedupStore};
use vitalflow_protocol::ProcessingStatus;

const TTL_MS: i64 = 10_000;
const T0: i64 = 1_700_000_000_000;

// ============================================================================
// Scripted checks
// ============================================================================

pub async fn claim_is_exclusive(store: &dyn DedupStore) {
    assert!(store.try_claim("excl", T0, T0 + TTL_MS).await.unwrap());
    assert!(!store.try_claim("excl", T0 + 1, T0 + 1 + TTL_MS).await.unwrap());

    let record = store.get("excl").await.unwrap().unwrap();
    assert_eq!(record.status, ProcessingStatus::Processing);
    assert_eq!(record.expires_at.timestamp_millis(), T0 + TTL_MS);
}

pub async fn pending_and_failed_are_claimable(store: &dyn DedupStore) {
    assert!(store.insert_pending("pf", T0, T0 + TTL_MS).await.unwrap());
    assert!(!store.insert_pending("pf", T0 + 1, T0 + TTL_MS).await.unwrap());
    assert!(store.try_claim("pf", T0 + 2, T0 + 2 + TTL_MS).await.unwrap());

    assert!(store
        .finish("pf", ProcessingStatus::Failed, T0 + 3, T0 + 3 + TTL_MS)
        .await
        .unwrap());
    assert!(store.try_claim("pf", T0 + 4, T0 + 4 + TTL_MS).await.unwrap());

    // First sight is preserved across reclaims of a live record.
    let record = store.get("pf").await.unwrap().unwrap();
    assert_eq!(record.first_seen_at.timestamp_millis(), T0);
}

pub async fn completed_blocks_until_expiry(store: &dyn DedupStore) {
    assert!(store.try_claim("done", T0, T0 + TTL_MS).await.unwrap());
    assert!(store
        .finish("done", ProcessingStatus::Completed, T0 + 10, T0 + 10 + TTL_MS)
        .await
        .unwrap());

    assert!(!store.try_claim("done", T0 + 20, T0 + 20 + TTL_MS).await.unwrap());
    assert!(!store
        .finish("done", ProcessingStatus::Failed, T0 + 30, T0 + 30 + TTL_MS)
        .await
        .unwrap());
    assert_eq!(
        store.get("done").await.unwrap().unwrap().status,
        ProcessingStatus::Completed
    );

    let after_expiry = T0 + 10 + TTL_MS;
    assert!(store
        .try_claim("done", after_expiry, after_expiry + TTL_MS)
        .await
        .unwrap());
}

pub async fn stale_processing_converges_after_ttl(store: &dyn DedupStore) {
    assert!(store.try_claim("stale", T0, T0 + TTL_MS).await.unwrap());
    assert!(!store.try_claim("stale", T0 + TTL_MS - 1, T0 + 2 * TTL_MS).await.unwrap());
    assert!(store.try_claim("stale", T0 + TTL_MS, T0 + 2 * TTL_MS).await.unwrap());
}

pub async fn cleanup_removes_only_expired(store: &dyn DedupStore) {
    assert!(store.insert_pending("old", T0, T0 + 100).await.unwrap());
    assert!(store.insert_pending("new", T0, T0 + TTL_MS).await.unwrap());

    assert_eq!(store.delete_expired(T0 + 100).await.unwrap(), 1);
    assert!(store.get("old").await.unwrap().is_none());
    assert!(store.get("new").await.unwrap().is_some());
}

pub async fn non_terminal_finish_is_rejected(store: &dyn DedupStore) {
    assert!(store.try_claim("nt", T0, T0 + TTL_MS).await.unwrap());
    assert!(store
        .finish("nt", ProcessingStatus::Pending, T0, T0 + TTL_MS)
        .await
        .is_err());
    assert!(!store
        .finish("absent", ProcessingStatus::Completed, T0, T0 + TTL_MS)
        .await
        .unwrap());
}

pub async fn run_scripted_suite(store: &dyn DedupStore) {
    store.ping().await.unwrap();
    claim_is_exclusive(store).await;
    pending_and_failed_are_claimable(store).await;
    completed_blocks_until_expiry(store).await;
    stale_processing_converges_after_ttl(store).await;
    cleanup_removes_only_expired(store).await;
    non_terminal_finish_is_rejected(store).await;
}

/// Race `contenders` claims for one key; exactly one may win.
pub async fn concurrent_claims_have_single_winner(store: Arc<dyn DedupStore>, contenders: usize) {
    let gate = DedupGate::new(store, Duration::from_secs(3600));
    let mut handles = Vec::new();
    for _ in 0..contenders {
        let gate = gate.clone();
        handles.push(tokio::spawn(async move {
            gate.mark_processing_started("race").await
        }));
    }

    let mut claimed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            ClaimOutcome::Claimed => claimed += 1,
            ClaimOutcome::InFlight => {}
            ClaimOutcome::AlreadyCompleted => panic!("nothing completed the key"),
            ClaimOutcome::StoreUnavailable { error } => panic!("store error: {error}"),
        }
    }
    assert_eq!(claimed, 1);
    assert!(gate.is_already_processed("race").await.unwrap());
}

// ============================================================================
// Model-based property
// ============================================================================

#[derive(Debug, Clone)]
pub enum Op {
    Observe(u8),
    Claim(u8),
    Complete(u8),
    Fail(u8),
    Advance(i64),
    Cleanup,
}

fn arb_op() -> impl Strategy<Value = Op> {
    let key = 0u8..3;
    prop_oneof![
        1 => key.clone().prop_map(Op::Observe),
        3 => key.clone().prop_map(Op::Claim),
        2 => key.clone().prop_map(Op::Complete),
        2 => key.prop_map(Op::Fail),
        1 => (0i64..2 * TTL_MS).prop_map(Op::Advance),
        1 => Just(Op::Cleanup),
    ]
}

pub fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    proptest::collection::vec(arb_op(), 1..40)
}

#[derive(Debug, Default)]
struct Model {
    records: HashMap<String, (ProcessingStatus, i64)>,
}

impl Model {
    fn observe(&mut self, key: &str, now: i64) -> bool {
        if self.records.contains_key(key) {
            return false;
        }
        self.records
            .insert(key.to_string(), (ProcessingStatus::Pending, now + TTL_MS));
        true
    }

    fn claim(&mut self, key: &str, now: i64) -> bool {
        let claimable = match self.records.get(key) {
            None => true,
            Some((status, expires)) => !status.blocks_claim() || *expires <= now,
        };
        if claimable {
            self.records
                .insert(key.to_string(), (ProcessingStatus::Processing, now + TTL_MS));
        }
        claimable
    }

    fn finish(&mut self, key: &str, to: ProcessingStatus, now: i64) -> bool {
        match self.records.get_mut(key) {
            Some(entry) if entry.0 == ProcessingStatus::Processing => {
                *entry = (to, now + TTL_MS);
                true
            }
            _ => false,
        }
    }

    fn cleanup(&mut self, now: i64) {
        self.records.retain(|_, (_, expires)| *expires > now);
    }
}

/// Apply `ops` to both the store and the model; every observable must agree.
pub async fn check_against_model(
    store: &dyn DedupStore,
    prefix: &str,
    ops: &[Op],
) -> Result<(), TestCaseError> {
    let mut model = Model::default();
    let mut now = T0;
    let key = |k: u8| format!("{prefix}-{k}");

    for op in ops {
        match op {
            Op::Observe(k) => {
                let got = store.insert_pending(&key(*k), now, now + TTL_MS).await.unwrap();
                prop_assert_eq!(got, model.observe(&key(*k), now), "observe {:?}", op);
            }
            Op::Claim(k) => {
                let got = store.try_claim(&key(*k), now, now + TTL_MS).await.unwrap();
                prop_assert_eq!(got, model.claim(&key(*k), now), "claim {:?}", op);
            }
            Op::Complete(k) => {
                let got = store
                    .finish(&key(*k), ProcessingStatus::Completed, now, now + TTL_MS)
                    .await
                    .unwrap();
                prop_assert_eq!(
                    got,
                    model.finish(&key(*k), ProcessingStatus::Completed, now),
                    "complete {:?}",
                    op
                );
            }
            Op::Fail(k) => {
                let got = store
                    .finish(&key(*k), ProcessingStatus::Failed, now, now + TTL_MS)
                    .await
                    .unwrap();
                prop_assert_eq!(
                    got,
                    model.finish(&key(*k), ProcessingStatus::Failed, now),
                    "fail {:?}",
                    op
                );
            }
            Op::Advance(ms) => now += ms,
            Op::Cleanup => {
                // The store is shared across cases, so the count is not comparable.
                model.cleanup(now);
                store.delete_expired(now).await.unwrap();
            }
        }

        for k in 0..3u8 {
            let stored = store.get(&key(k)).await.unwrap();
            let expected = model.records.get(&key(k));
            match (stored, expected) {
                (None, None) => {}
                (Some(record), Some((status, expires))) => {
                    prop_assert_eq!(record.status, *status);
                    prop_assert_eq!(record.expires_at.timestamp_millis(), *expires);
                }
                (stored, expected) => {
                    return Err(TestCaseError::fail(format!(
                        "key {k} diverged: store={stored:?} model={expected:?}"
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Drive the model property on a blocking runtime.
pub fn run_model_property(rt: &Runtime, store: Arc<dyn DedupStore>, cases: u32) {
    static CASE: AtomicUsize = AtomicUsize::new(0);
    let mut runner = TestRunner::new(Config {
        cases,
        ..Config::default()
    });
    let result = runner.run(&arb_ops(), |ops| {
        let prefix = format!("prop{}", CASE.fetch_add(1, Ordering::SeqCst));
        rt.block_on(check_against_model(store.as_ref(), &prefix, &ops))
    });
    if let Err(err) = result {
        panic!("{}", err);
    }
}
