//! Contention tests for `MemoryBackend`.
//!
//! The ticket registry depends on two guarantees from its backend: exactly
//! one of many racing compare-and-set writers wins, and a transaction whose
//! precondition lost a race applies nothing.

#![allow(clippy::expect_used, clippy::panic)]

use casket_storage::{MemoryBackend, StorageBackend, assert_conflict, error::StorageError, testutil};
use tokio::task::JoinSet;

const CONCURRENCY: usize = 16;
const CAS_ROUNDS: usize = 50;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cas_exactly_one_winner_per_round() {
    let backend = MemoryBackend::new();
    let key = b"tickets/ST-contended".to_vec();

    for round in 0..CAS_ROUNDS {
        let current = format!("round-{round}").into_bytes();
        backend.set(key.clone(), current.clone()).await.expect("setup set should succeed");

        let mut set = JoinSet::new();
        for task_id in 0..CONCURRENCY {
            let backend = backend.clone();
            let key = key.clone();
            let expected = current.clone();
            let new_val = format!("round-{round}-winner-{task_id}").into_bytes();
            set.spawn(async move { backend.compare_and_set(&key, Some(&expected), new_val).await });
        }

        let mut successes = 0usize;
        let mut conflicts = 0usize;
        while let Some(result) = set.join_next().await {
            match result.expect("task should not panic") {
                Ok(()) => successes += 1,
                Err(StorageError::Conflict) => conflicts += 1,
                Err(e) => panic!("unexpected error in CAS round {round}: {e}"),
            }
        }

        assert_eq!(successes, 1, "round {round}: exactly one CAS should succeed");
        assert_eq!(conflicts, CONCURRENCY - 1, "round {round}: all other CAS should conflict");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn insert_if_absent_one_winner() {
    let backend = MemoryBackend::new();

    for round in 0..CAS_ROUNDS {
        let key = format!("locks/app-{round}").into_bytes();
        let mut set = JoinSet::new();
        for task_id in 0..CONCURRENCY {
            let backend = backend.clone();
            let key = key.clone();
            set.spawn(async move {
                backend.compare_and_set(&key, None, format!("owner-{task_id}").into_bytes()).await
            });
        }

        let mut successes = 0usize;
        while let Some(result) = set.join_next().await {
            if result.expect("task should not panic").is_ok() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1, "round {round}: exactly one insert should win");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_transactions_on_same_parent() {
    let backend = MemoryBackend::new();
    let parent = b"tickets/TGT-parent".to_vec();

    for round in 0..CAS_ROUNDS {
        let current = format!("v{round}").into_bytes();
        backend.set(parent.clone(), current.clone()).await.expect("setup");

        let mut set = JoinSet::new();
        for task_id in 0..CONCURRENCY {
            let backend = backend.clone();
            let parent = parent.clone();
            let expected = current.clone();
            set.spawn(async move {
                let mut txn = backend.transaction().await.expect("txn");
                txn.compare_and_set(parent, Some(expected), format!("v{round}-{task_id}").into_bytes());
                txn.compare_and_set(
                    format!("tickets/ST-{round}-{task_id}").into_bytes(),
                    None,
                    b"{}".to_vec(),
                );
                txn.commit().await
            });
        }

        let mut successes = 0usize;
        while let Some(result) = set.join_next().await {
            if result.expect("task should not panic").is_ok() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1, "round {round}: one transaction commits");
    }

    // One parent key plus exactly one child per round.
    assert_eq!(backend.len(), 1 + CAS_ROUNDS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sweeps_see_every_surviving_key() {
    const SEEDED: usize = 200;
    let backend = testutil::populated_backend("tickets", SEEDED).await;

    // Deleters remove the even keys while scanners read the whole range.
    let mut set = JoinSet::new();
    for worker in 0..CONCURRENCY {
        let backend = backend.clone();
        set.spawn(async move {
            if worker % 2 == 0 {
                for i in (worker..SEEDED).step_by(CONCURRENCY) {
                    backend.delete(&testutil::make_key("tickets", i)).await.expect("delete");
                }
            } else {
                let keys = testutil::keys_with_prefix(&backend, "tickets").await;
                assert!(keys.len() <= SEEDED);
            }
        });
    }
    while let Some(result) = set.join_next().await {
        result.expect("task should not panic");
    }

    let remaining = testutil::keys_with_prefix(&backend, "tickets").await;
    assert_eq!(remaining.len(), SEEDED / 2);
    assert!(remaining.iter().all(|k| k.ends_with(['1', '3', '5', '7', '9'])));

    // A stale precondition on a deleted key still conflicts.
    let gone = testutil::make_key("tickets", 0);
    let result = backend.compare_and_set(&gone, Some(b"value-0"), b"again".to_vec()).await;
    assert_conflict!(result);
}
