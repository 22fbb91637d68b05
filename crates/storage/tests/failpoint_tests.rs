#![allow(clippy::expect_used, clippy::panic)]
//! Fail-point injection tests.
//!
//! These require the `failpoints` feature:
//! ```bash
//! cargo test -p casket-storage --features failpoints --test failpoint_tests
//! ```
#![cfg(feature = "failpoints")]

use casket_storage::{MemoryBackend, StorageBackend, assert_timeout, testutil};

#[tokio::test]
async fn cas_failpoint_reports_timeout_and_writes_nothing() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("memory-before-cas", "return").expect("failed to configure fail point");

    let backend = testutil::populated_backend("tickets", 3).await;
    let result = backend.compare_and_set(b"tickets/ST-new", None, b"v".to_vec()).await;

    assert_timeout!(result);
    assert_eq!(testutil::keys_with_prefix(&backend, "tickets").await.len(), 3);

    scenario.teardown();
}

#[tokio::test]
async fn commit_failpoint_reports_timeout() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("memory-before-commit", "return").expect("failed to configure fail point");

    let backend = MemoryBackend::new();
    let mut txn = backend.transaction().await.expect("txn");
    txn.set(b"k".to_vec(), b"v".to_vec());
    let result = txn.commit().await;

    assert_timeout!(result);
    assert!(backend.is_empty());

    scenario.teardown();
}
