//! Racing writers against one ticket.
//!
//! Every task reads the same version of a single-use service ticket and
//! tries to persist its consumption. Exactly one may succeed.

#![allow(clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use casket_registry::{RegistryError, TicketRegistry, testutil};
use casket_ticket::{Clock, testutil::mock_factory};
use tokio::task::JoinSet;

const CONCURRENCY: usize = 8;
const ROUNDS: usize = 20;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_consumer_per_version() {
    let registry = Arc::new(testutil::memory_registry());
    let (factory, clock) = mock_factory();
    let mut tgt = testutil::seed_session(registry.as_ref(), &factory, "casuser").await;

    for round in 0..ROUNDS {
        let st = testutil::seed_service_ticket(registry.as_ref(), &factory, &mut tgt, "https://app").await;

        let mut set = JoinSet::new();
        for _ in 0..CONCURRENCY {
            let registry = Arc::clone(&registry);
            let mut copy = st.clone();
            let now = clock.now();
            set.spawn(async move {
                copy.update_state(now);
                registry.update_ticket(&mut copy).await
            });
        }

        let mut winners = 0usize;
        while let Some(result) = set.join_next().await {
            match result.expect("task should not panic") {
                Ok(()) => winners += 1,
                Err(RegistryError::Conflict { .. }) => {},
                Err(e) => panic!("round {round}: unexpected error {e}"),
            }
        }
        assert_eq!(winners, 1, "round {round}: exactly one update should win");

        let stored = registry.get_ticket(st.id()).await.expect("get").expect("present");
        assert_eq!(stored.version(), 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_grants_on_one_parent_serialize() {
    let registry = Arc::new(testutil::memory_registry());
    let (factory, _clock) = mock_factory();
    let tgt = testutil::seed_session(registry.as_ref(), &factory, "casuser").await;

    let mut set = JoinSet::new();
    for i in 0..CONCURRENCY {
        let registry = Arc::clone(&registry);
        let factory = factory.clone();
        let mut parent = tgt.clone();
        set.spawn(async move {
            let st = factory
                .create_service_ticket(&mut parent, format!("https://app-{i}").into(), false)
                .expect("grant");
            registry.save_all(&[&st], &mut [&mut parent]).await.map(|()| st.id().to_owned())
        });
    }

    let mut granted = Vec::new();
    while let Some(result) = set.join_next().await {
        if let Ok(id) = result.expect("task should not panic") {
            granted.push(id);
        }
    }
    assert_eq!(granted.len(), 1);

    // Losers left nothing behind.
    assert_eq!(registry.count_tickets().await.expect("count"), 2);
    let stored = registry.get_ticket(tgt.id()).await.expect("get").expect("present");
    let children: Vec<_> = stored.granting().expect("granting").child_ids().map(str::to_owned).collect();
    assert_eq!(children, granted);
}
