//! Fixtures for tests that need a populated registry.
//!
//! Enabled by the `testutil` feature.

use std::{sync::Arc, time::Duration};

use casket_storage::MemoryBackend;
use casket_ticket::{MockClock, Service, Ticket, TicketFactory, testutil::authentication};

use crate::{
    DefaultTicketRegistry, RetryPolicy, StorageLockingStrategy, TicketRegistry,
};

/// A registry over a fresh memory backend that never retries reads.
#[must_use]
pub fn memory_registry() -> DefaultTicketRegistry<MemoryBackend> {
    DefaultTicketRegistry::new(MemoryBackend::new()).with_read_retry(RetryPolicy::none())
}

/// Stores a TGT for `principal` and returns it.
///
/// # Panics
///
/// Panics if the ticket cannot be created or stored.
pub async fn seed_session<R: TicketRegistry + ?Sized>(
    registry: &R,
    factory: &TicketFactory,
    principal: &str,
) -> Ticket {
    let tgt = factory.create_ticket_granting_ticket(authentication(principal)).expect("create TGT");
    registry.add_ticket(&tgt).await.expect("store TGT");
    tgt
}

/// Grants an ST from `tgt` and persists both, updating `tgt`'s version.
///
/// # Panics
///
/// Panics if the grant or the save fails.
pub async fn seed_service_ticket<R: TicketRegistry + ?Sized>(
    registry: &R,
    factory: &TicketFactory,
    tgt: &mut Ticket,
    service: &str,
) -> Ticket {
    let st = factory.create_service_ticket(tgt, Service::new(service), true).expect("create ST");
    registry.save_all(&[&st], &mut [tgt]).await.expect("store ST");
    st
}

/// A lock for `app_id` owned by `owner` with a 30 second lease.
#[must_use]
pub fn lease_lock(
    backend: &Arc<MemoryBackend>,
    clock: &MockClock,
    app_id: &str,
    owner: &str,
) -> StorageLockingStrategy<MemoryBackend> {
    StorageLockingStrategy::new(
        Arc::clone(backend),
        app_id,
        owner,
        Duration::from_secs(30),
        Arc::new(clock.clone()),
    )
}
