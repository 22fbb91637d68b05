//! Fixtures for tests that need tickets.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use crate::{
    authentication::{Authentication, Principal},
    clock::MockClock,
    factory::{TicketFactory, TicketPolicies},
    id::UniqueTicketIdGenerator,
};

/// A fixed, readable starting instant for mock clocks.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).single().expect("valid timestamp")
}

/// An authentication for `principal` dated at [`epoch`].
pub fn authentication(principal: &str) -> Authentication {
    Authentication::new(Principal::new(principal), epoch()).with_success("AcceptUsersAuthenticationHandler")
}

/// A factory with default policies driven by the returned mock clock.
pub fn mock_factory() -> (TicketFactory, MockClock) {
    mock_factory_with(TicketPolicies::default())
}

/// A factory with the given policies driven by the returned mock clock.
pub fn mock_factory_with(policies: TicketPolicies) -> (TicketFactory, MockClock) {
    let clock = MockClock::new(epoch());
    let factory = TicketFactory::new(
        Arc::new(UniqueTicketIdGenerator::default()),
        Arc::new(clock.clone()),
        policies,
        false,
    );
    (factory, clock)
}
