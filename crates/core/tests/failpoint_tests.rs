#![allow(clippy::expect_used, clippy::panic)]
//! Fail-point injection tests.
//!
//! These require the `failpoints` feature:
//! ```bash
//! cargo test -p casket-core --features failpoints --test failpoint_tests
//! ```
#![cfg(feature = "failpoints")]

use casket_core::{
    CasError,
    audit::{AuditAction, AuditResult},
    testutil::{APP, CasFixture, service},
};
use casket_registry::TicketRegistry;

#[tokio::test]
async fn unavailable_registry_is_not_an_invalid_ticket() {
    let scenario = fail::FailScenario::setup();
    let fixture = CasFixture::new();
    let tgt = fixture.login("casuser").await;

    fail::cfg("registry-before-commit", "return").expect("failed to configure fail point");
    let result = fixture.cas.grant_service_ticket(tgt.id(), &service(APP), None).await;
    fail::remove("registry-before-commit");

    let err = result.expect_err("grant should fail");
    assert!(matches!(err, CasError::RegistryUnavailable { .. }), "{err:?}");
    assert!(err.is_transient());

    let grants = fixture.audit.events_for(AuditAction::ServiceTicket);
    assert_eq!(grants.last().map(|e| &e.result), Some(&AuditResult::Failure("registry_unavailable".into())));

    scenario.teardown();
}

#[tokio::test]
async fn failed_consumption_is_not_retried() {
    let scenario = fail::FailScenario::setup();
    let fixture = CasFixture::new();
    let tgt = fixture.login("casuser").await;
    let st = fixture.cas.grant_service_ticket(tgt.id(), &service(APP), None).await.expect("grant");

    fail::cfg("registry-before-commit", "return").expect("failed to configure fail point");
    let result = fixture.cas.validate_service_ticket(st.id(), &service(APP)).await;
    fail::remove("registry-before-commit");

    assert!(matches!(result, Err(CasError::RegistryUnavailable { .. })), "{result:?}");
    let stored = fixture.registry.get_ticket(st.id()).await.expect("get").expect("ticket still stored");
    assert_eq!(stored.version(), 0);

    // The outage ended; the ticket was never consumed and still validates.
    fixture.cas.validate_service_ticket(st.id(), &service(APP)).await.expect("validate");

    scenario.teardown();
}
