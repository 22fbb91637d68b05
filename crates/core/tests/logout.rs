//! Session destruction and single logout.

#![allow(clippy::expect_used, clippy::panic)]

use std::time::Duration;

use casket_core::{
    AuthenticationResult, LogoutStatus,
    audit::AuditAction,
    testutil::{APP, BACKEND, CasFixture, PROXY, QUIET, RecordingLogoutHandler, service},
};
use casket_registry::TicketRegistry;
use casket_ticket::{ExpirationPolicy, TicketPolicies, testutil::authentication};

#[tokio::test]
async fn destroy_is_idempotent() {
    let fixture = CasFixture::new();
    let tgt = fixture.login("casuser").await;
    let st = fixture.cas.grant_service_ticket(tgt.id(), &service(APP), None).await.expect("grant");
    fixture.cas.validate_service_ticket(st.id(), &service(APP)).await.expect("validate");

    let first = fixture.cas.destroy_ticket_granting_ticket(tgt.id()).await.expect("destroy");
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].service, service(APP));
    assert_eq!(first[0].ticket_id, st.id());
    assert_eq!(first[0].registered_service_id, 1);

    let second = fixture.cas.destroy_ticket_granting_ticket(tgt.id()).await.expect("second destroy");
    assert!(second.is_empty());
    assert_eq!(fixture.registry.count_tickets().await.expect("count"), 0);
}

#[tokio::test]
async fn destroying_an_unknown_session_returns_nothing() {
    let fixture = CasFixture::new();
    let requests = fixture.cas.destroy_ticket_granting_ticket("TGT-1-neverissued").await.expect("destroy");
    assert!(requests.is_empty());
}

#[tokio::test]
async fn logout_covers_proxy_chains_once_per_service() {
    let fixture = CasFixture::new();
    let tgt = fixture.login("casuser").await;

    // Two tickets for the same service collapse into one request.
    for _ in 0..2 {
        let st = fixture.cas.grant_service_ticket(tgt.id(), &service(APP), None).await.expect("grant app");
        fixture.cas.validate_service_ticket(st.id(), &service(APP)).await.expect("validate app");
    }
    let st = fixture.cas.grant_service_ticket(tgt.id(), &service(PROXY), None).await.expect("grant proxy");
    let callback = AuthenticationResult::new(authentication(PROXY), Some(service(PROXY)));
    let (pgt, _) = fixture.cas.create_proxy_granting_ticket(st.id(), &callback).await.expect("pgt");
    fixture.cas.validate_service_ticket(st.id(), &service(PROXY)).await.expect("validate proxy");
    let pt = fixture.cas.grant_proxy_ticket(pgt.id(), &service(BACKEND)).await.expect("pt");
    fixture.cas.validate_service_ticket(pt.id(), &service(BACKEND)).await.expect("validate pt");

    let requests = fixture.cas.destroy_ticket_granting_ticket(tgt.id()).await.expect("destroy");
    let mut services: Vec<_> = requests.iter().map(|r| r.service.id.as_str()).collect();
    services.sort_unstable();
    assert_eq!(services, [APP, BACKEND, PROXY]);
    assert!(requests.iter().all(|r| r.status == LogoutStatus::Success));

    assert!(fixture.registry.get_ticket(pgt.id()).await.expect("get").is_none());
    assert_eq!(fixture.registry.count_tickets().await.expect("count"), 0);
}

#[tokio::test]
async fn opted_out_and_unused_expired_services_are_skipped() {
    let policies = TicketPolicies {
        service: ExpirationPolicy::MultiTimeUseOrTimeout {
            number_of_uses: 1,
            time_to_kill: Duration::from_secs(10),
        },
        ..TicketPolicies::default()
    };
    let fixture = CasFixture::with_policies(policies);
    let tgt = fixture.login("casuser").await;

    fixture.cas.grant_service_ticket(tgt.id(), &service(QUIET), None).await.expect("grant quiet");
    let used = fixture.cas.grant_service_ticket(tgt.id(), &service(APP), None).await.expect("grant app");
    fixture.cas.validate_service_ticket(used.id(), &service(APP)).await.expect("validate app");
    fixture.cas.grant_service_ticket(tgt.id(), &service(PROXY), None).await.expect("grant proxy");

    // The PROXY ticket is never validated and times out.
    fixture.clock.advance(Duration::from_secs(11));

    let requests = fixture.cas.destroy_ticket_granting_ticket(tgt.id()).await.expect("destroy");
    let services: Vec<_> = requests.iter().map(|r| r.service.id.as_str()).collect();
    assert_eq!(services, [APP]);
}

#[tokio::test]
async fn delivery_failure_does_not_stop_destruction() {
    let fixture =
        CasFixture::with_logout_handler(TicketPolicies::default(), RecordingLogoutHandler::failing_for(APP));
    let tgt = fixture.login("casuser").await;
    let st = fixture.cas.grant_service_ticket(tgt.id(), &service(APP), None).await.expect("grant");
    fixture.cas.validate_service_ticket(st.id(), &service(APP)).await.expect("validate");

    let requests = fixture.cas.destroy_ticket_granting_ticket(tgt.id()).await.expect("destroy");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].status, LogoutStatus::Failure);
    assert_eq!(fixture.logout.delivered().len(), 1);
    assert!(fixture.registry.get_ticket(tgt.id()).await.expect("get").is_none());

    let destroyed = fixture.audit.events_for(AuditAction::TicketGrantingTicketDestroyed);
    assert_eq!(destroyed.len(), 1);
    assert!(destroyed[0].result.is_success());
    assert_eq!(destroyed[0].actor, "casuser");
}
