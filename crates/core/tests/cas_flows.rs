//! End-to-end ticket flows through the central authentication service.

#![allow(clippy::expect_used, clippy::panic)]

use std::{sync::Arc, time::Duration};

use casket_core::{
    AuthenticationResult, CasConfig, CasError, CentralAuthenticationService, InMemoryServicesManager,
    ServicesManager,
    testutil::{APP, BACKEND, CasFixture, NO_SSO, PROXY, registered_services, service},
};
use casket_registry::TicketRegistry;
use casket_storage::MemoryBackend;
use casket_ticket::{
    ExpirationPolicy, MockClock, TicketKind, TicketPolicies, TicketState,
    testutil::{authentication, epoch},
};

fn proxy_callback() -> AuthenticationResult {
    AuthenticationResult::new(authentication(PROXY), Some(service(PROXY)))
}

#[tokio::test]
async fn login_grant_and_validate_once() {
    let fixture = CasFixture::new();

    let tgt = fixture.login("casuser").await;
    assert!(tgt.id().starts_with("TGT-"), "{}", tgt.id());

    let st = fixture.cas.grant_service_ticket(tgt.id(), &service(APP), None).await.expect("grant");
    assert!(st.id().starts_with("ST-"), "{}", st.id());

    let assertion = fixture.cas.validate_service_ticket(st.id(), &service(APP)).await.expect("first validation");
    assert_eq!(assertion.principal_id(), "casuser");
    assert_eq!(assertion.service().id, APP);
    assert!(assertion.proxies().is_empty());

    let second = fixture.cas.validate_service_ticket(st.id(), &service(APP)).await;
    assert!(matches!(second, Err(CasError::InvalidTicket { .. })), "{second:?}");
    assert!(fixture.registry.get_ticket(st.id()).await.expect("get").is_none());
}

#[tokio::test]
async fn proxy_granting_ticket_after_validation() {
    let fixture = CasFixture::new();
    let tgt = fixture.login("casuser").await;
    let st = fixture.cas.grant_service_ticket(tgt.id(), &service(PROXY), None).await.expect("grant");
    fixture.cas.validate_service_ticket(st.id(), &service(PROXY)).await.expect("validate");

    let (pgt, iou) = fixture.cas.create_proxy_granting_ticket(st.id(), &proxy_callback()).await.expect("pgt");
    assert!(pgt.id().starts_with("PGT-"), "{}", pgt.id());
    assert!(iou.starts_with("PGTIOU-"), "{iou}");
    assert_ne!(pgt.id(), iou);
    assert_eq!(pgt.granting_ticket(), Some(tgt.id()));
    // The spent ticket is gone once its proxy grant has been issued.
    assert!(fixture.registry.get_ticket(st.id()).await.expect("get").is_none());

    let pt = fixture.cas.grant_proxy_ticket(pgt.id(), &service(BACKEND)).await.expect("pt");
    assert!(pt.id().starts_with("PT-"), "{}", pt.id());

    let assertion = fixture.cas.validate_service_ticket(pt.id(), &service(BACKEND)).await.expect("validate pt");
    assert_eq!(assertion.principal_id(), "casuser");
    assert_eq!(assertion.proxies(), &[service(PROXY)]);
}

#[tokio::test]
async fn proxy_granting_ticket_before_validation() {
    let fixture = CasFixture::new();
    let tgt = fixture.login("casuser").await;
    let st = fixture.cas.grant_service_ticket(tgt.id(), &service(PROXY), None).await.expect("grant");

    let (pgt, _iou) = fixture.cas.create_proxy_granting_ticket(st.id(), &proxy_callback()).await.expect("pgt");
    fixture.cas.validate_service_ticket(st.id(), &service(PROXY)).await.expect("validate");

    let again = fixture.cas.create_proxy_granting_ticket(st.id(), &proxy_callback()).await;
    assert!(again.is_err(), "one proxy grant per ticket: {again:?}");
    assert!(fixture.registry.get_ticket(pgt.id()).await.expect("get").is_some());
}

#[tokio::test]
async fn proxy_chain_of_depth_two_resolves_to_root() {
    let fixture = CasFixture::new();
    let tgt = fixture.login("casuser").await;
    let st = fixture.cas.grant_service_ticket(tgt.id(), &service(PROXY), None).await.expect("grant");
    fixture.cas.validate_service_ticket(st.id(), &service(PROXY)).await.expect("validate");
    let (pgt1, _) = fixture.cas.create_proxy_granting_ticket(st.id(), &proxy_callback()).await.expect("pgt1");

    let pt1 = fixture.cas.grant_proxy_ticket(pgt1.id(), &service(BACKEND)).await.expect("pt1");
    fixture.cas.validate_service_ticket(pt1.id(), &service(BACKEND)).await.expect("validate pt1");
    let backend_callback = AuthenticationResult::new(authentication(BACKEND), Some(service(BACKEND)));
    let (pgt2, _) = fixture.cas.create_proxy_granting_ticket(pt1.id(), &backend_callback).await.expect("pgt2");
    assert_eq!(pgt2.granting_ticket(), Some(pgt1.id()));

    let pt2 = fixture.cas.grant_proxy_ticket(pgt2.id(), &service(APP)).await.expect("pt2");
    let assertion = fixture.cas.validate_service_ticket(pt2.id(), &service(APP)).await.expect("validate pt2");

    assert_eq!(assertion.principal_id(), "casuser");
    assert_eq!(assertion.primary_authentication().principal.id, "casuser");
    assert_eq!(assertion.proxies(), &[service(BACKEND), service(PROXY)]);
    let chained: Vec<_> = assertion.chained_authentications().iter().map(|a| a.principal.id.as_str()).collect();
    assert_eq!(chained, [BACKEND, PROXY, "casuser"]);
}

#[tokio::test]
async fn idle_session_invalidates_its_service_tickets() {
    let policies = TicketPolicies {
        ticket_granting: ExpirationPolicy::TicketGranting {
            max_time_to_live: Duration::from_secs(10),
            time_to_kill: Duration::from_secs(5),
        },
        service: ExpirationPolicy::MultiTimeUseOrTimeout {
            number_of_uses: 1,
            time_to_kill: Duration::from_secs(60),
        },
        ..TicketPolicies::default()
    };
    let fixture = CasFixture::with_policies(policies);
    let tgt = fixture.login("casuser").await;
    let st = fixture.cas.grant_service_ticket(tgt.id(), &service(APP), None).await.expect("grant");

    fixture.clock.advance(Duration::from_secs(6));

    let result = fixture.cas.validate_service_ticket(st.id(), &service(APP)).await;
    assert!(matches!(result, Err(CasError::InvalidTicket { .. })), "{result:?}");
    let tgt_lookup = fixture.cas.get_ticket(tgt.id(), TicketKind::TicketGranting).await;
    assert!(matches!(tgt_lookup, Err(CasError::InvalidTicket { .. })), "{tgt_lookup:?}");
    assert_eq!(fixture.registry.count_tickets().await.expect("count"), 0);
}

#[tokio::test]
async fn multi_use_service_ticket_allows_exactly_n_validations() {
    let policies = TicketPolicies {
        service: ExpirationPolicy::MultiTimeUseOrTimeout {
            number_of_uses: 3,
            time_to_kill: Duration::from_secs(60),
        },
        ..TicketPolicies::default()
    };
    let fixture = CasFixture::with_policies(policies);
    let tgt = fixture.login("casuser").await;
    let st = fixture.cas.grant_service_ticket(tgt.id(), &service(APP), None).await.expect("grant");

    for _ in 0..3 {
        fixture.cas.validate_service_ticket(st.id(), &service(APP)).await.expect("within use budget");
    }
    let fourth = fixture.cas.validate_service_ticket(st.id(), &service(APP)).await;
    assert!(matches!(fourth, Err(CasError::InvalidTicket { .. })), "{fourth:?}");
}

#[tokio::test]
async fn mismatched_service_consumes_the_ticket() {
    let fixture = CasFixture::new();
    let tgt = fixture.login("casuser").await;
    let st = fixture.cas.grant_service_ticket(tgt.id(), &service(APP), None).await.expect("grant");

    let wrong = fixture.cas.validate_service_ticket(st.id(), &service(PROXY)).await;
    assert!(matches!(wrong, Err(CasError::UnrecognizableService { .. })), "{wrong:?}");

    let right = fixture.cas.validate_service_ticket(st.id(), &service(APP)).await;
    assert!(matches!(right, Err(CasError::InvalidTicket { .. })), "{right:?}");
}

#[tokio::test]
async fn unknown_service_is_unauthorized() {
    let fixture = CasFixture::new();
    let tgt = fixture.login("casuser").await;

    let result = fixture.cas.grant_service_ticket(tgt.id(), &service("https://evil.example.org/"), None).await;
    assert!(matches!(result, Err(CasError::UnauthorizedService { .. })), "{result:?}");
}

#[tokio::test]
async fn disabled_service_is_unauthorized() {
    let fixture = CasFixture::new();
    let tgt = fixture.login("casuser").await;
    let mut app = fixture.services.find_service_by_id(1).await.expect("app registered");
    app.enabled = false;
    fixture.services.save(app).await;

    let result = fixture.cas.grant_service_ticket(tgt.id(), &service(APP), None).await;
    assert!(matches!(result, Err(CasError::UnauthorizedService { .. })), "{result:?}");
}

#[tokio::test]
async fn non_sso_service_requires_fresh_credentials() {
    let fixture = CasFixture::new();
    let tgt = fixture.login("casuser").await;

    let sso = fixture.cas.grant_service_ticket(tgt.id(), &service(NO_SSO), None).await;
    assert!(matches!(sso, Err(CasError::UnauthorizedSso { .. })), "{sso:?}");

    let fresh = fixture.authenticate("casuser", false).await;
    let st = fixture.cas.grant_service_ticket(tgt.id(), &service(NO_SSO), Some(&fresh)).await.expect("grant");
    assert_eq!(st.service_ticket().map(|d| d.from_new_login), Some(true));

    let stored = fixture.registry.get_ticket(tgt.id()).await.expect("get").expect("tgt stored");
    assert_eq!(stored.granting().expect("granting").supplemental_authentications.len(), 1);
}

#[tokio::test]
async fn non_sso_service_never_receives_proxy_tickets() {
    let fixture = CasFixture::new();
    let tgt = fixture.login("casuser").await;
    let st = fixture.cas.grant_service_ticket(tgt.id(), &service(PROXY), None).await.expect("grant");
    fixture.cas.validate_service_ticket(st.id(), &service(PROXY)).await.expect("validate");
    let (pgt, _) = fixture.cas.create_proxy_granting_ticket(st.id(), &proxy_callback()).await.expect("pgt");

    let pt = fixture.cas.grant_proxy_ticket(pgt.id(), &service(NO_SSO)).await;
    assert!(matches!(pt, Err(CasError::UnauthorizedSso { .. })), "{pt:?}");
    assert_eq!(fixture.registry.service_ticket_count().await.expect("count"), 0);

    // The proxy-granting ticket itself is untouched.
    fixture.cas.grant_proxy_ticket(pgt.id(), &service(BACKEND)).await.expect("pt for sso service");
}

#[tokio::test]
async fn fresh_credentials_for_another_principal_are_rejected() {
    let fixture = CasFixture::new();
    let tgt = fixture.login("casuser").await;
    let other = fixture.authenticate("other", false).await;

    let result = fixture.cas.grant_service_ticket(tgt.id(), &service(APP), Some(&other)).await;
    assert!(matches!(result, Err(CasError::MixedPrincipal)), "{result:?}");
}

#[tokio::test]
async fn non_proxying_service_cannot_get_proxy_granting_ticket() {
    let fixture = CasFixture::new();
    let tgt = fixture.login("casuser").await;
    let st = fixture.cas.grant_service_ticket(tgt.id(), &service(APP), None).await.expect("grant");

    let callback = AuthenticationResult::new(authentication(APP), Some(service(APP)));
    let result = fixture.cas.create_proxy_granting_ticket(st.id(), &callback).await;
    assert!(matches!(result, Err(CasError::UnauthorizedProxying { .. })), "{result:?}");
}

#[tokio::test]
async fn throttled_session_is_a_soft_denial() {
    let policies = TicketPolicies {
        ticket_granting: ExpirationPolicy::ThrottledUseAndTimeout {
            time_to_kill: Duration::from_secs(60),
            time_in_between_uses: Duration::from_secs(5),
        },
        ..TicketPolicies::default()
    };
    let fixture = CasFixture::with_policies(policies);
    let tgt = fixture.login("casuser").await;
    fixture.cas.grant_service_ticket(tgt.id(), &service(APP), None).await.expect("first grant");

    let throttled = fixture.cas.grant_service_ticket(tgt.id(), &service(APP), None).await;
    let err = throttled.expect_err("reuse within five seconds");
    assert!(matches!(err, CasError::Throttled { .. }), "{err:?}");
    assert!(err.is_transient());

    fixture.clock.advance(Duration::from_secs(6));
    fixture.cas.grant_service_ticket(tgt.id(), &service(APP), None).await.expect("grant after the gap");
}

#[tokio::test]
async fn remember_me_extends_the_session() {
    let config: CasConfig = serde_json::from_str(
        r#"{ "tgt": { "max_time_to_live": "8h", "time_to_kill": "2h",
                      "remember_me": { "enabled": true, "time_to_kill": "336h" } } }"#,
    )
    .expect("config");
    config.validate().expect("valid");
    let fixture = CasFixture::with_policies(config.policies());

    let remembered = fixture.authenticate("casuser", true).await;
    let long = fixture.cas.create_ticket_granting_ticket(&remembered).await.expect("remembered tgt");
    let short = fixture.login("casuser").await;

    fixture.clock.advance(Duration::from_secs(3 * 60 * 60));

    fixture.cas.grant_service_ticket(long.id(), &service(APP), None).await.expect("remember-me session lives");
    let expired = fixture.cas.grant_service_ticket(short.id(), &service(APP), None).await;
    assert!(matches!(expired, Err(CasError::InvalidTicket { .. })), "{expired:?}");
}

#[tokio::test]
async fn blank_ids_are_invalid_arguments() {
    let fixture = CasFixture::new();

    for result in [
        fixture.cas.destroy_ticket_granting_ticket("").await.map(|_| ()),
        fixture.cas.grant_service_ticket("  ", &service(APP), None).await.map(|_| ()),
        fixture.cas.validate_service_ticket("", &service(APP)).await.map(|_| ()),
    ] {
        assert!(matches!(result, Err(CasError::InvalidArgument { .. })), "{result:?}");
    }
}

#[tokio::test]
async fn wrong_kind_is_indistinguishable_from_missing() {
    let fixture = CasFixture::new();
    let tgt = fixture.login("casuser").await;

    let as_service = fixture.cas.validate_service_ticket(tgt.id(), &service(APP)).await;
    let missing = fixture.cas.validate_service_ticket("ST-1-doesnotexist", &service(APP)).await;
    assert!(matches!(as_service, Err(CasError::InvalidTicket { .. })), "{as_service:?}");
    assert!(matches!(missing, Err(CasError::InvalidTicket { .. })), "{missing:?}");
}

#[tokio::test]
async fn oauth_code_is_exchanged_once() {
    let fixture = CasFixture::new();
    let tgt = fixture.login("casuser").await;

    let code = fixture.cas.grant_oauth_code(tgt.id(), &service(APP)).await.expect("code");
    assert!(code.id().starts_with("COD-"), "{}", code.id());

    let token = fixture.cas.exchange_oauth_code(code.id(), &service(APP)).await.expect("exchange");
    assert!(token.id().starts_with("AT-"), "{}", token.id());
    assert_eq!(token.granting_ticket(), Some(tgt.id()));
    assert_eq!(TicketState::authentication(&token).map(|a| a.principal.id.as_str()), Some("casuser"));

    let replay = fixture.cas.exchange_oauth_code(code.id(), &service(APP)).await;
    assert!(matches!(replay, Err(CasError::InvalidTicket { .. })), "{replay:?}");

    // Tokens die with their session.
    fixture.cas.destroy_ticket_granting_ticket(tgt.id()).await.expect("destroy");
    assert!(fixture.registry.get_ticket(token.id()).await.expect("get").is_none());
}

#[tokio::test]
async fn oauth_code_presented_by_another_client_is_spent() {
    let fixture = CasFixture::new();
    let tgt = fixture.login("casuser").await;
    let code = fixture.cas.grant_oauth_code(tgt.id(), &service(APP)).await.expect("code");

    let wrong = fixture.cas.exchange_oauth_code(code.id(), &service(PROXY)).await;
    assert!(matches!(wrong, Err(CasError::UnrecognizableService { .. })), "{wrong:?}");

    let right = fixture.cas.exchange_oauth_code(code.id(), &service(APP)).await;
    assert!(matches!(right, Err(CasError::InvalidTicket { .. })), "{right:?}");
}

#[tokio::test]
async fn get_ticket_removes_expired_tickets() {
    let fixture = CasFixture::new();
    let tgt = fixture.login("casuser").await;
    fixture.cas.get_ticket(tgt.id(), TicketKind::TicketGranting).await.expect("live");

    fixture.clock.advance(Duration::from_secs(9 * 60 * 60));

    let result = fixture.cas.get_ticket(tgt.id(), TicketKind::TicketGranting).await;
    assert!(matches!(result, Err(CasError::InvalidTicket { .. })), "{result:?}");
    assert!(fixture.registry.get_ticket(tgt.id()).await.expect("get").is_none());
}

#[tokio::test]
async fn service_wired_from_configuration() {
    let config: CasConfig = serde_json::from_str(
        r#"{ "tgt": { "max_time_to_live": "1h", "time_to_kill": "10m" },
             "st": { "number_of_uses": 2, "time_to_kill": "30s" },
             "registry": { "operation_timeout": "2s" } }"#,
    )
    .expect("config");
    config.validate().expect("valid");

    let registry = Arc::new(config.registry.build_registry(MemoryBackend::new()));
    let services = Arc::new(InMemoryServicesManager::new(registered_services()));
    let clock = MockClock::new(epoch());
    let cas = CentralAuthenticationService::from_config(&config, registry, services, Arc::new(clock.clone()));

    let login = AuthenticationResult::new(authentication("casuser"), None);
    let tgt = cas.create_ticket_granting_ticket(&login).await.expect("tgt");
    let st = cas.grant_service_ticket(tgt.id(), &service(APP), None).await.expect("grant");

    cas.validate_service_ticket(st.id(), &service(APP)).await.expect("first use");
    cas.validate_service_ticket(st.id(), &service(APP)).await.expect("second use");
    let third = cas.validate_service_ticket(st.id(), &service(APP)).await;
    assert!(matches!(third, Err(CasError::InvalidTicket { .. })), "{third:?}");

    // The configured ten-minute idle limit ends the session.
    clock.advance(Duration::from_secs(11 * 60));
    let idle = cas.grant_service_ticket(tgt.id(), &service(APP), None).await;
    assert!(matches!(idle, Err(CasError::InvalidTicket { .. })), "{idle:?}");
}
