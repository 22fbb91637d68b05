//! A fully wired CAS over in-memory parts, driven by a mock clock.
//!
//! Enabled by the `testutil` feature.

use std::sync::Arc;

use async_trait::async_trait;
use casket_registry::{DefaultTicketRegistry, TicketRegistry, testutil::memory_registry};
use casket_storage::MemoryBackend;
use casket_ticket::{MockClock, Service, Ticket, TicketPolicies, testutil::mock_factory_with};
use parking_lot::Mutex;

use crate::{
    audit::InMemoryAuditLogger,
    authentication::{
        AuthenticationManager, AuthenticationResult, AuthenticationTransaction, Credential,
        InMemoryAuthenticationManager,
    },
    logout::{LogoutHandler, LogoutRequest},
    service::CentralAuthenticationService,
    services::{InMemoryServicesManager, LogoutType, RegisteredService, ServicePattern},
};

/// SSO-enabled service with back-channel logout.
pub const APP: &str = "https://app.example.org/";
/// Service allowed to obtain proxy-granting tickets.
pub const PROXY: &str = "https://proxy.example.org/";
/// Backend reached through [`PROXY`].
pub const BACKEND: &str = "https://backend.example.org/";
/// Service excluded from SSO.
pub const NO_SSO: &str = "https://bank.example.org/";
/// Service that opted out of logout notifications.
pub const QUIET: &str = "https://quiet.example.org/";

/// Password accepted for every fixture user.
pub const PASSWORD: &str = "Mellon";

/// The services registered in every fixture.
#[must_use]
pub fn registered_services() -> Vec<RegisteredService> {
    vec![
        RegisteredService::builder()
            .id(1)
            .name("app")
            .service_id_pattern(ServicePattern::Exact(APP.into()))
            .build(),
        RegisteredService::builder()
            .id(2)
            .name("proxy")
            .service_id_pattern(ServicePattern::Exact(PROXY.into()))
            .proxy_allowed(true)
            .build(),
        RegisteredService::builder()
            .id(3)
            .name("backend")
            .service_id_pattern(ServicePattern::Prefix(BACKEND.into()))
            .proxy_allowed(true)
            .build(),
        RegisteredService::builder()
            .id(4)
            .name("bank")
            .service_id_pattern(ServicePattern::Exact(NO_SSO.into()))
            .sso_enabled(false)
            .build(),
        RegisteredService::builder()
            .id(5)
            .name("quiet")
            .service_id_pattern(ServicePattern::Exact(QUIET.into()))
            .logout_type(LogoutType::None)
            .build(),
    ]
}

/// Records every delivered logout request; fails for one service if asked.
#[derive(Debug, Default)]
pub struct RecordingLogoutHandler {
    delivered: Mutex<Vec<LogoutRequest>>,
    fail_for: Option<String>,
}

impl RecordingLogoutHandler {
    #[must_use]
    pub fn failing_for(service: &str) -> Self {
        Self { delivered: Mutex::default(), fail_for: Some(service.to_owned()) }
    }

    pub fn delivered(&self) -> Vec<LogoutRequest> {
        self.delivered.lock().clone()
    }
}

#[async_trait]
impl LogoutHandler for RecordingLogoutHandler {
    async fn deliver(&self, request: &LogoutRequest) -> bool {
        self.delivered.lock().push(request.clone());
        self.fail_for.as_deref() != Some(request.service.id.as_str())
    }
}

/// Every moving part of a test CAS.
pub struct CasFixture {
    pub cas: CentralAuthenticationService,
    pub clock: MockClock,
    pub registry: Arc<DefaultTicketRegistry<MemoryBackend>>,
    pub services: Arc<InMemoryServicesManager>,
    pub audit: Arc<InMemoryAuditLogger>,
    pub logout: Arc<RecordingLogoutHandler>,
    pub authentication: InMemoryAuthenticationManager,
}

impl CasFixture {
    /// A CAS with default policies.
    #[must_use]
    pub fn new() -> Self {
        Self::with_policies(TicketPolicies::default())
    }

    /// A CAS with the given expiration policies.
    #[must_use]
    pub fn with_policies(policies: TicketPolicies) -> Self {
        Self::with_logout_handler(policies, RecordingLogoutHandler::default())
    }

    #[must_use]
    pub fn with_logout_handler(policies: TicketPolicies, handler: RecordingLogoutHandler) -> Self {
        let (factory, clock) = mock_factory_with(policies);
        let registry = Arc::new(memory_registry());
        let services = Arc::new(InMemoryServicesManager::new(registered_services()));
        let audit = Arc::new(InMemoryAuditLogger::default());
        let logout = Arc::new(handler);
        let authentication = InMemoryAuthenticationManager::with_clock(
            [("casuser", PASSWORD), ("other", PASSWORD)],
            Arc::new(clock.clone()),
        );

        let cas = CentralAuthenticationService::builder()
            .registry(Arc::clone(&registry) as Arc<dyn TicketRegistry>)
            .services(Arc::clone(&services) as _)
            .factory(factory)
            .audit(Arc::clone(&audit) as _)
            .logout_handler(Arc::clone(&logout) as _)
            .build();

        Self { cas, clock, registry, services, audit, logout, authentication }
    }

    /// Authenticates `username` with the fixture password.
    ///
    /// # Panics
    ///
    /// Panics if `username` is not a fixture user.
    pub async fn authenticate(&self, username: &str, remember_me: bool) -> AuthenticationResult {
        let transaction =
            AuthenticationTransaction::of(Credential::new(username, PASSWORD)).remember_me(remember_me);
        self.authentication.authenticate(&transaction).await.expect("fixture user authenticates")
    }

    /// Logs `username` in and returns the new TGT.
    ///
    /// # Panics
    ///
    /// Panics if the login or the TGT creation fails.
    pub async fn login(&self, username: &str) -> Ticket {
        let result = self.authenticate(username, false).await;
        self.cas.create_ticket_granting_ticket(&result).await.expect("create TGT")
    }
}

impl Default for CasFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Shorthand for a [`Service`].
#[must_use]
pub fn service(id: &str) -> Service {
    Service::new(id)
}
