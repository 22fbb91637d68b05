//! Central authentication service for the casket SSO server.
//!
//! [`CentralAuthenticationService`] is the protocol-independent core: CAS,
//! OAuth or SAML front ends call it to open sessions, issue and validate
//! tickets, and end sessions. It sits on top of a
//! [`TicketRegistry`](casket_registry::TicketRegistry) and a
//! [`ServicesManager`]. Every decision is audited through an
//! [`AuditLogger`](audit::AuditLogger).
//!
//! ```
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! use casket_core::testutil::{APP, CasFixture, service};
//!
//! let fixture = CasFixture::new();
//! let tgt = fixture.login("casuser").await;
//! let st = fixture.cas.grant_service_ticket(tgt.id(), &service(APP), None).await.unwrap();
//!
//! let assertion = fixture.cas.validate_service_ticket(st.id(), &service(APP)).await.unwrap();
//! assert_eq!(assertion.principal_id(), "casuser");
//!
//! // Service tickets are single-use.
//! assert!(fixture.cas.validate_service_ticket(st.id(), &service(APP)).await.is_err());
//! # });
//! ```
//!
//! # Feature Flags
//!
//! - **`testutil`**: exposes [`testutil`] fixtures.
//! - **`failpoints`**: activates the registry and storage fail points.

#![deny(unsafe_code)]

pub mod assertion;
pub mod audit;
pub mod authentication;
pub mod cleaner;
pub mod config;
pub mod error;
pub mod logout;
pub mod service;
pub mod services;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;

pub use assertion::Assertion;
pub use authentication::{
    AuthenticationManager, AuthenticationResult, AuthenticationTransaction, Credential,
    InMemoryAuthenticationManager,
};
pub use cleaner::RegistryCleaner;
pub use config::{CasConfig, CleanerConfig, OAuthConfig, RegistryConfig};
pub use error::{CasError, CasResult};
pub use logout::{DefaultLogoutManager, LogoutHandler, LogoutRequest, LogoutStatus};
pub use service::{CentralAuthenticationService, DEFAULT_CONFLICT_RETRIES};
pub use services::{
    InMemoryServicesManager, LogoutType, RegisteredService, ReplicatedServicesManager, ServicePattern,
    ServicesManager,
};
