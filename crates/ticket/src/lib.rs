//! Ticket model and expiration policies for the casket SSO server.
//!
//! A login produces a ticket-granting ticket (TGT). The TGT mints
//! single-service tickets (ST); a validated ST may yield a proxy-granting
//! ticket (PGT) that in turn mints proxy tickets (PT). OAuth codes (COD)
//! and access tokens (AT) hang off the same TGT.
//!
//! This crate is storage-agnostic: tickets reference each other by id and
//! the registry crate resolves those ids.
//!
//! ```
//! use casket_ticket::{Authentication, Principal, ServiceMatchingStrategy, TicketFactory};
//! use chrono::Utc;
//!
//! let factory = TicketFactory::default();
//! let auth = Authentication::new(Principal::new("casuser"), Utc::now());
//!
//! let mut tgt = factory.create_ticket_granting_ticket(auth).unwrap();
//! let mut st = factory
//!     .create_service_ticket(&mut tgt, "https://app.example.org".into(), true)
//!     .unwrap();
//!
//! let now = Utc::now();
//! assert!(st.is_valid_for(&"https://app.example.org".into(), ServiceMatchingStrategy::Exact, now));
//! // Default service tickets are single-use.
//! assert!(st.is_expired_at(now));
//! ```

#![deny(unsafe_code)]

pub mod authentication;
pub mod builder;
pub mod clock;
pub mod error;
pub mod expiration;
pub mod factory;
pub mod id;
pub mod service;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod ticket;

pub use authentication::{Attributes, Authentication, Principal, REMEMBER_ME_ATTRIBUTE};
pub use builder::{
    GrantingExpirationConfig, HardTimeoutConfig, RememberMeConfig, ThrottleConfig, TimeoutConfig,
    UseLimitedExpirationConfig, select_granting_policy, select_use_limited_policy,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use error::{TicketError, TicketResult};
pub use expiration::{
    ExpirationDecision, ExpirationPolicy, RememberMeDelegatingPolicy, TicketState,
};
pub use factory::{TicketFactory, TicketPolicies};
pub use id::{TicketIdGenerator, UniqueTicketIdGenerator, redact};
pub use service::{Service, ServiceMatchingStrategy, normalize_service_url};
pub use ticket::{
    GrantingTicket, OAuthTokenData, ServiceTicketData, Ticket, TicketBody, TicketKind,
};
