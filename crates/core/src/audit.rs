//! Audit trail for ticket lifecycle operations.
//!
//! Every CAS operation reports who acted, on which (redacted) ticket, and
//! whether it worked. Backends implement [`AuditLogger`]:
//!
//! - [`TracingAuditLogger`] emits structured `tracing` events at INFO.
//! - [`InMemoryAuditLogger`] keeps events for inspection in tests.
//!
//! ```no_run
//! use casket_core::audit::{AuditAction, AuditEvent, AuditLogger, AuditResult, TracingAuditLogger};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let event = AuditEvent::builder()
//!     .actor("casuser")
//!     .action(AuditAction::TicketGrantingTicketCreated)
//!     .resource("TGT-1-a1b2c3****")
//!     .result(AuditResult::Success)
//!     .build();
//! TracingAuditLogger.log(&event).await;
//! # });
//! ```

use std::{collections::BTreeMap, fmt};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Audited operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    TicketGrantingTicketCreated,
    ServiceTicket,
    ProxyTicket,
    ProxyGrantingTicket,
    ServiceTicketValidate,
    TicketGrantingTicketDestroyed,
    OAuthCode,
    OAuthCodeExchange,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TicketGrantingTicketCreated => "TICKET_GRANTING_TICKET_CREATED",
            Self::ServiceTicket => "SERVICE_TICKET",
            Self::ProxyTicket => "PROXY_TICKET",
            Self::ProxyGrantingTicket => "PROXY_GRANTING_TICKET",
            Self::ServiceTicketValidate => "SERVICE_TICKET_VALIDATE",
            Self::TicketGrantingTicketDestroyed => "TICKET_GRANTING_TICKET_DESTROYED",
            Self::OAuthCode => "OAUTH_CODE",
            Self::OAuthCodeExchange => "OAUTH_CODE_EXCHANGE",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditResult {
    Success,
    /// Failed with the given error kind.
    Failure(String),
}

impl AuditResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for AuditResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure(reason) => write!(f, "failure: {reason}"),
        }
    }
}

/// One audit record.
#[derive(Debug, Clone, bon::Builder)]
pub struct AuditEvent {
    #[builder(default = Utc::now())]
    pub timestamp: DateTime<Utc>,
    /// The principal, or `"unknown"` before authentication.
    #[builder(into)]
    pub actor: String,
    pub action: AuditAction,
    /// Redacted ticket id or service the action targeted.
    #[builder(into)]
    pub resource: String,
    pub result: AuditResult,
    #[builder(default)]
    pub metadata: BTreeMap<String, String>,
}

#[async_trait]
pub trait AuditLogger: Send + Sync {
    async fn log(&self, event: &AuditEvent);
}

#[async_trait]
impl<L: AuditLogger> AuditLogger for std::sync::Arc<L> {
    async fn log(&self, event: &AuditEvent) {
        (**self).log(event).await;
    }
}

/// Writes events as `tracing` INFO records with `audit.*` fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLogger;

#[async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn log(&self, event: &AuditEvent) {
        let metadata = event.metadata.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(", ");

        tracing::info!(
            audit.timestamp = %event.timestamp.to_rfc3339(),
            audit.actor = %event.actor,
            audit.action = %event.action,
            audit.resource = %event.resource,
            audit.result = %event.result,
            audit.metadata = %metadata,
            "audit_event"
        );
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct InMemoryAuditLogger {
    events: Mutex<Vec<AuditEvent>>,
}

impl InMemoryAuditLogger {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// Events recorded for `action`, oldest first.
    pub fn events_for(&self, action: AuditAction) -> Vec<AuditEvent> {
        self.events.lock().iter().filter(|e| e.action == action).cloned().collect()
    }
}

#[async_trait]
impl AuditLogger for InMemoryAuditLogger {
    async fn log(&self, event: &AuditEvent) {
        self.events.lock().push(event.clone());
    }
}
