//! Errors surfaced by the central authentication service.
//!
//! Protocol adapters map these onto responses, so the variants follow what
//! a caller needs to distinguish: bad credentials, an unusable ticket, a
//! policy denial, or an infrastructure outage that says nothing about the
//! ticket itself.

use casket_registry::RegistryError;
use casket_storage::ConfigError;
use casket_ticket::TicketError;
use thiserror::Error;

/// Result alias for CAS operations.
pub type CasResult<T> = Result<T, CasError>;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum CasError {
    /// No presented credential could be verified.
    #[error("authentication failed: {message}")]
    Authentication { message: String },

    /// The ticket does not exist, has the wrong type, or has expired.
    ///
    /// The three cases are deliberately indistinguishable.
    #[error("ticket {id} is not valid")]
    InvalidTicket { id: String },

    /// The service is unknown or disabled.
    #[error("service {service} is not authorized")]
    UnauthorizedService { service: String },

    /// The service does not take part in single sign-on and no credentials
    /// were presented.
    #[error("service {service} requires fresh credentials")]
    UnauthorizedSso { service: String },

    /// The service may not obtain proxy-granting tickets.
    #[error("service {service} is not allowed to proxy")]
    UnauthorizedProxying { service: String },

    /// Fresh credentials resolved to a different principal than the session.
    #[error("authenticated principal does not match the session principal")]
    MixedPrincipal,

    /// The ticket was presented by a service other than the one it was issued to.
    #[error("ticket {id} was not issued to service {service}")]
    UnrecognizableService { id: String, service: String },

    /// The ticket was reused faster than its policy allows. Retrying later may succeed.
    #[error("ticket {id} is being used too frequently")]
    Throttled { id: String },

    /// The registry could not be reached. The ticket may well be valid.
    #[error("ticket registry unavailable")]
    RegistryUnavailable {
        #[source]
        source: RegistryError,
    },

    /// Any other registry failure.
    #[error("ticket registry failure: {source}")]
    Registry {
        #[source]
        source: RegistryError,
    },

    /// A ticket could not be minted or persisted.
    #[error("ticket could not be created: {message}")]
    TicketCreation { message: String },

    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CasError {
    pub fn invalid_ticket(redacted_id: impl Into<String>) -> Self {
        Self::InvalidTicket { id: redacted_id.into() }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument { message: message.into() }
    }

    /// Whether the failure is transient infrastructure trouble rather than
    /// a verdict about the request.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RegistryUnavailable { .. } | Self::Throttled { .. })
    }

    /// Stable name for audit records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authentication { .. } => "authentication",
            Self::InvalidTicket { .. } => "invalid_ticket",
            Self::UnauthorizedService { .. } => "unauthorized_service",
            Self::UnauthorizedSso { .. } => "unauthorized_sso",
            Self::UnauthorizedProxying { .. } => "unauthorized_proxying",
            Self::MixedPrincipal => "mixed_principal",
            Self::UnrecognizableService { .. } => "unrecognizable_service",
            Self::Throttled { .. } => "throttled",
            Self::RegistryUnavailable { .. } => "registry_unavailable",
            Self::Registry { .. } => "registry",
            Self::TicketCreation { .. } => "ticket_creation",
            Self::InvalidArgument { .. } => "invalid_argument",
            Self::Config(_) => "config",
        }
    }
}

impl From<RegistryError> for CasError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Unavailable { .. } => Self::RegistryUnavailable { source: err },
            RegistryError::NotFound { id } | RegistryError::UnexpectedType { id, .. } => {
                Self::InvalidTicket { id }
            },
            RegistryError::Ticket(e) => e.into(),
            other => Self::Registry { source: other },
        }
    }
}

impl From<TicketError> for CasError {
    fn from(err: TicketError) -> Self {
        Self::TicketCreation { message: err.to_string() }
    }
}
