//! Errors raised by ticket-model operations.

use thiserror::Error;

use crate::ticket::TicketKind;

/// Result alias for ticket-model operations.
pub type TicketResult<T> = Result<T, TicketError>;

/// Misuse of the ticket model, e.g. asking a service ticket to grant one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TicketError {
    /// The operation needs a TGT or PGT.
    #[error("{kind} tickets cannot grant tickets")]
    NotGranting { kind: TicketKind },

    /// The operation needs an ST or PT.
    #[error("{kind} tickets are not service tickets")]
    NotService { kind: TicketKind },

    /// The operation needs an OAuth code.
    #[error("{kind} tickets are not OAuth codes")]
    NotOAuthCode { kind: TicketKind },

    /// A child ticket was expected to have a granting ticket.
    #[error("{kind} ticket has no granting ticket")]
    Orphaned { kind: TicketKind },

    /// The supplied parent is not this ticket's granting ticket.
    #[error("supplied parent does not own this {kind} ticket")]
    ParentMismatch { kind: TicketKind },

    /// A service ticket may yield at most one proxy-granting ticket.
    #[error("a proxy-granting ticket was already issued for this service ticket")]
    ProxyAlreadyGranted,

    /// The id does not carry the prefix of the ticket's kind.
    #[error("ticket id {id} does not carry the {kind} prefix")]
    MalformedId { kind: TicketKind, id: String },
}
