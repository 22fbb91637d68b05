//! The ticket registry contract.

use async_trait::async_trait;
use casket_ticket::{Ticket, TicketKind, redact};

use crate::error::{RegistryError, RegistryResult};

/// Filter used by [`TicketRegistry::get_tickets`].
pub type TicketPredicate<'a> = &'a (dyn Fn(&Ticket) -> bool + Send + Sync);

/// Owns every ticket and the relationships between them.
///
/// Implementations must make [`update_ticket`](Self::update_ticket) and
/// [`save_all`](Self::save_all) atomic with respect to concurrent writers of
/// the same ids: a write based on a stale read fails with
/// [`RegistryError::Conflict`] instead of overwriting. That is what lets
/// exactly one of two racing validations of a single-use ticket win.
#[async_trait]
pub trait TicketRegistry: Send + Sync {
    /// Stores a new ticket. Fails with [`RegistryError::Duplicate`] if the id exists.
    async fn add_ticket(&self, ticket: &Ticket) -> RegistryResult<()>;

    /// Loads a ticket by id.
    async fn get_ticket(&self, id: &str) -> RegistryResult<Option<Ticket>>;

    /// Loads a ticket and checks that it is of (a subtype of) `kind`.
    async fn get_ticket_of_kind(&self, id: &str, kind: TicketKind) -> RegistryResult<Option<Ticket>> {
        match self.get_ticket(id).await? {
            Some(ticket) if ticket.kind().satisfies(kind) => Ok(Some(ticket)),
            Some(ticket) => Err(RegistryError::UnexpectedType {
                id: redact(id),
                expected: kind,
                actual: ticket.kind(),
            }),
            None => Ok(None),
        }
    }

    /// Persists changes to a stored ticket.
    ///
    /// Succeeds only if the stored version still equals `ticket.version()`;
    /// on success the version is incremented in place.
    async fn update_ticket(&self, ticket: &mut Ticket) -> RegistryResult<()>;

    /// Atomically inserts `added` and updates `updated` (each version-checked).
    ///
    /// Either every write applies or none does.
    async fn save_all(&self, added: &[&Ticket], updated: &mut [&mut Ticket]) -> RegistryResult<()>;

    /// Deletes a ticket and every ticket it transitively granted.
    ///
    /// Returns whether the ticket itself was present.
    async fn delete_ticket(&self, id: &str) -> RegistryResult<bool>;

    /// Deletes everything. Returns how many tickets were removed.
    async fn delete_all(&self) -> RegistryResult<usize>;

    /// Returns every ticket matching `predicate`.
    async fn get_tickets(&self, predicate: TicketPredicate<'_>) -> RegistryResult<Vec<Ticket>>;

    /// Total number of stored tickets.
    async fn count_tickets(&self) -> RegistryResult<usize>;

    /// Number of ticket-granting tickets (SSO sessions).
    async fn session_count(&self) -> RegistryResult<usize> {
        Ok(self.get_tickets(&|t| t.kind() == TicketKind::TicketGranting).await?.len())
    }

    /// Number of service and proxy tickets.
    async fn service_ticket_count(&self) -> RegistryResult<usize> {
        Ok(self.get_tickets(&|t| t.kind().is_service()).await?.len())
    }
}
