//! Walking granting-ticket links.
//!
//! Tickets only store their parent's id, so everything that needs the
//! parent chain (root lookup, chained authentications, inherited expiry)
//! resolves it through the registry. The walk is bounded by a depth limit
//! and refuses to revisit an id; hitting either means the stored graph is
//! corrupt.

use std::collections::HashSet;

use casket_ticket::{Authentication, Ticket, TicketState, redact};
use chrono::{DateTime, Utc};

use crate::{
    error::{RegistryError, RegistryResult},
    registry::TicketRegistry,
};

/// Default bound on the number of parent links followed.
pub const DEFAULT_MAX_CHAIN_DEPTH: usize = 16;

/// The ancestors of one ticket, nearest first.
#[derive(Debug, Clone)]
pub struct TicketChain {
    ancestors: Vec<Ticket>,
    complete: bool,
}

impl TicketChain {
    /// Resolves the ancestors of `ticket`.
    ///
    /// A missing ancestor (already destroyed) yields an incomplete chain
    /// rather than an error.
    pub async fn resolve<R: TicketRegistry + ?Sized>(
        registry: &R,
        ticket: &Ticket,
        max_depth: usize,
    ) -> RegistryResult<Self> {
        let mut ancestors = Vec::new();
        let mut seen = HashSet::from([ticket.id().to_owned()]);
        let mut next = ticket.granting_ticket().map(str::to_owned);

        while let Some(parent_id) = next {
            if ancestors.len() >= max_depth || !seen.insert(parent_id.clone()) {
                return Err(RegistryError::ChainTooDeep { id: redact(ticket.id()), max_depth });
            }
            let Some(parent) = registry.get_ticket(&parent_id).await? else {
                return Ok(Self { ancestors, complete: false });
            };
            next = parent.granting_ticket().map(str::to_owned);
            ancestors.push(parent);
        }
        Ok(Self { ancestors, complete: true })
    }

    /// Parent first, root last.
    pub fn ancestors(&self) -> &[Ticket] {
        &self.ancestors
    }

    /// Whether every ancestor up to a root was found.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// The root of the chain; `leaf` itself when it has no parent.
    ///
    /// `None` when the chain is incomplete.
    pub fn root<'a>(&'a self, leaf: &'a Ticket) -> Option<&'a Ticket> {
        if !self.complete {
            return None;
        }
        Some(self.ancestors.last().unwrap_or(leaf))
    }

    /// Whether `leaf` is unusable at `now` because it or any ancestor expired,
    /// or because an ancestor no longer exists.
    pub fn is_expired(&self, leaf: &Ticket, now: DateTime<Utc>) -> bool {
        !self.complete
            || leaf.is_expired_at(now)
            || self.ancestors.iter().any(|ancestor| ancestor.is_expired_at(now))
    }

    /// Authentications along the chain, leaf first.
    ///
    /// Each granting ticket contributes its primary authentication followed
    /// by its supplemental ones.
    pub fn authentications(&self, leaf: &Ticket) -> Vec<Authentication> {
        let mut out = Vec::new();
        for ticket in std::iter::once(leaf).chain(self.ancestors.iter()) {
            if let Some(granting) = ticket.granting() {
                out.push(granting.authentication.clone());
                out.extend(granting.supplemental_authentications.iter().cloned());
            } else if let Some(authentication) = TicketState::authentication(ticket) {
                out.push(authentication.clone());
            }
        }
        out
    }
}
