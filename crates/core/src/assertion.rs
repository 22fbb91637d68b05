//! The result of a successful ticket validation.

use casket_registry::TicketChain;
use casket_ticket::{Authentication, Service, Ticket};

/// What a service learns when its ticket validates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assertion {
    primary_authentication: Authentication,
    chained_authentications: Vec<Authentication>,
    service: Service,
    from_new_login: bool,
    proxies: Vec<Service>,
}

impl Assertion {
    /// Builds the assertion for a validated `ticket` and its resolved chain.
    ///
    /// Returns `None` when the chain has no root granting ticket.
    pub fn from_chain(ticket: &Ticket, chain: &TicketChain) -> Option<Self> {
        let primary_authentication = chain.root(ticket)?.granting()?.authentication.clone();
        let service = ticket.service()?.clone();
        let proxies = std::iter::once(ticket)
            .chain(chain.ancestors())
            .filter_map(|t| t.granting().and_then(|g| g.proxied_by.clone()))
            .collect();
        Some(Self {
            primary_authentication,
            chained_authentications: chain.authentications(ticket),
            service,
            from_new_login: ticket.is_from_new_login().unwrap_or(false),
            proxies,
        })
    }

    /// The authentication of the root TGT.
    pub fn primary_authentication(&self) -> &Authentication {
        &self.primary_authentication
    }

    /// Every authentication along the chain, leaf first.
    pub fn chained_authentications(&self) -> &[Authentication] {
        &self.chained_authentications
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    pub fn is_from_new_login(&self) -> bool {
        self.from_new_login
    }

    /// Services the ticket was proxied through, nearest first. Empty for
    /// tickets issued directly from a login session.
    pub fn proxies(&self) -> &[Service] {
        &self.proxies
    }

    pub fn principal_id(&self) -> &str {
        &self.primary_authentication.principal.id
    }
}
