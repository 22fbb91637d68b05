//! Creates tickets with the right id prefix, expiration policy and clock.

use std::sync::Arc;

use crate::{
    authentication::Authentication,
    builder::{
        GrantingExpirationConfig, UseLimitedExpirationConfig, select_granting_policy,
        select_use_limited_policy,
    },
    clock::{Clock, SystemClock},
    error::TicketResult,
    expiration::ExpirationPolicy,
    id::{TicketIdGenerator, UniqueTicketIdGenerator},
    service::Service,
    ticket::{
        GrantingTicket, PROXY_GRANTING_TICKET_IOU_PREFIX, Ticket, TicketBody, TicketKind,
    },
};

/// The policy each ticket kind receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketPolicies {
    pub ticket_granting: ExpirationPolicy,
    pub service: ExpirationPolicy,
    pub proxy_granting: ExpirationPolicy,
    pub proxy: ExpirationPolicy,
    pub oauth_code: ExpirationPolicy,
    pub access_token: ExpirationPolicy,
}

impl TicketPolicies {
    /// Runs policy selection for every kind.
    pub fn from_config(
        ticket_granting: &GrantingExpirationConfig,
        service: &UseLimitedExpirationConfig,
        proxy_granting: &GrantingExpirationConfig,
        proxy: &UseLimitedExpirationConfig,
        oauth_code: &UseLimitedExpirationConfig,
        access_token_time_to_kill: std::time::Duration,
    ) -> Self {
        Self {
            ticket_granting: select_granting_policy(ticket_granting),
            service: select_use_limited_policy(service),
            proxy_granting: select_granting_policy(proxy_granting),
            proxy: select_use_limited_policy(proxy),
            oauth_code: select_use_limited_policy(oauth_code),
            access_token: ExpirationPolicy::HardTimeout { time_to_kill: access_token_time_to_kill },
        }
    }

    pub fn for_kind(&self, kind: TicketKind) -> &ExpirationPolicy {
        match kind {
            TicketKind::TicketGranting => &self.ticket_granting,
            TicketKind::ProxyGranting => &self.proxy_granting,
            TicketKind::Service => &self.service,
            TicketKind::Proxy => &self.proxy,
            TicketKind::OAuthCode => &self.oauth_code,
            TicketKind::AccessToken => &self.access_token,
        }
    }
}

impl Default for TicketPolicies {
    fn default() -> Self {
        Self::from_config(
            &GrantingExpirationConfig::default(),
            &UseLimitedExpirationConfig::default(),
            &GrantingExpirationConfig::default(),
            &UseLimitedExpirationConfig::default(),
            &UseLimitedExpirationConfig { number_of_uses: 1, time_to_kill: std::time::Duration::from_secs(30) },
            std::time::Duration::from_secs(2 * 60 * 60),
        )
    }
}

/// Mints tickets.
///
/// Granting operations mutate the parent ticket passed in (use counters,
/// child maps); persisting both parent and child is the caller's job.
#[derive(Clone)]
pub struct TicketFactory {
    ids: Arc<dyn TicketIdGenerator>,
    clock: Arc<dyn Clock>,
    policies: TicketPolicies,
    track_most_recent_session: bool,
}

impl std::fmt::Debug for TicketFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketFactory")
            .field("clock", &self.clock)
            .field("policies", &self.policies)
            .field("track_most_recent_session", &self.track_most_recent_session)
            .finish_non_exhaustive()
    }
}

impl TicketFactory {
    pub fn new(
        ids: Arc<dyn TicketIdGenerator>,
        clock: Arc<dyn Clock>,
        policies: TicketPolicies,
        track_most_recent_session: bool,
    ) -> Self {
        Self { ids, clock, policies, track_most_recent_session }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn policies(&self) -> &TicketPolicies {
        &self.policies
    }

    /// Generates a fresh id for `kind`.
    pub fn new_id(&self, kind: TicketKind) -> String {
        self.ids.new_ticket_id(kind.prefix())
    }

    /// Generates a PGT-IOU correlation id.
    pub fn new_proxy_granting_ticket_iou(&self) -> String {
        self.ids.new_ticket_id(PROXY_GRANTING_TICKET_IOU_PREFIX)
    }

    /// Creates a root TGT.
    pub fn create_ticket_granting_ticket(&self, authentication: Authentication) -> TicketResult<Ticket> {
        let policy = self.policies.ticket_granting.bind(&authentication);
        Ticket::new(
            self.new_id(TicketKind::TicketGranting),
            TicketBody::TicketGranting(GrantingTicket::new(authentication, None)),
            policy,
            None,
            self.clock.now(),
        )
    }

    /// Creates an ST (or a PT when `granting` is a PGT).
    pub fn create_service_ticket(
        &self,
        granting: &mut Ticket,
        service: Service,
        credential_provided: bool,
    ) -> TicketResult<Ticket> {
        let kind = if granting.kind() == TicketKind::ProxyGranting {
            TicketKind::Proxy
        } else {
            TicketKind::Service
        };
        granting.grant_service_ticket(
            self.new_id(kind),
            service,
            self.policies.for_kind(kind).clone(),
            credential_provided,
            self.track_most_recent_session,
            self.clock.now(),
        )
    }

    /// Creates a PGT from a validated ST plus its IOU.
    pub fn create_proxy_granting_ticket(
        &self,
        service_ticket: &mut Ticket,
        parent: &mut Ticket,
        authentication: Authentication,
    ) -> TicketResult<(Ticket, String)> {
        let pgt = service_ticket.grant_proxy_granting_ticket(
            parent,
            self.new_id(TicketKind::ProxyGranting),
            authentication,
            self.policies.proxy_granting.clone(),
            self.clock.now(),
        )?;
        Ok((pgt, self.new_proxy_granting_ticket_iou()))
    }

    pub fn create_oauth_code(&self, granting: &mut Ticket, service: Service) -> TicketResult<Ticket> {
        granting.grant_oauth_code(
            self.new_id(TicketKind::OAuthCode),
            service,
            self.policies.oauth_code.clone(),
            self.clock.now(),
        )
    }

    pub fn create_access_token(&self, code: &Ticket, parent: &mut Ticket) -> TicketResult<Ticket> {
        code.grant_access_token(
            parent,
            self.new_id(TicketKind::AccessToken),
            self.policies.access_token.clone(),
            self.clock.now(),
        )
    }
}

impl Default for TicketFactory {
    fn default() -> Self {
        Self::new(
            Arc::new(UniqueTicketIdGenerator::default()),
            Arc::new(SystemClock),
            TicketPolicies::default(),
            false,
        )
    }
}
