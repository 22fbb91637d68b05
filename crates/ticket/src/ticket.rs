//! The ticket model.
//!
//! Every ticket kind shares one [`Ticket`] struct: the common usage state
//! lives on the struct and kind-specific data lives in [`TicketBody`].
//! Tickets refer to each other only by id. The registry owns all tickets
//! and resolves those ids, so there are no in-memory parent pointers.
//!
//! # Relationships
//!
//! ```text
//! TGT ──services──────────▶ ST ──(validated)──▶ PGT (parent = TGT)
//!  │                                             │
//!  ├──proxy_granting_tickets──▶ PGT ──services──▶ PT
//!  └──descendant_tickets──▶ COD, AT
//! ```
//!
//! A PGT's `granting_ticket` is the TGT that owned the validated ST, so
//! walking `granting_ticket` links from any ticket always ends at a root TGT.

use std::{collections::BTreeMap, collections::BTreeSet, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    authentication::Authentication,
    error::{TicketError, TicketResult},
    expiration::{ExpirationDecision, ExpirationPolicy, TicketState},
    service::{Service, ServiceMatchingStrategy},
};

pub const TICKET_GRANTING_TICKET_PREFIX: &str = "TGT";
pub const PROXY_GRANTING_TICKET_PREFIX: &str = "PGT";
pub const PROXY_GRANTING_TICKET_IOU_PREFIX: &str = "PGTIOU";
pub const SERVICE_TICKET_PREFIX: &str = "ST";
pub const PROXY_TICKET_PREFIX: &str = "PT";
pub const OAUTH_CODE_PREFIX: &str = "COD";
pub const OAUTH_ACCESS_TOKEN_PREFIX: &str = "AT";

/// Discriminates the ticket kinds. The id prefix of each kind is stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketKind {
    TicketGranting,
    ProxyGranting,
    Service,
    Proxy,
    OAuthCode,
    AccessToken,
}

impl TicketKind {
    pub const ALL: [Self; 6] = [
        Self::TicketGranting,
        Self::ProxyGranting,
        Self::Service,
        Self::Proxy,
        Self::OAuthCode,
        Self::AccessToken,
    ];

    /// The id prefix for this kind, without the trailing dash.
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::TicketGranting => TICKET_GRANTING_TICKET_PREFIX,
            Self::ProxyGranting => PROXY_GRANTING_TICKET_PREFIX,
            Self::Service => SERVICE_TICKET_PREFIX,
            Self::Proxy => PROXY_TICKET_PREFIX,
            Self::OAuthCode => OAUTH_CODE_PREFIX,
            Self::AccessToken => OAUTH_ACCESS_TOKEN_PREFIX,
        }
    }

    /// Infers the kind from an id's prefix.
    pub fn from_id(id: &str) -> Option<Self> {
        let (prefix, _) = id.split_once('-')?;
        Self::ALL.into_iter().find(|kind| kind.prefix() == prefix)
    }

    /// TGT and PGT: can mint service-like tickets.
    pub const fn is_granting(self) -> bool {
        matches!(self, Self::TicketGranting | Self::ProxyGranting)
    }

    /// ST and PT: bound to a service and validated by it.
    pub const fn is_service(self) -> bool {
        matches!(self, Self::Service | Self::Proxy)
    }

    /// Whether a ticket of this kind may be returned when `requested` was asked for.
    ///
    /// Mirrors the subtype relation: a PGT is a TGT and a PT is an ST.
    pub const fn satisfies(self, requested: Self) -> bool {
        matches!(
            (self, requested),
            (Self::TicketGranting, Self::TicketGranting)
                | (Self::ProxyGranting, Self::ProxyGranting | Self::TicketGranting)
                | (Self::Service, Self::Service)
                | (Self::Proxy, Self::Proxy | Self::Service)
                | (Self::OAuthCode, Self::OAuthCode)
                | (Self::AccessToken, Self::AccessToken)
        )
    }
}

impl fmt::Display for TicketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Data held by TGTs and PGTs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantingTicket {
    pub authentication: Authentication,
    /// Authentications added by forced re-authentication, oldest first.
    #[serde(default)]
    pub supplemental_authentications: Vec<Authentication>,
    /// Service tickets granted by this ticket, by id.
    #[serde(default)]
    pub services: BTreeMap<String, Service>,
    /// Proxy-granting tickets obtained through this ticket's service tickets.
    #[serde(default)]
    pub proxy_granting_tickets: BTreeMap<String, Service>,
    /// Other child tickets (OAuth codes and tokens).
    #[serde(default)]
    pub descendant_tickets: BTreeSet<String>,
    /// The service that obtained this ticket by proxy; `None` for primary logins.
    #[serde(default)]
    pub proxied_by: Option<Service>,
}

impl GrantingTicket {
    pub fn new(authentication: Authentication, proxied_by: Option<Service>) -> Self {
        Self {
            authentication,
            supplemental_authentications: Vec::new(),
            services: BTreeMap::new(),
            proxy_granting_tickets: BTreeMap::new(),
            descendant_tickets: BTreeSet::new(),
            proxied_by,
        }
    }

    /// Ids of every ticket this one directly owns.
    pub fn child_ids(&self) -> impl Iterator<Item = &str> {
        self.services
            .keys()
            .chain(self.proxy_granting_tickets.keys())
            .chain(self.descendant_tickets.iter())
            .map(String::as_str)
    }
}

/// Data held by STs and PTs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTicketData {
    pub service: Service,
    /// True when minted in the same login as its granting ticket.
    pub from_new_login: bool,
    /// Whether a PGT has already been issued from this ticket.
    #[serde(default)]
    pub proxy_granted: bool,
}

/// Data held by OAuth codes and access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthTokenData {
    pub service: Service,
    pub authentication: Authentication,
    #[serde(default)]
    pub scopes: BTreeSet<String>,
}

/// Kind-specific ticket data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TicketBody {
    TicketGranting(GrantingTicket),
    ProxyGranting(GrantingTicket),
    Service(ServiceTicketData),
    Proxy(ServiceTicketData),
    OAuthCode(OAuthTokenData),
    AccessToken(OAuthTokenData),
}

impl TicketBody {
    pub fn kind(&self) -> TicketKind {
        match self {
            Self::TicketGranting(_) => TicketKind::TicketGranting,
            Self::ProxyGranting(_) => TicketKind::ProxyGranting,
            Self::Service(_) => TicketKind::Service,
            Self::Proxy(_) => TicketKind::Proxy,
            Self::OAuthCode(_) => TicketKind::OAuthCode,
            Self::AccessToken(_) => TicketKind::AccessToken,
        }
    }
}

/// A ticket of any kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    id: String,
    creation_time: DateTime<Utc>,
    last_time_used: DateTime<Utc>,
    #[serde(default)]
    previous_time_used: Option<DateTime<Utc>>,
    #[serde(default)]
    count_of_uses: u32,
    expiration_policy: ExpirationPolicy,
    #[serde(default)]
    granting_ticket: Option<String>,
    #[serde(default)]
    expired: bool,
    #[serde(default)]
    version: u64,
    body: TicketBody,
}

impl Ticket {
    /// Creates a ticket. `id` must carry the prefix of `body`'s kind.
    pub fn new(
        id: impl Into<String>,
        body: TicketBody,
        expiration_policy: ExpirationPolicy,
        granting_ticket: Option<String>,
        now: DateTime<Utc>,
    ) -> TicketResult<Self> {
        let id = id.into();
        let kind = body.kind();
        if TicketKind::from_id(&id) != Some(kind) {
            return Err(TicketError::MalformedId { kind, id: crate::id::redact(&id) });
        }
        Ok(Self {
            id,
            creation_time: now,
            last_time_used: now,
            previous_time_used: None,
            count_of_uses: 0,
            expiration_policy,
            granting_ticket,
            expired: false,
            version: 0,
            body,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TicketKind {
        self.body.kind()
    }

    pub fn body(&self) -> &TicketBody {
        &self.body
    }

    pub fn expiration_policy(&self) -> &ExpirationPolicy {
        &self.expiration_policy
    }

    /// Id of the ticket that issued this one.
    pub fn granting_ticket(&self) -> Option<&str> {
        self.granting_ticket.as_deref()
    }

    /// True iff the ticket has no parent.
    pub fn is_root(&self) -> bool {
        self.granting_ticket.is_none()
    }

    /// Storage version, managed by the registry for optimistic concurrency.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Overwrites the storage version. Only registries should call this.
    pub fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    /// Whether [`mark_expired`](Self::mark_expired) has been called.
    pub fn is_marked_expired(&self) -> bool {
        self.expired
    }

    /// Forces the ticket into the expired state. Safe to call repeatedly.
    pub fn mark_expired(&mut self) {
        self.expired = true;
    }

    /// Evaluates this ticket's own policy. Does not consult parents.
    pub fn evaluate(&self, now: DateTime<Utc>) -> ExpirationDecision {
        if self.expired {
            return ExpirationDecision::Expired;
        }
        self.expiration_policy.evaluate(self, now)
    }

    /// Whether this ticket, considered alone, has expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.evaluate(now).is_expired()
    }

    /// Records one use.
    pub fn update_state(&mut self, now: DateTime<Utc>) {
        self.previous_time_used = Some(self.last_time_used);
        self.last_time_used = now;
        self.count_of_uses = self.count_of_uses.saturating_add(1);
    }

    pub fn granting(&self) -> Option<&GrantingTicket> {
        match &self.body {
            TicketBody::TicketGranting(g) | TicketBody::ProxyGranting(g) => Some(g),
            _ => None,
        }
    }

    pub fn granting_mut(&mut self) -> Option<&mut GrantingTicket> {
        match &mut self.body {
            TicketBody::TicketGranting(g) | TicketBody::ProxyGranting(g) => Some(g),
            _ => None,
        }
    }

    pub fn service_ticket(&self) -> Option<&ServiceTicketData> {
        match &self.body {
            TicketBody::Service(s) | TicketBody::Proxy(s) => Some(s),
            _ => None,
        }
    }

    pub fn oauth_token(&self) -> Option<&OAuthTokenData> {
        match &self.body {
            TicketBody::OAuthCode(t) | TicketBody::AccessToken(t) => Some(t),
            _ => None,
        }
    }

    /// The service a service-like ticket is bound to.
    pub fn service(&self) -> Option<&Service> {
        self.service_ticket()
            .map(|s| &s.service)
            .or_else(|| self.oauth_token().map(|t| &t.service))
    }

    /// For STs and PTs, whether minted as part of a fresh login.
    pub fn is_from_new_login(&self) -> Option<bool> {
        self.service_ticket().map(|s| s.from_new_login)
    }

    /// Consumes one use and reports whether `service` matches the bound service.
    ///
    /// The use is recorded even when the service does not match, so a
    /// single-use ticket cannot be probed with several candidate services.
    /// Returns `false` without recording a use for non-service tickets.
    pub fn is_valid_for(
        &mut self,
        service: &Service,
        strategy: ServiceMatchingStrategy,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(bound) = self.service().cloned() else {
            return false;
        };
        self.update_state(now);
        strategy.matches(&bound, service)
    }

    /// Records a re-authentication on a granting ticket.
    pub fn add_supplemental_authentication(&mut self, authentication: Authentication) -> TicketResult<()> {
        let kind = self.kind();
        let granting = self.granting_mut().ok_or(TicketError::NotGranting { kind })?;
        granting.supplemental_authentications.push(authentication);
        Ok(())
    }

    /// Mints a service ticket (or proxy ticket, from a PGT) and records it.
    ///
    /// `from_new_login` is set when credentials accompanied this request or
    /// when this is the first ticket the granting ticket has issued. With
    /// `track_most_recent_session`, earlier tickets for the same normalized
    /// service are dropped from the services map.
    pub fn grant_service_ticket(
        &mut self,
        id: impl Into<String>,
        service: Service,
        expiration_policy: ExpirationPolicy,
        credential_provided: bool,
        track_most_recent_session: bool,
        now: DateTime<Utc>,
    ) -> TicketResult<Ticket> {
        let kind = self.kind();
        let from_new_login = credential_provided || self.count_of_uses == 0;
        let data = ServiceTicketData { service: service.clone(), from_new_login, proxy_granted: false };
        let body = match kind {
            TicketKind::TicketGranting => TicketBody::Service(data),
            TicketKind::ProxyGranting => TicketBody::Proxy(data),
            _ => return Err(TicketError::NotGranting { kind }),
        };
        let ticket = Ticket::new(id, body, expiration_policy, Some(self.id.clone()), now)?;

        self.update_state(now);
        let granting = self.granting_mut().ok_or(TicketError::NotGranting { kind })?;
        if track_most_recent_session {
            let normalized = service.normalized();
            granting.services.retain(|_, existing| existing.normalized() != normalized);
        }
        granting.services.insert(ticket.id.clone(), service);
        Ok(ticket)
    }

    /// Issues a PGT from a validated service ticket.
    ///
    /// `parent` must be the service ticket's granting ticket; the new PGT
    /// becomes its child and is recorded in its proxy map. At most one PGT
    /// may be issued per service ticket.
    pub fn grant_proxy_granting_ticket(
        &mut self,
        parent: &mut Ticket,
        id: impl Into<String>,
        authentication: Authentication,
        expiration_policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> TicketResult<Ticket> {
        let kind = self.kind();
        let parent_id = self.granting_ticket.clone().ok_or(TicketError::Orphaned { kind })?;
        if parent.id != parent_id {
            return Err(TicketError::ParentMismatch { kind });
        }
        let (TicketBody::Service(data) | TicketBody::Proxy(data)) = &mut self.body else {
            return Err(TicketError::NotService { kind });
        };
        if data.proxy_granted {
            return Err(TicketError::ProxyAlreadyGranted);
        }
        let service = data.service.clone();

        let policy = expiration_policy.bind(&authentication);
        let body = TicketBody::ProxyGranting(GrantingTicket::new(authentication, Some(service.clone())));
        let pgt = Ticket::new(id, body, policy, Some(parent_id), now)?;

        let parent_kind = parent.kind();
        parent
            .granting_mut()
            .ok_or(TicketError::NotGranting { kind: parent_kind })?
            .proxy_granting_tickets
            .insert(pgt.id.clone(), service);
        data.proxy_granted = true;
        Ok(pgt)
    }

    /// Mints an OAuth authorization code from a granting ticket.
    pub fn grant_oauth_code(
        &mut self,
        id: impl Into<String>,
        service: Service,
        expiration_policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> TicketResult<Ticket> {
        let kind = self.kind();
        let authentication = self
            .granting()
            .map(|g| g.authentication.clone())
            .ok_or(TicketError::NotGranting { kind })?;
        let body = TicketBody::OAuthCode(OAuthTokenData {
            service,
            authentication,
            scopes: BTreeSet::new(),
        });
        let code = Ticket::new(id, body, expiration_policy, Some(self.id.clone()), now)?;

        self.update_state(now);
        self.granting_mut()
            .ok_or(TicketError::NotGranting { kind })?
            .descendant_tickets
            .insert(code.id.clone());
        Ok(code)
    }

    /// Mints an access token from an OAuth code. The token shares the code's
    /// granting ticket, which records it as a descendant.
    pub fn grant_access_token(
        &self,
        parent: &mut Ticket,
        id: impl Into<String>,
        expiration_policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> TicketResult<Ticket> {
        let kind = self.kind();
        let TicketBody::OAuthCode(code) = &self.body else {
            return Err(TicketError::NotOAuthCode { kind });
        };
        let parent_id = self.granting_ticket.clone().ok_or(TicketError::Orphaned { kind })?;
        if parent.id != parent_id {
            return Err(TicketError::ParentMismatch { kind });
        }
        let body = TicketBody::AccessToken(code.clone());
        let token = Ticket::new(id, body, expiration_policy, Some(parent_id), now)?;

        let parent_kind = parent.kind();
        parent
            .granting_mut()
            .ok_or(TicketError::NotGranting { kind: parent_kind })?
            .descendant_tickets
            .insert(token.id.clone());
        Ok(token)
    }
}

impl TicketState for Ticket {
    fn count_of_uses(&self) -> u32 {
        self.count_of_uses
    }

    fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    fn last_time_used(&self) -> DateTime<Utc> {
        self.last_time_used
    }

    fn previous_time_used(&self) -> Option<DateTime<Utc>> {
        self.previous_time_used
    }

    fn authentication(&self) -> Option<&Authentication> {
        match &self.body {
            TicketBody::TicketGranting(g) | TicketBody::ProxyGranting(g) => Some(&g.authentication),
            TicketBody::OAuthCode(t) | TicketBody::AccessToken(t) => Some(&t.authentication),
            TicketBody::Service(_) | TicketBody::Proxy(_) => None,
        }
    }
}
