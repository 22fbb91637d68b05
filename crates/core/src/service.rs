//! The central authentication service.
//!
//! [`CentralAuthenticationService`] orchestrates the ticket lifecycle: it
//! issues TGTs after login, mints service, proxy and OAuth tickets from
//! them, validates those tickets for services, and tears sessions down.
//!
//! Concurrency rests on the registry's versioned writes. Every operation
//! reads the tickets it needs, decides, and writes back conditionally on
//! the versions it read. A write that loses to a concurrent one is retried
//! from a fresh read a bounded number of times. Writes that fail because
//! the registry is unavailable are never retried here: the first attempt
//! may have been applied.

use std::sync::Arc;

use casket_registry::{
    DEFAULT_MAX_CHAIN_DEPTH, RegistryError, TicketChain, TicketRegistry,
};
use casket_ticket::{
    Clock, ExpirationDecision, ExpirationPolicy, Service, ServiceMatchingStrategy, Ticket, TicketFactory,
    TicketKind, TicketState, UniqueTicketIdGenerator, clock::elapsed, redact,
};
use chrono::{DateTime, Utc};

use crate::{
    assertion::Assertion,
    audit::{AuditAction, AuditEvent, AuditLogger, AuditResult, TracingAuditLogger},
    authentication::AuthenticationResult,
    config::CasConfig,
    error::{CasError, CasResult},
    logout::{DefaultLogoutManager, LogoutHandler, LogoutRequest},
    services::{RegisteredService, ServicesManager},
};

/// How many times a write that lost a version race is re-attempted.
pub const DEFAULT_CONFLICT_RETRIES: u32 = 3;

const UNKNOWN_ACTOR: &str = "unknown";

fn default_audit() -> Arc<dyn AuditLogger> {
    Arc::new(TracingAuditLogger)
}

fn principal_of(ticket: &Ticket) -> String {
    ticket
        .granting()
        .map(|g| g.authentication.principal.id.clone())
        .or_else(|| ticket.oauth_token().map(|t| t.authentication.principal.id.clone()))
        .unwrap_or_else(|| UNKNOWN_ACTOR.to_owned())
}

/// Whether `st` was consumed by validation but is still inside its time window.
fn validated_within_window(st: &Ticket, now: DateTime<Utc>) -> bool {
    if st.count_of_uses() == 0 {
        return false;
    }
    match st.expiration_policy() {
        ExpirationPolicy::MultiTimeUseOrTimeout { time_to_kill, .. } => {
            elapsed(st.creation_time(), now) <= *time_to_kill
        },
        _ => false,
    }
}

fn require_id(id: &str, what: &str) -> CasResult<()> {
    if id.trim().is_empty() {
        return Err(CasError::invalid_argument(format!("{what} must not be blank")));
    }
    Ok(())
}

pub struct CentralAuthenticationService {
    registry: Arc<dyn TicketRegistry>,
    services: Arc<dyn ServicesManager>,
    factory: TicketFactory,
    logout: DefaultLogoutManager,
    audit: Arc<dyn AuditLogger>,
    service_matching: ServiceMatchingStrategy,
    max_chain_depth: usize,
    conflict_retries: u32,
}

impl std::fmt::Debug for CentralAuthenticationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CentralAuthenticationService")
            .field("factory", &self.factory)
            .field("service_matching", &self.service_matching)
            .field("max_chain_depth", &self.max_chain_depth)
            .field("conflict_retries", &self.conflict_retries)
            .finish_non_exhaustive()
    }
}

#[bon::bon]
impl CentralAuthenticationService {
    #[builder]
    pub fn new(
        registry: Arc<dyn TicketRegistry>,
        services: Arc<dyn ServicesManager>,
        #[builder(default)] factory: TicketFactory,
        #[builder(default = default_audit())] audit: Arc<dyn AuditLogger>,
        logout_handler: Option<Arc<dyn LogoutHandler>>,
        #[builder(default)] service_matching: ServiceMatchingStrategy,
        #[builder(default = DEFAULT_MAX_CHAIN_DEPTH)] max_chain_depth: usize,
        #[builder(default = DEFAULT_CONFLICT_RETRIES)] conflict_retries: u32,
    ) -> Self {
        let mut logout = DefaultLogoutManager::new(Arc::clone(&services), Arc::clone(factory.clock()))
            .with_max_depth(max_chain_depth);
        if let Some(handler) = logout_handler {
            logout = logout.with_handler(handler);
        }
        Self { registry, services, factory, logout, audit, service_matching, max_chain_depth, conflict_retries }
    }
}

impl CentralAuthenticationService {
    /// Wires a service from configuration.
    pub fn from_config(
        config: &CasConfig,
        registry: Arc<dyn TicketRegistry>,
        services: Arc<dyn ServicesManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let factory = TicketFactory::new(
            Arc::new(UniqueTicketIdGenerator::default()),
            clock,
            config.policies(),
            config.track_most_recent_session,
        );
        Self::builder()
            .registry(registry)
            .services(services)
            .factory(factory)
            .service_matching(config.service_matching)
            .max_chain_depth(config.registry.max_chain_depth)
            .build()
    }

    pub fn registry(&self) -> &Arc<dyn TicketRegistry> {
        &self.registry
    }

    pub fn factory(&self) -> &TicketFactory {
        &self.factory
    }

    fn clock(&self) -> &Arc<dyn Clock> {
        self.factory.clock()
    }

    async fn audit(&self, action: AuditAction, actor: &str, resource: String, result: AuditResult) {
        let event = AuditEvent::builder()
            .timestamp(self.clock().now())
            .actor(actor)
            .action(action)
            .resource(resource)
            .result(result)
            .build();
        self.audit.log(&event).await;
    }

    async fn audit_outcome<T>(
        &self,
        action: AuditAction,
        fallback_resource: &str,
        outcome: &CasResult<(T, String, String)>,
    ) {
        match outcome {
            Ok((_, actor, resource)) => self.audit(action, actor, resource.clone(), AuditResult::Success).await,
            Err(e) => {
                self.audit(action, UNKNOWN_ACTOR, redact(fallback_resource), AuditResult::Failure(e.kind().into()))
                    .await;
            },
        }
    }

    /// The enabled definition for `service`.
    async fn registered_service(&self, service: &Service) -> CasResult<RegisteredService> {
        match self.services.find_service_by(service).await {
            Some(registered) if registered.enabled => Ok(registered),
            Some(_) => {
                tracing::warn!(%service, "service is disabled");
                Err(CasError::UnauthorizedService { service: service.id.clone() })
            },
            None => {
                tracing::warn!(%service, "service is not registered");
                Err(CasError::UnauthorizedService { service: service.id.clone() })
            },
        }
    }

    /// Loads a usable ticket of `kind` together with its ancestors.
    ///
    /// A ticket that has expired, or whose chain has, is removed and
    /// reported invalid. A throttled ticket is left alone.
    async fn load_live(&self, id: &str, kind: TicketKind) -> CasResult<(Ticket, TicketChain)> {
        let Some(ticket) = self.registry.get_ticket_of_kind(id, kind).await? else {
            tracing::debug!("ticket not found");
            return Err(CasError::invalid_ticket(redact(id)));
        };
        let now = self.clock().now();

        if ticket.evaluate(now) == ExpirationDecision::Throttled {
            tracing::warn!(ticket_id = %redact(id), "ticket reused too quickly");
            return Err(CasError::Throttled { id: redact(id) });
        }

        let chain = TicketChain::resolve(self.registry.as_ref(), &ticket, self.max_chain_depth).await?;
        if chain.is_expired(&ticket, now) {
            tracing::debug!(ticket_id = %redact(id), "ticket or its granting chain expired; removing");
            if let Err(e) = self.registry.delete_ticket(id).await {
                tracing::warn!(error = %e, "failed to remove expired ticket");
            }
            return Err(CasError::invalid_ticket(redact(id)));
        }
        Ok((ticket, chain))
    }

    /// Loads the service ticket a proxy-granting ticket is requested for.
    ///
    /// Unlike [`load_live`](Self::load_live), a ticket that was exhausted by
    /// its validation is still accepted while its time window lasts.
    async fn load_for_proxy(&self, st_id: &str) -> CasResult<(Ticket, TicketChain)> {
        let Some(st) = self.registry.get_ticket_of_kind(st_id, TicketKind::Service).await? else {
            return Err(CasError::invalid_ticket(redact(st_id)));
        };
        let now = self.clock().now();
        let chain = TicketChain::resolve(self.registry.as_ref(), &st, self.max_chain_depth).await?;

        let ancestors_live = chain.is_complete() && !chain.ancestors().iter().any(|a| a.is_expired_at(now));
        if ancestors_live && (!st.is_expired_at(now) || validated_within_window(&st, now)) {
            return Ok((st, chain));
        }
        tracing::debug!(ticket_id = %redact(st_id), "ticket or its granting chain expired; removing");
        if let Err(e) = self.registry.delete_ticket(st_id).await {
            tracing::warn!(error = %e, "failed to remove expired ticket");
        }
        Err(CasError::invalid_ticket(redact(st_id)))
    }

    /// Loads a ticket, removing it if it has expired.
    #[tracing::instrument(skip_all, fields(ticket_id = %redact(id), ?kind))]
    pub async fn get_ticket(&self, id: &str, kind: TicketKind) -> CasResult<Ticket> {
        require_id(id, "ticket id")?;
        self.load_live(id, kind).await.map(|(ticket, _)| ticket)
    }

    /// Starts an SSO session for an authenticated user.
    #[tracing::instrument(skip_all, fields(principal = %authentication.principal_id()))]
    pub async fn create_ticket_granting_ticket(&self, authentication: &AuthenticationResult) -> CasResult<Ticket> {
        let outcome = self.create_ticket_granting_ticket_inner(authentication).await;
        self.audit_outcome(AuditAction::TicketGrantingTicketCreated, authentication.principal_id(), &outcome)
            .await;
        outcome.map(|(tgt, ..)| tgt)
    }

    async fn create_ticket_granting_ticket_inner(
        &self,
        authentication: &AuthenticationResult,
    ) -> CasResult<(Ticket, String, String)> {
        if let Some(service) = &authentication.service {
            self.registered_service(service).await?;
        }

        for _ in 0..=self.conflict_retries {
            let tgt = self.factory.create_ticket_granting_ticket(authentication.authentication.clone())?;
            match self.registry.add_ticket(&tgt).await {
                Ok(()) => {
                    tracing::info!(ticket_id = %redact(tgt.id()), "ticket-granting ticket created");
                    let resource = redact(tgt.id());
                    return Ok((tgt, authentication.principal_id().to_owned(), resource));
                },
                Err(RegistryError::Duplicate { .. }) => {
                    tracing::warn!("generated ticket id collided; regenerating");
                },
                Err(e) => return Err(e.into()),
            }
        }
        Err(CasError::TicketCreation { message: "could not allocate a unique ticket id".into() })
    }

    /// Issues a service ticket for `service` from an SSO session.
    ///
    /// `authentication` carries the result of credentials presented in this
    /// request, if any. It must resolve to the session's principal.
    #[tracing::instrument(skip_all, fields(ticket_id = %redact(tgt_id), service = %service))]
    pub async fn grant_service_ticket(
        &self,
        tgt_id: &str,
        service: &Service,
        authentication: Option<&AuthenticationResult>,
    ) -> CasResult<Ticket> {
        let outcome = self.grant_service_ticket_inner(tgt_id, service, authentication).await;
        self.audit_outcome(AuditAction::ServiceTicket, tgt_id, &outcome).await;
        outcome.map(|(st, ..)| st)
    }

    async fn grant_service_ticket_inner(
        &self,
        tgt_id: &str,
        service: &Service,
        authentication: Option<&AuthenticationResult>,
    ) -> CasResult<(Ticket, String, String)> {
        require_id(tgt_id, "ticket-granting ticket id")?;
        let registered = self.registered_service(service).await?;
        let credential_provided = authentication.is_some_and(|a| a.credential_provided);

        if !registered.sso_enabled && !credential_provided {
            tracing::warn!(%service, "service excluded from SSO and no credentials presented");
            return Err(CasError::UnauthorizedSso { service: service.id.clone() });
        }

        for attempt in 0..=self.conflict_retries {
            let (mut tgt, _) = self.load_live(tgt_id, TicketKind::TicketGranting).await?;
            if tgt.kind() != TicketKind::TicketGranting {
                return Err(CasError::invalid_ticket(redact(tgt_id)));
            }

            if let Some(fresh) = authentication.filter(|a| a.credential_provided) {
                let session_principal = principal_of(&tgt);
                if fresh.principal_id() != session_principal {
                    tracing::warn!("fresh credentials resolved to a different principal");
                    return Err(CasError::MixedPrincipal);
                }
                tgt.add_supplemental_authentication(fresh.authentication.clone())?;
            }

            let st = self.factory.create_service_ticket(&mut tgt, service.clone(), credential_provided)?;
            match self.registry.save_all(&[&st], &mut [&mut tgt]).await {
                Ok(()) => {
                    tracing::info!(service_ticket = %redact(st.id()), "service ticket granted");
                    let resource = redact(st.id());
                    return Ok((st, principal_of(&tgt), resource));
                },
                Err(RegistryError::Conflict { .. } | RegistryError::Duplicate { .. }) => {
                    tracing::debug!(attempt, "session changed concurrently; retrying grant");
                },
                Err(e) => return Err(e.into()),
            }
        }
        Err(CasError::TicketCreation { message: "session kept changing during grant".into() })
    }

    /// Issues a proxy ticket for `service` from a proxy-granting ticket.
    #[tracing::instrument(skip_all, fields(ticket_id = %redact(pgt_id), service = %service))]
    pub async fn grant_proxy_ticket(&self, pgt_id: &str, service: &Service) -> CasResult<Ticket> {
        let outcome = self.grant_proxy_ticket_inner(pgt_id, service).await;
        self.audit_outcome(AuditAction::ProxyTicket, pgt_id, &outcome).await;
        outcome.map(|(pt, ..)| pt)
    }

    async fn grant_proxy_ticket_inner(&self, pgt_id: &str, service: &Service) -> CasResult<(Ticket, String, String)> {
        require_id(pgt_id, "proxy-granting ticket id")?;
        let registered = self.registered_service(service).await?;
        // Proxy requests never carry credentials.
        if !registered.sso_enabled {
            tracing::warn!(%service, "service excluded from SSO cannot receive proxy tickets");
            return Err(CasError::UnauthorizedSso { service: service.id.clone() });
        }

        for attempt in 0..=self.conflict_retries {
            let (mut pgt, _) = self.load_live(pgt_id, TicketKind::ProxyGranting).await?;
            let pt = self.factory.create_service_ticket(&mut pgt, service.clone(), false)?;
            match self.registry.save_all(&[&pt], &mut [&mut pgt]).await {
                Ok(()) => {
                    tracing::info!(proxy_ticket = %redact(pt.id()), "proxy ticket granted");
                    let resource = redact(pt.id());
                    return Ok((pt, principal_of(&pgt), resource));
                },
                Err(RegistryError::Conflict { .. } | RegistryError::Duplicate { .. }) => {
                    tracing::debug!(attempt, "proxy-granting ticket changed concurrently; retrying grant");
                },
                Err(e) => return Err(e.into()),
            }
        }
        Err(CasError::TicketCreation { message: "proxy-granting ticket kept changing during grant".into() })
    }

    /// Validates a service or proxy ticket presented by `service`.
    ///
    /// Every attempt consumes one use, including one made by the wrong
    /// service. Of several concurrent validations of a single-use ticket,
    /// exactly one succeeds.
    #[tracing::instrument(skip_all, fields(ticket_id = %redact(st_id), service = %service))]
    pub async fn validate_service_ticket(&self, st_id: &str, service: &Service) -> CasResult<Assertion> {
        let outcome = self.validate_service_ticket_inner(st_id, service).await;
        self.audit_outcome(AuditAction::ServiceTicketValidate, st_id, &outcome).await;
        outcome.map(|(assertion, ..)| assertion)
    }

    async fn validate_service_ticket_inner(
        &self,
        st_id: &str,
        service: &Service,
    ) -> CasResult<(Assertion, String, String)> {
        require_id(st_id, "service ticket id")?;
        let registered = self.registered_service(service).await?;

        for attempt in 0..=self.conflict_retries {
            let (mut st, chain) = self.load_live(st_id, TicketKind::Service).await?;
            let now = self.clock().now();
            let matched = st.is_valid_for(service, self.service_matching, now);

            match self.registry.update_ticket(&mut st).await {
                Ok(()) => {},
                Err(RegistryError::Conflict { .. }) => {
                    tracing::debug!(attempt, "ticket consumed concurrently; re-reading");
                    continue;
                },
                Err(RegistryError::NotFound { .. }) => return Err(CasError::invalid_ticket(redact(st_id))),
                Err(e) => return Err(e.into()),
            }

            // A spent ticket of a proxying service stays until its PGT is issued.
            let keep_for_proxy = matched
                && registered.proxy_allowed
                && st.service_ticket().is_some_and(|data| !data.proxy_granted);
            if st.is_expired_at(now)
                && !keep_for_proxy
                && let Err(e) = self.registry.delete_ticket(st.id()).await
            {
                tracing::warn!(error = %e, "failed to remove exhausted ticket");
            }

            if !matched {
                tracing::warn!(%service, "ticket presented by a service it was not issued to");
                return Err(CasError::UnrecognizableService { id: redact(st_id), service: service.id.clone() });
            }

            let assertion =
                Assertion::from_chain(&st, &chain).ok_or_else(|| CasError::invalid_ticket(redact(st_id)))?;
            tracing::info!(principal = assertion.principal_id(), "service ticket validated");
            let actor = assertion.principal_id().to_owned();
            return Ok((assertion, actor, redact(st_id)));
        }
        Err(CasError::invalid_ticket(redact(st_id)))
    }

    /// Issues a proxy-granting ticket to the service that holds `st_id`.
    ///
    /// `authentication` is the proxy callback's authentication. Returns the
    /// PGT and the IOU to hand to the service out of band. Must be called
    /// before the ticket is consumed by validation.
    #[tracing::instrument(skip_all, fields(ticket_id = %redact(st_id)))]
    pub async fn create_proxy_granting_ticket(
        &self,
        st_id: &str,
        authentication: &AuthenticationResult,
    ) -> CasResult<(Ticket, String)> {
        let outcome = self.create_proxy_granting_ticket_inner(st_id, authentication).await;
        self.audit_outcome(AuditAction::ProxyGrantingTicket, st_id, &outcome).await;
        outcome.map(|(grant, ..)| grant)
    }

    async fn create_proxy_granting_ticket_inner(
        &self,
        st_id: &str,
        authentication: &AuthenticationResult,
    ) -> CasResult<((Ticket, String), String, String)> {
        require_id(st_id, "service ticket id")?;

        for attempt in 0..=self.conflict_retries {
            let (mut st, chain) = self.load_for_proxy(st_id).await?;
            let service = st.service().cloned().ok_or_else(|| CasError::invalid_ticket(redact(st_id)))?;

            let registered = self.registered_service(&service).await?;
            if !registered.proxy_allowed {
                tracing::warn!(%service, "service is not allowed to proxy");
                return Err(CasError::UnauthorizedProxying { service: service.id });
            }

            let Some(mut parent) = chain.ancestors().first().cloned() else {
                return Err(CasError::invalid_ticket(redact(st_id)));
            };
            let (pgt, iou) =
                self.factory.create_proxy_granting_ticket(&mut st, &mut parent, authentication.authentication.clone())?;

            match self.registry.save_all(&[&pgt], &mut [&mut parent, &mut st]).await {
                Ok(()) => {
                    if st.is_expired_at(self.clock().now())
                        && let Err(e) = self.registry.delete_ticket(st.id()).await
                    {
                        tracing::warn!(error = %e, "failed to remove exhausted ticket");
                    }
                    tracing::info!(proxy_granting_ticket = %redact(pgt.id()), "proxy-granting ticket created");
                    let actor = principal_of(&parent);
                    let resource = redact(pgt.id());
                    return Ok(((pgt, iou), actor, resource));
                },
                Err(RegistryError::Conflict { .. } | RegistryError::Duplicate { .. }) => {
                    tracing::debug!(attempt, "tickets changed concurrently; retrying proxy grant");
                },
                Err(e) => return Err(e.into()),
            }
        }
        Err(CasError::TicketCreation { message: "tickets kept changing during proxy grant".into() })
    }

    /// Ends an SSO session and everything issued from it.
    ///
    /// Returns the logout requests for the session's services. Destroying
    /// an unknown, expired or already destroyed session returns an empty
    /// list.
    #[tracing::instrument(skip_all, fields(ticket_id = %redact(tgt_id)))]
    pub async fn destroy_ticket_granting_ticket(&self, tgt_id: &str) -> CasResult<Vec<LogoutRequest>> {
        require_id(tgt_id, "ticket-granting ticket id")?;

        let outcome = self.destroy_ticket_granting_ticket_inner(tgt_id).await;
        self.audit_outcome(AuditAction::TicketGrantingTicketDestroyed, tgt_id, &outcome).await;
        outcome.map(|(requests, ..)| requests)
    }

    async fn destroy_ticket_granting_ticket_inner(
        &self,
        tgt_id: &str,
    ) -> CasResult<(Vec<LogoutRequest>, String, String)> {
        let tgt = match self.registry.get_ticket_of_kind(tgt_id, TicketKind::TicketGranting).await {
            Ok(Some(tgt)) if tgt.kind() == TicketKind::TicketGranting => tgt,
            Ok(_) | Err(RegistryError::UnexpectedType { .. }) => {
                tracing::debug!("no session to destroy");
                return Ok((Vec::new(), UNKNOWN_ACTOR.to_owned(), redact(tgt_id)));
            },
            Err(e) => return Err(e.into()),
        };

        let requests = self.logout.perform_logout(self.registry.as_ref(), &tgt).await?;
        self.registry.delete_ticket(tgt.id()).await?;
        tracing::info!(logout_requests = requests.len(), "ticket-granting ticket destroyed");
        Ok((requests, principal_of(&tgt), redact(tgt_id)))
    }

    /// Issues an OAuth authorization code for `service` from a session.
    #[tracing::instrument(skip_all, fields(ticket_id = %redact(tgt_id), service = %service))]
    pub async fn grant_oauth_code(&self, tgt_id: &str, service: &Service) -> CasResult<Ticket> {
        let outcome = self.grant_oauth_code_inner(tgt_id, service).await;
        self.audit_outcome(AuditAction::OAuthCode, tgt_id, &outcome).await;
        outcome.map(|(code, ..)| code)
    }

    async fn grant_oauth_code_inner(&self, tgt_id: &str, service: &Service) -> CasResult<(Ticket, String, String)> {
        require_id(tgt_id, "ticket-granting ticket id")?;
        self.registered_service(service).await?;

        for attempt in 0..=self.conflict_retries {
            let (mut tgt, _) = self.load_live(tgt_id, TicketKind::TicketGranting).await?;
            let code = self.factory.create_oauth_code(&mut tgt, service.clone())?;
            match self.registry.save_all(&[&code], &mut [&mut tgt]).await {
                Ok(()) => {
                    tracing::info!(code = %redact(code.id()), "authorization code granted");
                    let resource = redact(code.id());
                    return Ok((code, principal_of(&tgt), resource));
                },
                Err(RegistryError::Conflict { .. } | RegistryError::Duplicate { .. }) => {
                    tracing::debug!(attempt, "session changed concurrently; retrying code grant");
                },
                Err(e) => return Err(e.into()),
            }
        }
        Err(CasError::TicketCreation { message: "session kept changing during code grant".into() })
    }

    /// Redeems an authorization code for an access token.
    ///
    /// The code is consumed exactly once, even by a mismatched service.
    #[tracing::instrument(skip_all, fields(ticket_id = %redact(code_id), service = %service))]
    pub async fn exchange_oauth_code(&self, code_id: &str, service: &Service) -> CasResult<Ticket> {
        let outcome = self.exchange_oauth_code_inner(code_id, service).await;
        self.audit_outcome(AuditAction::OAuthCodeExchange, code_id, &outcome).await;
        outcome.map(|(token, ..)| token)
    }

    async fn exchange_oauth_code_inner(
        &self,
        code_id: &str,
        service: &Service,
    ) -> CasResult<(Ticket, String, String)> {
        require_id(code_id, "authorization code")?;

        for attempt in 0..=self.conflict_retries {
            let (mut code, chain) = self.load_live(code_id, TicketKind::OAuthCode).await?;
            let Some(mut parent) = chain.ancestors().first().cloned() else {
                return Err(CasError::invalid_ticket(redact(code_id)));
            };
            let now = self.clock().now();

            if !code.is_valid_for(service, self.service_matching, now) {
                match self.registry.update_ticket(&mut code).await {
                    Ok(()) | Err(RegistryError::NotFound { .. }) => {},
                    Err(RegistryError::Conflict { .. }) => continue,
                    Err(e) => return Err(e.into()),
                }
                tracing::warn!(%service, "authorization code presented by another client");
                return Err(CasError::UnrecognizableService { id: redact(code_id), service: service.id.clone() });
            }

            let token = self.factory.create_access_token(&code, &mut parent)?;
            match self.registry.save_all(&[&token], &mut [&mut code, &mut parent]).await {
                Ok(()) => {},
                Err(RegistryError::Conflict { .. } | RegistryError::Duplicate { .. }) => {
                    tracing::debug!(attempt, "code or session changed concurrently; re-reading");
                    continue;
                },
                Err(RegistryError::NotFound { .. }) => return Err(CasError::invalid_ticket(redact(code_id))),
                Err(e) => return Err(e.into()),
            }

            if code.is_expired_at(now)
                && let Err(e) = self.registry.delete_ticket(code.id()).await
            {
                tracing::warn!(error = %e, "failed to remove redeemed code");
            }
            tracing::info!(access_token = %redact(token.id()), "authorization code exchanged");
            let resource = redact(token.id());
            return Ok((token, principal_of(&code), resource));
        }
        Err(CasError::invalid_ticket(redact(code_id)))
    }
}
