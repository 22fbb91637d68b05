//! Single logout: telling services that a session ended.
//!
//! When a TGT is destroyed, every service that received a ticket in that
//! session (directly, or through a proxy chain hanging off it) gets one
//! [`LogoutRequest`]. Delivery is best-effort and never blocks or undoes
//! the destruction.

use std::{collections::BTreeMap, fmt, sync::Arc};

use async_trait::async_trait;
use casket_registry::{DEFAULT_MAX_CHAIN_DEPTH, TicketRegistry};
use casket_ticket::{Clock, Service, Ticket, TicketState, redact};
use serde::{Deserialize, Serialize};

use crate::{
    error::CasResult,
    services::{LogoutType, ServicesManager},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogoutStatus {
    NotAttempted,
    Success,
    Failure,
}

/// A back-channel logout notification for one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoutRequest {
    pub service: Service,
    /// The service ticket that was issued to the service.
    pub ticket_id: String,
    pub registered_service_id: u64,
    pub status: LogoutStatus,
}

/// Delivers logout requests.
#[async_trait]
pub trait LogoutHandler: Send + Sync {
    /// Returns whether the service acknowledged the request.
    async fn deliver(&self, request: &LogoutRequest) -> bool;
}

/// Collects and optionally delivers logout requests.
pub struct DefaultLogoutManager {
    services: Arc<dyn ServicesManager>,
    handler: Option<Arc<dyn LogoutHandler>>,
    clock: Arc<dyn Clock>,
    max_depth: usize,
}

impl fmt::Debug for DefaultLogoutManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultLogoutManager")
            .field("delivers", &self.handler.is_some())
            .field("max_depth", &self.max_depth)
            .finish_non_exhaustive()
    }
}

impl DefaultLogoutManager {
    pub fn new(services: Arc<dyn ServicesManager>, clock: Arc<dyn Clock>) -> Self {
        Self { services, handler: None, clock, max_depth: DEFAULT_MAX_CHAIN_DEPTH }
    }

    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn LogoutHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Builds (and delivers, if a handler is set) the logout requests for `tgt`.
    ///
    /// Services are collected from `tgt` and from every proxy-granting ticket
    /// below it, deduplicated by service id. A service is skipped when its
    /// definition opts out of logout, when it is not registered, or when its
    /// ticket is still stored, expired and was never used.
    #[tracing::instrument(skip_all, fields(ticket_id = %redact(tgt.id())))]
    pub async fn perform_logout<R: TicketRegistry + ?Sized>(
        &self,
        registry: &R,
        tgt: &Ticket,
    ) -> CasResult<Vec<LogoutRequest>> {
        let now = self.clock.now();
        let mut by_service: BTreeMap<String, (String, Service)> = BTreeMap::new();
        let mut pending = vec![(tgt.clone(), 0usize)];

        while let Some((granting, depth)) = pending.pop() {
            let Some(data) = granting.granting() else {
                continue;
            };
            for (ticket_id, service) in &data.services {
                by_service.entry(service.id.clone()).or_insert_with(|| (ticket_id.clone(), service.clone()));
            }
            if depth >= self.max_depth {
                tracing::warn!(depth, "proxy chain deeper than allowed; not descending further");
                continue;
            }
            for pgt_id in data.proxy_granting_tickets.keys() {
                if let Some(pgt) = registry.get_ticket(pgt_id).await? {
                    pending.push((pgt, depth + 1));
                }
            }
        }

        let mut requests = Vec::new();
        for (ticket_id, service) in by_service.into_values() {
            let Some(registered) = self.services.find_service_by(&service).await else {
                tracing::debug!(service = %service, "unregistered service skipped");
                continue;
            };
            if registered.logout_type == LogoutType::None {
                continue;
            }
            if let Some(ticket) = registry.get_ticket(&ticket_id).await?
                && ticket.is_expired_at(now)
                && ticket.count_of_uses() == 0
            {
                tracing::debug!(ticket_id = %redact(&ticket_id), "never-used expired ticket skipped");
                continue;
            }
            requests.push(LogoutRequest {
                service,
                ticket_id,
                registered_service_id: registered.id,
                status: LogoutStatus::NotAttempted,
            });
        }

        if let Some(handler) = &self.handler {
            for request in &mut requests {
                let delivered = handler.deliver(request).await;
                request.status = if delivered { LogoutStatus::Success } else { LogoutStatus::Failure };
                if !delivered {
                    tracing::warn!(service = %request.service, "logout delivery failed");
                }
            }
        }
        Ok(requests)
    }
}
