//! Periodic removal of expired tickets.
//!
//! Every node may run a [`RegistryCleaner`]; the shared lock makes sure only
//! one of them sweeps at a time. Expired TGTs get single logout before they
//! are deleted, and deleting a ticket removes everything it granted.

use std::{fmt, sync::Arc, time::Duration};

use casket_registry::{LockingStrategy, TicketRegistry, with_lock};
use casket_ticket::{Clock, TicketKind, redact};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{config::CleanerConfig, error::CasResult, logout::DefaultLogoutManager};

pub struct RegistryCleaner {
    registry: Arc<dyn TicketRegistry>,
    lock: Arc<dyn LockingStrategy>,
    logout: Arc<DefaultLogoutManager>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for RegistryCleaner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCleaner").field("logout", &self.logout).finish_non_exhaustive()
    }
}

impl RegistryCleaner {
    pub fn new(
        registry: Arc<dyn TicketRegistry>,
        lock: Arc<dyn LockingStrategy>,
        logout: Arc<DefaultLogoutManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { registry, lock, logout, clock }
    }

    /// Runs one sweep if this node wins the lock.
    ///
    /// Returns how many expired tickets this sweep deleted; descendants
    /// removed along with them are not counted. Returns 0 without touching
    /// the registry when another node holds the lock.
    ///
    /// # Errors
    ///
    /// Fails if the lock cannot be consulted or the expired tickets cannot
    /// be listed. Failures on individual tickets are logged and skipped.
    #[tracing::instrument(skip(self))]
    pub async fn clean(&self) -> CasResult<usize> {
        match with_lock(Arc::clone(&self.lock), || self.sweep()).await? {
            Some(swept) => swept,
            None => {
                tracing::debug!("another node holds the cleaner lock; skipping");
                Ok(0)
            },
        }
    }

    async fn sweep(&self) -> CasResult<usize> {
        let now = self.clock.now();
        let expired = self.registry.get_tickets(&|t| t.is_expired_at(now)).await?;
        tracing::debug!(candidates = expired.len(), "sweeping expired tickets");

        let mut deleted = 0;
        for ticket in expired {
            if ticket.kind() == TicketKind::TicketGranting
                && let Err(e) = self.logout.perform_logout(self.registry.as_ref(), &ticket).await
            {
                tracing::warn!(ticket_id = %redact(ticket.id()), error = %e, "logout of expired session failed");
            }
            match self.registry.delete_ticket(ticket.id()).await {
                Ok(true) => deleted += 1,
                // Already removed with an expired ancestor.
                Ok(false) => {},
                Err(e) => {
                    tracing::warn!(ticket_id = %redact(ticket.id()), error = %e, "failed to delete expired ticket");
                },
            }
        }
        if deleted > 0 {
            tracing::info!(deleted, "expired tickets removed");
        }
        Ok(deleted)
    }

    /// Starts the periodic sweep described by `config`.
    ///
    /// Returns `None` when the cleaner is disabled.
    pub fn schedule(self: Arc<Self>, config: &CleanerConfig, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        if !config.enabled {
            tracing::info!("registry cleaner disabled");
            return None;
        }
        Some(self.spawn(config.interval, shutdown))
    }

    /// Runs [`clean`](Self::clean) every `interval` until `shutdown` fires.
    ///
    /// The first sweep happens one full interval after spawning.
    ///
    /// # Panics
    ///
    /// Must be called within a Tokio runtime context.
    pub fn spawn(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("registry cleaner shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.clean().await {
                            tracing::warn!(error = %e, "registry cleaning failed");
                        }
                    }
                }
            }
        })
    }
}
