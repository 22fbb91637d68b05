//! Ticket registry persisted through a [`StorageBackend`].
//!
//! Tickets are stored as JSON under `tickets/{id}`. Optimistic concurrency
//! rides on the backend's compare-and-set: every update re-reads the stored
//! bytes, checks the version the caller saw, and writes conditionally on
//! those exact bytes. Deletes cascade through the granting ticket's child
//! maps and commit in one transaction.

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use casket_storage::{StorageBackend, StorageError, prefix_range};
use casket_ticket::{Ticket, redact};

use crate::{
    chain::DEFAULT_MAX_CHAIN_DEPTH,
    error::{RegistryError, RegistryResult},
    registry::{TicketPredicate, TicketRegistry},
    retry::{RetryPolicy, with_read_retry},
};

const TICKET_PREFIX: &str = "tickets/";

fn ticket_key(id: &str) -> Vec<u8> {
    format!("{TICKET_PREFIX}{id}").into_bytes()
}

fn encode(ticket: &Ticket) -> RegistryResult<Vec<u8>> {
    serde_json::to_vec(ticket).map_err(|e| RegistryError::Serialization { source: e.into() })
}

fn decode(bytes: &[u8]) -> RegistryResult<Ticket> {
    serde_json::from_slice(bytes).map_err(|e| RegistryError::Serialization { source: e.into() })
}

/// The default [`TicketRegistry`].
#[derive(Debug, Clone)]
pub struct DefaultTicketRegistry<S> {
    backend: Arc<S>,
    read_retry: RetryPolicy,
    max_chain_depth: usize,
}

impl<S: StorageBackend> DefaultTicketRegistry<S> {
    pub fn new(backend: S) -> Self {
        Self::with_shared(Arc::new(backend))
    }

    /// Builds a registry over a backend shared with other components.
    pub fn with_shared(backend: Arc<S>) -> Self {
        Self { backend, read_retry: RetryPolicy::default(), max_chain_depth: DEFAULT_MAX_CHAIN_DEPTH }
    }

    #[must_use]
    pub fn with_read_retry(mut self, policy: RetryPolicy) -> Self {
        self.read_retry = policy;
        self
    }

    #[must_use]
    pub fn with_max_chain_depth(mut self, max_depth: usize) -> Self {
        self.max_chain_depth = max_depth;
        self
    }

    pub fn backend(&self) -> &Arc<S> {
        &self.backend
    }

    async fn load_raw(&self, id: &str) -> RegistryResult<Option<Bytes>> {
        with_read_retry(&self.read_retry, "get_ticket", move || async move {
            self.backend.get(&ticket_key(id)).await.map_err(|e| RegistryError::from_storage(e, &redact(id)))
        })
        .await
    }

    async fn load_all(&self) -> RegistryResult<Vec<Ticket>> {
        let entries = with_read_retry(&self.read_retry, "get_tickets", move || async move {
            self.backend.get_range(prefix_range(TICKET_PREFIX.as_bytes())).await.map_err(RegistryError::from)
        })
        .await?;
        entries.iter().map(|kv| decode(&kv.value)).collect()
    }

    /// Collects `root` and every ticket reachable through child maps.
    async fn collect_descendants(&self, root: Ticket) -> RegistryResult<Vec<String>> {
        let mut doomed = Vec::new();
        let mut seen = HashSet::new();
        let mut frontier = vec![(root, 0usize)];

        while let Some((ticket, depth)) = frontier.pop() {
            if !seen.insert(ticket.id().to_owned()) {
                continue;
            }
            if depth > self.max_chain_depth {
                return Err(RegistryError::ChainTooDeep {
                    id: redact(ticket.id()),
                    max_depth: self.max_chain_depth,
                });
            }
            if let Some(granting) = ticket.granting() {
                for child_id in granting.child_ids() {
                    if let Some(raw) = self.load_raw(child_id).await? {
                        frontier.push((decode(&raw)?, depth + 1));
                    }
                }
            }
            doomed.push(ticket.id().to_owned());
        }
        Ok(doomed)
    }
}

#[async_trait]
impl<S: StorageBackend + 'static> TicketRegistry for DefaultTicketRegistry<S> {
    #[tracing::instrument(skip_all, fields(ticket_id = %redact(ticket.id()), kind = %ticket.kind()))]
    async fn add_ticket(&self, ticket: &Ticket) -> RegistryResult<()> {
        let bytes = encode(ticket)?;
        match self.backend.compare_and_set(&ticket_key(ticket.id()), None, bytes).await {
            Ok(()) => {
                tracing::debug!("ticket added");
                Ok(())
            },
            Err(StorageError::Conflict) => Err(RegistryError::Duplicate { id: redact(ticket.id()) }),
            Err(e) => Err(RegistryError::from_storage(e, &redact(ticket.id()))),
        }
    }

    #[tracing::instrument(skip_all, fields(ticket_id = %redact(id)))]
    async fn get_ticket(&self, id: &str) -> RegistryResult<Option<Ticket>> {
        self.load_raw(id).await?.map(|raw| decode(&raw)).transpose()
    }

    #[tracing::instrument(skip_all, fields(ticket_id = %redact(ticket.id()), version = ticket.version()))]
    async fn update_ticket(&self, ticket: &mut Ticket) -> RegistryResult<()> {
        self.save_all(&[], &mut [ticket]).await
    }

    #[tracing::instrument(skip_all, fields(added = added.len(), updated = updated.len()))]
    async fn save_all(&self, added: &[&Ticket], updated: &mut [&mut Ticket]) -> RegistryResult<()> {
        let mut txn = self.backend.transaction().await.map_err(RegistryError::from)?;

        for ticket in added {
            txn.compare_and_set(ticket_key(ticket.id()), None, encode(ticket)?);
        }

        let mut next_versions = Vec::with_capacity(updated.len());
        for ticket in updated.iter() {
            let id = redact(ticket.id());
            let current = txn
                .get(&ticket_key(ticket.id()))
                .await
                .map_err(|e| RegistryError::from_storage(e, &id))?
                .ok_or_else(|| RegistryError::NotFound { id: id.clone() })?;
            let stored_version = decode(&current)?.version();
            if stored_version != ticket.version() {
                tracing::debug!(
                    ticket_id = %id,
                    stored_version,
                    seen_version = ticket.version(),
                    "stale ticket update rejected"
                );
                return Err(RegistryError::Conflict { id });
            }

            let mut next = (**ticket).clone();
            next.set_version(stored_version + 1);
            txn.compare_and_set(ticket_key(ticket.id()), Some(current.to_vec()), encode(&next)?);
            next_versions.push(stored_version + 1);
        }

        fail::fail_point!("registry-before-commit", |_| Err(RegistryError::Unavailable {
            source: StorageError::timeout(),
        }));

        match txn.commit().await {
            Ok(()) => {
                for (ticket, version) in updated.iter_mut().zip(next_versions) {
                    ticket.set_version(version);
                }
                Ok(())
            },
            Err(StorageError::Conflict) => {
                // Either an insert collided or an update raced; report the first id involved.
                let id = added
                    .first()
                    .map(|t| t.id())
                    .or_else(|| updated.first().map(|t| t.id()))
                    .map(redact)
                    .unwrap_or_default();
                if updated.is_empty() {
                    Err(RegistryError::Duplicate { id })
                } else {
                    Err(RegistryError::Conflict { id })
                }
            },
            Err(e) => Err(RegistryError::from(e)),
        }
    }

    #[tracing::instrument(skip_all, fields(ticket_id = %redact(id)))]
    async fn delete_ticket(&self, id: &str) -> RegistryResult<bool> {
        let Some(raw) = self.load_raw(id).await? else {
            return Ok(false);
        };
        let doomed = self.collect_descendants(decode(&raw)?).await?;

        let mut txn = self.backend.transaction().await.map_err(RegistryError::from)?;
        for child_id in &doomed {
            txn.delete(ticket_key(child_id));
        }
        txn.commit().await.map_err(|e| RegistryError::from_storage(e, &redact(id)))?;

        tracing::debug!(removed = doomed.len(), "ticket and descendants deleted");
        Ok(true)
    }

    #[tracing::instrument(skip_all)]
    async fn delete_all(&self) -> RegistryResult<usize> {
        let range = prefix_range(TICKET_PREFIX.as_bytes());
        let count = self.backend.get_range(range.clone()).await.map_err(RegistryError::from)?.len();
        self.backend.clear_range(range).await.map_err(RegistryError::from)?;
        tracing::info!(count, "all tickets deleted");
        Ok(count)
    }

    #[tracing::instrument(skip_all)]
    async fn get_tickets(&self, predicate: TicketPredicate<'_>) -> RegistryResult<Vec<Ticket>> {
        Ok(self.load_all().await?.into_iter().filter(|t| predicate(t)).collect())
    }

    async fn count_tickets(&self) -> RegistryResult<usize> {
        let entries = with_read_retry(&self.read_retry, "count_tickets", move || async move {
            self.backend.get_range(prefix_range(TICKET_PREFIX.as_bytes())).await.map_err(RegistryError::from)
        })
        .await?;
        Ok(entries.len())
    }
}
