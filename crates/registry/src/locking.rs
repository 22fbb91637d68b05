//! Lease-based mutual exclusion across cooperating nodes.
//!
//! A lock is a record at `locks/{application_id}` naming its owner and the
//! instant the lease runs out. Acquisition inserts the record, or replaces
//! one whose lease has lapsed; both go through compare-and-set so two
//! contenders cannot both win. The lease must outlast the critical section:
//! a holder that overruns it may find another node inside as well.

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use casket_storage::{StorageBackend, StorageError};
use casket_ticket::Clock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, RegistryResult};

const LOCK_PREFIX: &str = "locks/";

/// Non-blocking, non-reentrant lock.
///
/// A failed [`acquire`](Self::acquire) is not a fault: it means another
/// owner is doing the work.
#[async_trait]
pub trait LockingStrategy: Send + Sync {
    /// Tries to take the lock. Returns `false` if it is held, including by
    /// this same owner.
    async fn acquire(&self) -> RegistryResult<bool>;

    /// Gives the lock up if this owner holds it.
    async fn release(&self) -> RegistryResult<()>;
}

/// A lock that is always granted. For single-node deployments.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpLockingStrategy;

#[async_trait]
impl LockingStrategy for NoOpLockingStrategy {
    async fn acquire(&self) -> RegistryResult<bool> {
        Ok(true)
    }

    async fn release(&self) -> RegistryResult<()> {
        Ok(())
    }
}

/// The persisted lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub application_id: String,
    pub unique_id: String,
    pub expiration_date: DateTime<Utc>,
}

/// A lease stored through a [`StorageBackend`].
pub struct StorageLockingStrategy<S> {
    backend: Arc<S>,
    application_id: String,
    unique_id: String,
    lease: Duration,
    clock: Arc<dyn Clock>,
}

impl<S> std::fmt::Debug for StorageLockingStrategy<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageLockingStrategy")
            .field("application_id", &self.application_id)
            .field("unique_id", &self.unique_id)
            .field("lease", &self.lease)
            .finish_non_exhaustive()
    }
}

impl<S: StorageBackend> StorageLockingStrategy<S> {
    /// Creates a lock for `application_id` owned by `unique_id`.
    pub fn new(
        backend: Arc<S>,
        application_id: impl Into<String>,
        unique_id: impl Into<String>,
        lease: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backend,
            application_id: application_id.into(),
            unique_id: unique_id.into(),
            lease,
            clock,
        }
    }

    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn key(&self) -> Vec<u8> {
        format!("{LOCK_PREFIX}{}", self.application_id).into_bytes()
    }

    fn storage_error(&self, err: StorageError) -> RegistryError {
        RegistryError::from_storage(err, &self.application_id)
    }

    fn fresh_record(&self, now: DateTime<Utc>) -> RegistryResult<Vec<u8>> {
        let lease = chrono::Duration::from_std(self.lease).unwrap_or(chrono::Duration::MAX);
        let record = LockRecord {
            application_id: self.application_id.clone(),
            unique_id: self.unique_id.clone(),
            expiration_date: now.checked_add_signed(lease).unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        serde_json::to_vec(&record).map_err(|e| RegistryError::Serialization { source: e.into() })
    }

    async fn current(&self) -> RegistryResult<Option<(Vec<u8>, LockRecord)>> {
        let Some(raw) = self.backend.get(&self.key()).await.map_err(|e| self.storage_error(e))? else {
            return Ok(None);
        };
        let record = serde_json::from_slice(&raw)
            .map_err(|e| RegistryError::Serialization { source: e.into() })?;
        Ok(Some((raw.to_vec(), record)))
    }
}

#[async_trait]
impl<S: StorageBackend + 'static> LockingStrategy for StorageLockingStrategy<S> {
    #[tracing::instrument(skip_all, fields(app_id = %self.application_id, owner = %self.unique_id))]
    async fn acquire(&self) -> RegistryResult<bool> {
        let now = self.clock.now();
        let expected = match self.current().await? {
            None => None,
            Some((raw, record)) => {
                if record.expiration_date > now {
                    tracing::debug!(holder = %record.unique_id, "lock held");
                    return Ok(false);
                }
                tracing::info!(
                    stale_holder = %record.unique_id,
                    expired_at = %record.expiration_date,
                    "taking over expired lock"
                );
                Some(raw)
            },
        };

        let record = self.fresh_record(now)?;
        match self.backend.compare_and_set(&self.key(), expected.as_deref(), record).await {
            Ok(()) => {
                tracing::debug!("lock acquired");
                Ok(true)
            },
            Err(StorageError::Conflict) => {
                tracing::debug!("lost lock race");
                Ok(false)
            },
            Err(e) => Err(self.storage_error(e)),
        }
    }

    #[tracing::instrument(skip_all, fields(app_id = %self.application_id, owner = %self.unique_id))]
    async fn release(&self) -> RegistryResult<()> {
        let Some((raw, record)) = self.current().await? else {
            return Ok(());
        };
        if record.unique_id != self.unique_id {
            tracing::debug!(holder = %record.unique_id, "lock owned by another node, not releasing");
            return Ok(());
        }

        let mut txn = self.backend.transaction().await.map_err(|e| self.storage_error(e))?;
        txn.compare_and_delete(self.key(), raw);
        match txn.commit().await {
            Ok(()) => {
                tracing::debug!("lock released");
                Ok(())
            },
            // Someone took the lease over between our read and the delete.
            Err(StorageError::Conflict) => Ok(()),
            Err(e) => Err(self.storage_error(e)),
        }
    }
}

/// Releases the lock if the critical section never returned normally.
struct ReleaseOnDrop {
    strategy: Option<Arc<dyn LockingStrategy>>,
}

impl ReleaseOnDrop {
    async fn release(mut self) {
        if let Some(strategy) = self.strategy.take()
            && let Err(e) = strategy.release().await
        {
            tracing::warn!(error = %e, "lock release failed; lease will lapse on its own");
        }
    }
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        let Some(strategy) = self.strategy.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = strategy.release().await {
                        tracing::warn!(error = %e, "lock release after abort failed");
                    }
                });
            },
            Err(_) => tracing::warn!("no runtime to release lock; lease will lapse on its own"),
        }
    }
}

/// Runs `critical_section` while holding the lock.
///
/// Returns `Ok(None)` without running it if the lock is held elsewhere. The
/// lock is released on every exit path: normal return, a panic inside the
/// section, or the returned future being dropped early.
pub async fn with_lock<F, Fut, T>(strategy: Arc<dyn LockingStrategy>, critical_section: F) -> RegistryResult<Option<T>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    if !strategy.acquire().await? {
        return Ok(None);
    }
    let guard = ReleaseOnDrop { strategy: Some(strategy) };
    let value = critical_section().await;
    guard.release().await;
    Ok(Some(value))
}
