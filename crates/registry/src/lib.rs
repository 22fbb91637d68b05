//! Ticket registry for the casket SSO server.
//!
//! [`TicketRegistry`] owns every ticket and the links between them. The
//! default implementation persists JSON-encoded tickets through a
//! [`StorageBackend`](casket_storage::StorageBackend) and uses its
//! compare-and-set to make concurrent updates of one ticket safe.
//!
//! Clustered deployments add two pieces:
//!
//! - [`LockingStrategy`]: a lease so that cluster-wide chores (the expired
//!   ticket sweep) run on one node at a time. [`with_lock`] scopes it.
//! - [`ReplicationStrategy`]: last-writer-wins convergence of per-node
//!   caches through a [`DistributedCacheManager`], with tombstones for
//!   deletes.
//!
//! # Feature Flags
//!
//! - **`testutil`**: exposes [`testutil`] fixtures.
//! - **`failpoints`**: activates the `registry-before-commit` and
//!   `registry-retry-before-sleep` fail points.

#![deny(unsafe_code)]

pub mod chain;
pub mod default_registry;
pub mod error;
pub mod locking;
pub mod registry;
pub mod replication;
pub mod retry;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;

pub use chain::{DEFAULT_MAX_CHAIN_DEPTH, TicketChain};
pub use default_registry::DefaultTicketRegistry;
pub use error::{RegistryError, RegistryResult};
pub use locking::{LockRecord, LockingStrategy, NoOpLockingStrategy, StorageLockingStrategy, with_lock};
pub use registry::{TicketPredicate, TicketRegistry};
pub use replication::{
    DELETED_EVENT, DistributedCacheManager, DistributedCacheObject, EVENT_PROPERTY,
    MemoryDistributedCache, Replicable, Resolution, ReplicationStrategy,
};
pub use retry::{RetryPolicy, with_read_retry};
