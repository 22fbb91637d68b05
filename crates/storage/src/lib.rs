//! Storage contract for the casket ticket registry.
//!
//! The registry never talks to a database directly. It persists encoded
//! tickets, lock leases and cache entries through [`StorageBackend`], an
//! ordered byte key-value store with compare-and-set and transactions.
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │        CentralAuthenticationService           │
//! ├───────────────────────────────────────────────┤
//! │  TicketRegistry │ LockingStrategy │ Replication│
//! ├───────────────────────────────────────────────┤
//! │        casket-storage: StorageBackend         │
//! ├──────────────┬────────────────────────────────┤
//! │ MemoryBackend│ TimeoutBackend<remote backend> │
//! └──────────────┴────────────────────────────────┘
//! ```
//!
//! ```
//! use casket_storage::{MemoryBackend, StorageBackend};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let backend = MemoryBackend::new();
//! backend.set(b"tickets/TGT-1".to_vec(), b"{}".to_vec()).await.unwrap();
//!
//! let mut txn = backend.transaction().await.unwrap();
//! txn.compare_and_set(b"tickets/ST-1".to_vec(), None, b"{}".to_vec());
//! txn.set(b"tickets/TGT-1".to_vec(), b"{\"v\":2}".to_vec());
//! txn.commit().await.unwrap();
//! # });
//! ```
//!
//! # Feature Flags
//!
//! - **`testutil`**: exposes [`testutil`] helpers and assertion macros.
//! - **`failpoints`**: activates the `memory-before-cas` and
//!   `memory-before-commit` fail points for fault-injection tests.

#![deny(unsafe_code)]

pub mod backend;
pub mod error;
pub mod memory;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod timeout;
pub mod transaction;
pub mod types;

pub use backend::{StorageBackend, prefix_range};
pub use error::{BoxError, ConfigError, StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use timeout::TimeoutBackend;
pub use transaction::Transaction;
pub use types::KeyValue;
