//! In-memory storage backend.
//!
//! [`MemoryBackend`] keeps everything in one [`BTreeMap`] behind a
//! [`parking_lot::RwLock`]. Each operation takes the lock once, so a
//! compare-and-set is atomic with respect to every other operation on the
//! same backend, and transactions commit under a single write lock.
//!
//! ```
//! use casket_storage::{MemoryBackend, StorageBackend};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let backend = MemoryBackend::new();
//! backend.compare_and_set(b"locks/cleaner", None, b"owner-a".to_vec()).await.unwrap();
//!
//! // A second insert-if-absent loses.
//! let second = backend.compare_and_set(b"locks/cleaner", None, b"owner-b".to_vec()).await;
//! assert!(second.is_err());
//! # });
//! ```
//!
//! Data is not persisted and is not shared between processes. Clones share
//! the same map, which is how tests simulate several nodes pointing at one
//! store.

use std::{
    collections::BTreeMap,
    ops::{Bound, RangeBounds},
    sync::Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use crate::{
    backend::StorageBackend,
    error::{StorageError, StorageResult},
    transaction::Transaction,
    types::KeyValue,
};

type Map = BTreeMap<Vec<u8>, Bytes>;

/// In-memory storage backend using [`BTreeMap`].
///
/// Cheaply cloneable; all clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    data: Arc<RwLock<Map>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether the backend holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

fn matches_expected(expected: Option<&[u8]>, current: Option<&Bytes>) -> bool {
    match (expected, current) {
        (None, None) => true,
        (Some(exp), Some(cur)) => exp == &cur[..],
        _ => false,
    }
}

fn borrowed_bounds<R: RangeBounds<Vec<u8>>>(range: &R) -> (Bound<&[u8]>, Bound<&[u8]>) {
    let start = match range.start_bound() {
        Bound::Included(b) => Bound::Included(b.as_slice()),
        Bound::Excluded(b) => Bound::Excluded(b.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    };
    let end = match range.end_bound() {
        Bound::Included(b) => Bound::Included(b.as_slice()),
        Bound::Excluded(b) => Bound::Excluded(b.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    };
    (start, end)
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    #[tracing::instrument(skip_all, fields(key_len = key.len()))]
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        Ok(self.data.read().get(key).cloned())
    }

    #[tracing::instrument(skip_all, fields(key_len = key.len(), value_len = value.len()))]
    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        self.data.write().insert(key, Bytes::from(value));
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(key_len = key.len(), insert_only = expected.is_none()))]
    async fn compare_and_set(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
    ) -> StorageResult<()> {
        fail::fail_point!("memory-before-cas", |_| Err(StorageError::timeout()));

        let mut data = self.data.write();
        if !matches_expected(expected, data.get(key)) {
            return Err(StorageError::Conflict);
        }
        data.insert(key.to_vec(), Bytes::from(new_value));
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(key_len = key.len()))]
    async fn delete(&self, key: &[u8]) -> StorageResult<()> {
        self.data.write().remove(key);
        Ok(())
    }

    #[tracing::instrument(skip_all)]
    async fn get_range<R>(&self, range: R) -> StorageResult<Vec<KeyValue>>
    where
        R: RangeBounds<Vec<u8>> + Send,
    {
        let data = self.data.read();
        let results = data
            .range::<[u8], _>(borrowed_bounds(&range))
            .map(|(k, v)| KeyValue::new(Bytes::copy_from_slice(k), v.clone()))
            .collect();
        Ok(results)
    }

    #[tracing::instrument(skip_all)]
    async fn clear_range<R>(&self, range: R) -> StorageResult<()>
    where
        R: RangeBounds<Vec<u8>> + Send,
    {
        let mut data = self.data.write();
        let doomed: Vec<Vec<u8>> =
            data.range::<[u8], _>(borrowed_bounds(&range)).map(|(k, _)| k.clone()).collect();
        for key in doomed {
            data.remove(&key);
        }
        Ok(())
    }

    async fn transaction(&self) -> StorageResult<Box<dyn Transaction>> {
        Ok(Box::new(MemoryTransaction::new(self.clone())))
    }
}

/// A precondition checked at commit time.
#[derive(Debug, Clone)]
struct Precondition {
    key: Vec<u8>,
    expected: Option<Vec<u8>>,
}

/// Buffered writes against a [`MemoryBackend`].
struct MemoryTransaction {
    backend: MemoryBackend,
    preconditions: Vec<Precondition>,
    pending_writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl MemoryTransaction {
    fn new(backend: MemoryBackend) -> Self {
        Self { backend, preconditions: Vec::new(), pending_writes: BTreeMap::new() }
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        if let Some(value) = self.pending_writes.get(key) {
            return Ok(value.as_ref().map(|v| Bytes::copy_from_slice(v)));
        }
        self.backend.get(key).await
    }

    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.pending_writes.insert(key, Some(value));
    }

    fn delete(&mut self, key: Vec<u8>) {
        self.pending_writes.insert(key, None);
    }

    fn compare_and_set(&mut self, key: Vec<u8>, expected: Option<Vec<u8>>, new_value: Vec<u8>) {
        self.preconditions.push(Precondition { key: key.clone(), expected });
        self.pending_writes.insert(key, Some(new_value));
    }

    fn compare_and_delete(&mut self, key: Vec<u8>, expected: Vec<u8>) {
        self.preconditions.push(Precondition { key: key.clone(), expected: Some(expected) });
        self.pending_writes.insert(key, None);
    }

    #[tracing::instrument(
        skip_all,
        fields(writes = self.pending_writes.len(), preconditions = self.preconditions.len())
    )]
    async fn commit(self: Box<Self>) -> StorageResult<()> {
        fail::fail_point!("memory-before-commit", |_| Err(StorageError::timeout()));

        let mut data = self.backend.data.write();
        for pre in &self.preconditions {
            if !matches_expected(pre.expected.as_deref(), data.get(&pre.key)) {
                return Err(StorageError::Conflict);
            }
        }
        for (key, value) in self.pending_writes {
            match value {
                Some(v) => {
                    data.insert(key, Bytes::from(v));
                },
                None => {
                    data.remove(&key);
                },
            }
        }
        Ok(())
    }
}
