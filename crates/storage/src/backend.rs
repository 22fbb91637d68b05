//! The storage contract the ticket registry persists through.
//!
//! Backends are byte-oriented ordered key-value stores. Higher layers encode
//! their entities (usually as JSON) and pick key prefixes so that
//! [`get_range`](StorageBackend::get_range) can enumerate one entity kind.
//!
//! The only concurrency primitive the registry needs from a backend is
//! [`compare_and_set`](StorageBackend::compare_and_set): a write that fails
//! with [`StorageError::Conflict`] when the stored bytes differ from what the
//! caller last read. Multi-key changes go through [`Transaction`].

use std::ops::RangeBounds;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;

use crate::{StorageError, error::StorageResult, transaction::Transaction, types::KeyValue};

/// Abstract ordered key-value store.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Returns the value stored at `key`, or `None`.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Stores `value` at `key`, replacing whatever was there.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()>;

    /// Atomically replaces the value at `key` if it currently equals `expected`.
    ///
    /// `expected = None` means "insert only if absent".
    #[must_use = "compare-and-set may fail with a conflict and errors must be handled"]
    async fn compare_and_set(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
    ) -> StorageResult<()>;

    /// JSON-encoding convenience over [`compare_and_set`](Self::compare_and_set).
    ///
    /// The expected value is re-encoded, so callers must use a serializer
    /// whose output is deterministic for equal values.
    #[must_use = "compare-and-set may fail with a conflict and errors must be handled"]
    async fn compare_and_set_json<T>(
        &self,
        key: &[u8],
        expected: Option<&T>,
        new_value: &T,
    ) -> StorageResult<()>
    where
        T: Serialize + Send + Sync,
    {
        let expected_bytes = expected
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|e| StorageError::serialization(e.to_string()))?;
        let new_bytes = serde_json::to_vec(new_value)?;
        self.compare_and_set(key, expected_bytes.as_deref(), new_bytes).await
    }

    /// Removes `key` if present.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn delete(&self, key: &[u8]) -> StorageResult<()>;

    /// Returns all entries whose keys fall in `range`, in key order.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get_range<R>(&self, range: R) -> StorageResult<Vec<KeyValue>>
    where
        R: RangeBounds<Vec<u8>> + Send;

    /// Removes all entries whose keys fall in `range`.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn clear_range<R>(&self, range: R) -> StorageResult<()>
    where
        R: RangeBounds<Vec<u8>> + Send;

    /// Starts a transaction.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn transaction(&self) -> StorageResult<Box<dyn Transaction>>;
}

/// Returns the half-open key range covering every key that starts with `prefix`.
#[must_use]
pub fn prefix_range(prefix: &[u8]) -> (std::ops::Bound<Vec<u8>>, std::ops::Bound<Vec<u8>>) {
    use std::ops::Bound;

    let start = Bound::Included(prefix.to_vec());
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return (start, Bound::Excluded(end));
        }
    }
    (start, Bound::Unbounded)
}
