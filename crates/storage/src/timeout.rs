//! Bounded-latency wrapper for remote backends.
//!
//! A registry pointed at a networked store must never block a request
//! indefinitely. [`TimeoutBackend`] bounds every call with
//! [`tokio::time::timeout`] and turns an elapsed deadline into
//! [`StorageError::Timeout`], which callers treat as "unavailable" rather
//! than as a statement about the data.
//!
//! A timed-out write has an unknown outcome: the inner store may or may not
//! have applied it.

use std::{future::Future, ops::RangeBounds, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    backend::StorageBackend,
    error::{StorageError, StorageResult},
    transaction::Transaction,
    types::KeyValue,
};

/// Applies a deadline to every operation of the wrapped backend.
#[derive(Debug, Clone)]
pub struct TimeoutBackend<B> {
    inner: B,
    timeout: Duration,
}

impl<B> TimeoutBackend<B> {
    /// Wraps `inner`, bounding each call by `timeout`.
    pub fn new(inner: B, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// The configured per-operation deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Borrows the wrapped backend.
    pub fn inner(&self) -> &B {
        &self.inner
    }
}

async fn bounded<T>(
    limit: Duration,
    op: &'static str,
    fut: impl Future<Output = StorageResult<T>>,
) -> StorageResult<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(op, timeout_ms = limit.as_millis() as u64, "storage operation timed out");
            Err(StorageError::Timeout)
        },
    }
}

#[async_trait]
impl<B: StorageBackend> StorageBackend for TimeoutBackend<B> {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        bounded(self.timeout, "get", self.inner.get(key)).await
    }

    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        bounded(self.timeout, "set", self.inner.set(key, value)).await
    }

    async fn compare_and_set(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
    ) -> StorageResult<()> {
        bounded(self.timeout, "compare_and_set", self.inner.compare_and_set(key, expected, new_value))
            .await
    }

    async fn delete(&self, key: &[u8]) -> StorageResult<()> {
        bounded(self.timeout, "delete", self.inner.delete(key)).await
    }

    async fn get_range<R>(&self, range: R) -> StorageResult<Vec<KeyValue>>
    where
        R: RangeBounds<Vec<u8>> + Send,
    {
        bounded(self.timeout, "get_range", self.inner.get_range(range)).await
    }

    async fn clear_range<R>(&self, range: R) -> StorageResult<()>
    where
        R: RangeBounds<Vec<u8>> + Send,
    {
        bounded(self.timeout, "clear_range", self.inner.clear_range(range)).await
    }

    async fn transaction(&self) -> StorageResult<Box<dyn Transaction>> {
        let inner = bounded(self.timeout, "transaction", self.inner.transaction()).await?;
        Ok(Box::new(TimeoutTransaction { inner, timeout: self.timeout }))
    }
}

struct TimeoutTransaction {
    inner: Box<dyn Transaction>,
    timeout: Duration,
}

#[async_trait]
impl Transaction for TimeoutTransaction {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        bounded(self.timeout, "txn_get", self.inner.get(key)).await
    }

    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.inner.set(key, value);
    }

    fn delete(&mut self, key: Vec<u8>) {
        self.inner.delete(key);
    }

    fn compare_and_set(&mut self, key: Vec<u8>, expected: Option<Vec<u8>>, new_value: Vec<u8>) {
        self.inner.compare_and_set(key, expected, new_value);
    }

    fn compare_and_delete(&mut self, key: Vec<u8>, expected: Vec<u8>) {
        self.inner.compare_and_delete(key, expected);
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let Self { inner, timeout } = *self;
        bounded(timeout, "commit", inner.commit()).await
    }
}
