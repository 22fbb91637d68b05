//! Atomic multi-key writes.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageResult;

/// A buffered set of writes applied atomically on [`commit`](Transaction::commit).
///
/// Reads observe the transaction's own pending writes first. Compare-and-set
/// preconditions and delete preconditions are checked at commit time against
/// the committed state; if any fails, nothing is applied and commit returns
/// [`StorageError::Conflict`](crate::StorageError::Conflict).
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Reads a key, seeing this transaction's uncommitted writes.
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Buffers an unconditional write.
    fn set(&mut self, key: Vec<u8>, value: Vec<u8>);

    /// Buffers an unconditional delete.
    fn delete(&mut self, key: Vec<u8>);

    /// Buffers a write that only applies if the committed value equals `expected`
    /// (`None` meaning the key must be absent).
    fn compare_and_set(&mut self, key: Vec<u8>, expected: Option<Vec<u8>>, new_value: Vec<u8>);

    /// Buffers a delete that only applies if the committed value equals `expected`.
    fn compare_and_delete(&mut self, key: Vec<u8>, expected: Vec<u8>);

    /// Applies all buffered operations or none of them.
    async fn commit(self: Box<Self>) -> StorageResult<()>;
}
