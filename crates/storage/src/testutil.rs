//! Shared test helpers for code built on [`StorageBackend`].
//!
//! Enabled by the `testutil` feature:
//!
//! ```toml
//! [dev-dependencies]
//! casket-storage = { path = "../storage", features = ["testutil"] }
//! ```

use crate::{StorageBackend, backend::prefix_range, memory::MemoryBackend};

/// Creates a deterministic key such as `"tickets/000042"`.
///
/// Zero-padding keeps lexicographic order equal to numeric order.
#[must_use]
pub fn make_key(prefix: &str, idx: usize) -> Vec<u8> {
    format!("{prefix}/{idx:06}").into_bytes()
}

/// Creates a [`MemoryBackend`] holding `count` keys under `prefix`.
///
/// # Panics
///
/// Panics if a write fails, which the memory backend never does.
pub async fn populated_backend(prefix: &str, count: usize) -> MemoryBackend {
    let backend = MemoryBackend::new();
    for i in 0..count {
        backend.set(make_key(prefix, i), format!("value-{i}").into_bytes()).await.expect("populate");
    }
    backend
}

/// Lists the UTF-8 keys stored under `prefix`.
///
/// # Panics
///
/// Panics if the range read fails.
pub async fn keys_with_prefix<B: StorageBackend>(backend: &B, prefix: &str) -> Vec<String> {
    backend
        .get_range(prefix_range(prefix.as_bytes()))
        .await
        .expect("range read")
        .iter()
        .filter_map(|kv| kv.key_str().map(str::to_owned))
        .collect()
}

/// Asserts that a [`StorageResult`](crate::StorageResult) is a
/// [`StorageError::Conflict`](crate::StorageError::Conflict).
#[macro_export]
macro_rules! assert_conflict {
    ($result:expr) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::Conflict)),
            "expected StorageError::Conflict, got: {:?}",
            $result,
        );
    };
}

/// Asserts that a [`StorageResult`](crate::StorageResult) is a
/// [`StorageError::Timeout`](crate::StorageError::Timeout).
#[macro_export]
macro_rules! assert_timeout {
    ($result:expr) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::Timeout)),
            "expected StorageError::Timeout, got: {:?}",
            $result,
        );
    };
}
