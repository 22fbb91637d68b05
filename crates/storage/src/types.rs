//! Shared storage value types.

use bytes::Bytes;

/// Key-value pair returned from range queries.
///
/// ```
/// use bytes::Bytes;
/// use casket_storage::KeyValue;
///
/// let kv = KeyValue::new(Bytes::from("tickets/TGT-1"), Bytes::from("{}"));
/// assert_eq!(kv.key_str(), Some("tickets/TGT-1"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// The key identifying this entry.
    pub key: Bytes,

    /// The value stored at this key.
    pub value: Bytes,
}

impl KeyValue {
    /// Creates a new key-value pair.
    pub fn new(key: Bytes, value: Bytes) -> Self {
        Self { key, value }
    }

    /// The key as UTF-8, if it is valid UTF-8.
    pub fn key_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.key).ok()
    }
}
