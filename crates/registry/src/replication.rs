//! Converging per-node state through a shared distributed cache.
//!
//! Each node keeps its own copy of some entity set (registered services, in
//! practice) and consults the distributed cache on every lookup. Entries
//! carry the publishing node and a timestamp; conflicts resolve
//! last-writer-wins. Deletions are published as tombstones so that other
//! nodes can tell "deleted" apart from "not yet published".

use std::{collections::BTreeMap, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use casket_ticket::Clock;
use chrono::{DateTime, Utc};
use moka::future::Cache;

/// Property key marking a cache entry's event.
pub const EVENT_PROPERTY: &str = "event";

/// Event value for tombstones.
pub const DELETED_EVENT: &str = "deleted";

/// Default number of entries the in-memory cache holds.
pub const DEFAULT_CACHE_CAPACITY: u64 = 10_000;

/// Something that can be replicated.
pub trait Replicable: Clone + Send + Sync + 'static {
    /// The instant this value was last changed, used for last-writer-wins.
    fn last_modified(&self) -> DateTime<Utc>;
}

/// One entry in the distributed cache.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributedCacheObject<V> {
    value: Option<V>,
    publisher: String,
    timestamp: DateTime<Utc>,
    properties: BTreeMap<String, String>,
}

impl<V> DistributedCacheObject<V> {
    pub fn new(value: V, publisher: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self { value: Some(value), publisher: publisher.into(), timestamp, properties: BTreeMap::new() }
    }

    /// A deletion marker.
    pub fn tombstone(publisher: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            value: None,
            publisher: publisher.into(),
            timestamp,
            properties: BTreeMap::from([(EVENT_PROPERTY.to_owned(), DELETED_EVENT.to_owned())]),
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.property(EVENT_PROPERTY) == Some(DELETED_EVENT)
    }

    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<V> {
        self.value
    }

    pub fn publisher(&self) -> &str {
        &self.publisher
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }
}

/// The cluster-wide cache nodes publish into.
#[async_trait]
pub trait DistributedCacheManager<V: Replicable>: Send + Sync {
    async fn get(&self, key: &str) -> Option<DistributedCacheObject<V>>;

    async fn set(&self, key: &str, object: DistributedCacheObject<V>);

    async fn remove(&self, key: &str);

    /// Snapshot of every entry, tombstones included.
    async fn get_all(&self) -> Vec<(String, DistributedCacheObject<V>)>;
}

/// A [`DistributedCacheManager`] held in process memory.
///
/// Clones share the same entries, which is how tests simulate several nodes
/// attached to one cache. Entries expire after the replication window.
#[derive(Clone)]
pub struct MemoryDistributedCache<V: Replicable> {
    cache: Cache<String, DistributedCacheObject<V>>,
}

impl<V: Replicable> fmt::Debug for MemoryDistributedCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDistributedCache").field("entries", &self.cache.entry_count()).finish()
    }
}

impl<V: Replicable> MemoryDistributedCache<V> {
    pub fn new(time_to_live: Duration) -> Self {
        Self::with_capacity(time_to_live, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(time_to_live: Duration, max_capacity: u64) -> Self {
        Self { cache: Cache::builder().time_to_live(time_to_live).max_capacity(max_capacity).build() }
    }
}

#[async_trait]
impl<V: Replicable> DistributedCacheManager<V> for MemoryDistributedCache<V> {
    async fn get(&self, key: &str) -> Option<DistributedCacheObject<V>> {
        self.cache.get(key).await
    }

    async fn set(&self, key: &str, object: DistributedCacheObject<V>) {
        self.cache.insert(key.to_owned(), object).await;
    }

    async fn remove(&self, key: &str) {
        self.cache.invalidate(key).await;
    }

    async fn get_all(&self) -> Vec<(String, DistributedCacheObject<V>)> {
        self.cache.iter().map(|(k, v)| (k.as_ref().clone(), v)).collect()
    }
}

/// What a node should do with its local copy after consulting the cache.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<V> {
    /// Neither side knows the key.
    Absent,
    /// A peer deleted the entity; drop the local copy.
    Deleted,
    /// The cache holds a newer (or the only) value; store it locally.
    Adopted(V),
    /// The local value stands. It has been published if the cache lacked it.
    Local(V),
}

impl<V> Resolution<V> {
    /// The value a lookup should return.
    pub fn into_value(self) -> Option<V> {
        match self {
            Self::Adopted(v) | Self::Local(v) => Some(v),
            Self::Absent | Self::Deleted => None,
        }
    }
}

/// Per-node replication logic over a shared cache.
pub struct ReplicationStrategy<V: Replicable> {
    node_id: String,
    cache: Arc<dyn DistributedCacheManager<V>>,
    clock: Arc<dyn Clock>,
}

impl<V: Replicable> fmt::Debug for ReplicationStrategy<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicationStrategy").field("node_id", &self.node_id).finish_non_exhaustive()
    }
}

impl<V: Replicable> ReplicationStrategy<V> {
    pub fn new(
        node_id: impl Into<String>,
        cache: Arc<dyn DistributedCacheManager<V>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { node_id: node_id.into(), cache, clock }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Reconciles the local copy of `key` with the cache.
    #[tracing::instrument(skip(self, local), fields(node = %self.node_id))]
    pub async fn resolve(&self, key: &str, local: Option<V>) -> Resolution<V> {
        let Some(entry) = self.cache.get(key).await else {
            return match local {
                Some(value) => {
                    self.publish(key, &value).await;
                    Resolution::Local(value)
                },
                None => Resolution::Absent,
            };
        };

        if entry.is_tombstone() {
            // A value changed after the deletion is a re-creation and wins.
            if let Some(value) = local
                && value.last_modified() > entry.timestamp()
            {
                self.publish(key, &value).await;
                return Resolution::Local(value);
            }
            tracing::debug!(publisher = entry.publisher(), "tombstone observed");
            return Resolution::Deleted;
        }

        match local {
            Some(value) if value.last_modified() >= entry.timestamp() => {
                if value.last_modified() > entry.timestamp() {
                    self.publish(key, &value).await;
                }
                Resolution::Local(value)
            },
            _ => {
                let publisher = entry.publisher().to_owned();
                match entry.into_value() {
                    Some(value) => {
                        tracing::debug!(%publisher, "adopting replicated value");
                        Resolution::Adopted(value)
                    },
                    None => Resolution::Absent,
                }
            },
        }
    }

    /// Announces a created or changed value.
    pub async fn publish(&self, key: &str, value: &V) {
        let entry = DistributedCacheObject::new(value.clone(), self.node_id.clone(), value.last_modified());
        self.cache.set(key, entry).await;
    }

    /// Announces a deletion. Must be called before the local copy is removed.
    #[tracing::instrument(skip(self), fields(node = %self.node_id))]
    pub async fn publish_deletion(&self, key: &str) {
        let tombstone = DistributedCacheObject::tombstone(self.node_id.clone(), self.clock.now());
        self.cache.set(key, tombstone).await;
    }

    /// Keys known to the cache, tombstones included.
    pub async fn known_keys(&self) -> Vec<String> {
        self.cache.get_all().await.into_iter().map(|(k, _)| k).collect()
    }
}
