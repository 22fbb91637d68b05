//! Registered services and the access rules attached to them.
//!
//! A service presented in a login or validation request must match a
//! [`RegisteredService`] before any ticket is issued for it. The matched
//! definition decides whether SSO applies, whether proxying is allowed and
//! whether the service receives back-channel logout.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use casket_registry::{DistributedCacheManager, Replicable, Resolution, ReplicationStrategy};
use casket_ticket::{Clock, Service, normalize_service_url};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// How a registered service recognizes service identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ServicePattern {
    /// The identifier, compared in normalized URL form.
    Exact(String),
    /// Any identifier starting with this prefix.
    Prefix(String),
}

impl ServicePattern {
    pub fn matches(&self, service: &Service) -> bool {
        match self {
            Self::Exact(expected) => {
                service.id == *expected || service.normalized() == normalize_service_url(expected)
            },
            Self::Prefix(prefix) => service.id.starts_with(prefix.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoutType {
    #[default]
    BackChannel,
    None,
}

/// A service definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
pub struct RegisteredService {
    pub id: u64,
    #[builder(into)]
    pub name: String,
    pub service_id_pattern: ServicePattern,
    #[builder(default = true)]
    pub enabled: bool,
    #[builder(default = true)]
    pub sso_enabled: bool,
    #[builder(default = false)]
    pub proxy_allowed: bool,
    #[builder(default)]
    pub logout_type: LogoutType,
    /// Lower values are consulted first.
    #[builder(default)]
    pub evaluation_order: i32,
    #[builder(default = Utc::now())]
    pub last_modified: DateTime<Utc>,
}

impl RegisteredService {
    pub fn matches(&self, service: &Service) -> bool {
        self.service_id_pattern.matches(service)
    }
}

impl Replicable for RegisteredService {
    fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }
}

/// Lookup and maintenance of registered services.
#[async_trait]
pub trait ServicesManager: Send + Sync {
    /// The first definition matching `service`, by evaluation order.
    async fn find_service_by(&self, service: &Service) -> Option<RegisteredService>;

    async fn find_service_by_id(&self, id: u64) -> Option<RegisteredService>;

    /// Stores a definition, replacing any with the same id.
    async fn save(&self, service: RegisteredService) -> RegisteredService;

    async fn delete(&self, id: u64) -> Option<RegisteredService>;

    /// Every definition, by evaluation order.
    async fn get_all_services(&self) -> Vec<RegisteredService>;

    /// Refreshes from the backing source. Returns the number of definitions.
    async fn load(&self) -> usize;
}

/// Definitions held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryServicesManager {
    services: RwLock<BTreeMap<u64, RegisteredService>>,
}

impl InMemoryServicesManager {
    pub fn new(services: impl IntoIterator<Item = RegisteredService>) -> Self {
        Self { services: RwLock::new(services.into_iter().map(|s| (s.id, s)).collect()) }
    }

    fn ordered(&self) -> Vec<RegisteredService> {
        let mut all: Vec<_> = self.services.read().values().cloned().collect();
        all.sort_by_key(|s| (s.evaluation_order, s.id));
        all
    }

    fn get(&self, id: u64) -> Option<RegisteredService> {
        self.services.read().get(&id).cloned()
    }

    fn put(&self, service: RegisteredService) {
        self.services.write().insert(service.id, service);
    }

    fn remove(&self, id: u64) -> Option<RegisteredService> {
        self.services.write().remove(&id)
    }

    fn ids(&self) -> Vec<u64> {
        self.services.read().keys().copied().collect()
    }
}

#[async_trait]
impl ServicesManager for InMemoryServicesManager {
    async fn find_service_by(&self, service: &Service) -> Option<RegisteredService> {
        self.ordered().into_iter().find(|s| s.matches(service))
    }

    async fn find_service_by_id(&self, id: u64) -> Option<RegisteredService> {
        self.get(id)
    }

    async fn save(&self, service: RegisteredService) -> RegisteredService {
        self.put(service.clone());
        service
    }

    async fn delete(&self, id: u64) -> Option<RegisteredService> {
        self.remove(id)
    }

    async fn get_all_services(&self) -> Vec<RegisteredService> {
        self.ordered()
    }

    async fn load(&self) -> usize {
        self.services.read().len()
    }
}

/// Per-node definitions kept convergent with peers through a distributed cache.
///
/// Every lookup first reconciles the local copy with the cache, so a peer's
/// save or delete is visible as soon as it reaches the cache.
#[derive(Debug)]
pub struct ReplicatedServicesManager {
    local: InMemoryServicesManager,
    replication: ReplicationStrategy<RegisteredService>,
    clock: Arc<dyn Clock>,
}

impl ReplicatedServicesManager {
    pub fn new(
        node_id: impl Into<String>,
        cache: Arc<dyn DistributedCacheManager<RegisteredService>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            local: InMemoryServicesManager::default(),
            replication: ReplicationStrategy::new(node_id, cache, Arc::clone(&clock)),
            clock,
        }
    }

    async fn reconcile(&self, id: u64) -> Option<RegisteredService> {
        match self.replication.resolve(&id.to_string(), self.local.get(id)).await {
            Resolution::Deleted => {
                self.local.remove(id);
                None
            },
            Resolution::Adopted(service) => {
                self.local.put(service.clone());
                Some(service)
            },
            Resolution::Local(service) => Some(service),
            Resolution::Absent => None,
        }
    }

    async fn reconcile_all(&self) {
        let mut ids = self.local.ids();
        ids.extend(self.replication.known_keys().await.iter().filter_map(|k| k.parse::<u64>().ok()));
        ids.sort_unstable();
        ids.dedup();
        for id in ids {
            self.reconcile(id).await;
        }
    }
}

#[async_trait]
impl ServicesManager for ReplicatedServicesManager {
    async fn find_service_by(&self, service: &Service) -> Option<RegisteredService> {
        self.reconcile_all().await;
        self.local.find_service_by(service).await
    }

    async fn find_service_by_id(&self, id: u64) -> Option<RegisteredService> {
        self.reconcile(id).await
    }

    #[tracing::instrument(skip_all, fields(node = self.replication.node_id(), service_id = service.id))]
    async fn save(&self, mut service: RegisteredService) -> RegisteredService {
        service.last_modified = self.clock.now();
        self.local.put(service.clone());
        self.replication.publish(&service.id.to_string(), &service).await;
        service
    }

    #[tracing::instrument(skip(self), fields(node = self.replication.node_id()))]
    async fn delete(&self, id: u64) -> Option<RegisteredService> {
        self.replication.publish_deletion(&id.to_string()).await;
        self.local.remove(id)
    }

    async fn get_all_services(&self) -> Vec<RegisteredService> {
        self.reconcile_all().await;
        self.local.ordered()
    }

    async fn load(&self) -> usize {
        self.reconcile_all().await;
        self.local.services.read().len()
    }
}
