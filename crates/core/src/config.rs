//! Server configuration.
//!
//! [`CasConfig`] deserializes from any serde format; durations are written
//! in humantime form (`"8h"`, `"30s"`). Loading files is left to the
//! embedding application. Either construct through
//! [`CasConfig::builder`], which validates, or call
//! [`CasConfig::validate`] after deserializing.
//!
//! ```
//! use casket_core::CasConfig;
//!
//! let config: CasConfig = serde_json::from_str(
//!     r#"{ "tgt": { "max_time_to_live": "10s", "time_to_kill": "5s" },
//!          "st": { "number_of_uses": 2 },
//!          "service_matching": "normalized_url" }"#,
//! )
//! .unwrap();
//! config.validate().unwrap();
//! assert_eq!(config.st.number_of_uses, 2);
//! ```

use std::{sync::Arc, time::Duration};

use casket_registry::{DEFAULT_MAX_CHAIN_DEPTH, DefaultTicketRegistry, RetryPolicy, StorageLockingStrategy};
use casket_storage::{ConfigError, StorageBackend, TimeoutBackend};
use casket_ticket::{
    Clock, GrantingExpirationConfig, ServiceMatchingStrategy, TicketPolicies, UseLimitedExpirationConfig,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    pub code_number_of_uses: u32,
    #[serde(with = "humantime_serde")]
    pub code_time_to_kill: Duration,
    #[serde(with = "humantime_serde")]
    pub access_token_time_to_kill: Duration,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            code_number_of_uses: 1,
            code_time_to_kill: Duration::from_secs(30),
            access_token_time_to_kill: Duration::from_secs(2 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Bound on each call to a remote store.
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,
    /// Longest parent chain followed before the graph is declared corrupt.
    pub max_chain_depth: usize,
    pub read_retry: RetryPolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_secs(5),
            max_chain_depth: DEFAULT_MAX_CHAIN_DEPTH,
            read_retry: RetryPolicy::default(),
        }
    }
}

impl RegistryConfig {
    /// A registry over `backend` with every call bounded by
    /// `operation_timeout`.
    pub fn build_registry<S: StorageBackend>(&self, backend: S) -> DefaultTicketRegistry<TimeoutBackend<S>> {
        DefaultTicketRegistry::new(TimeoutBackend::new(backend, self.operation_timeout))
            .with_read_retry(self.read_retry.clone())
            .with_max_chain_depth(self.max_chain_depth)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanerConfig {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Lease length. Must exceed the longest expected sweep.
    #[serde(with = "humantime_serde")]
    pub lock_timeout: Duration,
    pub app_id: String,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(120),
            lock_timeout: Duration::from_secs(60 * 60),
            app_id: "cas-ticket-registry-cleaner".to_owned(),
        }
    }
}

impl CleanerConfig {
    /// The cleaner lease for node `unique_id`, stored in `backend`.
    pub fn locking_strategy<S: StorageBackend>(
        &self,
        backend: Arc<S>,
        unique_id: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> StorageLockingStrategy<S> {
        StorageLockingStrategy::new(backend, self.app_id.clone(), unique_id, self.lock_timeout, clock)
    }
}

/// Everything the CAS core needs to be configured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CasConfig {
    pub tgt: GrantingExpirationConfig,
    pub st: UseLimitedExpirationConfig,
    pub pgt: GrantingExpirationConfig,
    pub pt: UseLimitedExpirationConfig,
    pub oauth: OAuthConfig,
    pub registry: RegistryConfig,
    pub cleaner: CleanerConfig,
    pub service_matching: ServiceMatchingStrategy,
    /// Keep only the newest service ticket per service in a session.
    pub track_most_recent_session: bool,
}

#[bon::bon]
impl CasConfig {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any value is out of range; see [`validate`](Self::validate).
    #[builder]
    pub fn new(
        #[builder(default)] tgt: GrantingExpirationConfig,
        #[builder(default)] st: UseLimitedExpirationConfig,
        #[builder(default)] pgt: GrantingExpirationConfig,
        #[builder(default)] pt: UseLimitedExpirationConfig,
        #[builder(default)] oauth: OAuthConfig,
        #[builder(default)] registry: RegistryConfig,
        #[builder(default)] cleaner: CleanerConfig,
        #[builder(default)] service_matching: ServiceMatchingStrategy,
        #[builder(default)] track_most_recent_session: bool,
    ) -> Result<Self, ConfigError> {
        let config = Self { tgt, st, pgt, pt, oauth, registry, cleaner, service_matching, track_most_recent_session };
        config.validate()?;
        Ok(config)
    }
}

impl CasConfig {
    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BelowMinimum`] for a use count below one or a
    /// zero duration where one is required, and [`ConfigError::Invalid`] for
    /// an empty cleaner application id.
    pub fn validate(&self) -> Result<(), ConfigError> {
        at_least_one("st.number_of_uses", self.st.number_of_uses)?;
        at_least_one("pt.number_of_uses", self.pt.number_of_uses)?;
        at_least_one("oauth.code_number_of_uses", self.oauth.code_number_of_uses)?;
        non_zero("registry.operation_timeout", self.registry.operation_timeout)?;
        non_zero("cleaner.interval", self.cleaner.interval)?;
        non_zero("cleaner.lock_timeout", self.cleaner.lock_timeout)?;
        if self.registry.max_chain_depth == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "registry.max_chain_depth",
                value: "0".into(),
                min: "1".into(),
            });
        }
        if self.cleaner.app_id.trim().is_empty() {
            return Err(ConfigError::Invalid { field: "cleaner.app_id", reason: "must not be blank".into() });
        }
        Ok(())
    }

    /// Selects the expiration policy for every ticket kind.
    pub fn policies(&self) -> TicketPolicies {
        TicketPolicies::from_config(
            &self.tgt,
            &self.st,
            &self.pgt,
            &self.pt,
            &UseLimitedExpirationConfig {
                number_of_uses: self.oauth.code_number_of_uses,
                time_to_kill: self.oauth.code_time_to_kill,
            },
            self.oauth.access_token_time_to_kill,
        )
    }
}

fn at_least_one(field: &'static str, value: u32) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::BelowMinimum { field, value: "0".into(), min: "1".into() });
    }
    Ok(())
}

fn non_zero(field: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::BelowMinimum { field, value: "0s".into(), min: "1ms".into() });
    }
    Ok(())
}
