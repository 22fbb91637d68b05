//! Authentication results embedded in granting tickets.
//!
//! The ticket layer treats these as opaque payloads: it stores them, chains
//! them and compares principals, but never interprets attributes beyond the
//! remember-me flag.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Attribute set to `"true"` when the user asked to be remembered.
pub const REMEMBER_ME_ATTRIBUTE: &str = "org.apereo.cas.authentication.principal.REMEMBER_ME";

/// Multi-valued attribute map.
pub type Attributes = BTreeMap<String, Vec<String>>;

/// The authenticated subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Stable principal identifier, e.g. a username.
    pub id: String,
    /// Resolved principal attributes.
    #[serde(default)]
    pub attributes: Attributes,
}

impl Principal {
    /// Creates a principal without attributes.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), attributes: Attributes::new() }
    }
}

/// Outcome of a successful credential check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authentication {
    /// Who authenticated.
    pub principal: Principal,
    /// Authentication metadata (method, remember-me, ...).
    #[serde(default)]
    pub attributes: Attributes,
    /// When the credentials were verified.
    pub authentication_date: DateTime<Utc>,
    /// Names of handlers that accepted a credential.
    #[serde(default)]
    pub successes: Vec<String>,
    /// Names of handlers that rejected a credential.
    #[serde(default)]
    pub failures: Vec<String>,
}

impl Authentication {
    pub fn new(principal: Principal, authentication_date: DateTime<Utc>) -> Self {
        Self {
            principal,
            attributes: Attributes::new(),
            authentication_date,
            successes: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Adds a single-valued authentication attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.entry(name.into()).or_default().push(value.into());
        self
    }

    /// Records a successful handler.
    #[must_use]
    pub fn with_success(mut self, handler: impl Into<String>) -> Self {
        self.successes.push(handler.into());
        self
    }

    pub fn is_remember_me(&self) -> bool {
        self.attributes
            .get(REMEMBER_ME_ATTRIBUTE)
            .is_some_and(|values| values.iter().any(|v| v.eq_ignore_ascii_case("true")))
    }
}
