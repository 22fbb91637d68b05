//! Target services and how a presented service is matched against the one
//! a ticket was issued for.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A service (usually a URL) a ticket is issued for or validated against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Service {
    /// Service identifier exactly as presented.
    pub id: String,
}

impl Service {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// The identifier in normalized URL form. See [`normalize_service_url`].
    pub fn normalized(&self) -> String {
        normalize_service_url(&self.id)
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl From<&str> for Service {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for Service {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

/// How strictly a validating service must match the ticket's service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceMatchingStrategy {
    /// Byte-for-byte identifier equality.
    #[default]
    Exact,
    /// Equality after [`normalize_service_url`].
    NormalizedUrl,
}

impl ServiceMatchingStrategy {
    /// Whether `candidate` is acceptable for a ticket bound to `bound`.
    pub fn matches(self, bound: &Service, candidate: &Service) -> bool {
        match self {
            Self::Exact => bound.id == candidate.id,
            Self::NormalizedUrl => bound.normalized() == candidate.normalized(),
        }
    }
}

/// Strips the fragment, query and `;jsessionid=` path parameter, and
/// lowercases scheme and host.
///
/// ```
/// use casket_ticket::normalize_service_url;
///
/// assert_eq!(
///     normalize_service_url("HTTPS://App.Example.org/home;jsessionid=ABC?x=1#top"),
///     "https://app.example.org/home",
/// );
/// ```
pub fn normalize_service_url(url: &str) -> String {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    let mut base = &url[..end];

    if let Some(pos) = base.to_ascii_lowercase().find(";jsessionid=") {
        base = &base[..pos];
    }

    match base.find("://") {
        Some(scheme_end) => {
            let authority_start = scheme_end + 3;
            let authority_end =
                base[authority_start..].find('/').map_or(base.len(), |i| authority_start + i);
            let mut out = String::with_capacity(base.len());
            out.push_str(&base[..authority_end].to_ascii_lowercase());
            out.push_str(&base[authority_end..]);
            out
        },
        None => base.to_owned(),
    }
}
