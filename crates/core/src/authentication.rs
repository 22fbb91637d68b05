//! Credential verification ahead of ticket issuance.
//!
//! The CAS core never inspects credentials itself. It hands an
//! [`AuthenticationTransaction`] to an [`AuthenticationManager`] and
//! embeds the resulting [`Authentication`] in the ticket-granting ticket.

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use casket_ticket::{Authentication, Clock, Principal, REMEMBER_ME_ATTRIBUTE, Service, SystemClock};
use zeroize::Zeroizing;

use crate::error::{CasError, CasResult};

/// Handler name recorded for the in-memory user store.
pub const IN_MEMORY_HANDLER: &str = "InMemoryAuthenticationHandler";

/// A username and password pair.
///
/// The password is wiped from memory on drop and never printed.
#[derive(Clone)]
pub struct Credential {
    pub username: String,
    password: Zeroizing<String>,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { username: username.into(), password: Zeroizing::new(password.into()) }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Everything presented in one login attempt.
#[derive(Debug, Clone, Default)]
pub struct AuthenticationTransaction {
    pub credentials: Vec<Credential>,
    pub service: Option<Service>,
    pub remember_me: bool,
}

impl AuthenticationTransaction {
    pub fn of(credential: Credential) -> Self {
        Self { credentials: vec![credential], ..Self::default() }
    }

    #[must_use]
    pub fn with_service(mut self, service: impl Into<Service>) -> Self {
        self.service = Some(service.into());
        self
    }

    #[must_use]
    pub fn remember_me(mut self, remember_me: bool) -> Self {
        self.remember_me = remember_me;
        self
    }
}

/// What the CAS core consumes after a login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationResult {
    pub authentication: Authentication,
    pub service: Option<Service>,
    /// Whether credentials were verified as part of this request.
    pub credential_provided: bool,
}

impl AuthenticationResult {
    pub fn new(authentication: Authentication, service: Option<Service>) -> Self {
        Self { authentication, service, credential_provided: true }
    }

    pub fn principal_id(&self) -> &str {
        &self.authentication.principal.id
    }
}

/// Verifies credentials.
#[async_trait]
pub trait AuthenticationManager: Send + Sync {
    /// Succeeds if at least one credential in the transaction is accepted.
    async fn authenticate(&self, transaction: &AuthenticationTransaction) -> CasResult<AuthenticationResult>;
}

/// Accepts a fixed set of username/password pairs.
pub struct InMemoryAuthenticationManager {
    users: HashMap<String, Zeroizing<String>>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for InMemoryAuthenticationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryAuthenticationManager").field("users", &self.users.len()).finish()
    }
}

impl InMemoryAuthenticationManager {
    pub fn new<I, U, P>(users: I) -> Self
    where
        I: IntoIterator<Item = (U, P)>,
        U: Into<String>,
        P: Into<String>,
    {
        Self::with_clock(users, Arc::new(SystemClock))
    }

    pub fn with_clock<I, U, P>(users: I, clock: Arc<dyn Clock>) -> Self
    where
        I: IntoIterator<Item = (U, P)>,
        U: Into<String>,
        P: Into<String>,
    {
        let users = users.into_iter().map(|(u, p)| (u.into(), Zeroizing::new(p.into()))).collect();
        Self { users, clock }
    }

    fn accepts(&self, credential: &Credential) -> bool {
        self.users
            .get(&credential.username)
            .is_some_and(|expected| expected.as_bytes() == credential.password().as_bytes())
    }
}

#[async_trait]
impl AuthenticationManager for InMemoryAuthenticationManager {
    #[tracing::instrument(skip_all, fields(credentials = transaction.credentials.len()))]
    async fn authenticate(&self, transaction: &AuthenticationTransaction) -> CasResult<AuthenticationResult> {
        if transaction.credentials.is_empty() {
            return Err(CasError::Authentication { message: "no credentials presented".into() });
        }

        let mut principal = None;
        let mut failures = Vec::new();
        for credential in &transaction.credentials {
            if self.accepts(credential) {
                principal.get_or_insert_with(|| Principal::new(credential.username.clone()));
            } else {
                failures.push(IN_MEMORY_HANDLER.to_owned());
            }
        }

        let Some(principal) = principal else {
            tracing::debug!("all credentials rejected");
            return Err(CasError::Authentication { message: "credentials rejected".into() });
        };

        let mut authentication =
            Authentication::new(principal, self.clock.now()).with_success(IN_MEMORY_HANDLER);
        authentication.failures = failures;
        if transaction.remember_me {
            authentication = authentication.with_attribute(REMEMBER_ME_ATTRIBUTE, "true");
        }
        Ok(AuthenticationResult::new(authentication, transaction.service.clone()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn manager() -> InMemoryAuthenticationManager {
        InMemoryAuthenticationManager::new([("casuser", "Mellon"), ("admin", "s3cret")])
    }

    #[tokio::test]
    async fn accepts_known_user() {
        let tx = AuthenticationTransaction::of(Credential::new("casuser", "Mellon")).with_service("https://app");
        let result = manager().authenticate(&tx).await.unwrap();

        assert_eq!(result.principal_id(), "casuser");
        assert!(result.credential_provided);
        assert_eq!(result.service, Some(Service::new("https://app")));
        assert_eq!(result.authentication.successes, vec![IN_MEMORY_HANDLER]);
        assert!(!result.authentication.is_remember_me());
    }

    #[tokio::test]
    async fn one_good_credential_is_enough() {
        let tx = AuthenticationTransaction {
            credentials: vec![Credential::new("casuser", "wrong"), Credential::new("admin", "s3cret")],
            ..AuthenticationTransaction::default()
        };
        let result = manager().authenticate(&tx).await.unwrap();
        assert_eq!(result.principal_id(), "admin");
        assert_eq!(result.authentication.failures.len(), 1);
    }

    #[tokio::test]
    async fn rejects_bad_password_and_empty_transaction() {
        let bad = AuthenticationTransaction::of(Credential::new("casuser", "nope"));
        assert!(matches!(manager().authenticate(&bad).await, Err(CasError::Authentication { .. })));

        let empty = AuthenticationTransaction::default();
        assert!(matches!(manager().authenticate(&empty).await, Err(CasError::Authentication { .. })));
    }

    #[tokio::test]
    async fn remember_me_sets_attribute() {
        let tx = AuthenticationTransaction::of(Credential::new("casuser", "Mellon")).remember_me(true);
        let result = manager().authenticate(&tx).await.unwrap();
        assert!(result.authentication.is_remember_me());
    }

    #[test]
    fn password_is_not_printed() {
        let rendered = format!("{:?}", Credential::new("casuser", "Mellon"));
        assert!(!rendered.contains("Mellon"));
        assert!(rendered.contains("casuser"));
    }
}
