//! Authentication capabilities used by the login flow.
//!
//! Checking a password and keeping a session are two separate traits so the
//! account service stays unaware of either.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::crypto::{CredentialHasher, CryptoError};
use crate::user::{
    AccountError, AccountService, EmailAddress, PasswordHash, UserId,
};

/// Authenticated identity handed to the session layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub id: UserId,
    pub email: EmailAddress,
    pub name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Unknown email, wrong password and inactive account look the same.
    #[error("bad credentials")]
    BadCredentials,
    #[error("invalid session: {0}")]
    InvalidSession(#[from] jsonwebtoken::errors::Error),
    #[error("session subject is malformed")]
    MalformedSubject,
    #[error(transparent)]
    Account(AccountError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Port checking an email and password pair.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Principal, AuthError>;
}

/// Port issuing and resolving opaque session tokens.
pub trait SessionIssuer: Send + Sync {
    /// Create a session token for `principal`.
    fn issue(&self, principal: &Principal) -> Result<String, AuthError>;

    /// Check a session token and return whom it was issued to.
    fn resolve(&self, token: &str) -> Result<Principal, AuthError>;
}

/// Verify credentials against stored password hashes.
pub struct PasswordVerifier {
    accounts: Arc<AccountService>,
    hasher: Arc<dyn CredentialHasher>,
    /// Checked when there is no usable hash, so every failed login costs
    /// one Argon2 run.
    decoy: PasswordHash,
}

impl PasswordVerifier {
    /// Create a new [`PasswordVerifier`].
    pub fn new(
        accounts: Arc<AccountService>,
        hasher: Arc<dyn CredentialHasher>,
    ) -> Result<Self, CryptoError> {
        let decoy = hasher.hash(&crate::user::generate_token())?;
        Ok(Self {
            accounts,
            hasher,
            decoy,
        })
    }

    fn reject(&self, password: &str) -> Result<Principal, AuthError> {
        self.hasher.verify(password, &self.decoy)?;
        Err(AuthError::BadCredentials)
    }
}

#[async_trait]
impl CredentialVerifier for PasswordVerifier {
    async fn verify(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Principal, AuthError> {
        let subject = match self.accounts.find_credential_subject(email).await
        {
            Ok(subject) => subject,
            Err(AccountError::NotFound) => {
                tracing::debug!("login attempt for unknown email");
                return self.reject(password);
            },
            Err(err) => return Err(AuthError::Account(err)),
        };

        let Some(hash) = subject.password_hash.filter(|_| subject.enabled)
        else {
            tracing::debug!(user_id = %subject.id, "login attempt on inactive account");
            return self.reject(password);
        };

        if !self.hasher.verify(password, &hash)? {
            tracing::debug!(user_id = %subject.id, "login attempt with wrong password");
            return Err(AuthError::BadCredentials);
        }

        Ok(Principal {
            id: subject.id,
            email: subject.email,
            name: subject.name,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::testing::harness;

    /// Counts how many hashes get checked.
    struct CountingHasher {
        inner: Arc<dyn CredentialHasher>,
        verified: AtomicUsize,
    }

    impl CredentialHasher for CountingHasher {
        fn hash(&self, password: &str) -> Result<PasswordHash, CryptoError> {
            self.inner.hash(password)
        }

        fn verify(
            &self,
            password: &str,
            hash: &PasswordHash,
        ) -> Result<bool, CryptoError> {
            self.verified.fetch_add(1, Ordering::SeqCst);
            self.inner.verify(password, hash)
        }
    }

    #[tokio::test]
    async fn test_verify_credentials() {
        let h = harness();
        let verifier =
            PasswordVerifier::new(h.service.clone(), h.hasher.clone()).unwrap();

        h.service.register("Alice", "a@x.com").await.unwrap();
        let token = h.notifier.last_token().unwrap();

        // Pending account cannot log in.
        assert!(matches!(
            verifier.verify("a@x.com", "secret123").await,
            Err(AuthError::BadCredentials)
        ));

        h.service.set_password(&token, "secret123").await.unwrap();

        let principal = verifier.verify("A@x.com", "secret123").await.unwrap();
        assert_eq!(principal.email.as_str(), "a@x.com");
        assert_eq!(principal.name, "Alice");

        assert!(matches!(
            verifier.verify("a@x.com", "secret124").await,
            Err(AuthError::BadCredentials)
        ));
        assert!(matches!(
            verifier.verify("b@x.com", "secret123").await,
            Err(AuthError::BadCredentials)
        ));
    }

    #[tokio::test]
    async fn test_every_failure_runs_argon2() {
        let h = harness();
        let hasher = Arc::new(CountingHasher {
            inner: h.hasher.clone(),
            verified: AtomicUsize::new(0),
        });
        let verifier =
            PasswordVerifier::new(h.service.clone(), hasher.clone()).unwrap();
        h.service.register("Alice", "a@x.com").await.unwrap();

        // Unknown email.
        assert!(matches!(
            verifier.verify("b@x.com", "secret123").await,
            Err(AuthError::BadCredentials)
        ));
        assert_eq!(hasher.verified.load(Ordering::SeqCst), 1);

        // Pending account without password.
        assert!(matches!(
            verifier.verify("a@x.com", "secret123").await,
            Err(AuthError::BadCredentials)
        ));
        assert_eq!(hasher.verified.load(Ordering::SeqCst), 2);

        // Empty password on an unknown email.
        assert!(matches!(
            verifier.verify("b@x.com", "").await,
            Err(AuthError::BadCredentials)
        ));
        assert_eq!(hasher.verified.load(Ordering::SeqCst), 3);
    }
}
