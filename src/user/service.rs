//! Account lifecycle: registration, activation, password recovery.

use std::fmt;
use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use url::Url;

use super::{
    AccountStore, EmailAddress, PasswordHash, PendingAccount, StoreError,
    TokenStore, User, UserId, generate_token,
};
use crate::clock::Clock;
use crate::crypto::{CredentialHasher, CryptoError};
use crate::mail::{Notifier, NotifyError, Template};

/// Lifetime of activation and reset tokens, in minutes.
pub const DEFAULT_TOKEN_TTL_MINUTES: i64 = 30;

/// Errors returned by [`AccountService`].
///
/// `Display` is the message shown to the end user.
#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("User with this email already exists")]
    AlreadyExists,
    #[error("Invalid email address.")]
    InvalidEmail,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Invalid or expired password reset token.")]
    InvalidResetToken,
    #[error("Passwords do not match.")]
    PasswordMismatch,
    #[error("Error: User not found for the provided token.")]
    ActivationOwnerMissing,
    #[error("Error: User associated with token not found.")]
    ResetOwnerMissing,
    #[error("user not found")]
    NotFound,

    #[error("Failed to send verification email. Registration failed.")]
    ActivationMail(#[source] NotifyError),
    #[error("Failed to send password reset email.")]
    ResetMail(#[source] NotifyError),

    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl AccountError {
    /// Whether the request failed because of a dependency rather than the
    /// caller's input.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AccountError::ActivationMail(_)
                | AccountError::ResetMail(_)
                | AccountError::Store(_)
                | AccountError::Crypto(_)
        )
    }
}

type Result<T> = std::result::Result<T, AccountError>;

/// Successful result of an account operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Registered,
    PasswordSet,
    ResetRequested,
    PasswordReset,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Outcome::Registered => {
                "Registration successful. Please check your email to set your password."
            },
            Outcome::PasswordSet => "Password set successfully",
            Outcome::ResetRequested => {
                "If an account with that email exists, a password reset link has been sent."
            },
            Outcome::PasswordReset => {
                "Your password has been successfully reset."
            },
        })
    }
}

/// What the authentication layer needs to check a login.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CredentialSubject {
    pub id: UserId,
    pub name: String,
    pub email: EmailAddress,
    #[serde(skip)]
    pub password_hash: Option<PasswordHash>,
    pub enabled: bool,
}

impl From<User> for CredentialSubject {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            password_hash: user.password_hash,
            enabled: user.enabled,
        }
    }
}

/// Builds the links sent by email.
#[derive(Debug, Clone)]
pub struct Links {
    activation: Url,
    reset: Url,
}

impl Links {
    /// Create links relative to the public `base` URL of the instance.
    pub fn new(base: &Url) -> std::result::Result<Self, url::ParseError> {
        let mut base = base.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            activation: base.join("set-password")?,
            reset: base.join("reset-password")?,
        })
    }

    pub fn activation(&self, token: &str) -> Url {
        with_token(&self.activation, token)
    }

    pub fn reset(&self, token: &str) -> Url {
        with_token(&self.reset, token)
    }
}

fn with_token(url: &Url, token: &str) -> Url {
    let mut url = url.clone();
    url.query_pairs_mut().append_pair("token", token);
    url
}

/// Which flow is consuming a token.
#[derive(Debug, Clone, Copy)]
enum Flow {
    Activation,
    Reset,
}

impl Flow {
    fn invalid(self) -> AccountError {
        match self {
            Flow::Activation => AccountError::InvalidToken,
            Flow::Reset => AccountError::InvalidResetToken,
        }
    }

    fn owner_missing(self) -> AccountError {
        match self {
            Flow::Activation => AccountError::ActivationOwnerMissing,
            Flow::Reset => AccountError::ResetOwnerMissing,
        }
    }
}

/// Account manager.
pub struct AccountService {
    accounts: Arc<dyn AccountStore>,
    tokens: Arc<dyn TokenStore>,
    hasher: Arc<dyn CredentialHasher>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    links: Links,
    token_ttl: Duration,
}

impl AccountService {
    /// Create a new [`AccountService`].
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        tokens: Arc<dyn TokenStore>,
        hasher: Arc<dyn CredentialHasher>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        links: Links,
    ) -> Self {
        Self {
            accounts,
            tokens,
            hasher,
            notifier,
            clock,
            links,
            token_ttl: Duration::minutes(DEFAULT_TOKEN_TTL_MINUTES),
        }
    }

    /// Change the lifetime of newly issued tokens.
    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    /// Hasher used for new passwords, shared with login verification.
    pub fn hasher(&self) -> Arc<dyn CredentialHasher> {
        Arc::clone(&self.hasher)
    }

    /// Create a pending account and email it an activation link.
    ///
    /// If the email cannot be sent the pending account is removed again, so
    /// the caller may simply retry.
    pub async fn register(&self, name: &str, email: &str) -> Result<Outcome> {
        let email = EmailAddress::parse(email).ok_or(AccountError::InvalidEmail)?;

        if self.accounts.find_by_email(&email).await?.is_some() {
            tracing::debug!(%email, "registration refused, email taken");
            return Err(AccountError::AlreadyExists);
        }

        let now = self.clock.now();
        let token = generate_token();
        let pending = PendingAccount {
            name,
            email: &email,
            token: &token,
            expires_at: now + self.token_ttl,
            created_at: now,
        };
        let (user, token) = match self.accounts.create_pending(pending).await {
            Ok(created) => created,
            Err(StoreError::Conflict) => {
                tracing::debug!(%email, "registration lost race on email");
                return Err(AccountError::AlreadyExists);
            },
            Err(err) => return Err(err.into()),
        };

        let link = self.links.activation(&token.token);
        let letter = Template::Activation {
            name: &user.name,
            link: &link,
            minutes: self.token_ttl.num_minutes(),
        }
        .render();

        if let Err(err) = self.notifier.send(&user.email, &letter).await {
            tracing::error!(user_id = %user.id, error = %err, "failed to send activation email");

            if let Err(cleanup) = self.accounts.discard_pending(user.id).await {
                tracing::error!(
                    user_id = %user.id,
                    error = %cleanup,
                    "failed to discard pending account"
                );
            }
            return Err(AccountError::ActivationMail(err));
        }

        metrics::counter!("accounts_registered_total").increment(1);
        tracing::info!(user_id = %user.id, "account registered, activation pending");

        Ok(Outcome::Registered)
    }

    /// Set the first password of an account and enable it.
    pub async fn set_password(
        &self,
        token: &str,
        password: &str,
    ) -> Result<Outcome> {
        let user_id = self.consume(token, password, Flow::Activation).await?;

        metrics::counter!("passwords_set_total").increment(1);
        tracing::info!(%user_id, "password set, account enabled");

        Ok(Outcome::PasswordSet)
    }

    /// Issue a reset token for `email` if such an account exists.
    ///
    /// Unknown addresses get the same outcome as known ones.
    pub async fn request_password_reset(&self, email: &str) -> Result<Outcome> {
        let Some(email) = EmailAddress::parse(email) else {
            return Ok(Outcome::ResetRequested);
        };
        let Some(user) = self.accounts.find_by_email(&email).await? else {
            tracing::debug!("password reset requested for unknown email");
            return Ok(Outcome::ResetRequested);
        };

        let expires_at = self.clock.now() + self.token_ttl;
        let (superseded, token) = self
            .tokens
            .replace_for_user(user.id, &generate_token(), expires_at)
            .await?;

        let link = self.links.reset(&token.token);
        let letter = Template::PasswordReset {
            name: &user.name,
            link: &link,
            minutes: self.token_ttl.num_minutes(),
        }
        .render();

        if let Err(err) = self.notifier.send(&user.email, &letter).await {
            tracing::error!(user_id = %user.id, error = %err, "failed to send password reset email");
            return Err(AccountError::ResetMail(err));
        }

        tracing::info!(user_id = %user.id, superseded, "password reset requested");

        Ok(Outcome::ResetRequested)
    }

    /// Replace the password of the account owning a reset token.
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: Option<&str>,
        confirm_password: Option<&str>,
    ) -> Result<Outcome> {
        let password = match (new_password, confirm_password) {
            (Some(new), Some(confirm)) if !new.is_empty() && new == confirm => {
                new
            },
            _ => return Err(AccountError::PasswordMismatch),
        };

        let user_id = self.consume(token, password, Flow::Reset).await?;

        metrics::counter!("password_resets_total").increment(1);
        tracing::info!(%user_id, "password reset");

        Ok(Outcome::PasswordReset)
    }

    /// Check that a reset token could currently be used.
    pub async fn check_reset_token(&self, token: &str) -> Result<()> {
        let now = self.clock.now();
        match self.tokens.find_by_token(token).await? {
            Some(token) if token.is_valid_at(now) => Ok(()),
            _ => Err(AccountError::InvalidResetToken),
        }
    }

    /// Load what is needed to verify a login attempt.
    pub async fn find_credential_subject(
        &self,
        email: &str,
    ) -> Result<CredentialSubject> {
        let email = EmailAddress::parse(email).ok_or(AccountError::NotFound)?;

        self.accounts
            .find_by_email(&email)
            .await?
            .map(CredentialSubject::from)
            .ok_or(AccountError::NotFound)
    }

    /// Delete expired tokens. Returns how many were removed.
    pub async fn purge_expired_tokens(&self) -> Result<u64> {
        let purged = self.tokens.purge_expired(self.clock.now()).await?;

        if purged > 0 {
            metrics::counter!("verification_tokens_purged_total")
                .increment(purged);
            tracing::debug!(purged, "expired verification tokens purged");
        }

        Ok(purged)
    }

    /// Validate a token, hash the password and activate in one store call.
    async fn consume(
        &self,
        token: &str,
        password: &str,
        flow: Flow,
    ) -> Result<UserId> {
        let now = self.clock.now();
        let token = match self.tokens.find_by_token(token).await? {
            Some(token) if token.is_valid_at(now) => token,
            Some(token) => {
                tracing::warn!(user_id = %token.user_id, ?flow, "expired token used");
                return Err(flow.invalid());
            },
            None => {
                tracing::warn!(?flow, "unknown token used");
                return Err(flow.invalid());
            },
        };

        let Some(user) = self.accounts.find_by_id(token.user_id).await? else {
            tracing::warn!(user_id = %token.user_id, ?flow, "token owner not found");
            self.tokens.delete(&token.token).await?;
            return Err(flow.owner_missing());
        };

        let hash = self.hasher.hash(password)?;

        if !self.accounts.activate(user.id, &hash, token.id).await? {
            tracing::warn!(user_id = %user.id, ?flow, "token consumed concurrently");
            return Err(flow.invalid());
        }

        Ok(user.id)
    }
}
