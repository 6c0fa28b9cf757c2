//! Persistence ports for users and verification tokens.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{EmailAddress, PasswordHash, TokenId, User, UserId, VerificationToken};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors raised by a store adapter.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("email is already registered")]
    Conflict,
    #[error("SQL request failed: {0}")]
    Sql(#[from] sqlx::Error),
    #[error("stored row is corrupted: {0}")]
    Corrupted(String),
    #[error("store lock poisoned")]
    Poisoned,
}

/// Pending account and its first token, inserted together.
#[derive(Debug, Clone)]
pub struct PendingAccount<'a> {
    pub name: &'a str,
    pub email: &'a EmailAddress,
    pub token: &'a str,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Port for user persistence.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Find a user by identifier.
    async fn find_by_id(&self, id: UserId) -> StoreResult<Option<User>>;

    /// Find a user by normalized email.
    async fn find_by_email(
        &self,
        email: &EmailAddress,
    ) -> StoreResult<Option<User>>;

    /// Insert a disabled user without password together with its
    /// activation token, in one transaction.
    ///
    /// # Errors
    ///
    /// [`StoreError::Conflict`] when the email is already taken, including
    /// when a concurrent registration won the race.
    async fn create_pending(
        &self,
        account: PendingAccount<'_>,
    ) -> StoreResult<(User, VerificationToken)>;

    /// Remove a user that never got activated, with its tokens.
    ///
    /// Returns `false` if the user is gone or already active.
    async fn discard_pending(&self, id: UserId) -> StoreResult<bool>;

    /// Set the password hash, enable the user and delete the consumed token
    /// in one transaction.
    ///
    /// Returns `false` and applies nothing if the token no longer exists,
    /// for instance because a concurrent request consumed it first.
    async fn activate(
        &self,
        id: UserId,
        hash: &PasswordHash,
        consumed: TokenId,
    ) -> StoreResult<bool>;
}

/// Port for verification token persistence.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Insert a new token for a user.
    async fn insert(
        &self,
        user_id: UserId,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<VerificationToken>;

    /// Find a token by its string, expired or not.
    async fn find_by_token(
        &self,
        token: &str,
    ) -> StoreResult<Option<VerificationToken>>;

    /// Delete every token owned by a user and insert `token` in their
    /// place, in one transaction. Concurrent calls for the same user are
    /// serialized, so exactly one token survives.
    ///
    /// Returns how many tokens were superseded, with the new token.
    async fn replace_for_user(
        &self,
        user_id: UserId,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<(u64, VerificationToken)>;

    /// Delete a single token by its string.
    async fn delete(&self, token: &str) -> StoreResult<bool>;

    /// Delete tokens whose expiry is at or before `now`.
    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}
