//! In-memory implementation of both stores.
//!
//! Every operation holds the same lock, which gives the transactional
//! guarantees the PostgreSQL adapter gets from the database.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    AccountStore, EmailAddress, PasswordHash, PendingAccount, StoreError,
    StoreResult, TokenId, TokenStore, User, UserId, VerificationToken,
};

#[derive(Debug, Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    tokens: BTreeMap<TokenId, VerificationToken>,
    next_user: i64,
    next_token: i64,
}

impl Tables {
    fn insert_token(
        &mut self,
        user_id: UserId,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<VerificationToken> {
        if self.tokens.values().any(|t| t.token == token) {
            return Err(StoreError::Conflict);
        }

        self.next_token += 1;
        let token = VerificationToken {
            id: TokenId(self.next_token),
            token: token.to_owned(),
            user_id,
            expires_at,
        };
        self.tokens.insert(token.id, token.clone());
        Ok(token)
    }
}

/// Shared in-memory store. Clones see the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    /// Create an empty [`MemoryStore`].
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Number of stored users.
    pub fn user_count(&self) -> StoreResult<usize> {
        Ok(self.lock()?.users.len())
    }

    /// Number of stored tokens, expired ones included.
    pub fn token_count(&self) -> StoreResult<usize> {
        Ok(self.lock()?.tokens.len())
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn find_by_id(&self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.lock()?.users.get(&id).cloned())
    }

    async fn find_by_email(
        &self,
        email: &EmailAddress,
    ) -> StoreResult<Option<User>> {
        Ok(self
            .lock()?
            .users
            .values()
            .find(|u| &u.email == email)
            .cloned())
    }

    async fn create_pending(
        &self,
        account: PendingAccount<'_>,
    ) -> StoreResult<(User, VerificationToken)> {
        let mut tables = self.lock()?;
        if tables.users.values().any(|u| &u.email == account.email) {
            return Err(StoreError::Conflict);
        }

        tables.next_user += 1;
        let user = User {
            id: UserId(tables.next_user),
            name: account.name.to_owned(),
            email: account.email.clone(),
            password_hash: None,
            enabled: false,
            created_at: account.created_at,
        };
        let token =
            tables.insert_token(user.id, account.token, account.expires_at)?;
        tables.users.insert(user.id, user.clone());

        Ok((user, token))
    }

    async fn discard_pending(&self, id: UserId) -> StoreResult<bool> {
        let mut tables = self.lock()?;
        match tables.users.get(&id) {
            Some(user) if !user.enabled && user.password_hash.is_none() => {
                tables.users.remove(&id);
                tables.tokens.retain(|_, t| t.user_id != id);
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn activate(
        &self,
        id: UserId,
        hash: &PasswordHash,
        consumed: TokenId,
    ) -> StoreResult<bool> {
        let mut tables = self.lock()?;
        let owned = tables
            .tokens
            .get(&consumed)
            .is_some_and(|t| t.user_id == id);
        if !owned {
            return Ok(false);
        }

        let Some(user) = tables.users.get_mut(&id) else {
            return Ok(false);
        };
        user.password_hash = Some(hash.clone());
        user.enabled = true;
        tables.tokens.remove(&consumed);

        Ok(true)
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn insert(
        &self,
        user_id: UserId,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<VerificationToken> {
        self.lock()?.insert_token(user_id, token, expires_at)
    }

    async fn find_by_token(
        &self,
        token: &str,
    ) -> StoreResult<Option<VerificationToken>> {
        Ok(self
            .lock()?
            .tokens
            .values()
            .find(|t| t.token == token)
            .cloned())
    }

    async fn replace_for_user(
        &self,
        user_id: UserId,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<(u64, VerificationToken)> {
        let mut tables = self.lock()?;
        let before = tables.tokens.len();
        tables.tokens.retain(|_, t| t.user_id != user_id);
        let superseded = (before - tables.tokens.len()) as u64;

        let token = tables.insert_token(user_id, token, expires_at)?;
        Ok((superseded, token))
    }

    async fn delete(&self, token: &str) -> StoreResult<bool> {
        let mut tables = self.lock()?;
        let before = tables.tokens.len();
        tables.tokens.retain(|_, t| t.token != token);
        Ok(before != tables.tokens.len())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut tables = self.lock()?;
        let before = tables.tokens.len();
        tables.tokens.retain(|_, t| t.is_valid_at(now));
        Ok((before - tables.tokens.len()) as u64)
    }
}
