//! PostgreSQL implementation of the stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use super::{
    AccountStore, EmailAddress, PasswordHash, PendingAccount, StoreError,
    StoreResult, TokenId, TokenStore, User, UserId, VerificationToken,
};

/// User record as stored in the database.
#[derive(Debug, Clone, FromRow)]
struct UserRecord {
    id: i64,
    name: String,
    email: String,
    password_hash: Option<String>,
    enabled: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRecord> for User {
    type Error = StoreError;

    fn try_from(record: UserRecord) -> StoreResult<Self> {
        let email = EmailAddress::parse(&record.email).ok_or_else(|| {
            StoreError::Corrupted(format!("email of user {}", record.id))
        })?;
        let password_hash = record
            .password_hash
            .map(|hash| {
                PasswordHash::parse(hash).ok_or_else(|| {
                    StoreError::Corrupted(format!(
                        "password hash of user {}",
                        record.id
                    ))
                })
            })
            .transpose()?;

        Ok(User {
            id: UserId(record.id),
            name: record.name,
            email,
            password_hash,
            enabled: record.enabled,
            created_at: record.created_at,
        })
    }
}

/// Verification token record.
#[derive(Debug, Clone, FromRow)]
struct TokenRecord {
    id: i64,
    token: String,
    user_id: i64,
    expires_at: DateTime<Utc>,
}

impl From<TokenRecord> for VerificationToken {
    fn from(record: TokenRecord) -> Self {
        Self {
            id: TokenId(record.id),
            token: record.token,
            user_id: UserId(record.user_id),
            expires_at: record.expires_at,
        }
    }
}

/// Map unique violations to [`StoreError::Conflict`].
fn conflict(err: sqlx::Error) -> StoreError {
    match err.as_database_error() {
        Some(db) if db.is_unique_violation() => StoreError::Conflict,
        _ => StoreError::Sql(err),
    }
}

const SELECT_USER: &str = r#"
    SELECT id, name, email, password_hash, enabled, created_at
    FROM users
"#;

/// PostgreSQL account store.
#[derive(Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    /// Create a new [`PgAccountStore`].
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn find_by_id(&self, id: UserId) -> StoreResult<Option<User>> {
        sqlx::query_as::<_, UserRecord>(&format!("{SELECT_USER} WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn find_by_email(
        &self,
        email: &EmailAddress,
    ) -> StoreResult<Option<User>> {
        sqlx::query_as::<_, UserRecord>(&format!(
            "{SELECT_USER} WHERE email = $1"
        ))
        .bind(email.as_str())
        .fetch_optional(&self.pool)
        .await?
        .map(User::try_from)
        .transpose()
    }

    async fn create_pending(
        &self,
        account: PendingAccount<'_>,
    ) -> StoreResult<(User, VerificationToken)> {
        let mut tx = self.pool.begin().await?;

        let user = sqlx::query_as::<_, UserRecord>(
            r#"
            INSERT INTO users (name, email, password_hash, enabled, created_at)
            VALUES ($1, $2, NULL, false, $3)
            RETURNING id, name, email, password_hash, enabled, created_at
            "#,
        )
        .bind(account.name)
        .bind(account.email.as_str())
        .bind(account.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(conflict)?;

        let token = sqlx::query_as::<_, TokenRecord>(
            r#"
            INSERT INTO verification_tokens (token, user_id, expires_at)
            VALUES ($1, $2, $3)
            RETURNING id, token, user_id, expires_at
            "#,
        )
        .bind(account.token)
        .bind(user.id)
        .bind(account.expires_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(conflict)?;

        tx.commit().await?;

        Ok((User::try_from(user)?, token.into()))
    }

    async fn discard_pending(&self, id: UserId) -> StoreResult<bool> {
        // Tokens follow through `ON DELETE CASCADE`.
        let result = sqlx::query(
            r#"
            DELETE FROM users
            WHERE id = $1 AND enabled = false AND password_hash IS NULL
            "#,
        )
        .bind(id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn activate(
        &self,
        id: UserId,
        hash: &PasswordHash,
        consumed: TokenId,
    ) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        // Deleting first takes the row lock; a concurrent consumer blocks
        // here and then sees zero rows.
        let deleted = sqlx::query(
            "DELETE FROM verification_tokens WHERE id = $1 AND user_id = $2",
        )
        .bind(consumed.0)
        .bind(id.0)
        .execute(&mut *tx)
        .await?;
        if deleted.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        let updated = sqlx::query(
            "UPDATE users SET password_hash = $2, enabled = true WHERE id = $1",
        )
        .bind(id.0)
        .bind(hash.as_str())
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }
}

/// PostgreSQL verification token store.
#[derive(Clone)]
pub struct PgTokenStore {
    pool: PgPool,
}

impl PgTokenStore {
    /// Create a new [`PgTokenStore`].
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn insert(
        &self,
        user_id: UserId,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<VerificationToken> {
        let record = sqlx::query_as::<_, TokenRecord>(
            r#"
            INSERT INTO verification_tokens (token, user_id, expires_at)
            VALUES ($1, $2, $3)
            RETURNING id, token, user_id, expires_at
            "#,
        )
        .bind(token)
        .bind(user_id.0)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(conflict)?;

        Ok(record.into())
    }

    async fn find_by_token(
        &self,
        token: &str,
    ) -> StoreResult<Option<VerificationToken>> {
        let record = sqlx::query_as::<_, TokenRecord>(
            r#"
            SELECT id, token, user_id, expires_at
            FROM verification_tokens
            WHERE token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(VerificationToken::from))
    }

    async fn replace_for_user(
        &self,
        user_id: UserId,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<(u64, VerificationToken)> {
        let mut tx = self.pool.begin().await?;

        // The user row lock orders concurrent replacements, so the second
        // one sees and deletes the token the first one inserted.
        sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id.0)
            .fetch_optional(&mut *tx)
            .await?;

        let superseded =
            sqlx::query("DELETE FROM verification_tokens WHERE user_id = $1")
                .bind(user_id.0)
                .execute(&mut *tx)
                .await?
                .rows_affected();

        let record = sqlx::query_as::<_, TokenRecord>(
            r#"
            INSERT INTO verification_tokens (token, user_id, expires_at)
            VALUES ($1, $2, $3)
            RETURNING id, token, user_id, expires_at
            "#,
        )
        .bind(token)
        .bind(user_id.0)
        .bind(expires_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(conflict)?;

        tx.commit().await?;

        Ok((superseded, record.into()))
    }

    async fn delete(&self, token: &str) -> StoreResult<bool> {
        let result =
            sqlx::query("DELETE FROM verification_tokens WHERE token = $1")
                .bind(token)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result =
            sqlx::query("DELETE FROM verification_tokens WHERE expires_at <= $1")
                .bind(now)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }
}
