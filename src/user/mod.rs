//! User accounts and their verification tokens.

mod memory;
mod postgres;
mod repository;
mod service;
pub mod sweeper;

pub use memory::*;
pub use postgres::*;
pub use repository::*;
pub use service::*;

use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex_lite::Regex;
use serde::Serialize;

static PHC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\$([a-z0-9-]{1,32})(?:\$v=(\d+))?(?:\$([^$]+))?\$([^$]+)\$([^$]+)$",
    )
    .unwrap()
});

/// Store-assigned user identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Store-assigned verification token identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenId(pub i64);

/// Value object of a normalized email address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct EmailAddress(String);

impl EmailAddress {
    /// Trim and lowercase an address.
    ///
    /// Returns `None` unless the string holds exactly one `@` with
    /// something on both sides.
    pub fn parse(email: &str) -> Option<Self> {
        let email = email.trim();
        match email.split_once('@') {
            Some((local, domain))
                if !local.is_empty()
                    && !domain.is_empty()
                    && !domain.contains('@') =>
            {
                Some(Self(email.to_lowercase()))
            },
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A hashed password stored in the database.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordHash(String);

impl PasswordHash {
    /// Accept a string only if it is in PHC format.
    pub fn parse(phc_string: impl Into<String>) -> Option<Self> {
        let phc = phc_string.into();
        PHC_RE.is_match(&phc).then_some(Self(phc))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordHash")
            .field("phc_string", &"[REDACTED]")
            .finish()
    }
}

/// User as saved on database.
#[derive(Clone, Debug, PartialEq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: EmailAddress,
    /// `None` until the account is activated.
    pub password_hash: Option<PasswordHash>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Whether the account may log in at all.
    pub fn is_authenticatable(&self) -> bool {
        self.enabled && self.password_hash.is_some()
    }
}

/// Single-use token sent by email to activate an account or reset its
/// password.
#[derive(Clone, PartialEq, Eq)]
pub struct VerificationToken {
    pub id: TokenId,
    pub token: String,
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
}

impl VerificationToken {
    /// A token is usable strictly before its expiry instant.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

impl fmt::Debug for VerificationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationToken")
            .field("id", &self.id)
            .field("token", &"[REDACTED]")
            .field("user_id", &self.user_id)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Generate a fresh token string (UUID v4, 122 random bits).
pub fn generate_token() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn test_email_normalization() {
        let email = EmailAddress::parse("  Alice@X.com ").unwrap();
        assert_eq!(email.as_str(), "alice@x.com");

        assert!(EmailAddress::parse("alice").is_none());
        assert!(EmailAddress::parse("@x.com").is_none());
        assert!(EmailAddress::parse("a@").is_none());
        assert!(EmailAddress::parse("a@b@c").is_none());
    }

    #[test]
    fn test_phc_format() {
        assert!(
            PasswordHash::parse(
                "$argon2id$v=19$m=8,t=1,p=1$c2FsdHNhbHQ$aGFzaGhhc2hoYXNo"
            )
            .is_some()
        );
        assert!(PasswordHash::parse("plaintext").is_none());
    }

    #[test]
    fn test_token_expiry_is_strict() {
        let now = Utc::now();
        let token = VerificationToken {
            id: TokenId(1),
            token: generate_token(),
            user_id: UserId(1),
            expires_at: now,
        };

        assert!(!token.is_valid_at(now));
        assert!(!token.is_valid_at(now + Duration::seconds(1)));
        assert!(token.is_valid_at(now - Duration::seconds(1)));
    }

    #[test]
    fn test_generated_tokens_are_unique() {
        let first = generate_token();
        assert_eq!(first.len(), 36);
        assert_ne!(first, generate_token());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let token = VerificationToken {
            id: TokenId(1),
            token: "very-secret".into(),
            user_id: UserId(1),
            expires_at: Utc::now(),
        };
        assert!(!format!("{token:?}").contains("very-secret"));
    }
}
