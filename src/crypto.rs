//! Password hashing.

use argon2::password_hash::{
    PasswordHash as PhcHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::{Argon2, Params, Version};
use rand::rngs::OsRng;

use crate::config::Argon2 as ArgonConfig;
use crate::user::PasswordHash;

type Result<T> = std::result::Result<T, CryptoError>;

#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
    #[error("argon2 error: {0}")]
    Argon2(String),
    #[error("hash is not in PHC format")]
    Phc,
}

/// Port for one-way password hashing.
pub trait CredentialHasher: Send + Sync {
    /// Hash a raw password.
    fn hash(&self, password: &str) -> Result<PasswordHash>;

    /// Check a raw password against a stored hash.
    fn verify(&self, password: &str, hash: &PasswordHash) -> Result<bool>;
}

/// Password manager that uses Argon2id and PHC string format for hashing and
/// verification.
pub struct Argon2Hasher {
    params: Params,
}

impl Argon2Hasher {
    /// Create a new [`Argon2Hasher`].
    pub fn new(config: Option<ArgonConfig>) -> Result<Self> {
        let config = config.unwrap_or_default();

        let params = Params::new(
            config.memory_cost,
            config.iterations,
            config.parallelism,
            Some(config.hash_length),
        )
        .map_err(|err| CryptoError::Argon2(err.to_string()))?;

        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(
            argon2::Algorithm::Argon2id,
            Version::V0x13,
            self.params.clone(),
        )
    }
}

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> Result<PasswordHash> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| CryptoError::Argon2(e.to_string()))?;

        PasswordHash::parse(hash.to_string()).ok_or(CryptoError::Phc)
    }

    fn verify(&self, password: &str, hash: &PasswordHash) -> Result<bool> {
        let parsed = PhcHash::new(hash.as_str()).map_err(|_| CryptoError::Phc)?;

        // Parameters embedded in the PHC string take precedence over ours.
        Ok(self
            .argon2()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> Argon2Hasher {
        Argon2Hasher::new(Some(ArgonConfig {
            memory_cost: 8,
            iterations: 1,
            parallelism: 1,
            hash_length: 32,
        }))
        .unwrap()
    }

    #[test]
    fn test_hash_and_verify() {
        let hasher = hasher();
        let hash = hasher.hash("secret123").unwrap();

        assert!(hash.as_str().starts_with("$argon2id$"));
        assert!(hasher.verify("secret123", &hash).unwrap());
        assert!(!hasher.verify("secret124", &hash).unwrap());
    }

    #[test]
    fn test_salted() {
        let hasher = hasher();
        let first = hasher.hash("secret123").unwrap();
        let second = hasher.hash("secret123").unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn test_invalid_params() {
        let config = ArgonConfig {
            memory_cost: 1,
            ..Default::default()
        };
        assert!(Argon2Hasher::new(Some(config)).is_err());
    }
}
