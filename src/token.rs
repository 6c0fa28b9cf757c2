//! Manage session json web tokens.

use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
    get_current_timestamp,
};
use serde::{Deserialize, Serialize};

use crate::auth::{AuthError, Principal, SessionIssuer};
use crate::user::{EmailAddress, UserId};

pub const DEFAULT_TTL_MINUTES: i64 = 60;

/// Pieces of information asserted on a JWT.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Claims {
    /// Recipients that the JWT is intended for.
    pub aud: String,
    /// Identifies the expiration time on or after which the JWT must not be
    /// accepted for processing, in seconds.
    pub exp: u64,
    /// Identifies the time at which the JWT was issued.
    pub iat: u64,
    /// Identifies the organization that issued the JWT.
    pub iss: String,
    /// User ID.
    pub sub: String,
    pub email: String,
    pub name: String,
}

/// HS256-signed sessions.
#[derive(Clone)]
pub struct JwtSessions {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    name: String,
    audience: String,
    ttl: u64,
}

impl JwtSessions {
    /// Create a new [`JwtSessions`] instance.
    ///
    /// `name` is written as issuer and used as audience until
    /// [`JwtSessions::audience`] is called.
    pub fn new(name: &str, secret: &str, ttl_minutes: i64) -> Self {
        Self {
            algorithm: Algorithm::HS256,
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            name: name.to_owned(),
            audience: name.to_owned(),
            ttl: ttl_minutes.max(1) as u64 * 60,
        }
    }

    /// Set `audience` field on JWT.
    pub fn audience(&mut self, audience: &str) {
        self.audience = audience.to_owned();
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(self.algorithm);
        validation.set_audience(&[&self.audience]);
        validation.set_issuer(&[&self.name]);
        validation.set_required_spec_claims(&["exp", "aud", "iss", "sub"]);
        validation
    }
}

impl SessionIssuer for JwtSessions {
    fn issue(&self, principal: &Principal) -> Result<String, AuthError> {
        let time = get_current_timestamp();
        let claims = Claims {
            aud: self.audience.clone(),
            exp: time + self.ttl,
            iat: time,
            iss: self.name.clone(),
            sub: principal.id.to_string(),
            email: principal.email.to_string(),
            name: principal.name.clone(),
        };

        Ok(encode(
            &Header::new(self.algorithm),
            &claims,
            &self.encoding_key,
        )?)
    }

    fn resolve(&self, token: &str) -> Result<Principal, AuthError> {
        let claims =
            decode::<Claims>(token, &self.decoding_key, &self.validation())?
                .claims;

        let id = claims
            .sub
            .parse()
            .map(UserId)
            .map_err(|_| AuthError::MalformedSubject)?;
        let email = EmailAddress::parse(&claims.email)
            .ok_or(AuthError::MalformedSubject)?;

        Ok(Principal {
            id,
            email,
            name: claims.name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal() -> Principal {
        Principal {
            id: UserId(7),
            email: EmailAddress::parse("a@x.com").unwrap(),
            name: "Alice".into(),
        }
    }

    #[test]
    fn test_issue_and_resolve() {
        let sessions = JwtSessions::new("onboard", "secret", DEFAULT_TTL_MINUTES);
        let token = sessions.issue(&principal()).unwrap();

        assert_eq!(sessions.resolve(&token).unwrap(), principal());
    }

    #[test]
    fn test_tampered_token() {
        let sessions = JwtSessions::new("onboard", "secret", DEFAULT_TTL_MINUTES);
        let token = sessions.issue(&principal()).unwrap();

        let other = JwtSessions::new("onboard", "other", DEFAULT_TTL_MINUTES);
        assert!(other.resolve(&token).is_err());

        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = JwtSessions::new("onboard", "other", DEFAULT_TTL_MINUTES)
            .issue(&Principal {
                id: UserId(1),
                ..principal()
            })
            .unwrap();
        let forged_payload = forged.split('.').nth(1).unwrap().to_owned();
        parts[1] = &forged_payload;
        assert!(sessions.resolve(&parts.join(".")).is_err());
    }

    #[test]
    fn test_wrong_audience() {
        let sessions = JwtSessions::new("onboard", "secret", DEFAULT_TTL_MINUTES);
        let mut elsewhere =
            JwtSessions::new("onboard", "secret", DEFAULT_TTL_MINUTES);
        elsewhere.audience("elsewhere");

        let token = elsewhere.issue(&principal()).unwrap();
        assert!(sessions.resolve(&token).is_err());
    }

    #[test]
    fn test_expired_token() {
        let sessions = JwtSessions::new("onboard", "secret", DEFAULT_TTL_MINUTES);
        let time = get_current_timestamp();
        let claims = Claims {
            aud: "onboard".into(),
            exp: time - 3600,
            iat: time - 7200,
            iss: "onboard".into(),
            sub: "7".into(),
            email: "a@x.com".into(),
            name: "Alice".into(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();

        assert!(matches!(
            sessions.resolve(&token),
            Err(AuthError::InvalidSession(_))
        ));
    }
}
