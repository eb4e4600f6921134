//! Bearer token issuing and verification
//!
//! HS256 JWTs carrying only the account id (`sub`), issue and expiry times,
//! and a random `jti`. Verification distinguishes expired tokens from
//! otherwise invalid ones so clients can tell the user which happened.

use chrono::Utc;
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (account id)
    pub sub: String,
    /// Issued at (unix seconds)
    pub iat: i64,
    /// Expiration (unix seconds)
    pub exp: i64,
    /// Token id
    pub jti: String,
}

/// Token verification and signing failures
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Token has expired. Please login again.")]
    Expired,
    #[error("Invalid token. Please login again.")]
    Invalid,
    #[error("token signing failed: {0}")]
    Signing(String),
}

/// Mints and verifies bearer tokens with a shared secret.
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    lifetime: Duration,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    /// Create an issuer for `secret` with the given token lifetime
    pub fn new(secret: &str, lifetime: Duration) -> Self {
        let mut validation = Validation::default();
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            lifetime,
        }
    }

    /// Token lifetime
    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Issue a token for an account
    pub fn issue(&self, account_id: Uuid) -> Result<String, TokenError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: account_id.to_string(),
            iat: now,
            exp: now.saturating_add(self.lifetime.as_secs() as i64),
            jti: Uuid::new_v4().to_string(),
        };
        self.sign(&claims)
    }

    fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        encode(&Header::default(), claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Verify a token and recover the account id
    pub fn verify(&self, token: &str) -> Result<Uuid, TokenError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            }
        })?;
        Uuid::parse_str(&data.claims.sub).map_err(|_| TokenError::Invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-that-is-long-enough-for-hs256";

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(SECRET, Duration::from_secs(3600))
    }

    #[test]
    fn test_issue_and_verify() {
        let id = Uuid::new_v4();
        let token = issuer().issue(id).unwrap();
        assert_eq!(issuer().verify(&token).unwrap(), id);
    }

    #[test]
    fn test_expired_token() {
        let issuer = issuer();
        let now = Utc::now().timestamp();
        let token = issuer
            .sign(&Claims {
                sub: Uuid::new_v4().to_string(),
                iat: now - 7200,
                exp: now - 3600,
                jti: Uuid::new_v4().to_string(),
            })
            .unwrap();
        assert!(matches!(issuer.verify(&token), Err(TokenError::Expired)));
    }

    #[test]
    fn test_wrong_secret_is_invalid() {
        let token = issuer().issue(Uuid::new_v4()).unwrap();
        let other = TokenIssuer::new("another-secret-entirely-different-0000", Duration::from_secs(60));
        assert!(matches!(other.verify(&token), Err(TokenError::Invalid)));
    }

    #[test]
    fn test_garbage_is_invalid() {
        assert!(matches!(issuer().verify("not.a.jwt"), Err(TokenError::Invalid)));
    }

    #[test]
    fn test_non_uuid_subject_is_invalid() {
        let issuer = issuer();
        let now = Utc::now().timestamp();
        let token = issuer
            .sign(&Claims {
                sub: "admin".into(),
                iat: now,
                exp: now + 60,
                jti: "x".into(),
            })
            .unwrap();
        assert!(matches!(issuer.verify(&token), Err(TokenError::Invalid)));
    }

    #[test]
    fn test_distinct_messages() {
        assert_ne!(TokenError::Expired.to_string(), TokenError::Invalid.to_string());
    }
}
