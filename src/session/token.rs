// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Session Tokens
//!
//! HS256 JWTs carrying only the session id. A token is a reference to a
//! session held in memory, never a cache of its state.

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Token encode error: {0}")]
    Encode(#[from] jsonwebtoken::errors::Error),

    #[error("Token lifetime out of range: {0}s")]
    TtlOutOfRange(u64),
}

/// Claims embedded in a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    #[serde(rename = "sessionId")]
    pub session_id: String,

    /// Issued at (seconds since epoch)
    pub iat: i64,

    /// Expiration (seconds since epoch)
    pub exp: i64,
}

/// Signs and verifies session tokens with a shared secret.
pub struct TokenSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl TokenSigner {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl,
        }
    }

    /// Sign a token referencing `session_id`.
    pub fn sign(&self, session_id: &str) -> Result<String, TokenError> {
        let now = Utc::now().timestamp();
        let ttl = self.ttl.as_secs();
        let exp = i64::try_from(ttl)
            .ok()
            .and_then(|ttl| now.checked_add(ttl))
            .ok_or(TokenError::TtlOutOfRange(ttl))?;
        let claims = SessionClaims {
            session_id: session_id.to_string(),
            iat: now,
            exp,
        };
        self.sign_claims(&claims)
    }

    pub fn sign_claims(&self, claims: &SessionClaims) -> Result<String, TokenError> {
        Ok(encode(
            &Header::new(Algorithm::HS256),
            claims,
            &self.encoding_key,
        )?)
    }

    /// Session id carried by a valid token, `None` on any failure.
    pub fn verify(&self, token: &str) -> Option<String> {
        match decode::<SessionClaims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => Some(data.claims.session_id),
            Err(e) => {
                tracing::debug!(error = %e, "session token rejected");
                None
            }
        }
    }
}

/// Extract a token from an `Authorization: Bearer <token>` value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer(secret: &str) -> TokenSigner {
        TokenSigner::new(secret, Duration::from_secs(60))
    }

    #[test]
    fn test_sign_and_verify() {
        let signer = signer("secret-a");
        let token = signer.sign("session-1").unwrap();
        assert_eq!(signer.verify(&token).as_deref(), Some("session-1"));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = signer("secret-a").sign("session-1").unwrap();
        assert!(signer("secret-b").verify(&token).is_none());
    }

    #[test]
    fn test_expired_token_rejected() {
        let signer = signer("secret-a");
        let now = Utc::now().timestamp();
        let token = signer
            .sign_claims(&SessionClaims {
                session_id: "session-1".to_string(),
                iat: now - 7200,
                exp: now - 3600,
            })
            .unwrap();
        assert!(signer.verify(&token).is_none());
    }

    #[test]
    fn test_oversized_ttl_is_an_error() {
        let signer = TokenSigner::new("x", Duration::from_secs(u64::MAX));
        assert!(matches!(
            signer.sign("sid"),
            Err(TokenError::TtlOutOfRange(u64::MAX))
        ));

        let signer = TokenSigner::new("x", Duration::from_secs(i64::MAX as u64));
        assert!(matches!(
            signer.sign("sid"),
            Err(TokenError::TtlOutOfRange(_))
        ));
    }

    #[test]
    fn test_malformed_token_rejected() {
        assert!(signer("secret-a").verify("not.a.jwt").is_none());
        assert!(signer("secret-a").verify("").is_none());
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token("Bearer abc.def"), Some("abc.def"));
        assert_eq!(bearer_token("bearer abc.def"), Some("abc.def"));
        assert_eq!(bearer_token("Basic dXNlcjpwYXNz"), None);
        assert_eq!(bearer_token("abc.def"), None);
        assert_eq!(bearer_token("Bearer "), None);
    }
}
