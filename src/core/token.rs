//! Stateless session tokens.
//!
//! A token is `base64url(claims_json) "." base64url(hmac_sha256(key, first_part))`.
//! Verification is a pure function of the token text and the signing key, so a
//! `TokenAuthority` can be shared across any number of request tasks without
//! synchronization. Tokens carry only a validity window; they do not say which
//! share was knocked and cannot be revoked before `exp`.
use std::{fmt, time::Duration};

use base64::{Engine, engine::general_purpose::URL_SAFE};
use chrono::{DateTime, TimeDelta, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::core::error::ConfigError;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_SEPARATOR: char = '.';

/// Reasons a token is refused. None of these is fatal to the request; the
/// caller treats every variant as "no session".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TokenError {
    #[error("invalid token format")]
    Malformed,

    #[error("invalid token signature")]
    InvalidSignature,

    #[error("failed to decode claims: {0}")]
    InvalidClaims(String),

    #[error("token expired")]
    Expired,

    #[error("invalid token lifetime: {0}")]
    InvalidLifetime(String),

    #[error("failed to sign token: {0}")]
    Signing(String),
}

/// Process-wide HMAC key. Never printed.
#[derive(Clone)]
pub struct SigningKey(Vec<u8>);

impl SigningKey {
    /// Wrap raw key bytes, refusing an empty key.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, ConfigError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(ConfigError::MissingSigningKey);
        }
        Ok(Self(bytes))
    }

    fn mac(&self) -> Result<HmacSha256, TokenError> {
        HmacSha256::new_from_slice(&self.0).map_err(|e| TokenError::Signing(e.to_string()))
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningKey([REDACTED; {}])", self.0.len())
    }
}

/// The signed part of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(rename = "iat")]
    pub issued_at: DateTime<Utc>,
    #[serde(rename = "exp")]
    pub expires_at: DateTime<Utc>,
}

/// A freshly minted token together with its claims.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub value: String,
    pub claims: TokenClaims,
}

impl IssuedToken {
    /// Hex SHA-256 of the token text, safe to log or store.
    pub fn digest(&self) -> String {
        token_digest(&self.value)
    }
}

/// Hex SHA-256 of a raw token string.
pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Issues and verifies session tokens under a single signing key.
#[derive(Debug, Clone)]
pub struct TokenAuthority {
    key: SigningKey,
}

impl TokenAuthority {
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    /// Issue a token valid for `max_age` from now.
    pub fn issue(&self, max_age: Duration) -> Result<IssuedToken, TokenError> {
        self.issue_at(max_age, Utc::now())
    }

    /// Issue a token valid for `max_age` from `now`.
    pub fn issue_at(&self, max_age: Duration, now: DateTime<Utc>) -> Result<IssuedToken, TokenError> {
        let lifetime =
            TimeDelta::from_std(max_age).map_err(|e| TokenError::InvalidLifetime(e.to_string()))?;
        let expires_at = now
            .checked_add_signed(lifetime)
            .ok_or_else(|| TokenError::InvalidLifetime(format!("{max_age:?} overflows")))?;
        let claims = TokenClaims {
            issued_at: now,
            expires_at,
        };

        let claims_json =
            serde_json::to_vec(&claims).map_err(|e| TokenError::Signing(e.to_string()))?;
        let claims_b64 = URL_SAFE.encode(claims_json);
        let signature = self.sign(&claims_b64)?;

        Ok(IssuedToken {
            value: format!("{claims_b64}{TOKEN_SEPARATOR}{signature}"),
            claims,
        })
    }

    /// Verify a token against the current time.
    pub fn verify(&self, token: &str) -> Result<TokenClaims, TokenError> {
        self.verify_at(token, Utc::now())
    }

    /// Verify a token as of `now`.
    ///
    /// The signature is checked in constant time before the claims are
    /// decoded; a token is expired from `expires_at` onwards.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<TokenClaims, TokenError> {
        let mut parts = token.split(TOKEN_SEPARATOR);
        let (claims_b64, signature) = match (parts.next(), parts.next(), parts.next()) {
            (Some(claims), Some(signature), None) if !claims.is_empty() && !signature.is_empty() => {
                (claims, signature)
            }
            _ => return Err(TokenError::Malformed),
        };

        let expected = self.sign(claims_b64)?;
        if !bool::from(expected.as_bytes().ct_eq(signature.as_bytes())) {
            return Err(TokenError::InvalidSignature);
        }

        let claims_json = URL_SAFE
            .decode(claims_b64)
            .map_err(|e| TokenError::InvalidClaims(e.to_string()))?;
        let claims: TokenClaims = serde_json::from_slice(&claims_json)
            .map_err(|e| TokenError::InvalidClaims(e.to_string()))?;

        if now >= claims.expires_at {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }

    fn sign(&self, claims_b64: &str) -> Result<String, TokenError> {
        let mut mac = self.key.mac()?;
        mac.update(claims_b64.as_bytes());
        Ok(URL_SAFE.encode(mac.finalize().into_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authority(key: &str) -> TokenAuthority {
        TokenAuthority::new(SigningKey::new(key.as_bytes()).unwrap())
    }

    #[test]
    fn test_empty_signing_key_rejected() {
        assert!(matches!(
            SigningKey::new(Vec::new()),
            Err(ConfigError::MissingSigningKey)
        ));
    }

    #[test]
    fn test_issue_then_verify() {
        let authority = authority("k1-secret");
        let issued = authority.issue(Duration::from_secs(60)).unwrap();

        let claims = authority.verify(&issued.value).unwrap();
        assert_eq!(claims, issued.claims);
        assert_eq!(
            claims.expires_at - claims.issued_at,
            TimeDelta::seconds(60)
        );
    }

    #[test]
    fn test_token_from_other_key_rejected() {
        let issued = authority("k1-secret").issue(Duration::from_secs(60)).unwrap();
        assert_eq!(
            authority("k2-secret").verify(&issued.value),
            Err(TokenError::InvalidSignature)
        );
    }

    #[test]
    fn test_token_expires_at_boundary() {
        let authority = authority("k1-secret");
        let now = Utc::now();
        let issued = authority.issue_at(Duration::from_secs(30), now).unwrap();

        assert!(authority.verify_at(&issued.value, now + TimeDelta::seconds(29)).is_ok());
        assert_eq!(
            authority.verify_at(&issued.value, now + TimeDelta::seconds(30)),
            Err(TokenError::Expired)
        );
        assert_eq!(
            authority.verify_at(&issued.value, now + TimeDelta::hours(1)),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_malformed_tokens() {
        let authority = authority("k1-secret");
        for token in ["", "abc", "a.b.c", ".sig", "claims.", "..."] {
            assert_eq!(authority.verify(token), Err(TokenError::Malformed), "{token:?}");
        }
    }

    #[test]
    fn test_tampered_claims_rejected() {
        let authority = authority("k1-secret");
        let issued = authority.issue(Duration::from_secs(60)).unwrap();
        let (_, signature) = issued.value.split_once('.').unwrap();

        let forged_claims = TokenClaims {
            issued_at: issued.claims.issued_at,
            expires_at: issued.claims.expires_at + TimeDelta::days(365),
        };
        let forged = format!(
            "{}.{}",
            URL_SAFE.encode(serde_json::to_vec(&forged_claims).unwrap()),
            signature
        );
        assert_eq!(authority.verify(&forged), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_digest_is_stable_and_not_the_token() {
        let issued = authority("k1-secret").issue(Duration::from_secs(60)).unwrap();
        assert_eq!(issued.digest(), token_digest(&issued.value));
        assert_eq!(issued.digest().len(), 64);
        assert!(!issued.digest().contains(&issued.value));
    }

    #[test]
    fn test_signing_key_debug_is_redacted() {
        let key = SigningKey::new("super-secret").unwrap();
        assert!(!format!("{key:?}").contains("super-secret"));
    }
}
