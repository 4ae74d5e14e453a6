//! Bearer credential validation.
//!
//! The coordinator trusts the subject and role of a validated credential and
//! nothing else: identity fields inside event payloads are ignored.
//! [`JwtAuthenticator`] signs and checks HS256 tokens with a shared secret.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rescue_core::{Identity, Participant, Role};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Credential failures.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Signature, expiry, or shape check failed.
    #[error("invalid authentication token: {0}")]
    InvalidToken(String),

    /// Token claims name an unknown role or a non-numeric subject.
    #[error("invalid token claims: {0}")]
    InvalidClaims(String),

    /// Signing a new token failed.
    #[error("token signing failed: {0}")]
    Signing(String),
}

/// Claims carried by a dispatch credential.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Account ID within the role's table.
    pub sub: String,
    /// `driver` or `rider`.
    pub role: String,
    /// Display name.
    pub name: String,
    /// Contact email.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Contact mobile number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile: Option<String>,
    /// Issued-at (unix seconds).
    pub iat: i64,
    /// Expiry (unix seconds).
    pub exp: i64,
}

impl Claims {
    fn into_identity(self) -> Result<Identity, AuthError> {
        let role: Role = self.role.parse().map_err(AuthError::InvalidClaims)?;
        let id: i64 = self
            .sub
            .parse()
            .map_err(|_| AuthError::InvalidClaims(format!("subject is not an id: {}", self.sub)))?;
        Ok(Identity {
            participant: Participant { role, id },
            name: self.name,
            email: self.email,
            mobile: self.mobile,
        })
    }
}

/// Validates bearer credentials presented at connect time and on HTTP calls.
pub trait Authenticator: Send + Sync {
    /// Resolve a token into the identity it asserts.
    fn authenticate(&self, token: &str) -> Result<Identity, AuthError>;
}

/// HS256 JWT authenticator.
pub struct JwtAuthenticator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl_secs: i64,
}

impl JwtAuthenticator {
    /// Create an authenticator for `secret` issuing tokens valid for
    /// `ttl_minutes`.
    pub fn new(secret: &str, ttl_minutes: u64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        let ttl_secs = i64::try_from(ttl_minutes.saturating_mul(60)).unwrap_or(i64::MAX);
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl_secs,
        }
    }

    /// Issue a token for `identity`.
    pub fn issue(&self, identity: &Identity) -> Result<String, AuthError> {
        let iat = chrono::Utc::now().timestamp();
        self.sign(&Claims {
            sub: identity.participant.id.to_string(),
            role: identity.role().as_str().to_string(),
            name: identity.name.clone(),
            email: identity.email.clone(),
            mobile: identity.mobile.clone(),
            iat,
            exp: iat.saturating_add(self.ttl_secs),
        })
    }

    /// Sign arbitrary claims.
    pub fn sign(&self, claims: &Claims) -> Result<String, AuthError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }
}

impl Authenticator for JwtAuthenticator {
    fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        data.claims.into_identity()
    }
}
