use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::SecurityConfig;
use crate::identity::Identity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub typ: TokenKind,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Invalid JWT secret")]
    InvalidSecret,

    #[error("JWT generation error: {0}")]
    Generation(String),

    #[error("Invalid JWT token: {0}")]
    Invalid(String),

    #[error("Token is not of the expected kind")]
    WrongKind,
}

/// Access/refresh pair handed to a client after sign-in or refresh
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    #[serde(skip)]
    pub identity: Identity,
}

/// Issues and verifies HS256 tokens with the configured secret
#[derive(Clone)]
pub struct TokenService {
    secret: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(secret: impl Into<String>, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            secret: secret.into(),
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn from_config(security: &SecurityConfig) -> Self {
        Self::new(
            security.jwt_secret.clone(),
            Duration::minutes(security.access_token_minutes),
            Duration::hours(security.refresh_token_hours),
        )
    }

    pub fn issue(&self, identity: &Identity, kind: TokenKind) -> Result<String, TokenError> {
        if self.secret.is_empty() {
            return Err(TokenError::InvalidSecret);
        }

        let now = Utc::now();
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let claims = Claims {
            sub: identity.user_id,
            email: identity.email.clone(),
            typ: kind,
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        };

        let encoding_key = EncodingKey::from_secret(self.secret.as_bytes());
        encode(&Header::default(), &claims, &encoding_key).map_err(|e| TokenError::Generation(e.to_string()))
    }

    pub fn issue_pair(&self, identity: &Identity) -> Result<TokenPair, TokenError> {
        Ok(TokenPair {
            access_token: self.issue(identity, TokenKind::Access)?,
            refresh_token: self.issue(identity, TokenKind::Refresh)?,
            expires_in: self.access_ttl.num_seconds(),
            identity: identity.clone(),
        })
    }

    /// Validates signature, expiry and kind
    pub fn verify(&self, token: &str, kind: TokenKind) -> Result<Identity, TokenError> {
        if self.secret.is_empty() {
            return Err(TokenError::InvalidSecret);
        }

        let decoding_key = DecodingKey::from_secret(self.secret.as_bytes());
        let mut validation = Validation::default();
        validation.leeway = 0;

        let token_data =
            decode::<Claims>(token, &decoding_key, &validation).map_err(|e| TokenError::Invalid(e.to_string()))?;
        if token_data.claims.typ != kind {
            return Err(TokenError::WrongKind);
        }

        Ok(Identity {
            user_id: token_data.claims.sub,
            email: token_data.claims.email,
        })
    }
}
