//! Bearer token validation for uploads.
//!
//! Chat identity is self-declared at `identify`; only the upload path asks
//! for a token.

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No `Authorization: Bearer` header.
    #[error("No token provided")]
    MissingToken,

    /// The token failed validation.
    #[error("Invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
}

/// Who a valid token belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Stable user id.
    pub user_id: String,
    /// Human-readable name, if the token carries one.
    pub username: Option<String>,
}

impl Identity {
    /// Name to show as the uploader.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.user_id)
    }
}

/// Validates bearer tokens.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Resolve a token to an identity.
    async fn validate(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Claims accepted in upload tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    #[serde(alias = "userId")]
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

/// HS256 JWT validator.
pub struct JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

#[async_trait]
impl TokenValidator for JwtValidator {
    async fn validate(&self, token: &str) -> Result<Identity, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)?;
        Ok(Identity {
            user_id: data.claims.sub,
            username: data.claims.username,
        })
    }
}

/// Extract the bearer token from request headers.
///
/// # Errors
///
/// Returns [`AuthError::MissingToken`] if there is no bearer token.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingToken)
}
