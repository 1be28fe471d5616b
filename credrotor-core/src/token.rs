//! Access tokens minted from the active secret.
//!
//! This module provides:
//! - [`Token`] - A bearer token with metadata
//! - [`TokenError`] - Failures while acquiring a token
//! - [`TokenProvider`] - Trait for turning the active secret into tokens

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::store::Secret;

/// Error type for token operations.
#[derive(Debug, Error)]
pub enum TokenError {
    /// No secret has been bound yet.
    #[error("no client secret is bound for {client_id}")]
    NoSecret { client_id: String },

    /// The identity configuration cannot be turned into a token request.
    #[error("invalid token endpoint configuration: {message}")]
    InvalidConfig { message: String },

    /// The token endpoint rejected the request (e.g. an invalid secret).
    #[error("token request rejected: {message}")]
    Rejected { message: String },

    /// Network error while talking to the token endpoint.
    #[error("network error: {message}")]
    NetworkError { message: String },
}

/// A single bearer token with its metadata.
#[derive(Debug, Clone, Serialize)]
pub struct Token {
    /// The token value.
    #[serde(serialize_with = "serialize_exposed")]
    pub access_token: Secret,

    /// Token type (usually "Bearer").
    pub token_type: String,

    /// When this token expires (None if unknown or non-expiring).
    pub expires_at: Option<DateTime<Utc>>,

    /// Scopes the token was requested for.
    pub scopes: Vec<String>,
}

fn serialize_exposed<S: serde::Serializer>(secret: &Secret, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(secret.expose())
}

impl Token {
    /// Create a new token.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: Secret::new(access_token),
            token_type: "Bearer".to_string(),
            expires_at: None,
            scopes: Vec::new(),
        }
    }

    /// Create a token with an expiration time.
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Create a token with scopes.
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Check if this token will expire within the given duration.
    pub fn expires_within(&self, duration: chrono::Duration) -> bool {
        self.expires_at
            .map(|exp| exp < Utc::now() + duration)
            .unwrap_or(false)
    }
}

/// Source of access tokens for the currently bound secret.
///
/// The rotation engine never calls this directly; directory clients do, on
/// every request, so that a secret swap takes effect on the next call.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Get a valid access token for `scopes`, acquiring one if necessary.
    async fn access_token(&self, scopes: &[String]) -> Result<Token, TokenError>;

    /// Drop any cached token so the next call acquires a fresh one.
    fn invalidate(&self);
}

/// Token provider handing out a fixed token. Useful for tests and for
/// directory clients that authenticate some other way.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: Token,
}

impl StaticTokenProvider {
    /// Create a provider that always returns `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Token::new(token),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self, scopes: &[String]) -> Result<Token, TokenError> {
        Ok(self.token.clone().with_scopes(scopes.to_vec()))
    }

    fn invalidate(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_expires_within() {
        let token = Token::new("test").with_expiry(Utc::now() + chrono::Duration::minutes(5));

        assert!(token.expires_within(chrono::Duration::minutes(10)));
        assert!(!token.expires_within(chrono::Duration::minutes(2)));

        let no_expiry_token = Token::new("test");
        assert!(!no_expiry_token.expires_within(chrono::Duration::days(365)));
    }

    #[test]
    fn test_token_json_exposes_value() {
        let token = Token::new("abc").with_scopes(vec!["s".to_string()]);
        let json = serde_json::to_value(&token).unwrap();
        assert_eq!(json["access_token"], "abc");
        assert_eq!(json["token_type"], "Bearer");
    }

    #[tokio::test]
    async fn test_static_provider() {
        let provider = StaticTokenProvider::new("fixed");
        let token = provider
            .access_token(&["scope".to_string()])
            .await
            .unwrap();
        assert_eq!(token.access_token.expose(), "fixed");
        assert_eq!(token.scopes, vec!["scope"]);
    }
}
