//! Client-credentials token acquisition for the bound secret.
//!
//! [`ClientCredentialsTokenProvider`] implements [`TokenProvider`] with the
//! OAuth 2.0 client credentials grant against the tenant's authority.
//!
//! # Caching
//!
//! The OAuth client is rebuilt from the current [`IdentitySnapshot`] and the
//! current bound secret on every acquisition; nothing long-lived is derived
//! from either. The resulting token is cached together with the snapshot
//! version, the secret version and the scopes it was requested for, and is
//! reused only while all three still match and it is outside the expiry
//! buffer.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use credrotor_core::{
//!     config::AppRegistrationConfig,
//!     store::Secret,
//!     token_provider::ClientCredentialsTokenProvider,
//!     SecretBinding, TokenProvider,
//! };
//!
//! let app = AppRegistrationConfig::new("tenant-id", "client-id");
//! let binding = SecretBinding::with_secret(Secret::new("client-secret"));
//! let provider = ClientCredentialsTokenProvider::new(app.snapshot(1), binding);
//!
//! let token = provider
//!     .access_token(&["https://graph.microsoft.com/.default".to_string()])
//!     .await?;
//! println!("expires at {:?}", token.expires_at);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{Duration, Utc};
use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{AuthType, AuthUrl, ClientId, ClientSecret, RequestTokenError, Scope, TokenResponse, TokenUrl};
use parking_lot::{Mutex, RwLock};

use crate::binding::SecretBinding;
use crate::config::IdentitySnapshot;
use crate::token::{Token, TokenError, TokenProvider};

/// Default expiry buffer in minutes.
///
/// Cached tokens expiring within this window are replaced.
const DEFAULT_EXPIRY_BUFFER_MINUTES: i64 = 5;

#[derive(Debug, Clone)]
struct CachedToken {
    config_version: u64,
    secret_version: u64,
    token: Token,
}

/// Token provider using the OAuth2 client credentials grant.
pub struct ClientCredentialsTokenProvider {
    identity: RwLock<IdentitySnapshot>,
    binding: SecretBinding,
    cache: Mutex<Option<CachedToken>>,
    expiry_buffer: Duration,
}

impl ClientCredentialsTokenProvider {
    /// Create a provider for `identity`, authenticating with whatever secret
    /// `binding` holds at the time of each acquisition.
    pub fn new(identity: IdentitySnapshot, binding: SecretBinding) -> Self {
        Self {
            identity: RwLock::new(identity),
            binding,
            cache: Mutex::new(None),
            expiry_buffer: Duration::minutes(DEFAULT_EXPIRY_BUFFER_MINUTES),
        }
    }

    /// Replace the identity configuration.
    ///
    /// Snapshots older than the current one are ignored. Any cached token is
    /// dropped.
    pub fn reconfigure(&self, snapshot: IdentitySnapshot) {
        {
            let mut identity = self.identity.write();
            if snapshot.version <= identity.version {
                tracing::debug!(
                    "Ignoring identity snapshot v{} (current v{})",
                    snapshot.version,
                    identity.version
                );
                return;
            }
            tracing::info!("Identity configuration updated to v{}", snapshot.version);
            *identity = snapshot;
        }
        self.invalidate();
    }

    /// The identity snapshot currently in use.
    pub fn identity(&self) -> IdentitySnapshot {
        self.identity.read().clone()
    }

    fn cached(&self, config_version: u64, secret_version: u64, scopes: &[String]) -> Option<Token> {
        let cache = self.cache.lock();
        let cached = cache.as_ref()?;
        let fresh = cached.config_version == config_version
            && cached.secret_version == secret_version
            && cached.token.scopes == scopes
            && !cached.token.expires_within(self.expiry_buffer);
        fresh.then(|| cached.token.clone())
    }

    fn build_client(identity: &IdentitySnapshot, secret: &str) -> Result<BasicClient, TokenError> {
        let auth_url = AuthUrl::new(identity.authorize_url()).map_err(|e| TokenError::InvalidConfig {
            message: format!("invalid authority URL: {}", e),
        })?;
        let token_url = TokenUrl::new(identity.token_url()).map_err(|e| TokenError::InvalidConfig {
            message: format!("invalid token URL: {}", e),
        })?;

        Ok(BasicClient::new(
            ClientId::new(identity.client_id.as_str().to_string()),
            Some(ClientSecret::new(secret.to_string())),
            auth_url,
            Some(token_url),
        )
        .set_auth_type(AuthType::RequestBody))
    }
}

#[async_trait]
impl TokenProvider for ClientCredentialsTokenProvider {
    async fn access_token(&self, scopes: &[String]) -> Result<Token, TokenError> {
        let identity = self.identity();
        let (secret_version, secret) =
            self.binding.current().ok_or_else(|| TokenError::NoSecret {
                client_id: identity.client_id.to_string(),
            })?;

        if let Some(token) = self.cached(identity.version, secret_version, scopes) {
            tracing::trace!("Using cached access token for {}", identity.client_id);
            return Ok(token);
        }

        let client = Self::build_client(&identity, secret.expose())?;
        let response = client
            .exchange_client_credentials()
            .add_scopes(scopes.iter().cloned().map(Scope::new))
            .request_async(async_http_client)
            .await
            .map_err(|e| match e {
                RequestTokenError::ServerResponse(response) => TokenError::Rejected {
                    message: response.to_string(),
                },
                RequestTokenError::Request(e) => TokenError::NetworkError {
                    message: e.to_string(),
                },
                other => TokenError::Rejected {
                    message: other.to_string(),
                },
            })?;

        let mut token = Token::new(response.access_token().secret().to_string())
            .with_scopes(scopes.to_vec());
        if let Some(expires_in) = response.expires_in() {
            let lifetime = Duration::from_std(expires_in).map_err(|e| TokenError::Rejected {
                message: format!("invalid expiration duration: {}", e),
            })?;
            token = token.with_expiry(Utc::now() + lifetime);
        }

        tracing::debug!(
            "Acquired access token for {} (secret v{})",
            identity.client_id,
            secret_version
        );
        *self.cache.lock() = Some(CachedToken {
            config_version: identity.version,
            secret_version,
            token: token.clone(),
        });
        Ok(token)
    }

    fn invalidate(&self) {
        self.cache.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppRegistrationConfig;
    use crate::store::Secret;

    fn snapshot(version: u64) -> IdentitySnapshot {
        AppRegistrationConfig::new("tenant-a", "client-a").snapshot(version)
    }

    #[tokio::test]
    async fn test_no_secret_is_an_error() {
        let provider = ClientCredentialsTokenProvider::new(snapshot(1), SecretBinding::new());
        let result = provider.access_token(&[]).await;
        assert!(matches!(result, Err(TokenError::NoSecret { .. })));
    }

    #[test]
    fn test_reconfigure_ignores_older_snapshots() {
        let provider = ClientCredentialsTokenProvider::new(snapshot(2), SecretBinding::new());

        provider.reconfigure(snapshot(1));
        assert_eq!(provider.identity().version, 2);

        provider.reconfigure(snapshot(3));
        assert_eq!(provider.identity().version, 3);
    }

    #[test]
    fn test_cache_is_keyed_by_versions_and_scopes() {
        let binding = SecretBinding::with_secret(Secret::new("s"));
        let provider = ClientCredentialsTokenProvider::new(snapshot(1), binding);
        let scopes = vec!["a".to_string()];
        *provider.cache.lock() = Some(CachedToken {
            config_version: 1,
            secret_version: 1,
            token: Token::new("t")
                .with_scopes(scopes.clone())
                .with_expiry(Utc::now() + Duration::hours(1)),
        });

        assert!(provider.cached(1, 1, &scopes).is_some());
        assert!(provider.cached(2, 1, &scopes).is_none());
        assert!(provider.cached(1, 2, &scopes).is_none());
        assert!(provider.cached(1, 1, &["b".to_string()]).is_none());

        provider.invalidate();
        assert!(provider.cached(1, 1, &scopes).is_none());
    }

    #[test]
    fn test_cache_skips_tokens_near_expiry() {
        let provider = ClientCredentialsTokenProvider::new(snapshot(1), SecretBinding::new());
        *provider.cache.lock() = Some(CachedToken {
            config_version: 1,
            secret_version: 1,
            token: Token::new("t").with_expiry(Utc::now() + Duration::minutes(1)),
        });

        assert!(provider.cached(1, 1, &[]).is_none());
    }
}
