//! Construction of the live component graph from configuration.
//!
//! [`Services`] owns everything the daemon and CLI share: the secret binding,
//! the token provider reading from it, the Graph directory client using that
//! provider, and the local secret store.

use std::sync::Arc;

use crate::binding::SecretBinding;
use crate::config::CredrotorConfig;
use crate::directory::{DirectoryClient, GraphDirectoryClient};
use crate::engine::RotationEngine;
use crate::error::CredrotorError;
use crate::store::{open_store, SecretStore};
use crate::token_provider::ClientCredentialsTokenProvider;

/// Shared live components for one application registration.
pub struct Services {
    /// Holds the secret every directory call authenticates with.
    pub binding: SecretBinding,
    /// Token provider reading from [`binding`](Self::binding).
    pub tokens: Arc<ClientCredentialsTokenProvider>,
    /// Graph client authenticated through [`tokens`](Self::tokens).
    pub directory: Arc<dyn DirectoryClient>,
    /// Local persistence for the active secret.
    pub store: Arc<dyn SecretStore>,
    config: CredrotorConfig,
    config_version: u64,
}

impl Services {
    /// Build the component graph.
    ///
    /// The binding is seeded with `initial_secret` when one is configured.
    pub fn from_config(config: CredrotorConfig) -> Result<Self, CredrotorError> {
        let binding = match &config.app_registration.initial_secret {
            Some(secret) => SecretBinding::with_secret(secret.clone()),
            None => SecretBinding::new(),
        };

        let config_version = 1;
        let tokens = Arc::new(ClientCredentialsTokenProvider::new(
            config.app_registration.snapshot(config_version),
            binding.clone(),
        ));
        let directory: Arc<dyn DirectoryClient> = Arc::new(GraphDirectoryClient::new(
            &config.app_registration.graph_url,
            tokens.clone(),
        )?);
        let store = open_store(&config.store)?;

        tracing::debug!(
            "Services ready for tenant {} client {}",
            config.app_registration.tenant_id,
            config.app_registration.client_id
        );

        Ok(Self {
            binding,
            tokens,
            directory,
            store,
            config,
            config_version,
        })
    }

    /// The configuration the services were built from.
    pub fn config(&self) -> &CredrotorConfig {
        &self.config
    }

    /// A rotation engine wired to these services.
    pub fn engine(&self) -> RotationEngine {
        RotationEngine::new(
            self.directory.clone(),
            self.store.clone(),
            self.binding.clone(),
            self.config.app_registration.tenant_id.clone(),
            self.config.app_registration.client_id.clone(),
            self.config.rotation.clone(),
        )
    }

    /// Apply a reloaded configuration.
    ///
    /// Only the authority and the display name take effect; the token
    /// provider picks up the authority on its next acquisition. Changed ids
    /// and rotation, store or Graph settings are logged and ignored until
    /// restart, since the running engine keeps managing the application it
    /// started with.
    pub fn reload(&mut self, config: CredrotorConfig) {
        if config.rotation != self.config.rotation {
            tracing::warn!("Rotation settings changed; restart to apply them");
        }
        if config.store != self.config.store {
            tracing::warn!("Store settings changed; restart to apply them");
        }
        if config.app_registration.graph_url != self.config.app_registration.graph_url {
            tracing::warn!("Graph URL changed; restart to apply it");
        }
        if config.app_registration.client_id != self.config.app_registration.client_id
            || config.app_registration.tenant_id != self.config.app_registration.tenant_id
        {
            tracing::warn!(
                "Application identity changed; the engine keeps managing {} until restart",
                self.config.app_registration.client_id
            );
        }

        self.config.app_registration.authority_url = config.app_registration.authority_url;
        self.config_version += 1;
        self.tokens
            .reconfigure(self.config.app_registration.snapshot(self.config_version));
        self.config.app_registration.display_name = config.app_registration.display_name;
        self.config.log_level = config.log_level;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppRegistrationConfig, StoreBackend};
    use crate::store::Secret;

    fn config() -> CredrotorConfig {
        let mut app = AppRegistrationConfig::new("tenant-a", "client-a");
        app.initial_secret = Some(Secret::new("seed"));
        let mut config = CredrotorConfig::new(app);
        config.store.backend = StoreBackend::Memory;
        config
    }

    #[test]
    fn test_binding_is_seeded() {
        let services = Services::from_config(config()).unwrap();
        assert_eq!(services.binding.secret(), Some(Secret::new("seed")));
    }

    #[test]
    fn test_reload_bumps_identity_version() {
        let mut services = Services::from_config(config()).unwrap();
        assert_eq!(services.tokens.identity().version, 1);

        let mut next = config();
        next.app_registration.authority_url =
            Some("https://login.example.test/tenant-a".parse().unwrap());
        services.reload(next);

        let identity = services.tokens.identity();
        assert_eq!(identity.version, 2);
        assert_eq!(identity.authority, "https://login.example.test/tenant-a");
    }

    #[test]
    fn test_reload_keeps_running_application_identity() {
        let mut services = Services::from_config(config()).unwrap();

        let mut app = AppRegistrationConfig::new("tenant-b", "client-b");
        app.initial_secret = Some(Secret::new("seed"));
        let mut next = CredrotorConfig::new(app);
        next.store.backend = StoreBackend::Memory;
        services.reload(next);

        let identity = services.tokens.identity();
        assert_eq!(identity.version, 2);
        assert_eq!(identity.client_id.as_str(), "client-a");
        assert_eq!(identity.tenant_id.as_str(), "tenant-a");
        assert_eq!(identity.authority, "https://login.microsoftonline.com/tenant-a");
        assert_eq!(services.config().app_registration.client_id.as_str(), "client-a");
        assert_eq!(services.config().app_registration.tenant_id.as_str(), "tenant-a");
    }
}
