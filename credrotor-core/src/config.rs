//! Configuration for credrotor.
//!
//! The configuration file is TOML with three sections:
//!
//! ```toml
//! log_level = "info"
//!
//! [app_registration]
//! tenant_id = "52f884f5-dd61-4b1e-9f6a-81eb9ca2c89a"
//! client_id = "0b6ef2a7-86a1-4e49-8bb1-3a2f6c4e9d10"
//! initial_secret = "only needed for the very first run"
//!
//! [rotation]
//! refresh_cycle = "5m"
//! credential_lifetime = "30days"
//! threshold_end_lifetime = "7days"
//! display_name_prefix = "By credrotor"
//!
//! [store]
//! backend = "file"
//! directory = "/var/lib/credrotor"
//! ```
//!
//! Durations use humantime syntax (`"90s"`, `"5m"`, `"1h 30m"`, `"30days"`).

use directories::ProjectDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::model::{ClientId, TenantId};
use crate::store::{self, Secret};

/// Default Microsoft Graph endpoint.
pub const DEFAULT_GRAPH_URL: &str = "https://graph.microsoft.com";

/// Default authority host; the tenant id is appended.
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Default for every rotation duration.
const DEFAULT_CYCLE: Duration = Duration::from_secs(5 * 60);

/// Upper bound on configured durations, to keep timestamp arithmetic in range.
const MAX_DURATION: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Error type for configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for this schema.
    #[error("failed to parse config from {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A value is present but unusable.
    #[error("invalid configuration: {field}: {message}")]
    Invalid { field: &'static str, message: String },

    /// No platform configuration directory could be determined.
    #[error("configuration directory not available")]
    ConfigDirUnavailable,
}

/// Top-level configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct CredrotorConfig {
    /// Default log filter when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// The application whose credentials are rotated.
    pub app_registration: AppRegistrationConfig,

    /// Rotation parameters.
    #[serde(default)]
    pub rotation: RotationConfig,

    /// Where the active secret is cached.
    #[serde(default)]
    pub store: StoreConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Identity of the registered application.
#[derive(Debug, Clone, Deserialize)]
pub struct AppRegistrationConfig {
    /// Directory (tenant) id.
    pub tenant_id: TenantId,

    /// Application (client) id.
    pub client_id: ClientId,

    /// Human-readable name of the registration, for logs only.
    #[serde(default)]
    pub display_name: Option<String>,

    /// Custom authority, e.g. `https://login.microsoftonline.com/<tenant>/`.
    #[serde(default)]
    pub authority_url: Option<Url>,

    /// Secret used until a rotated one is stored; needed for the first run.
    #[serde(default)]
    pub initial_secret: Option<Secret>,

    /// Directory API endpoint.
    #[serde(default = "default_graph_url")]
    pub graph_url: String,
}

fn default_graph_url() -> String {
    DEFAULT_GRAPH_URL.to_string()
}

impl AppRegistrationConfig {
    /// Create a configuration for `tenant_id`/`client_id` with defaults.
    pub fn new(tenant_id: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            tenant_id: TenantId::new(tenant_id),
            client_id: ClientId::new(client_id),
            display_name: None,
            authority_url: None,
            initial_secret: None,
            graph_url: default_graph_url(),
        }
    }

    /// Authority to request tokens from, without a trailing slash.
    pub fn authority(&self) -> String {
        match &self.authority_url {
            Some(url) => url.as_str().trim_end_matches('/').to_string(),
            None => format!("{}/{}", DEFAULT_AUTHORITY_HOST, self.tenant_id),
        }
    }

    /// Freeze the identity into a versioned snapshot for the token provider.
    pub fn snapshot(&self, version: u64) -> IdentitySnapshot {
        IdentitySnapshot {
            version,
            tenant_id: self.tenant_id.clone(),
            client_id: self.client_id.clone(),
            authority: self.authority(),
        }
    }
}

/// Immutable view of the identity configuration.
///
/// A new snapshot with a higher version replaces the old one when the
/// configuration changes; anything built from an older version is stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentitySnapshot {
    /// Monotonic configuration version.
    pub version: u64,

    /// Directory (tenant) id.
    pub tenant_id: TenantId,

    /// Application (client) id.
    pub client_id: ClientId,

    /// Authority base URL without trailing slash.
    pub authority: String,
}

impl IdentitySnapshot {
    /// OAuth2 token endpoint for this identity.
    pub fn token_url(&self) -> String {
        format!("{}/oauth2/v2.0/token", self.authority)
    }

    /// OAuth2 authorization endpoint for this identity.
    pub fn authorize_url(&self) -> String {
        format!("{}/oauth2/v2.0/authorize", self.authority)
    }
}

/// Rotation parameters. Fixed for the lifetime of an engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    /// Period of the control loop.
    #[serde(with = "humantime_serde")]
    pub refresh_cycle: Duration,

    /// Validity window of newly created credentials.
    #[serde(with = "humantime_serde")]
    pub credential_lifetime: Duration,

    /// Rotate once the active credential has less than this left.
    #[serde(with = "humantime_serde")]
    pub threshold_end_lifetime: Duration,

    /// Display name prefix marking credentials created by this engine.
    pub display_name_prefix: String,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            refresh_cycle: DEFAULT_CYCLE,
            credential_lifetime: DEFAULT_CYCLE,
            threshold_end_lifetime: DEFAULT_CYCLE,
            display_name_prefix: "By credrotor".to_string(),
        }
    }
}

impl RotationConfig {
    /// Credential lifetime as a signed duration.
    pub fn lifetime(&self) -> chrono::Duration {
        to_signed(self.credential_lifetime)
    }

    /// Early-warning threshold as a signed duration.
    pub fn threshold(&self) -> chrono::Duration {
        to_signed(self.threshold_end_lifetime)
    }

    /// Check that the parameters can drive an engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("rotation.refresh_cycle", self.refresh_cycle),
            ("rotation.credential_lifetime", self.credential_lifetime),
            ("rotation.threshold_end_lifetime", self.threshold_end_lifetime),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Invalid {
                    field,
                    message: "must be greater than zero".to_string(),
                });
            }
            if value > MAX_DURATION {
                return Err(ConfigError::Invalid {
                    field,
                    message: "must not exceed 100 years".to_string(),
                });
            }
        }
        if self.display_name_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "rotation.display_name_prefix",
                message: "must not be empty".to_string(),
            });
        }
        if self.threshold_end_lifetime >= self.credential_lifetime {
            tracing::warn!(
                "threshold_end_lifetime ({:?}) is not shorter than credential_lifetime ({:?}); \
                 every cycle will rotate",
                self.threshold_end_lifetime,
                self.credential_lifetime
            );
        }
        Ok(())
    }
}

fn to_signed(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// Secret store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// One file per tenant.
    #[default]
    File,
    /// OS keyring.
    Keyring,
    /// Process memory only.
    Memory,
}

/// Secret store configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend to use.
    pub backend: StoreBackend,

    /// Directory for the file backend.
    pub directory: Option<PathBuf>,
}

impl StoreConfig {
    /// The configured directory, or `<data_dir>/secrets`.
    pub fn resolved_directory(&self) -> Option<PathBuf> {
        self.directory
            .clone()
            .or_else(|| project_dirs().map(|d| d.data_dir().join("secrets")))
    }
}

impl CredrotorConfig {
    /// Configuration for `app_registration` with default rotation and store
    /// settings.
    pub fn new(app_registration: AppRegistrationConfig) -> Self {
        Self {
            log_level: default_log_level(),
            app_registration,
            rotation: RotationConfig::default(),
            store: StoreConfig::default(),
        }
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml_str(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the whole configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_registration.tenant_id.as_str().trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "app_registration.tenant_id",
                message: "must not be empty".to_string(),
            });
        }
        if !store::is_valid_key(self.app_registration.tenant_id.as_str()) {
            return Err(ConfigError::Invalid {
                field: "app_registration.tenant_id",
                message: format!(
                    "{:?} cannot be used as a file name",
                    self.app_registration.tenant_id.as_str()
                ),
            });
        }
        if self.app_registration.client_id.as_str().trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "app_registration.client_id",
                message: "must not be empty".to_string(),
            });
        }
        self.rotation.validate()
    }
}

/// Environment variable overriding the default configuration path.
pub const CONFIG_ENV: &str = "CREDROTOR_CONFIG";

/// Pick the configuration file: `explicit`, then `CREDROTOR_CONFIG`, then
/// [`default_config_path`].
pub fn resolve_config_path(explicit: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    match std::env::var_os(CONFIG_ENV) {
        Some(path) => Ok(PathBuf::from(path)),
        None => default_config_path(),
    }
}

/// Default location of the configuration file.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    project_dirs()
        .map(|d| d.config_dir().join("credrotor.toml"))
        .ok_or(ConfigError::ConfigDirUnavailable)
}

/// Load and validate the configuration at `path`.
pub fn load_from_path(path: &Path) -> Result<CredrotorConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    CredrotorConfig::from_toml_str(&contents, path)
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "raibid-labs", "credrotor")
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [app_registration]
        tenant_id = "tenant-a"
        client_id = "client-a"
    "#;

    fn parse(contents: &str) -> Result<CredrotorConfig, ConfigError> {
        CredrotorConfig::from_toml_str(contents, Path::new("test.toml"))
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse(MINIMAL).unwrap();

        assert_eq!(config.log_level, "info");
        assert_eq!(config.rotation.refresh_cycle, Duration::from_secs(300));
        assert_eq!(config.rotation.credential_lifetime, Duration::from_secs(300));
        assert_eq!(config.rotation.threshold_end_lifetime, Duration::from_secs(300));
        assert_eq!(config.rotation.display_name_prefix, "By credrotor");
        assert_eq!(config.store.backend, StoreBackend::File);
        assert_eq!(config.app_registration.graph_url, "https://graph.microsoft.com");
        assert!(config.app_registration.initial_secret.is_none());
    }

    #[test]
    fn test_full_config() {
        let config = parse(
            r#"
            log_level = "debug"

            [app_registration]
            tenant_id = "tenant-a"
            client_id = "client-a"
            authority_url = "https://login.example.com/tenant-a/"
            initial_secret = "bootstrap"

            [rotation]
            refresh_cycle = "1h"
            credential_lifetime = "30days"
            threshold_end_lifetime = "7days"
            display_name_prefix = "rotated by ops"

            [store]
            backend = "memory"
            "#,
        )
        .unwrap();

        assert_eq!(config.rotation.refresh_cycle, Duration::from_secs(3600));
        assert_eq!(config.rotation.threshold(), chrono::Duration::days(7));
        assert_eq!(config.rotation.lifetime(), chrono::Duration::days(30));
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(
            config.app_registration.initial_secret.as_ref().unwrap().expose(),
            "bootstrap"
        );
        assert_eq!(config.app_registration.authority(), "https://login.example.com/tenant-a");
    }

    #[test]
    fn test_initial_secret_is_redacted_in_debug() {
        let config = parse(&format!("{}initial_secret = \"hunter2hunter2\"\n", MINIMAL)).unwrap();
        assert!(!format!("{:?}", config).contains("hunter2"));
    }

    #[test]
    fn test_default_authority_uses_tenant() {
        let app = AppRegistrationConfig::new("tenant-a", "client-a");
        let snapshot = app.snapshot(3);

        assert_eq!(snapshot.version, 3);
        assert_eq!(
            snapshot.token_url(),
            "https://login.microsoftonline.com/tenant-a/oauth2/v2.0/token"
        );
    }

    #[test]
    fn test_rejects_empty_ids() {
        let result = parse(
            r#"
            [app_registration]
            tenant_id = ""
            client_id = "client-a"
            "#,
        );
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { field: "app_registration.tenant_id", .. })
        ));
    }

    #[test]
    fn test_rejects_zero_durations() {
        let rotation = RotationConfig {
            refresh_cycle: Duration::ZERO,
            ..RotationConfig::default()
        };
        assert!(matches!(
            rotation.validate(),
            Err(ConfigError::Invalid { field: "rotation.refresh_cycle", .. })
        ));
    }

    #[test]
    fn test_rejects_blank_prefix() {
        let rotation = RotationConfig {
            display_name_prefix: "  ".to_string(),
            ..RotationConfig::default()
        };
        assert!(rotation.validate().is_err());
    }

    #[test]
    fn test_rejects_tenant_id_unusable_as_file_name() {
        for tenant in ["../etc", "a/b", "a\\b", "..", "."] {
            let contents = format!(
                "[app_registration]\ntenant_id = {:?}\nclient_id = \"client-a\"",
                tenant
            );
            let err = parse(&contents).unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { field: "app_registration.tenant_id", .. }),
                "{} was accepted",
                tenant
            );
        }
    }

    #[test]
    fn test_parse_error_names_file() {
        let err = parse("not = [valid").unwrap_err();
        assert!(err.to_string().contains("test.toml"));
    }

    #[test]
    fn test_load_from_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("credrotor.toml");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = load_from_path(&path).unwrap();
        assert_eq!(config.app_registration.client_id.as_str(), "client-a");

        let missing = load_from_path(&dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
