//! Local secret storage.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for sensitive values that prevents accidental logging
//! - [`SecretStore`] - Trait for secret storage backends
//! - [`FileSecretStore`] - One file per tenant on disk
//! - [`MemoryStore`] - In-memory implementation for testing
//! - [`KeyringStore`] - OS keyring implementation (with `keyring-store` feature)
//! - [`open_store`] - Helper to select a backend from configuration
//!
//! # Storage Key Convention
//!
//! The active secret is keyed by the directory tenant id. Each key holds a
//! single value; `set` overwrites.
//!
//! # Example
//!
//! ```rust,ignore
//! use credrotor_core::store::{FileSecretStore, Secret, SecretStore};
//!
//! let store = FileSecretStore::open("/var/lib/credrotor")?;
//! store.set("52f884f5-dd61-4b1e-9f6a-81eb9ca2c89a", &Secret::new("s3cr3t")).await?;
//! ```

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::{StoreBackend, StoreConfig};

mod file;
mod memory;
#[cfg(feature = "keyring-store")]
mod keyring;

pub use file::{is_valid_key, FileSecretStore};
pub use memory::MemoryStore;
#[cfg(feature = "keyring-store")]
pub use keyring::KeyringStore;

/// Number of leading characters kept by [`Secret::obscured`].
const OBSCURED_PREFIX_LEN: usize = 5;

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value.
/// The buffer is zeroed when the secret is dropped.
#[derive(Clone, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// A log-safe hint: the first few characters followed by asterisks.
    ///
    /// Empty secrets and secrets too short to hide anything render as `""`
    /// and `"******"` respectively.
    pub fn obscured(&self) -> String {
        if self.0.is_empty() {
            return String::new();
        }
        let prefix: String = self.0.chars().take(OBSCURED_PREFIX_LEN).collect();
        if prefix.chars().count() == self.0.chars().count() {
            return "******".to_string();
        }
        format!("{}******************", prefix)
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

/// Error type for secret store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key cannot be mapped onto the backend (e.g. not a valid file name).
    #[error("invalid secret key: {key:?}")]
    InvalidKey { key: String },

    /// Access to the secret was denied.
    #[error("access denied to secret: {key}")]
    AccessDenied { key: String },

    /// Reading or writing the backing file failed.
    #[error("I/O error for secret {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    BackendError { message: String },

    /// The keyring backend is not available.
    #[error("keyring not available: {message}")]
    KeyringUnavailable { message: String },
}

/// Abstraction over secret storage backends.
///
/// Implementations include:
/// - [`FileSecretStore`] - one raw file per key
/// - [`MemoryStore`] - In-memory storage for testing
/// - [`KeyringStore`] (with `keyring-store` feature) - OS keyring
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Retrieve a secret by key.
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError>;

    /// Store a secret at the given key.
    ///
    /// Overwrites any existing value.
    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError>;

    /// Delete a secret by key.
    ///
    /// Returns `Ok(())` even if the key didn't exist.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Check if a key exists without retrieving the value.
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }
}

/// Open the secret store described by the configuration.
///
/// # Backend Selection
///
/// - `file`: [`FileSecretStore`] rooted at the configured directory, or the
///   platform data directory when none is set
/// - `keyring`: [`KeyringStore`]; falls back to the file backend with a
///   warning when the keyring is unavailable or the feature is disabled
/// - `memory`: [`MemoryStore`]; secrets do not survive a restart
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn SecretStore>, StoreError> {
    match config.backend {
        StoreBackend::Memory => {
            tracing::warn!(
                "Using in-memory secret storage. \
                 Secrets will not persist across restarts and every start will bootstrap."
            );
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Keyring => {
            #[cfg(feature = "keyring-store")]
            match KeyringStore::try_new("credrotor") {
                Ok(store) => {
                    tracing::info!("Using OS keyring for secret storage");
                    return Ok(Arc::new(store));
                }
                Err(e) => {
                    tracing::warn!("Keyring unavailable ({}), falling back to file store", e);
                }
            }

            #[cfg(not(feature = "keyring-store"))]
            tracing::warn!(
                "Keyring storage requested but keyring-store feature not enabled. \
                 Using file store."
            );

            open_file_store(config)
        }
        StoreBackend::File => open_file_store(config),
    }
}

fn open_file_store(config: &StoreConfig) -> Result<Arc<dyn SecretStore>, StoreError> {
    let directory = config.resolved_directory().ok_or_else(|| StoreError::BackendError {
        message: "no secret directory configured and no platform data directory available"
            .to_string(),
    })?;
    tracing::debug!("Using file secret storage at {:?}", directory);
    Ok(Arc::new(FileSecretStore::open(directory)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_debug_redacted() {
        let secret = Secret::new("super-secret");
        let debug = format!("{:?}", secret);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_secret_display_redacted() {
        let secret = Secret::new("super-secret");
        let display = format!("{}", secret);
        assert!(!display.contains("super-secret"));
        assert!(display.contains("REDACTED"));
    }

    #[test]
    fn test_secret_obscured() {
        assert_eq!(Secret::new("abcdefghij").obscured(), "abcde******************");
        assert_eq!(Secret::new("abc").obscured(), "******");
        assert_eq!(Secret::new("").obscured(), "");
    }

    #[tokio::test]
    async fn test_open_memory_store() {
        let config = StoreConfig {
            backend: StoreBackend::Memory,
            directory: None,
        };
        let store = open_store(&config).unwrap();

        store.set("tenant", &Secret::new("value")).await.unwrap();
        assert_eq!(store.get("tenant").await.unwrap().unwrap().expose(), "value");
    }

    #[tokio::test]
    async fn test_open_file_store_in_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = StoreConfig {
            backend: StoreBackend::File,
            directory: Some(dir.path().join("secrets")),
        };
        let store = open_store(&config).unwrap();

        store.set("tenant", &Secret::new("value")).await.unwrap();
        assert!(dir.path().join("secrets").join("tenant").exists());
    }
}
