//! OS keyring-backed secret storage implementation.

use async_trait::async_trait;
use keyring::Entry;

use super::{Secret, SecretStore, StoreError};

/// OS keyring-backed secret store.
///
/// Each key becomes one keyring entry whose service is the store's service
/// name and whose user is the key (the tenant id):
/// - macOS: Keychain
/// - Linux: Secret Service API (via libsecret)
/// - Windows: Credential Manager
pub struct KeyringStore {
    service_name: String,
}

impl KeyringStore {
    /// Try to create a new keyring store.
    ///
    /// Returns an error if the keyring backend is not available on this platform.
    pub fn try_new(service_name: &str) -> Result<Self, StoreError> {
        match Entry::new(service_name, "__availability_check__") {
            Ok(_) => Ok(Self {
                service_name: service_name.to_string(),
            }),
            Err(e) => Err(StoreError::KeyringUnavailable {
                message: e.to_string(),
            }),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey {
                key: key.to_string(),
            });
        }
        Entry::new(&self.service_name, key).map_err(|e| StoreError::BackendError {
            message: format!("failed to open keyring entry: {}", e),
        })
    }
}

impl std::fmt::Debug for KeyringStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringStore")
            .field("service_name", &self.service_name)
            .finish()
    }
}

#[async_trait]
impl SecretStore for KeyringStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        match self.entry(key)?.get_password() {
            Ok(password) => Ok(Some(Secret::new(password))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(keyring::Error::NoStorageAccess(_)) => Err(StoreError::AccessDenied {
                key: key.to_string(),
            }),
            Err(e) => Err(StoreError::BackendError {
                message: format!("keyring read failed: {}", e),
            }),
        }
    }

    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        self.entry(key)?
            .set_password(secret.expose())
            .map_err(|e| StoreError::BackendError {
                message: format!("keyring write failed: {}", e),
            })
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StoreError::BackendError {
                message: format!("keyring delete failed: {}", e),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These only exercise a real keyring when one is reachable; headless CI
    // machines usually have none.

    #[tokio::test]
    async fn test_keyring_round_trip_when_available() {
        let store = match KeyringStore::try_new("credrotor-test") {
            Ok(s) => s,
            Err(_) => return,
        };
        let key = format!("tenant-{}", uuid::Uuid::new_v4());

        if store.set(&key, &Secret::new("value")).await.is_err() {
            return;
        }
        if let Ok(Some(found)) = store.get(&key).await {
            assert_eq!(found.expose(), "value");
        }
        let _ = store.delete(&key).await;
    }

    #[tokio::test]
    async fn test_keyring_rejects_empty_key() {
        let store = match KeyringStore::try_new("credrotor-test") {
            Ok(s) => s,
            Err(_) => return,
        };
        assert!(matches!(
            store.get("").await,
            Err(StoreError::InvalidKey { .. })
        ));
    }
}
