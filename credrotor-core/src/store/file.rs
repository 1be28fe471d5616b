//! File-backed secret storage.
//!
//! Layout: one file per key inside a single directory. The file name is the
//! key (the tenant id) and the content is the raw secret, with no framing and
//! no encryption. Protecting the directory is the operator's job; files are
//! created with mode `0600` on unix.

use async_trait::async_trait;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use super::{Secret, SecretStore, StoreError};

/// Secret store keeping one raw file per key.
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    directory: PathBuf,
}

impl FileSecretStore {
    /// Create a store rooted at `directory` without touching the filesystem.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Create a store rooted at `directory`, creating it if missing.
    pub fn open(directory: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self::new(directory);
        std::fs::create_dir_all(&store.directory).map_err(|source| StoreError::Io {
            key: store.directory.display().to_string(),
            source,
        })?;
        Ok(store)
    }

    /// The directory holding the secret files.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the file backing `key`.
    ///
    /// Keys must be plain file names: non-empty, no path separators, and not
    /// `.` or `..`.
    pub fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        if !is_valid_key(key) {
            return Err(StoreError::InvalidKey {
                key: key.to_string(),
            });
        }
        Ok(self.directory.join(key))
    }
}

/// Whether `key` is a plain file name: non-empty, no path separators or NUL,
/// and not `.` or `..`.
pub fn is_valid_key(key: &str) -> bool {
    !(key.is_empty() || key == "." || key == ".." || key.contains(['/', '\\', '\0']))
}

fn io_error(key: &str, source: std::io::Error) -> StoreError {
    if source.kind() == ErrorKind::PermissionDenied {
        StoreError::AccessDenied {
            key: key.to_string(),
        }
    } else {
        StoreError::Io {
            key: key.to_string(),
            source,
        }
    }
}

/// Write `contents` next to `path` and atomically rename it into place.
fn write_atomically(directory: &Path, path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = NamedTempFile::new_in(directory)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(Secret::new(contents))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(key, e)),
        }
    }

    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let directory = self.directory.clone();
        let secret = secret.clone();

        tokio::task::spawn_blocking(move || {
            write_atomically(&directory, &path, secret.expose().as_bytes())
        })
        .await
        .map_err(|e| StoreError::BackendError {
            message: format!("secret write task failed: {}", e),
        })?
        .map_err(|e| io_error(key, e))?;

        tracing::trace!("Wrote secret file for {}", key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(key, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (FileSecretStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = FileSecretStore::open(dir.path()).unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_round_trip_is_exact() {
        let (store, _dir) = test_store();
        let value = "  Ab1~Zq.8Q~with-trailing-newline\n";

        store.set("tenant-a", &Secret::new(value)).await.unwrap();
        let loaded = store.get("tenant-a").await.unwrap().unwrap();

        assert_eq!(loaded.expose(), value);
    }

    #[tokio::test]
    async fn test_file_layout_is_raw() {
        let (store, dir) = test_store();
        store.set("tenant-a", &Secret::new("raw-value")).await.unwrap();

        let on_disk = std::fs::read_to_string(dir.path().join("tenant-a")).unwrap();
        assert_eq!(on_disk, "raw-value");
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let (store, _dir) = test_store();
        assert!(store.get("tenant-a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let (store, _dir) = test_store();
        store.set("tenant-a", &Secret::new("old")).await.unwrap();
        store.set("tenant-a", &Secret::new("new")).await.unwrap();

        assert_eq!(store.get("tenant-a").await.unwrap().unwrap().expose(), "new");
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (store, _dir) = test_store();
        store.set("tenant-a", &Secret::new("value")).await.unwrap();

        store.delete("tenant-a").await.unwrap();
        store.delete("tenant-a").await.unwrap();
        assert!(!store.exists("tenant-a").await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_path_like_keys() {
        let (store, _dir) = test_store();
        for key in ["", ".", "..", "../escape", "a/b", "a\\b"] {
            let result = store.set(key, &Secret::new("x")).await;
            assert!(
                matches!(result, Err(StoreError::InvalidKey { .. })),
                "key {:?} should be rejected",
                key
            );
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_secret_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let (store, dir) = test_store();
        store.set("tenant-a", &Secret::new("value")).await.unwrap();

        let mode = std::fs::metadata(dir.path().join("tenant-a"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o077, 0);
    }
}
