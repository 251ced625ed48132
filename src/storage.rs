//! Durable key-value storage for the local license slots.
//!
//! [`KeyValueStore`] is the only persistence surface the engine needs:
//! `get`, `set` and `delete` on string values.
//!
//! ## Implementations
//!
//! **[`SecureStore`]** tries the OS keyring first and falls back to a file per
//! key in the application data directory:
//! - Windows: `%APPDATA%\liqueen\`
//! - macOS: `~/Library/Application Support/liqueen/`
//! - Linux: `~/.local/share/liqueen/`
//!
//! **[`MemoryStore`]** keeps values in process memory.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::RwLock;

use crate::config::StorageConfig;
use crate::errors::{LicenseError, LicenseResult};

/// Generic durable string storage.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns `None` when the key has never been set or was deleted.
    async fn get(&self, key: &str) -> LicenseResult<Option<String>>;

    /// Overwrites any previous value.
    async fn set(&self, key: &str, value: &str) -> LicenseResult<()>;

    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> LicenseResult<()>;
}

/// OS keyring with an app-data-directory file fallback.
#[derive(Debug, Clone)]
pub struct SecureStore {
    service_name: String,
    data_dir: Option<PathBuf>,
}

impl SecureStore {
    pub fn new(service_name: impl Into<String>, data_dir: Option<PathBuf>) -> Self {
        let service_name = service_name.into();
        let data_dir = data_dir.or_else(|| dirs::data_dir().map(|p| p.join(&service_name)));
        Self {
            service_name,
            data_dir,
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.service_name.clone(), config.data_dir.clone())
    }

    /// Directory used for the file fallback.
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    fn no_data_dir() -> LicenseError {
        LicenseError::StorageError(std::io::Error::new(
            ErrorKind::NotFound,
            "Could not determine app data directory",
        ))
    }

    // === Keyring Operations ===

    fn save_to_keyring(&self, key: &str, value: &str) -> Result<(), keyring::Error> {
        let entry = keyring::Entry::new(&self.service_name, key)?;
        entry.set_password(value)
    }

    fn load_from_keyring(&self, key: &str) -> Result<String, keyring::Error> {
        let entry = keyring::Entry::new(&self.service_name, key)?;
        entry.get_password()
    }

    fn clear_from_keyring(&self, key: &str) -> Result<(), keyring::Error> {
        let entry = keyring::Entry::new(&self.service_name, key)?;
        entry.delete_credential()
    }

    // === File Operations ===

    async fn save_to_file(&self, key: &str, value: &str) -> LicenseResult<()> {
        let dir = self.data_dir.as_ref().ok_or_else(Self::no_data_dir)?;
        fs::create_dir_all(dir).await?;
        fs::write(dir.join(key), value).await?;
        Ok(())
    }

    async fn load_from_file(&self, key: &str) -> LicenseResult<Option<String>> {
        let dir = self.data_dir.as_ref().ok_or_else(Self::no_data_dir)?;
        match fs::read_to_string(dir.join(key)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LicenseError::StorageError(e)),
        }
    }

    async fn clear_from_file(&self, key: &str) -> LicenseResult<()> {
        let Some(dir) = self.data_dir.as_ref() else {
            return Ok(());
        };
        match fs::remove_file(dir.join(key)).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LicenseError::StorageError(e)),
        }
    }
}

#[async_trait]
impl KeyValueStore for SecureStore {
    async fn get(&self, key: &str) -> LicenseResult<Option<String>> {
        match self.load_from_keyring(key) {
            Ok(data) => {
                log::debug!("Loaded {} from keyring", key);
                return Ok(Some(data));
            }
            Err(keyring::Error::NoEntry) => {}
            Err(e) => log::debug!("Keyring load failed for {}: {}", key, e),
        }

        let data = self.load_from_file(key).await?;
        if data.is_some() {
            log::debug!("Loaded {} from app data directory", key);
        }
        Ok(data)
    }

    async fn set(&self, key: &str, value: &str) -> LicenseResult<()> {
        match self.save_to_keyring(key, value) {
            Ok(()) => {
                // Some platforms accept the write but never persist it.
                if matches!(self.load_from_keyring(key), Ok(ref v) if v == value) {
                    log::debug!("Saved {} to keyring", key);
                    if let Err(e) = self.clear_from_file(key).await {
                        log::debug!("Could not remove stale file copy of {}: {}", key, e);
                    }
                    return Ok(());
                }
                log::debug!("Keyring save verification failed for {}, falling back to file", key);
            }
            Err(e) => {
                log::debug!("Keyring save failed for {}: {}, falling back to file", key, e);
            }
        }

        self.save_to_file(key, value).await?;
        log::debug!("Saved {} to app data directory", key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> LicenseResult<()> {
        if let Err(e) = self.clear_from_keyring(key) {
            match e {
                keyring::Error::NoEntry => {}
                _ => log::debug!("Failed to clear {} from keyring: {}", key, e),
            }
        }
        self.clear_from_file(key).await
    }
}

/// Process-local store. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.entries.read().await.contains_key(key)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> LicenseResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> LicenseResult<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> LicenseResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn temp_store() -> SecureStore {
        let dir = std::env::temp_dir().join(format!("liqueen-test-{}", uuid::Uuid::new_v4()));
        SecureStore::new(format!("liqueen-test-{}", uuid::Uuid::new_v4()), Some(dir))
    }

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", "v1").await.unwrap();
        store.set("k", "v2").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v2"));

        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn memory_store_clones_share_state() {
        let a = MemoryStore::new();
        let b = a.clone();
        a.set("slot", "x").await.unwrap();
        assert!(b.contains("slot").await);
    }

    #[tokio::test]
    #[serial]
    async fn secure_store_roundtrip() {
        let store = temp_store();
        assert_eq!(store.get("liqueen_user").await.unwrap(), None);

        store.set("liqueen_user", "payload").await.unwrap();
        assert_eq!(
            store.get("liqueen_user").await.unwrap().as_deref(),
            Some("payload")
        );

        store.delete("liqueen_user").await.unwrap();
        assert_eq!(store.get("liqueen_user").await.unwrap(), None);
    }

    #[tokio::test]
    #[serial]
    async fn keyring_write_survives_unremovable_file_copy() {
        let store = temp_store();
        // Only meaningful where the keyring persists writes.
        if store.save_to_keyring("liqueen_keyring_check", "x").is_err()
            || store.load_from_keyring("liqueen_keyring_check").ok().as_deref() != Some("x")
        {
            return;
        }
        let _ = store.clear_from_keyring("liqueen_keyring_check");

        // A directory where the stale file copy would be cannot be removed.
        let dir = store.data_dir().unwrap().to_path_buf();
        std::fs::create_dir_all(dir.join("liqueen_user")).unwrap();

        store.set("liqueen_user", "payload").await.unwrap();
        assert_eq!(
            store.get("liqueen_user").await.unwrap().as_deref(),
            Some("payload")
        );

        std::fs::remove_dir_all(&dir).unwrap();
        store.delete("liqueen_user").await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn secure_store_delete_missing_is_ok() {
        let store = temp_store();
        store.delete("never-written").await.unwrap();
    }

    #[test]
    fn default_data_dir_is_per_service() {
        let store = SecureStore::new("liqueen", None);
        if let Some(dir) = store.data_dir() {
            assert!(dir.ends_with("liqueen"));
        }
    }
}
