//! Encrypted on-device license and user state.
//!
//! Two single-value slots, each holding one vault envelope:
//!
//! - `liqueen_license.lic`: the license bound to this device, keyed by the
//!   hardware fingerprint.
//! - `liqueen_user`: the cached identity, keyed by `fingerprint + "_user"`.
//!
//! A slot that fails to decrypt or has the wrong shape is treated as corrupt:
//! it is deleted and reported as empty.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{LicenseError, LicenseResult};
use crate::hardware::INSTALLATION_ID_KEY;
use crate::remote::{LicenseRecord, Role};
use crate::storage::KeyValueStore;
use crate::vault::SymmetricVault;

/// Slot holding the device license.
pub const LICENSE_SLOT: &str = "liqueen_license.lic";

/// Slot holding the cached user.
pub const USER_SLOT: &str = "liqueen_user";

/// Format version written into every cached license.
pub const CACHE_VERSION: &str = "2.1.0";

/// License state kept on the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedLicense {
    pub license_code: String,
    pub expiry_date: i64,
    pub hardware_id: String,
    pub user_id: String,
    pub activated_on: i64,
    pub last_validation: i64,
    #[serde(default)]
    pub validation_count: u64,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    CACHE_VERSION.to_string()
}

impl CachedLicense {
    /// Local copy of an activated remote record.
    ///
    /// Fails if the record is missing activation fields.
    pub fn from_record(record: &LicenseRecord) -> LicenseResult<Self> {
        let missing = |field: &str| {
            LicenseError::LicenseNotActivated(format!(
                "license {} has no {field}",
                record.code
            ))
        };
        let now = Utc::now().timestamp_millis();

        Ok(Self {
            license_code: record.code.clone(),
            expiry_date: record.expiry_date.ok_or_else(|| missing("expiry date"))?,
            hardware_id: record
                .hardware_id
                .clone()
                .ok_or_else(|| missing("hardware id"))?,
            user_id: record.user_id.clone().ok_or_else(|| missing("user id"))?,
            activated_on: record.activated_on.unwrap_or(now),
            last_validation: record.last_validation.unwrap_or(now),
            validation_count: record.validation_count,
            version: default_version(),
        })
    }

    fn is_well_formed(&self) -> bool {
        !self.license_code.is_empty() && self.expiry_date > 0 && !self.hardware_id.is_empty()
    }
}

/// Identity kept on the device for offline login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedUser {
    pub email: String,
    pub uid: String,
    #[serde(default)]
    pub display_name: String,
    pub role: Role,
    /// Salted one-way hash, never the password itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    pub last_login: i64,
}

/// The two encrypted local slots.
#[derive(Clone)]
pub struct LocalLicenseCache {
    store: Arc<dyn KeyValueStore>,
    vault: SymmetricVault,
}

impl LocalLicenseCache {
    pub fn new(store: Arc<dyn KeyValueStore>, vault: SymmetricVault) -> Self {
        Self { store, vault }
    }

    fn user_seed(fingerprint: &str) -> String {
        format!("{fingerprint}_user")
    }

    pub async fn save_license(&self, license: &CachedLicense, fingerprint: &str) -> LicenseResult<()> {
        let key = self.vault.derive_key(fingerprint);
        let envelope = self.vault.encrypt_record(license, &key)?;
        self.store.set(LICENSE_SLOT, &envelope).await?;
        debug!("Saved license slot");
        Ok(())
    }

    /// `Ok(None)` when the slot is empty or was corrupt.
    pub async fn load_license(&self, fingerprint: &str) -> LicenseResult<Option<CachedLicense>> {
        let Some(envelope) = self.store.get(LICENSE_SLOT).await? else {
            return Ok(None);
        };

        let key = self.vault.derive_key(fingerprint);
        match self.vault.decrypt_record::<CachedLicense>(&envelope, &key) {
            Ok(license) if license.is_well_formed() => Ok(Some(license)),
            Ok(_) => {
                self.discard(LICENSE_SLOT, "incomplete license record").await?;
                Ok(None)
            }
            Err(e) => {
                self.discard(LICENSE_SLOT, &e.to_string()).await?;
                Ok(None)
            }
        }
    }

    pub async fn save_user(&self, user: &CachedUser, fingerprint: &str) -> LicenseResult<()> {
        let key = self.vault.derive_key(&Self::user_seed(fingerprint));
        let envelope = self.vault.encrypt_record(user, &key)?;
        self.store.set(USER_SLOT, &envelope).await?;
        debug!("Saved user slot");
        Ok(())
    }

    /// `Ok(None)` when the slot is empty or was corrupt.
    pub async fn load_user(&self, fingerprint: &str) -> LicenseResult<Option<CachedUser>> {
        let Some(envelope) = self.store.get(USER_SLOT).await? else {
            return Ok(None);
        };

        let key = self.vault.derive_key(&Self::user_seed(fingerprint));
        match self.vault.decrypt_record::<CachedUser>(&envelope, &key) {
            Ok(user) => Ok(Some(user)),
            Err(e) => {
                self.discard(USER_SLOT, &e.to_string()).await?;
                Ok(None)
            }
        }
    }

    /// Remove only the license slot.
    pub async fn clear_license(&self) -> LicenseResult<()> {
        self.store.delete(LICENSE_SLOT).await
    }

    /// Remove both slots and the installation id.
    pub async fn clear(&self) -> LicenseResult<()> {
        self.store.delete(LICENSE_SLOT).await?;
        self.store.delete(USER_SLOT).await?;
        self.store.delete(INSTALLATION_ID_KEY).await?;
        Ok(())
    }

    async fn discard(&self, slot: &str, reason: &str) -> LicenseResult<()> {
        warn!(slot, reason, "Discarding corrupt cache slot");
        self.store.delete(slot).await
    }
}
