//! Remote license store: records and the store abstraction.
//!
//! The engine talks to the remote side only through [`RemoteLicenseStore`].
//! Two implementations exist:
//!
//! - [`DevelopmentLicenseStore`]: in-process, seeded with the fixed test codes.
//! - [`FirestoreLicenseStore`] (`live-store` feature): Firestore documents
//!   plus Firebase Auth over REST.
//!
//! [`connect`] picks one from configuration.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{RemoteConfig, RemoteMode};
use crate::errors::{LicenseError, LicenseResult};

#[path = "remote/memory.rs"]
mod memory;
pub use memory::DevelopmentLicenseStore;

#[cfg(feature = "live-store")]
#[path = "remote/firestore.rs"]
mod firestore;
#[cfg(feature = "live-store")]
pub use firestore::FirestoreLicenseStore;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Commercial license type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseType {
    Trial,
    Standard,
    Extended,
    Unlimited,
}

impl LicenseType {
    /// Validity from activation, in days.
    ///
    /// `standard_days` comes from policy; the other types are fixed.
    pub fn validity_days(&self, standard_days: u32) -> i64 {
        match self {
            LicenseType::Trial => 30,
            LicenseType::Standard => standard_days as i64,
            LicenseType::Extended => 5 * 365,
            LicenseType::Unlimited => 10 * 365,
        }
    }

    pub fn validity_ms(&self, standard_days: u32) -> i64 {
        self.validity_days(standard_days) * DAY_MS
    }
}

impl std::str::FromStr for LicenseType {
    type Err = LicenseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trial" => Ok(LicenseType::Trial),
            "standard" => Ok(LicenseType::Standard),
            "extended" => Ok(LicenseType::Extended),
            "unlimited" => Ok(LicenseType::Unlimited),
            other => Err(LicenseError::ConfigError(format!(
                "unknown license type '{other}'"
            ))),
        }
    }
}

/// Server-side license lifecycle.
///
/// `available -> used -> {expired | revoked | renewed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseStatus {
    Available,
    Used,
    Expired,
    Revoked,
    Renewed,
}

impl std::fmt::Display for LicenseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LicenseStatus::Available => "available",
            LicenseStatus::Used => "used",
            LicenseStatus::Expired => "expired",
            LicenseStatus::Revoked => "revoked",
            LicenseStatus::Renewed => "renewed",
        };
        f.write_str(s)
    }
}

/// Account role. `Master` only exists for break-glass sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    User,
    #[serde(rename = "master_admin")]
    Master,
}

const ADMIN_PERMISSIONS: &[&str] = &[
    "generate_licenses",
    "manage_users",
    "view_analytics",
    "system_config",
    "revoke_licenses",
    "unlimited_liquidations",
    "access_admin_panel",
];

const USER_PERMISSIONS: &[&str] = &[
    "use_app",
    "generate_liquidations",
    "export_pdf",
    "basic_features",
];

const MASTER_PERMISSIONS: &[&str] = &[
    "reset_config",
    "manage_licenses",
    "view_logs",
    "emergency_access",
];

impl Role {
    pub fn permissions(&self) -> Vec<String> {
        let set = match self {
            Role::Admin => ADMIN_PERMISSIONS,
            Role::User => USER_PERMISSIONS,
            Role::Master => MASTER_PERMISSIONS,
        };
        set.iter().map(|p| p.to_string()).collect()
    }

    /// Admin and master sessions may run support operations.
    pub fn is_privileged(&self) -> bool {
        matches!(self, Role::Admin | Role::Master)
    }
}

/// License document, keyed by code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseRecord {
    pub code: String,
    #[serde(rename = "type")]
    pub license_type: LicenseType,
    pub status: LicenseStatus,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activated_on: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_validation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    #[serde(default)]
    pub validation_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_on: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renewed_on: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renewed_with: Option<String>,
    #[serde(default)]
    pub is_renewal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_license: Option<String>,
}

impl LicenseRecord {
    /// A fresh, unactivated code.
    pub fn available(code: impl Into<String>, license_type: LicenseType, created_at: i64) -> Self {
        Self {
            code: code.into(),
            license_type,
            status: LicenseStatus::Available,
            created_at,
            expiry_date: None,
            activated_on: None,
            last_validation: None,
            hardware_id: None,
            user_id: None,
            user_email: None,
            validation_count: 0,
            revoked_on: None,
            revoked_reason: None,
            renewed_on: None,
            renewed_with: None,
            is_renewal: false,
            previous_license: None,
        }
    }
}

/// User document, keyed by uid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub uid: String,
    pub email: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_code: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_id: Option<String>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login: Option<i64>,
    #[serde(default)]
    pub previous_licenses: Vec<String>,
}

/// Fields of a license document to write.
///
/// `None` fields are left out of the write.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub license_type: Option<LicenseType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<LicenseStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated_on: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_validation: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hardware_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_on: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renewed_on: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renewed_with: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_renewal: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_license: Option<String>,
}

impl From<&LicenseRecord> for LicenseUpdate {
    fn from(r: &LicenseRecord) -> Self {
        Self {
            code: Some(r.code.clone()),
            license_type: Some(r.license_type),
            status: Some(r.status),
            created_at: Some(r.created_at),
            expiry_date: r.expiry_date,
            activated_on: r.activated_on,
            last_validation: r.last_validation,
            hardware_id: r.hardware_id.clone(),
            user_id: r.user_id.clone(),
            user_email: r.user_email.clone(),
            validation_count: Some(r.validation_count),
            revoked_on: r.revoked_on,
            revoked_reason: r.revoked_reason.clone(),
            renewed_on: r.renewed_on,
            renewed_with: r.renewed_with.clone(),
            is_renewal: Some(r.is_renewal),
            previous_license: r.previous_license.clone(),
        }
    }
}

/// Fields of a user document to write.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hardware_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_licenses: Option<Vec<String>>,
}

impl From<&UserRecord> for UserUpdate {
    fn from(r: &UserRecord) -> Self {
        Self {
            uid: Some(r.uid.clone()),
            email: Some(r.email.clone()),
            display_name: Some(r.display_name.clone()),
            company: r.company.clone(),
            role: Some(r.role),
            license_code: r.license_code.clone(),
            permissions: Some(r.permissions.clone()),
            hardware_id: r.hardware_id.clone(),
            created_at: Some(r.created_at),
            last_login: r.last_login,
            previous_licenses: Some(r.previous_licenses.clone()),
        }
    }
}

/// Authenticated remote account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub uid: String,
    pub email: String,
}

/// Remote document store plus identity provider.
///
/// Every method may fail with [`LicenseError::RemoteUnavailable`] when the
/// service cannot be reached.
#[async_trait]
pub trait RemoteLicenseStore: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn get_license(&self, code: &str) -> LicenseResult<Option<LicenseRecord>>;

    /// With `merge`, only the given fields change; otherwise the document
    /// is replaced by them.
    async fn set_license(&self, code: &str, fields: &LicenseUpdate, merge: bool) -> LicenseResult<()>;

    async fn get_user(&self, uid: &str) -> LicenseResult<Option<UserRecord>>;

    async fn set_user(&self, uid: &str, fields: &UserUpdate, merge: bool) -> LicenseResult<()>;

    async fn create_account(&self, email: &str, password: &str) -> LicenseResult<Identity>;

    async fn authenticate(&self, email: &str, password: &str) -> LicenseResult<Identity>;
}

/// Build the remote store selected by `config.mode`.
pub fn connect(config: &RemoteConfig) -> LicenseResult<Arc<dyn RemoteLicenseStore>> {
    match config.mode {
        RemoteMode::Development => Ok(Arc::new(DevelopmentLicenseStore::seeded())),
        #[cfg(feature = "live-store")]
        RemoteMode::Live => Ok(Arc::new(FirestoreLicenseStore::new(config)?)),
        #[cfg(not(feature = "live-store"))]
        RemoteMode::Live => Err(LicenseError::ConfigError(
            "live remote mode requires the `live-store` feature".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn permissions_follow_role() {
        assert!(Role::Admin.permissions().contains(&"revoke_licenses".to_string()));
        assert!(Role::User.permissions().contains(&"export_pdf".to_string()));
        assert!(!Role::User.permissions().contains(&"manage_users".to_string()));
        assert!(Role::Master.permissions().contains(&"emergency_access".to_string()));
        assert!(Role::Master.is_privileged());
        assert!(!Role::User.is_privileged());
    }

    #[test]
    fn validity_by_type() {
        assert_eq!(LicenseType::Trial.validity_days(730), 30);
        assert_eq!(LicenseType::Standard.validity_days(730), 730);
        assert_eq!(LicenseType::Extended.validity_days(730), 1825);
        assert_eq!(LicenseType::Unlimited.validity_days(730), 3650);
    }

    #[test]
    fn license_record_uses_document_field_names() {
        let record = LicenseRecord::available("LIQ-2025-TEST-0001-MAIK", LicenseType::Trial, 1);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "trial");
        assert_eq!(value["status"], "available");
        assert_eq!(value["createdAt"], 1);
        assert!(value.get("hardwareId").is_none());
    }

    #[test]
    fn update_skips_unset_fields() {
        let update = LicenseUpdate {
            status: Some(LicenseStatus::Revoked),
            revoked_reason: Some("chargeback".into()),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({"status": "revoked", "revokedReason": "chargeback"})
        );
    }

    #[test]
    fn master_role_serializes_as_master_admin() {
        assert_eq!(serde_json::to_value(Role::Master).unwrap(), "master_admin");
        assert_eq!(serde_json::to_value(Role::Admin).unwrap(), "admin");
    }

    #[test]
    fn license_type_parses_case_insensitively() {
        assert_eq!("Trial".parse::<LicenseType>().unwrap(), LicenseType::Trial);
        assert!("gold".parse::<LicenseType>().is_err());
    }
}
