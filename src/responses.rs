//! Plain result values returned by the engine.
//!
//! Every engine call returns one of these by value; nothing here is shared
//! or mutated after it is handed out.

use serde::Serialize;

use crate::cache::CachedLicense;
use crate::remote::{LicenseRecord, LicenseStatus, LicenseType, Role, UserRecord};

pub(crate) const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Whole days until `expiry`, rounded up, never negative.
pub fn days_until(expiry: i64, now: i64) -> i64 {
    let remaining = expiry - now;
    if remaining <= 0 {
        0
    } else {
        (remaining + DAY_MS - 1) / DAY_MS
    }
}

/// License facts shown to the application.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseData {
    pub license_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_type: Option<LicenseType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<LicenseStatus>,
    pub expiry_date: i64,
    pub activated_on: i64,
    pub last_validation: i64,
    pub validation_count: u64,
    pub hardware_id: String,
    pub user_id: String,
}

impl From<&CachedLicense> for LicenseData {
    fn from(c: &CachedLicense) -> Self {
        Self {
            license_code: c.license_code.clone(),
            license_type: None,
            status: None,
            expiry_date: c.expiry_date,
            activated_on: c.activated_on,
            last_validation: c.last_validation,
            validation_count: c.validation_count,
            hardware_id: c.hardware_id.clone(),
            user_id: c.user_id.clone(),
        }
    }
}

impl From<&LicenseRecord> for LicenseData {
    fn from(r: &LicenseRecord) -> Self {
        Self {
            license_code: r.code.clone(),
            license_type: Some(r.license_type),
            status: Some(r.status),
            expiry_date: r.expiry_date.unwrap_or_default(),
            activated_on: r.activated_on.unwrap_or_default(),
            last_validation: r.last_validation.unwrap_or_default(),
            validation_count: r.validation_count,
            hardware_id: r.hardware_id.clone().unwrap_or_default(),
            user_id: r.user_id.clone().unwrap_or_default(),
        }
    }
}

/// Identity of the person using the application.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserData {
    pub uid: String,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub permissions: Vec<String>,
}

impl UserData {
    pub fn new(uid: impl Into<String>, email: impl Into<String>, display_name: impl Into<String>, role: Role) -> Self {
        Self {
            uid: uid.into(),
            email: email.into(),
            display_name: display_name.into(),
            role,
            permissions: role.permissions(),
        }
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

impl From<&UserRecord> for UserData {
    fn from(r: &UserRecord) -> Self {
        let permissions = if r.permissions.is_empty() {
            r.role.permissions()
        } else {
            r.permissions.clone()
        };
        Self {
            uid: r.uid.clone(),
            email: r.email.clone(),
            display_name: r.display_name.clone(),
            role: r.role,
            permissions,
        }
    }
}

/// Offline freshness of the last online validation.
///
/// `Fresh` until the validation interval elapses, `GracePeriod` until the
/// grace period on top of it elapses, `Locked` afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GraceState {
    Fresh,
    GracePeriod,
    Locked,
}

/// Successful remote validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineValidation {
    pub is_valid: bool,
    pub license: LicenseData,
    pub days_remaining: i64,
}

/// Successful local validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineValidation {
    pub is_valid: bool,
    pub license: LicenseData,
    pub days_remaining: i64,
    /// True once the validation interval has elapsed
    pub needs_online_validation: bool,
    /// Milliseconds left before offline use is refused
    pub grace_period_remaining_ms: i64,
    pub grace_state: GraceState,
}

/// How a session was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginMode {
    Online,
    Offline,
    Master,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResult {
    pub mode: LoginMode,
    pub user: UserData,
    pub license: LicenseData,
    pub days_remaining: i64,
    pub needs_online_validation: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResult {
    pub role: Role,
    pub license_code: String,
    pub expiry_date: i64,
    pub days_remaining: i64,
    pub user: UserData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewalResult {
    pub previous_license_code: String,
    pub license_code: String,
    pub expiry_date: i64,
    pub days_remaining: i64,
}

/// Result of an opportunistic background check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PeriodicOutcome {
    /// No license on this device
    NeedsRegistration,
    /// Within the validation interval; no remote call made
    Fresh(OfflineValidation),
    /// Validated against the remote store and the local copy refreshed
    Revalidated(OnlineValidation),
    /// Remote unreachable; still usable inside the grace period
    GracePeriod(OfflineValidation),
}

impl PeriodicOutcome {
    pub fn is_valid(&self) -> bool {
        !matches!(self, PeriodicOutcome::NeedsRegistration)
    }

    pub fn needs_registration(&self) -> bool {
        matches!(self, PeriodicOutcome::NeedsRegistration)
    }
}

/// Unified answer to "may the application run right now?".
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseStatusReport {
    pub is_valid: bool,
    pub is_online: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_remaining: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<i64>,
    pub needs_online_validation: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grace_period_remaining_ms: Option<i64>,
    /// Human-readable failure reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Machine-readable failure code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl LicenseStatusReport {
    pub fn from_online(v: &OnlineValidation) -> Self {
        Self {
            is_valid: v.is_valid,
            is_online: true,
            license_code: Some(v.license.license_code.clone()),
            days_remaining: Some(v.days_remaining),
            expiry_date: Some(v.license.expiry_date),
            ..Default::default()
        }
    }

    pub fn from_offline(v: &OfflineValidation) -> Self {
        Self {
            is_valid: v.is_valid,
            is_online: false,
            license_code: Some(v.license.license_code.clone()),
            days_remaining: Some(v.days_remaining),
            expiry_date: Some(v.license.expiry_date),
            needs_online_validation: v.needs_online_validation,
            grace_period_remaining_ms: Some(v.grace_period_remaining_ms),
            ..Default::default()
        }
    }

    pub fn invalid(
        license_code: Option<String>,
        is_online: bool,
        error: &crate::errors::LicenseError,
    ) -> Self {
        Self {
            is_valid: false,
            is_online,
            license_code,
            reason: Some(error.to_string()),
            error_code: Some(error.code().to_string()),
            ..Default::default()
        }
    }
}

/// The identity behind the current engine session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user: UserData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_code: Option<String>,
    pub mode: LoginMode,
    pub started_at: i64,
}
