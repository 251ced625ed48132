//! Error types for the Liqueen license engine.
//!
//! Every failure path carries a human-readable reason that the UI can show
//! as-is, plus a stable machine-readable [`LicenseError::code`].

use thiserror::Error;

/// Result alias used throughout the crate.
pub type LicenseResult<T> = Result<T, LicenseError>;

#[derive(Debug, Error)]
pub enum LicenseError {
    // === License code / remote record verdicts ===
    /// The code does not match `LIQ-YYYY-XXXX-YYYY-ZZZZ`.
    #[error("invalid license code format: {0}")]
    InvalidLicenseFormat(String),

    #[error("license code not found: {0}")]
    CodeNotFound(String),

    /// The code exists but is not `available`.
    #[error("license code already used or revoked: {0}")]
    CodeAlreadyUsed(String),

    #[error("license has been revoked: {0}")]
    LicenseRevoked(String),

    #[error("license is not activated: {0}")]
    LicenseNotActivated(String),

    #[error("license has expired: {0}")]
    LicenseExpired(String),

    #[error("hardware does not match the device this license is bound to: {0}")]
    HardwareMismatch(String),

    /// Offline use is locked until an online validation succeeds.
    #[error("online validation required: {0}")]
    RequiresOnlineValidation(String),

    // === Local cache ===
    #[error("no local license available: {0}")]
    NoLocalLicense(String),

    #[error("no local user data: {0}")]
    NoLocalUser(String),

    #[error("{0}")]
    AccountMismatch(String),

    #[error("incorrect password: {0}")]
    WrongPassword(String),

    #[error("decryption error: {0}")]
    DecryptionError(String),

    #[error("encryption error: {0}")]
    EncryptionError(String),

    // === Remote store / identity ===
    /// Network or service failure. Always recoverable by going offline.
    #[error("remote license service unavailable: {0}")]
    RemoteUnavailable(String),

    /// The remote service answered but refused the request.
    #[error("remote license service rejected the request: {0}")]
    RemoteRejected(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("no authenticated session: {0}")]
    NotAuthenticated(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid master credentials")]
    InvalidMasterCredentials,

    // === Infrastructure ===
    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("storage error: {0}")]
    StorageError(#[from] std::io::Error),

    #[error("keyring error: {0}")]
    KeyringError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),
}

impl LicenseError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            LicenseError::InvalidLicenseFormat(_) => "INVALID_LICENSE_FORMAT",
            LicenseError::CodeNotFound(_) => "CODE_NOT_FOUND",
            LicenseError::CodeAlreadyUsed(_) => "CODE_ALREADY_USED",
            LicenseError::LicenseRevoked(_) => "LICENSE_REVOKED",
            LicenseError::LicenseNotActivated(_) => "LICENSE_NOT_ACTIVATED",
            LicenseError::LicenseExpired(_) => "LICENSE_EXPIRED",
            LicenseError::HardwareMismatch(_) => "HARDWARE_MISMATCH",
            LicenseError::RequiresOnlineValidation(_) => "REQUIRES_ONLINE_VALIDATION",
            LicenseError::NoLocalLicense(_) => "NO_LOCAL_LICENSE",
            LicenseError::NoLocalUser(_) => "NO_LOCAL_USER",
            LicenseError::AccountMismatch(_) => "ACCOUNT_MISMATCH",
            LicenseError::WrongPassword(_) => "WRONG_PASSWORD",
            LicenseError::DecryptionError(_) => "DECRYPTION_ERROR",
            LicenseError::EncryptionError(_) => "ENCRYPTION_ERROR",
            LicenseError::RemoteUnavailable(_) => "REMOTE_UNAVAILABLE",
            LicenseError::RemoteRejected(_) => "REMOTE_REJECTED",
            LicenseError::AuthenticationFailed(_) => "AUTHENTICATION_FAILED",
            LicenseError::NotAuthenticated(_) => "NOT_AUTHENTICATED",
            LicenseError::PermissionDenied(_) => "PERMISSION_DENIED",
            LicenseError::InvalidMasterCredentials => "INVALID_MASTER_CREDENTIALS",
            LicenseError::ConfigError(_) => "CONFIG_ERROR",
            LicenseError::StorageError(_) => "STORAGE_ERROR",
            LicenseError::KeyringError(_) => "KEYRING_ERROR",
            LicenseError::SerializationError(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Returns true if the failure came from the network, not from a verdict.
    ///
    /// These are the only errors that may trigger an offline fallback.
    pub fn is_connectivity_failure(&self) -> bool {
        matches!(self, LicenseError::RemoteUnavailable(_))
    }

    /// Returns true for negative verdicts returned by a reachable remote store.
    ///
    /// A stale local cache must never override these.
    pub fn is_definitive_verdict(&self) -> bool {
        matches!(
            self,
            LicenseError::LicenseRevoked(_)
                | LicenseError::LicenseExpired(_)
                | LicenseError::HardwareMismatch(_)
                | LicenseError::LicenseNotActivated(_)
                | LicenseError::CodeNotFound(_)
        )
    }

    /// Returns true if this error might be resolved by going online.
    pub fn requires_online(&self) -> bool {
        matches!(
            self,
            LicenseError::RequiresOnlineValidation(_)
                | LicenseError::NoLocalLicense(_)
                | LicenseError::NoLocalUser(_)
        )
    }
}

impl From<serde_json::Error> for LicenseError {
    fn from(e: serde_json::Error) -> Self {
        LicenseError::SerializationError(e.to_string())
    }
}

impl From<keyring::Error> for LicenseError {
    fn from(e: keyring::Error) -> Self {
        LicenseError::KeyringError(e.to_string())
    }
}

#[cfg(feature = "live-store")]
impl From<reqwest::Error> for LicenseError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            LicenseError::RemoteRejected(format!("malformed response: {e}"))
        } else {
            LicenseError::RemoteUnavailable(e.to_string())
        }
    }
}
