//! Structured logging for the license engine.
//!
//! - [`init_logging`] installs a `tracing` fmt subscriber driven by
//!   [`LoggingConfig`].
//! - [`log_license_event`] emits audit events for license state changes.
//! - The `mask_*` helpers keep emails, codes and hardware ids out of logs.

use tracing::{info, info_span, warn};
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// License and session events worth an audit line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LicenseEvent {
    /// A code was activated by a new registration
    Registered,
    /// License validated against the remote store
    Validated,
    /// License validation failed
    ValidationFailed,
    /// Successful online login
    Login,
    /// Successful offline login
    OfflineLogin,
    /// Successful break-glass login
    MasterLogin,
    /// License replaced by a new code
    Renewed,
    /// License revoked by an admin
    Revoked,
    /// Local device state wiped
    DeviceReset,
}

impl std::fmt::Display for LicenseEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LicenseEvent::Registered => "registered",
            LicenseEvent::Validated => "validated",
            LicenseEvent::ValidationFailed => "validation_failed",
            LicenseEvent::Login => "login",
            LicenseEvent::OfflineLogin => "offline_login",
            LicenseEvent::MasterLogin => "master_login",
            LicenseEvent::Renewed => "renewed",
            LicenseEvent::Revoked => "revoked",
            LicenseEvent::DeviceReset => "device_reset",
        };
        write!(f, "{}", s)
    }
}

/// Initialise the global `tracing` subscriber.
///
/// Does nothing when logging is disabled. `RUST_LOG` takes precedence over
/// the configured level. Calling this twice is harmless.
pub fn init_logging(config: &LoggingConfig) {
    if !config.enabled {
        return;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_lowercase()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Log a license state change event.
///
/// `license_code` is masked before it is written.
pub fn log_license_event(event: LicenseEvent, license_code: &str, details: Option<&str>) {
    let span = info_span!(
        "license_event",
        event = %event,
        license = %mask_code(license_code),
    );
    let _enter = span.enter();

    match event {
        LicenseEvent::ValidationFailed => {
            if let Some(d) = details {
                warn!(reason = %d, "License event occurred");
            } else {
                warn!("License event occurred");
            }
        }
        _ => {
            if let Some(d) = details {
                info!(details = %d, "License event occurred");
            } else {
                info!("License event occurred");
            }
        }
    }
}

/// Log a login attempt with the email masked.
pub fn log_login_attempt(email: &str, method: &str, success: bool, error: Option<&str>) {
    let email = mask_email(email);
    if success {
        info!(email = %email, method, "Login attempt succeeded");
    } else {
        warn!(
            email = %email,
            method,
            error = error.unwrap_or("unknown"),
            "Login attempt failed"
        );
    }
}

/// `maikostudios@gmail.com` -> `ma***@gmail.com`
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) if local.chars().count() > 2 => {
            let head: String = local.chars().take(2).collect();
            format!("{head}***@{domain}")
        }
        _ => email.to_string(),
    }
}

/// `LIQ-2025-TEST-0001-MAIK` -> `LIQ-2025***`
pub fn mask_code(code: &str) -> String {
    let head: String = code.chars().take(8).collect();
    format!("{head}***")
}

/// First 16 hex chars of a fingerprint.
pub fn short_id(id: &str) -> String {
    let head: String = id.chars().take(16).collect();
    format!("{head}...")
}
