//! Configuration system for the Liqueen license engine.
//!
//! Configuration is loaded from multiple sources with the following precedence:
//! 1. Environment variables (highest priority)
//! 2. `liqueen.toml` file
//! 3. Default values (lowest priority)
//!
//! # Environment Variables
//!
//! - `LIQUEEN_VALIDATION_INTERVAL_DAYS` - Days between mandatory online checks
//! - `LIQUEEN_GRACE_PERIOD_DAYS` - Extra offline days after the interval
//! - `LIQUEEN_ADMIN_EMAIL` - The one account that registers as admin
//! - `LIQUEEN_MASTER_EMAIL` - Break-glass account email
//! - `LIQUEEN_MASTER_PASSWORD_HASH` - Salted SHA-256 of the break-glass password
//! - `LIQUEEN_REMOTE_MODE` - `live` or `development`
//! - `LIQUEEN_FIREBASE_PROJECT_ID` - Firestore project id (live mode)
//! - `LIQUEEN_FIREBASE_API_KEY` - Firebase web API key (live mode)
//! - `LIQUEEN_REMOTE_TIMEOUT_SECS` - Timeout applied to every remote call
//! - `LIQUEEN_DATA_DIR` - Override of the app data directory
//! - `LIQUEEN_LOGGING_ENABLED` / `LIQUEEN_LOG_LEVEL` - Logging

use config::Config;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;

use crate::errors::{LicenseError, LicenseResult};

/// Global configuration, loaded once by [`get_config`].
static CONFIG: OnceLock<LiqueenConfig> = OnceLock::new();

/// Salted SHA-256 of the default break-glass password.
pub const DEFAULT_MASTER_PASSWORD_HASH: &str =
    "607479f440ba0a2cfd2523843308a6ca04ed2e60e5a3197ad9135c1f5dbf8017";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LiqueenConfig {
    /// License policy
    pub license: LicenseConfig,
    /// Break-glass credentials
    pub master: MasterConfig,
    /// Remote license store
    pub remote: RemoteConfig,
    /// Local storage
    pub storage: StorageConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// License validity and offline policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LicenseConfig {
    /// Days after the last online validation before one is required again
    pub validation_interval_days: u32,
    /// Days of offline use tolerated after the interval has elapsed
    pub grace_period_days: u32,
    /// Validity of a standard user license from activation
    pub standard_validity_days: u32,
    /// Validity of the admin account's license from activation
    pub admin_validity_days: u32,
    /// Synthetic validity reported for master sessions
    pub master_validity_days: u32,
    /// The only email that registers with the admin role
    pub admin_email: String,
}

impl Default for LicenseConfig {
    fn default() -> Self {
        Self {
            validation_interval_days: 30,
            grace_period_days: 15,
            standard_validity_days: 730,
            admin_validity_days: 3650,
            master_validity_days: 365,
            admin_email: "maikostudios@gmail.com".to_string(),
        }
    }
}

/// Break-glass account.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    pub email: String,
    /// Hex SHA-256 of `password + password salt`
    pub password_hash: String,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            email: "maikostudios@gmail.com".to_string(),
            password_hash: DEFAULT_MASTER_PASSWORD_HASH.to_string(),
        }
    }
}

/// Which remote store backs the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteMode {
    /// Firestore documents + Firebase Auth over REST
    Live,
    /// In-process store seeded with the fixed test codes
    Development,
}

/// Remote store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub mode: RemoteMode,
    /// Firestore project id
    pub project_id: String,
    /// Firebase web API key
    pub api_key: String,
    /// Timeout applied to every remote call, in seconds
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            mode: RemoteMode::Development,
            project_id: String::new(),
            api_key: String::new(),
            timeout_secs: 10,
        }
    }
}

/// Local storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Service name used for OS keyring entries
    pub service_name: String,
    /// Overrides the platform app data directory when set
    pub data_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            service_name: "liqueen".to_string(),
            data_dir: None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Enable logging
    pub enabled: bool,
    /// Log level: trace, debug, info, warn, error
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            level: "info".to_string(),
        }
    }
}

fn config_err(e: config::ConfigError) -> LicenseError {
    LicenseError::ConfigError(e.to_string())
}

fn env_i64(name: &str) -> Option<i64> {
    env::var(name).ok().and_then(|v| v.parse::<i64>().ok())
}

impl LiqueenConfig {
    /// Load configuration from file and environment.
    ///
    /// Later sources override earlier ones:
    /// 1. Default values
    /// 2. `liqueen.toml` file (optional)
    /// 3. Environment variables
    pub fn load() -> LicenseResult<Self> {
        let defaults = LiqueenConfig::default();

        let builder = Config::builder()
            .set_default(
                "license.validation_interval_days",
                defaults.license.validation_interval_days as i64,
            )
            .map_err(config_err)?
            .set_default(
                "license.grace_period_days",
                defaults.license.grace_period_days as i64,
            )
            .map_err(config_err)?
            .set_default(
                "license.standard_validity_days",
                defaults.license.standard_validity_days as i64,
            )
            .map_err(config_err)?
            .set_default(
                "license.admin_validity_days",
                defaults.license.admin_validity_days as i64,
            )
            .map_err(config_err)?
            .set_default(
                "license.master_validity_days",
                defaults.license.master_validity_days as i64,
            )
            .map_err(config_err)?
            .set_default("license.admin_email", defaults.license.admin_email.clone())
            .map_err(config_err)?
            .set_default("master.email", defaults.master.email.clone())
            .map_err(config_err)?
            .set_default("master.password_hash", defaults.master.password_hash.clone())
            .map_err(config_err)?
            .set_default("remote.mode", "development")
            .map_err(config_err)?
            .set_default("remote.project_id", "")
            .map_err(config_err)?
            .set_default("remote.api_key", "")
            .map_err(config_err)?
            .set_default("remote.timeout_secs", defaults.remote.timeout_secs as i64)
            .map_err(config_err)?
            .set_default("storage.service_name", defaults.storage.service_name.clone())
            .map_err(config_err)?
            .set_default("logging.enabled", false)
            .map_err(config_err)?
            .set_default("logging.level", "info")
            .map_err(config_err)?
            // Load from liqueen.toml (optional)
            .add_source(config::File::with_name("liqueen").required(false))
            // Override with environment variables
            .set_override_option(
                "license.validation_interval_days",
                env_i64("LIQUEEN_VALIDATION_INTERVAL_DAYS"),
            )
            .map_err(config_err)?
            .set_override_option(
                "license.grace_period_days",
                env_i64("LIQUEEN_GRACE_PERIOD_DAYS"),
            )
            .map_err(config_err)?
            .set_override_option("license.admin_email", env::var("LIQUEEN_ADMIN_EMAIL").ok())
            .map_err(config_err)?
            .set_override_option("master.email", env::var("LIQUEEN_MASTER_EMAIL").ok())
            .map_err(config_err)?
            .set_override_option(
                "master.password_hash",
                env::var("LIQUEEN_MASTER_PASSWORD_HASH").ok(),
            )
            .map_err(config_err)?
            .set_override_option(
                "remote.mode",
                env::var("LIQUEEN_REMOTE_MODE")
                    .ok()
                    .map(|v| v.to_lowercase()),
            )
            .map_err(config_err)?
            .set_override_option(
                "remote.project_id",
                env::var("LIQUEEN_FIREBASE_PROJECT_ID").ok(),
            )
            .map_err(config_err)?
            .set_override_option("remote.api_key", env::var("LIQUEEN_FIREBASE_API_KEY").ok())
            .map_err(config_err)?
            .set_override_option("remote.timeout_secs", env_i64("LIQUEEN_REMOTE_TIMEOUT_SECS"))
            .map_err(config_err)?
            .set_override_option("storage.data_dir", env::var("LIQUEEN_DATA_DIR").ok())
            .map_err(config_err)?
            .set_override_option(
                "logging.enabled",
                env::var("LIQUEEN_LOGGING_ENABLED")
                    .ok()
                    .and_then(|v| v.parse::<bool>().ok()),
            )
            .map_err(config_err)?
            .set_override_option("logging.level", env::var("LIQUEEN_LOG_LEVEL").ok())
            .map_err(config_err)?;

        let settings = builder
            .build()
            .map_err(|e| LicenseError::ConfigError(format!("failed to build config: {e}")))?;

        settings
            .try_deserialize()
            .map_err(|e| LicenseError::ConfigError(format!("failed to deserialize config: {e}")))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> LicenseResult<()> {
        if self.license.validation_interval_days == 0 {
            return Err(LicenseError::ConfigError(
                "license.validation_interval_days must be greater than 0".to_string(),
            ));
        }
        if self.license.standard_validity_days == 0 || self.license.admin_validity_days == 0 {
            return Err(LicenseError::ConfigError(
                "license validity periods must be greater than 0".to_string(),
            ));
        }
        if self.license.admin_email.trim().is_empty() {
            return Err(LicenseError::ConfigError(
                "license.admin_email cannot be empty".to_string(),
            ));
        }
        if self.master.password_hash.len() != 64
            || !self.master.password_hash.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(LicenseError::ConfigError(
                "master.password_hash must be a hex SHA-256 digest".to_string(),
            ));
        }

        if self.remote.mode == RemoteMode::Live
            && (self.remote.project_id.is_empty() || self.remote.api_key.is_empty())
        {
            return Err(LicenseError::ConfigError(
                "remote.project_id and remote.api_key are required in live mode".to_string(),
            ));
        }
        if self.remote.timeout_secs == 0 {
            return Err(LicenseError::ConfigError(
                "remote.timeout_secs must be greater than 0".to_string(),
            ));
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(LicenseError::ConfigError(format!(
                    "logging.level must be one of: trace, debug, info, warn, error. Got '{other}'"
                )));
            }
        }

        Ok(())
    }
}

/// Get the global configuration.
///
/// This loads the configuration on first access and caches it.
/// Returns an error if configuration loading or validation fails.
pub fn get_config() -> LicenseResult<&'static LiqueenConfig> {
    if let Some(config) = CONFIG.get() {
        return Ok(config);
    }

    let config = LiqueenConfig::load()?;
    config.validate()?;

    // Another thread may have won the race; either value is equivalent.
    let _ = CONFIG.set(config);

    CONFIG
        .get()
        .ok_or_else(|| LicenseError::ConfigError("configuration not initialised".to_string()))
}
