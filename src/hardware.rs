//! Device fingerprinting.
//!
//! The fingerprint is a hex SHA-256 over device signals, computed lazily and
//! cached for the life of the process. Sources are tried in order:
//!
//! 1. **Native**: OS machine id + platform + CPU model.
//! 2. **Signals**: platform, architecture, hostname, user, locale, core
//!    count, UTC offset and a random installation id persisted on first use.
//! 3. **Random**: timestamp + random bytes, when nothing else is available.
//!
//! Computing a fingerprint never fails.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{Local, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::encryption::random_bytes;
use crate::logging::short_id;
use crate::storage::KeyValueStore;

#[cfg(target_os = "linux")]
#[path = "hardware/linux.rs"]
mod platform;

#[cfg(target_os = "macos")]
#[path = "hardware/macos.rs"]
mod platform;

#[cfg(target_os = "windows")]
#[path = "hardware/windows.rs"]
mod platform;

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
mod platform {
    pub fn machine_id() -> Option<String> {
        None
    }
    pub fn cpu_model() -> Option<String> {
        None
    }
    pub fn hostname() -> Option<String> {
        None
    }
}

/// Storage key of the persisted installation id.
pub const INSTALLATION_ID_KEY: &str = "liqueen_installation_id";

/// Anything that can identify the current device.
#[async_trait]
pub trait DeviceIdentity: Send + Sync {
    /// Stable identifier of this device.
    async fn fingerprint(&self) -> String;

    /// Drop any persisted random component and compute a new identifier.
    async fn regenerate(&self) -> String;

    async fn matches(&self, registered: &str) -> bool {
        self.fingerprint().await == registered
    }
}

/// Where a fingerprint came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintSource {
    Native,
    Signals,
    Random,
}

/// Diagnostic snapshot of the device.
#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    /// First 16 hex chars of the fingerprint
    pub fingerprint: String,
    pub source: FingerprintSource,
    pub platform: &'static str,
    pub arch: &'static str,
    pub cpu_model: Option<String>,
    pub cores: usize,
    pub hostname: Option<String>,
    pub timestamp: String,
}

/// Fingerprint of the machine the process runs on.
pub struct HardwareFingerprint {
    store: Arc<dyn KeyValueStore>,
    native: bool,
    cached: Mutex<Option<(String, FingerprintSource)>>,
}

impl HardwareFingerprint {
    /// `store` persists the installation id of the signals path.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            native: true,
            cached: Mutex::new(None),
        }
    }

    /// Skip the native machine id and use the signals path directly.
    pub fn without_native(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            native: false,
            ..Self::new(store)
        }
    }

    async fn get_or_compute(&self) -> (String, FingerprintSource) {
        let mut cached = self.cached.lock().await;
        if let Some(found) = cached.as_ref() {
            return found.clone();
        }

        let computed = self.compute().await;
        info!(
            hardware_id = %short_id(&computed.0),
            source = ?computed.1,
            "Hardware fingerprint computed"
        );
        *cached = Some(computed.clone());
        computed
    }

    async fn compute(&self) -> (String, FingerprintSource) {
        if self.native {
            if let Some(machine_id) = platform::machine_id() {
                let cpu = platform::cpu_model().unwrap_or_else(|| "unknown-cpu".to_string());
                let digest = hash_components(&[&machine_id, std::env::consts::OS, &cpu]);
                return (digest, FingerprintSource::Native);
            }
            debug!("No native machine id, using device signals");
        }

        match self.installation_id().await {
            Some(installation_id) => {
                let mut parts = signal_components();
                parts.push(installation_id);
                let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
                (hash_components(&refs), FingerprintSource::Signals)
            }
            None => {
                warn!("Installation id unavailable, using a random fingerprint");
                let noise = hex::encode(random_bytes::<16>());
                let stamp = Utc::now().timestamp_millis().to_string();
                (hash_components(&[&stamp, &noise]), FingerprintSource::Random)
            }
        }
    }

    /// Read the installation id, creating and persisting one on first use.
    async fn installation_id(&self) -> Option<String> {
        match self.store.get(INSTALLATION_ID_KEY).await {
            Ok(Some(id)) if !id.is_empty() => return Some(id),
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Could not read installation id");
                return None;
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        match self.store.set(INSTALLATION_ID_KEY, &id).await {
            Ok(()) => Some(id),
            Err(e) => {
                warn!(error = %e, "Could not persist installation id");
                None
            }
        }
    }

    /// Device diagnostics for support screens.
    pub async fn system_info(&self) -> SystemInfo {
        let (fingerprint, source) = self.get_or_compute().await;
        SystemInfo {
            fingerprint: short_id(&fingerprint),
            source,
            platform: std::env::consts::OS,
            arch: std::env::consts::ARCH,
            cpu_model: platform::cpu_model(),
            cores: core_count(),
            hostname: platform::hostname(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[async_trait]
impl DeviceIdentity for HardwareFingerprint {
    async fn fingerprint(&self) -> String {
        self.get_or_compute().await.0
    }

    async fn regenerate(&self) -> String {
        if let Err(e) = self.store.delete(INSTALLATION_ID_KEY).await {
            warn!(error = %e, "Could not remove installation id");
        }
        *self.cached.lock().await = None;
        self.fingerprint().await
    }
}

/// Identity pinned to a fixed value; can be switched at runtime.
#[derive(Debug)]
pub struct StaticIdentity {
    id: RwLock<String>,
}

impl StaticIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: RwLock::new(id.into()),
        }
    }

    /// Pretend the process now runs on a different device.
    pub fn set(&self, id: impl Into<String>) {
        *self.id.write().unwrap_or_else(|e| e.into_inner()) = id.into();
    }
}

#[async_trait]
impl DeviceIdentity for StaticIdentity {
    async fn fingerprint(&self) -> String {
        self.id.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn regenerate(&self) -> String {
        self.fingerprint().await
    }
}

fn core_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn signal_components() -> Vec<String> {
    let env = |name: &str| std::env::var(name).unwrap_or_else(|_| "unknown".to_string());
    vec![
        std::env::consts::OS.to_string(),
        std::env::consts::ARCH.to_string(),
        platform::hostname().unwrap_or_else(|| "unknown-host".to_string()),
        std::env::var("USER").unwrap_or_else(|_| env("USERNAME")),
        env("LANG"),
        core_count().to_string(),
        Local::now().offset().local_minus_utc().to_string(),
    ]
}

fn hash_components(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parts.join("|").as_bytes());
    hex::encode(hasher.finalize())
}
