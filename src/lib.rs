//! Liqueen - offline-capable license validation and device binding
//!
//! A license code (`LIQ-YYYY-XXXX-XXXX-ZZZZ`) is activated once against a
//! remote document store and bound to the hardware fingerprint of the device
//! that activated it. After that the application keeps working offline from
//! an encrypted local copy, revalidating online every 30 days with a 15 day
//! grace period on top.
//!
//! # Features
//!
//! - `live-store` - Firestore / Firebase Auth REST backend. Enabled by
//!   default. Without it only the in-memory development store is available.
//!
//! # Example
//!
//! ```toml
//! # Live backend (default)
//! liqueen-license = { git = "https://github.com/maikostudios/liqueen-license" }
//!
//! # Development store only, no HTTP client
//! liqueen-license = { git = "https://github.com/maikostudios/liqueen-license", default-features = false }
//! ```
//!
//! ```no_run
//! use liqueen::config::LiqueenConfig;
//! use liqueen::engine::LicenseValidationEngine;
//!
//! # async fn run() -> liqueen::errors::LicenseResult<()> {
//! let config = LiqueenConfig::load()?;
//! let engine = LicenseValidationEngine::from_config(&config)?;
//!
//! let status = engine.get_license_status().await;
//! if !status.is_valid {
//!     println!("license problem: {:?}", status.reason);
//! }
//! # Ok(())
//! # }
//! ```

// Core modules
pub mod config;
pub mod errors;
pub mod logging;

// Crypto and local state
pub mod cache;
pub mod encryption;
pub mod hardware;
pub mod license_code;
pub mod storage;
pub mod vault;

// Remote store and orchestration
pub mod engine;
pub mod remote;
pub mod responses;

pub use engine::{EnginePolicy, LicenseValidationEngine, RegistrationProfile};
pub use errors::{LicenseError, LicenseResult};
pub use responses::{
    GraceState, LicenseStatusReport, LoginMode, LoginResult, PeriodicOutcome, Session,
};
