//! SymmetricVault: device-bound encryption of local license state.
//!
//! ## Envelope format
//!
//! Every call to [`SymmetricVault::encrypt`] produces a JSON envelope:
//!
//! ```json
//! { "iv": "<24 hex chars>", "data": "<base64 ciphertext+tag>", "timestamp": 1735689600000 }
//! ```
//!
//! The IV is fresh per call, so encrypting the same value twice never yields
//! the same envelope. Keys are derived from the hardware fingerprint, so an
//! envelope copied to another device cannot be opened there.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use rand::Rng;
use ring::digest::{digest, SHA256};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::encryption::{decrypt_with_nonce, encrypt_with_nonce, generate_nonce, KEY_SIZE};
use crate::errors::{LicenseError, LicenseResult};
use crate::license_code;

/// Static application secret mixed into every derived key.
pub const APP_SECRET: &str = "LIQUEEN_2025_SECURE_LICENSE_KEY";

/// Static salt for offline password hashes.
pub const PASSWORD_SALT: &str = "LIQUEEN_PASSWORD_SALT_2025";

/// Default maximum age of a session token.
pub const SESSION_TOKEN_MAX_AGE_MS: i64 = 24 * 60 * 60 * 1000;

/// A 256-bit key derived by [`SymmetricVault::derive_key`].
#[derive(Clone, PartialEq, Eq)]
pub struct VaultKey([u8; KEY_SIZE]);

impl VaultKey {
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VaultKey(..)")
    }
}

/// Value recovered from an envelope.
///
/// Plaintext that parses as JSON comes back as [`Plaintext::Json`], anything
/// else as [`Plaintext::Text`].
#[derive(Debug, Clone, PartialEq)]
pub enum Plaintext {
    Json(Value),
    Text(String),
}

impl Plaintext {
    fn into_string(self) -> LicenseResult<String> {
        match self {
            Plaintext::Text(s) => Ok(s),
            Plaintext::Json(v) => Ok(serde_json::to_string(&v)?),
        }
    }
}

impl From<&str> for Plaintext {
    fn from(s: &str) -> Self {
        Plaintext::Text(s.to_string())
    }
}

impl From<String> for Plaintext {
    fn from(s: String) -> Self {
        Plaintext::Text(s)
    }
}

impl From<Value> for Plaintext {
    fn from(v: Value) -> Self {
        Plaintext::Json(v)
    }
}

/// Serialized form of one encryption call.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    iv: String,
    data: String,
    timestamp: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionTokenPayload {
    user_id: String,
    hardware_id: String,
    timestamp: i64,
    random: String,
}

/// Outcome of [`SymmetricVault::validate_session_token`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTokenCheck {
    pub is_valid: bool,
    pub user_id: Option<String>,
    /// Age of the token in milliseconds, when it could be read
    pub age_ms: Option<i64>,
    pub error: Option<String>,
}

/// Device-bound symmetric encryption and hashing.
///
/// Holds no key material of its own: callers derive a key from a seed
/// (normally the hardware fingerprint) and pass it to each call.
#[derive(Debug, Clone)]
pub struct SymmetricVault {
    app_secret: String,
    password_salt: String,
}

impl Default for SymmetricVault {
    fn default() -> Self {
        Self::new(APP_SECRET, PASSWORD_SALT)
    }
}

impl SymmetricVault {
    pub fn new(app_secret: impl Into<String>, password_salt: impl Into<String>) -> Self {
        Self {
            app_secret: app_secret.into(),
            password_salt: password_salt.into(),
        }
    }

    /// One-way key derivation: `SHA-256(app secret || seed)`.
    pub fn derive_key(&self, seed: &str) -> VaultKey {
        let combined = format!("{}{}", self.app_secret, seed);
        let hash = digest(&SHA256, combined.as_bytes());

        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(hash.as_ref());
        VaultKey(key)
    }

    /// Encrypt a value into a fresh envelope string.
    pub fn encrypt(&self, plaintext: impl Into<Plaintext>, key: &VaultKey) -> LicenseResult<String> {
        let text = plaintext.into().into_string()?;
        let nonce = generate_nonce();
        let ciphertext = encrypt_with_nonce(text.as_bytes(), key.as_bytes(), &nonce)?;

        let envelope = Envelope {
            iv: hex::encode(nonce),
            data: BASE64.encode(ciphertext),
            timestamp: Utc::now().timestamp_millis(),
        };
        Ok(serde_json::to_string(&envelope)?)
    }

    /// Open an envelope produced by [`encrypt`](Self::encrypt).
    ///
    /// Any malformed envelope, wrong key or tampered ciphertext fails with
    /// [`LicenseError::DecryptionError`].
    pub fn decrypt(&self, envelope: &str, key: &VaultKey) -> LicenseResult<Plaintext> {
        let envelope: Envelope = serde_json::from_str(envelope)
            .map_err(|e| LicenseError::DecryptionError(format!("malformed envelope: {e}")))?;

        let nonce = hex::decode(&envelope.iv)
            .map_err(|e| LicenseError::DecryptionError(format!("invalid iv: {e}")))?;
        let ciphertext = BASE64
            .decode(&envelope.data)
            .map_err(|e| LicenseError::DecryptionError(format!("invalid ciphertext: {e}")))?;

        let plain = decrypt_with_nonce(&ciphertext, key.as_bytes(), &nonce)?;
        let text = String::from_utf8(plain)
            .map_err(|_| LicenseError::DecryptionError("plaintext is not UTF-8".to_string()))?;

        if text.is_empty() {
            return Err(LicenseError::DecryptionError(
                "empty plaintext".to_string(),
            ));
        }

        match serde_json::from_str::<Value>(&text) {
            Ok(value) => Ok(Plaintext::Json(value)),
            Err(_) => Ok(Plaintext::Text(text)),
        }
    }

    /// Encrypt any serializable record.
    pub fn encrypt_record<T: Serialize>(&self, record: &T, key: &VaultKey) -> LicenseResult<String> {
        let value = serde_json::to_value(record)?;
        self.encrypt(value, key)
    }

    /// Decrypt an envelope into a typed record.
    ///
    /// A payload with the wrong shape is reported as a decryption error.
    pub fn decrypt_record<T: DeserializeOwned>(
        &self,
        envelope: &str,
        key: &VaultKey,
    ) -> LicenseResult<T> {
        match self.decrypt(envelope, key)? {
            Plaintext::Json(value) => serde_json::from_value(value).map_err(|e| {
                LicenseError::DecryptionError(format!("unexpected payload shape: {e}"))
            }),
            Plaintext::Text(_) => Err(LicenseError::DecryptionError(
                "payload is not a JSON record".to_string(),
            )),
        }
    }

    /// Hex SHA-256 of `input`.
    pub fn hash(&self, input: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(input.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Salted one-way hash used for offline password checks.
    pub fn hash_password(&self, password: &str) -> String {
        self.hash(&format!("{}{}", password, self.password_salt))
    }

    pub fn verify_password(&self, password: &str, expected_hash: &str) -> bool {
        constant_time_eq(
            self.hash_password(password).as_bytes(),
            expected_hash.to_ascii_lowercase().as_bytes(),
        )
    }

    /// Integrity digest: `SHA-256(data || app secret)`.
    pub fn validation_hash(&self, data: &str) -> String {
        self.hash(&format!("{}{}", data, self.app_secret))
    }

    pub fn validate_data_integrity(&self, data: &str, expected_hash: &str) -> bool {
        constant_time_eq(
            self.validation_hash(data).as_bytes(),
            expected_hash.as_bytes(),
        )
    }

    /// Short-lived token binding a user to this device.
    pub fn generate_session_token(&self, user_id: &str, hardware_id: &str) -> LicenseResult<String> {
        let suffix: u64 = rand::rng().random();
        let payload = SessionTokenPayload {
            user_id: user_id.to_string(),
            hardware_id: hardware_id.to_string(),
            timestamp: Utc::now().timestamp_millis(),
            random: format!("{suffix:x}"),
        };
        self.encrypt_record(&payload, &self.derive_key(hardware_id))
    }

    /// Check a token produced by [`generate_session_token`](Self::generate_session_token).
    ///
    /// Never fails; unreadable tokens are reported as invalid.
    pub fn validate_session_token(
        &self,
        token: &str,
        hardware_id: &str,
        max_age_ms: i64,
    ) -> SessionTokenCheck {
        let key = self.derive_key(hardware_id);
        match self.decrypt_record::<SessionTokenPayload>(token, &key) {
            Ok(payload) => {
                let age = Utc::now().timestamp_millis() - payload.timestamp;
                SessionTokenCheck {
                    is_valid: age <= max_age_ms && payload.hardware_id == hardware_id,
                    user_id: Some(payload.user_id),
                    age_ms: Some(age),
                    error: None,
                }
            }
            Err(e) => SessionTokenCheck {
                is_valid: false,
                user_id: None,
                age_ms: None,
                error: Some(e.to_string()),
            },
        }
    }

    pub fn generate_license_code(&self) -> String {
        license_code::generate_license_code()
    }

    pub fn validate_license_code_format(&self, code: &str) -> bool {
        license_code::validate_license_code_format(code)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn derive_key_is_deterministic_and_seed_specific() {
        let vault = SymmetricVault::default();
        assert_eq!(vault.derive_key("abc"), vault.derive_key("abc"));
        assert_ne!(vault.derive_key("abc"), vault.derive_key("abd"));
        assert_ne!(vault.derive_key("abc"), vault.derive_key("abc_user"));
    }

    #[test]
    fn encrypt_uses_fresh_iv() {
        let vault = SymmetricVault::default();
        let key = vault.derive_key("device");

        let a = vault.encrypt("same", &key).unwrap();
        let b = vault.encrypt("same", &key).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn decrypt_returns_json_or_text() {
        let vault = SymmetricVault::default();
        let key = vault.derive_key("device");

        let obj = json!({"licenseCode": "LIQ-2025-TEST-0001-MAIK", "validationCount": 3});
        let env = vault.encrypt(obj.clone(), &key).unwrap();
        assert_eq!(vault.decrypt(&env, &key).unwrap(), Plaintext::Json(obj));

        let env = vault.encrypt("plain words", &key).unwrap();
        assert_eq!(
            vault.decrypt(&env, &key).unwrap(),
            Plaintext::Text("plain words".to_string())
        );
    }

    #[test]
    fn foreign_key_cannot_decrypt() {
        let vault = SymmetricVault::default();
        let env = vault.encrypt("secret", &vault.derive_key("device-a")).unwrap();
        let err = vault.decrypt(&env, &vault.derive_key("device-b")).unwrap_err();
        assert!(matches!(err, LicenseError::DecryptionError(_)));
    }

    #[test]
    fn malformed_envelope_is_decryption_error() {
        let vault = SymmetricVault::default();
        let key = vault.derive_key("device");
        let env = vault.encrypt("secret", &key).unwrap();

        for bad in ["", "not json", &env[..env.len() / 2], r#"{"iv":"zz","data":"","timestamp":0}"#] {
            assert!(matches!(
                vault.decrypt(bad, &key),
                Err(LicenseError::DecryptionError(_))
            ));
        }
    }

    #[test]
    fn password_hash_matches_known_value() {
        let vault = SymmetricVault::default();
        assert_eq!(
            vault.hash_password("123456"),
            crate::config::DEFAULT_MASTER_PASSWORD_HASH
        );
        assert!(vault.verify_password("123456", crate::config::DEFAULT_MASTER_PASSWORD_HASH));
        assert!(!vault.verify_password("654321", crate::config::DEFAULT_MASTER_PASSWORD_HASH));
    }

    #[test]
    fn integrity_hash_detects_changes() {
        let vault = SymmetricVault::default();
        let hash = vault.validation_hash("payload");
        assert!(vault.validate_data_integrity("payload", &hash));
        assert!(!vault.validate_data_integrity("payload!", &hash));
    }

    #[test]
    fn session_token_is_bound_to_device_and_age() {
        let vault = SymmetricVault::default();
        let token = vault.generate_session_token("uid-1", "hw-1").unwrap();

        let ok = vault.validate_session_token(&token, "hw-1", SESSION_TOKEN_MAX_AGE_MS);
        assert!(ok.is_valid);
        assert_eq!(ok.user_id.as_deref(), Some("uid-1"));

        let other = vault.validate_session_token(&token, "hw-2", SESSION_TOKEN_MAX_AGE_MS);
        assert!(!other.is_valid);
        assert!(other.error.is_some());

        let expired = vault.validate_session_token(&token, "hw-1", -1);
        assert!(!expired.is_valid);
    }
}
