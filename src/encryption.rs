//! Symmetric encryption primitives.
//!
//! AES-256-GCM over raw bytes. Higher-level envelopes live in [`crate::vault`].

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};

use rand::rngs::OsRng;
use rand::TryRngCore;

use crate::errors::{LicenseError, LicenseResult};

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;

/// GCM nonce size in bytes (96-bit).
pub const NONCE_SIZE: usize = 12;

/// Fill a buffer from the OS RNG.
///
/// If OsRng fails here, the environment is badly broken → hard panic is acceptable.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    OsRng
        .try_fill_bytes(&mut buf)
        .expect("OsRng failed to generate random bytes");
    buf
}

/// Generate a fresh random nonce.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    random_bytes::<NONCE_SIZE>()
}

/// Encrypt `plaintext` under `key` with an explicit nonce.
///
/// Returns ciphertext with the GCM tag appended.
pub fn encrypt_with_nonce(
    plaintext: &[u8],
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
) -> LicenseResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|e| LicenseError::EncryptionError(format!("encryption failed: {e}")))
}

/// Decrypt ciphertext produced by [`encrypt_with_nonce`].
///
/// Fails if the key is wrong or the data was modified.
pub fn decrypt_with_nonce(
    ciphertext: &[u8],
    key: &[u8; KEY_SIZE],
    nonce: &[u8],
) -> LicenseResult<Vec<u8>> {
    if nonce.len() != NONCE_SIZE {
        return Err(LicenseError::DecryptionError(format!(
            "invalid nonce length: expected {} bytes, got {}",
            NONCE_SIZE,
            nonce.len()
        )));
    }
    if ciphertext.is_empty() {
        return Err(LicenseError::DecryptionError(
            "ciphertext is empty".to_string(),
        ));
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| {
            LicenseError::DecryptionError("corrupt data or wrong key".to_string())
        })
}
