//! License code generation and validation.
//!
//! Codes look like `LIQ-2025-K7Q2-0ZXA-SAEZ`:
//!
//! - `LIQ` fixed prefix
//! - four digit year of issue
//! - two segments of four random base36 characters (upper case)
//! - a suffix of four letters drawn from one word of [`SUFFIX_WORDS`]
//!
//! # Example
//!
//! ```rust
//! use liqueen::license_code::{generate_license_code, validate_license_code_format};
//!
//! let code = generate_license_code();
//! assert!(validate_license_code_format(&code));
//! ```

use chrono::{Datelike, Utc};
use lazy_static::lazy_static;
use rand::Rng;
use regex::Regex;
use serde::Serialize;

use crate::errors::{LicenseError, LicenseResult};

/// Fixed prefix of every code.
pub const LICENSE_CODE_PREFIX: &str = "LIQ";

/// Words the suffix characters are drawn from.
pub const SUFFIX_WORDS: [&str; 4] = ["MAIKO", "STUDIOS", "SAEZ", "CONTRERAS"];

/// Character set of the random segments.
const BASE36_CHARSET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

const SEGMENT_LENGTH: usize = 4;

lazy_static! {
    static ref CODE_PATTERN: Regex =
        Regex::new(r"^LIQ-\d{4}-[A-Z0-9]{4}-[A-Z0-9]{4}-[A-Z]{4}$").unwrap();
}

fn generate_segment() -> String {
    let mut rng = rand::rng();
    (0..SEGMENT_LENGTH)
        .map(|_| BASE36_CHARSET[rng.random_range(0..BASE36_CHARSET.len())] as char)
        .collect()
}

fn generate_suffix() -> String {
    let mut rng = rand::rng();
    let word = SUFFIX_WORDS[rng.random_range(0..SUFFIX_WORDS.len())].as_bytes();
    (0..SEGMENT_LENGTH)
        .map(|_| word[rng.random_range(0..word.len())] as char)
        .collect()
}

/// Generate a new license code for the current year.
pub fn generate_license_code() -> String {
    format!(
        "{}-{}-{}-{}-{}",
        LICENSE_CODE_PREFIX,
        Utc::now().year(),
        generate_segment(),
        generate_segment(),
        generate_suffix()
    )
}

/// Exact structural check of a license code.
pub fn validate_license_code_format(code: &str) -> bool {
    CODE_PATTERN.is_match(code)
}

/// Components of a well-formed license code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LicenseCodeParts {
    pub year: u32,
    pub first: String,
    pub second: String,
    pub suffix: String,
}

/// Split a license code into its components.
///
/// # Errors
///
/// Returns [`LicenseError::InvalidLicenseFormat`] if the code is malformed.
pub fn parse_license_code(code: &str) -> LicenseResult<LicenseCodeParts> {
    if !validate_license_code_format(code) {
        return Err(LicenseError::InvalidLicenseFormat(format!(
            "'{code}' does not match LIQ-YYYY-XXXX-XXXX-ZZZZ"
        )));
    }

    let parts: Vec<&str> = code.split('-').collect();
    let year = parts[1]
        .parse::<u32>()
        .map_err(|e| LicenseError::InvalidLicenseFormat(e.to_string()))?;

    Ok(LicenseCodeParts {
        year,
        first: parts[2].to_string(),
        second: parts[3].to_string(),
        suffix: parts[4].to_string(),
    })
}

/// Generate a code that the `exists_fn` check does not already know about.
///
/// Gives up after `max_retries` attempts.
pub async fn generate_unique_license_code<F, Fut>(
    exists_fn: F,
    max_retries: u32,
) -> LicenseResult<String>
where
    F: Fn(String) -> Fut,
    Fut: std::future::Future<Output = LicenseResult<bool>>,
{
    for _ in 0..max_retries {
        let code = generate_license_code();
        if !exists_fn(code.clone()).await? {
            return Ok(code);
        }
    }

    Err(LicenseError::RemoteRejected(format!(
        "failed to generate unique license code after {max_retries} attempts"
    )))
}
