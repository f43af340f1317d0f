//! # Input Validation: Package Manifests
//!
//! Validation of the identity fields read out of a package manifest.

use crate::validation::error::{ValidationError, ValidationResult};
use crate::validation::limits::{MAX_PACKAGE_ID_LENGTH, MAX_VERSION_LENGTH};
use regex::Regex;
use std::sync::OnceLock;

/// Validate a package id.
///
/// Ids are runs of ASCII letters, digits and underscores joined by single
/// `.`, `-` or `_` separators, e.g. `Newtonsoft.Json` or `my-lib_core`.
///
/// # Returns
///
/// `Ok(&str)` with the validated id, `Err(ValidationError)` if invalid
pub fn validate_package_id(id: &str) -> ValidationResult<&str> {
    static PACKAGE_ID_REGEX: OnceLock<Regex> = OnceLock::new();

    if id.is_empty() {
        return Err(ValidationError::TooShort { actual: 0, min: 1 });
    }

    if id.len() > MAX_PACKAGE_ID_LENGTH {
        return Err(ValidationError::TooLong {
            actual: id.len(),
            max: MAX_PACKAGE_ID_LENGTH,
        });
    }

    if id.contains('\0') {
        return Err(ValidationError::NullBytes);
    }

    if id.chars().any(|c| c.is_control()) {
        return Err(ValidationError::ControlCharacters);
    }

    let re = PACKAGE_ID_REGEX.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_]+([.\-_][A-Za-z0-9_]+)*$").unwrap_or_else(|e| {
            panic!("Failed to compile package id regex: {e}. This is a bug in the code - the regex pattern should be valid.")
        })
    });

    if !re.is_match(id) {
        return Err(ValidationError::InvalidCharacters {
            input: id.to_string(),
        });
    }

    Ok(id)
}

/// Validate the raw text of a version before it is parsed.
///
/// Parsing itself is done by [`crate::version::ParsedVersion::parse`]; this
/// only guards the length and character set so a manifest cannot smuggle
/// path separators into store file names.
pub fn validate_version_text(version: &str) -> ValidationResult<&str> {
    if version.is_empty() {
        return Err(ValidationError::TooShort { actual: 0, min: 1 });
    }

    if version.len() > MAX_VERSION_LENGTH {
        return Err(ValidationError::TooLong {
            actual: version.len(),
            max: MAX_VERSION_LENGTH,
        });
    }

    if !version
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+'))
    {
        return Err(ValidationError::InvalidCharacters {
            input: version.to_string(),
        });
    }

    Ok(version)
}
