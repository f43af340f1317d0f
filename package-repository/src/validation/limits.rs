//! # Input Validation: Size Limits
//!
//! Constants for the size and length limits applied to pushed archives and
//! the identities extracted from them.

use crate::validation::error::{ValidationError, ValidationResult};

/// Maximum allowed archive size (250 MB)
pub const MAX_ARCHIVE_SIZE: u64 = 250 * 1024 * 1024;

/// Maximum allowed size of an embedded manifest (1 MB)
pub const MAX_MANIFEST_SIZE: usize = 1024 * 1024;

/// Maximum allowed package id length
pub const MAX_PACKAGE_ID_LENGTH: usize = 100;

/// Maximum allowed version string length
pub const MAX_VERSION_LENGTH: usize = 64;

/// Maximum allowed path depth for store-relative paths
pub const MAX_PATH_DEPTH: usize = 4;

/// Validate file size against limits.
///
/// # Arguments
///
/// * `size` - The file size in bytes
/// * `max_size` - Optional custom maximum size (defaults to MAX_ARCHIVE_SIZE)
pub fn validate_file_size(size: u64, max_size: Option<u64>) -> ValidationResult<()> {
    let limit = max_size.unwrap_or(MAX_ARCHIVE_SIZE);

    if size > limit {
        return Err(ValidationError::FileTooLarge {
            actual: size,
            max: limit,
        });
    }

    Ok(())
}
