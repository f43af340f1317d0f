//! # Input Validation: Path and Filename Validation
//!
//! Helpers for validating store-relative paths and the single path segments
//! derived from package ids and versions.

use crate::validation::error::{ValidationError, ValidationResult};
use crate::validation::limits::MAX_PATH_DEPTH;
use std::path::{Component, Path, PathBuf};

/// Validate that a path is safe from directory traversal attacks.
///
/// The path must be relative, free of `..` and control characters, and no
/// deeper than [`MAX_PATH_DEPTH`].
pub fn validate_safe_path<P: AsRef<Path>>(path: P) -> ValidationResult<PathBuf> {
    let path = path.as_ref();
    let path_str = path.to_string_lossy();

    if path_str.contains('\0') {
        return Err(ValidationError::NullBytes);
    }

    if path_str.chars().any(|c| c.is_control()) {
        return Err(ValidationError::ControlCharacters);
    }

    if path.is_absolute() {
        return Err(ValidationError::AbsolutePath {
            path: path_str.to_string(),
        });
    }

    if path
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
        || path_str.contains("..")
    {
        return Err(ValidationError::PathTraversal {
            path: path_str.to_string(),
        });
    }

    let depth = path.components().count();
    if depth > MAX_PATH_DEPTH {
        return Err(ValidationError::PathTooDeep {
            actual: depth,
            max: MAX_PATH_DEPTH,
        });
    }

    Ok(path.to_path_buf())
}

/// Validate a single file or directory name.
pub fn validate_path_segment(segment: &str) -> ValidationResult<&str> {
    if segment.is_empty() {
        return Err(ValidationError::TooShort { actual: 0, min: 1 });
    }

    if segment.contains(['/', '\\']) {
        return Err(ValidationError::InvalidCharacters {
            input: segment.to_string(),
        });
    }

    validate_safe_path(segment)?;
    Ok(segment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_layout_paths() {
        assert!(validate_safe_path("newtonsoft.json/13.0.1").is_ok());
        assert!(validate_safe_path("foo/1.0.0-beta.1/foo.1.0.0-beta.1.nupkg").is_ok());

        assert!(validate_safe_path("../outside/1.0.0").is_err());
        assert!(validate_safe_path("/srv/packages/foo").is_err());
        assert!(validate_safe_path("foo/../../1.0.0").is_err());
        assert_eq!(
            validate_safe_path("foo/1.0.0\0"),
            Err(ValidationError::NullBytes)
        );
        assert_eq!(
            validate_safe_path("foo\u{7}/1.0.0"),
            Err(ValidationError::ControlCharacters)
        );
        assert!(validate_safe_path("a/b/c/d/e").is_err());
    }

    #[test]
    fn test_validate_path_segment() {
        assert!(validate_path_segment("foo.1.0.0.nupkg").is_ok());
        assert!(validate_path_segment("").is_err());
        assert!(validate_path_segment("a/b").is_err());
        assert!(validate_path_segment("a\\b").is_err());
        assert!(validate_path_segment("..").is_err());
    }
}
