//! # Input Validation
//!
//! Validation helpers for package ids, versions, archive sizes and the path
//! segments the store derives from them. Everything that ends up in a file
//! name passes through here first, so a hostile manifest cannot escape the
//! repository root.
//!
//! ## Usage
//!
//! ```rust
//! use package_repository::validation::{validate_package_id, validate_safe_path};
//!
//! assert!(validate_package_id("Newtonsoft.Json").is_ok());
//! assert!(validate_package_id("../evil").is_err());
//! assert!(validate_safe_path("foo/1.0.0").is_ok());
//! ```

pub mod error;
pub mod limits;
pub mod manifests;
pub mod paths;

pub use self::{
    error::{ValidationError, ValidationResult},
    limits::{
        validate_file_size, MAX_ARCHIVE_SIZE, MAX_MANIFEST_SIZE, MAX_PACKAGE_ID_LENGTH,
        MAX_PATH_DEPTH, MAX_VERSION_LENGTH,
    },
    manifests::{validate_package_id, validate_version_text},
    paths::{validate_path_segment, validate_safe_path},
};
