//! # Error Handling
//!
//! This module defines the error type shared by every repository operation.
//! Errors are classified into a small set of machine-readable [`ErrorCode`]s so
//! a host (HTTP layer, CLI) can map them to its own status codes without
//! matching on individual variants.
//!
//! ## Error Classifications
//!
//! - **Validation**: malformed version, id or archive, ignored archive kinds
//! - **Duplicate**: identity collision under a no-override policy
//! - **Not Found**: operation targets an absent identity
//! - **Already Exists**: store-level placement collision
//! - **Corruption**: hash sidecar does not match the stored archive
//! - **I/O**: store read/write failure after retries
//! - **Configuration**: unusable root directory or monitor setup at startup
//!
//! ## Usage
//!
//! ```rust
//! use package_repository::{ErrorCode, RepositoryError, RepositoryResult};
//!
//! fn require_id(id: &str) -> RepositoryResult<()> {
//!     if id.is_empty() {
//!         return Err(RepositoryError::NotFound("Package id cannot be empty".to_string()));
//!     }
//!     Ok(())
//! }
//!
//! assert_eq!(require_id("").unwrap_err().error_code(), ErrorCode::NotFound);
//! ```

use crate::archive::ArchiveError;
use crate::validation::ValidationError;
use crate::version::ParseError;
use std::path::PathBuf;

/// Error code classification for machine-readable error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ValidationError,
    Duplicate,
    NotFound,
    AlreadyExists,
    Corruption,
    IoError,
    ConfigurationError,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "validation_error",
            ErrorCode::Duplicate => "duplicate",
            ErrorCode::NotFound => "not_found",
            ErrorCode::AlreadyExists => "already_exists",
            ErrorCode::Corruption => "corruption",
            ErrorCode::IoError => "io_error",
            ErrorCode::ConfigurationError => "configuration_error",
            ErrorCode::InternalError => "internal_error",
        }
    }
}

/// Repository-specific error types
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Manifest serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid version: {0}")]
    Parse(#[from] ParseError),

    #[error("Invalid package: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("Package {package} already exists. The server is configured to not allow overwriting packages that already exist.")]
    Duplicate { package: String },

    #[error("{0}")]
    NotFound(String),

    #[error("Store path already exists: {}", path.display())]
    AlreadyExists { path: PathBuf },

    #[error("Hash mismatch for {}: expected {expected}, found {actual}", path.display())]
    Corruption {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("{0}")]
    Ignored(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("File system monitor error: {0}")]
    Monitor(#[from] notify::Error),
}

impl RepositoryError {
    /// Get the appropriate error code for this error type
    pub fn error_code(&self) -> ErrorCode {
        match self {
            RepositoryError::Parse(_)
            | RepositoryError::Validation(_)
            | RepositoryError::Archive(_)
            | RepositoryError::Ignored(_) => ErrorCode::ValidationError,
            RepositoryError::Duplicate { .. } => ErrorCode::Duplicate,
            RepositoryError::NotFound(_) => ErrorCode::NotFound,
            RepositoryError::AlreadyExists { .. } => ErrorCode::AlreadyExists,
            RepositoryError::Corruption { .. } => ErrorCode::Corruption,
            RepositoryError::Io(_) => ErrorCode::IoError,
            RepositoryError::Configuration(_) | RepositoryError::Monitor(_) => {
                ErrorCode::ConfigurationError
            }
            RepositoryError::Json(_) => ErrorCode::InternalError,
        }
    }

    /// Whether retrying the same I/O operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RepositoryError::Io(e) => is_transient_io(e),
            _ => false,
        }
    }
}

/// I/O error kinds produced by a file briefly held by another writer.
pub(crate) fn is_transient_io(error: &std::io::Error) -> bool {
    use std::io::ErrorKind;

    matches!(
        error.kind(),
        ErrorKind::WouldBlock
            | ErrorKind::Interrupted
            | ErrorKind::TimedOut
            | ErrorKind::ResourceBusy
            | ErrorKind::PermissionDenied
    )
}

/// Convenient result type for repository operations.
pub type RepositoryResult<T> = Result<T, RepositoryError>;
