//! # Validation Error Types

/// Reasons an id, version, archive size or store path is rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Value is {actual} characters long, limit is {max}")]
    TooLong { actual: usize, max: usize },

    #[error("Value is {actual} characters long, at least {min} required")]
    TooShort { actual: usize, min: usize },

    #[error("'{input}' contains characters not allowed here")]
    InvalidCharacters { input: String },

    #[error("Path '{path}' leaves the repository root")]
    PathTraversal { path: String },

    #[error("Path '{path}' must be relative to the repository root")]
    AbsolutePath { path: String },

    #[error("Path has {actual} components, limit is {max}")]
    PathTooDeep { actual: usize, max: usize },

    #[error("Archive is {actual} bytes, limit is {max}")]
    FileTooLarge { actual: u64, max: u64 },

    #[error("Contains null bytes")]
    NullBytes,

    #[error("Contains control characters")]
    ControlCharacters,
}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;
