//! # Package Repository
//!
//! Storage and indexing engine for a private package registry. Archives are
//! pushed directly or dropped into the watched root directory; the repository
//! keeps them in a deterministic on-disk layout and answers queries from an
//! immutable, atomically published index.
//!
//! ## Features
//!
//! - **Two version regimes**: every entry carries "latest" and "absolute
//!   latest" flags for the Legacy and the Full compatibility tier
//! - **Duplicate rejection**: identities compare case-insensitively and
//!   without build metadata
//! - **Drop folder**: loose archives in the root are ingested through the
//!   push path and removed once published
//! - **Lock-free reads**: mutations are serialized; queries read the current
//!   snapshot without waiting
//!
//! ## Key Modules
//!
//! - [`repository`]: the [`PackageRepository`] facade
//! - [`version`] and [`identity`]: version parsing, ordering and tiers
//! - [`index`] and [`latest`]: snapshots and latest-version selection
//! - [`store`]: on-disk layout, sidecars and atomic writes
//! - [`drop_folder`]: drop-folder scanning and monitoring
//! - [`archive`]: the archive extraction interface and the framed adapter
//! - [`config`]: repository configuration
//! - [`validation`]: input validation for ids, versions and paths
//!
//! Archive parsing is pluggable through [`ArchiveExtractor`]; the crate ships
//! [`FramedArchiveReader`] for a simple length-prefixed format.

pub mod archive;
pub mod config;
pub mod drop_folder;
pub mod error;
pub mod hash_utils;
pub mod identity;
pub mod index;
pub mod latest;
pub mod repository;
pub mod store;
pub mod types;
pub mod validation;
pub mod version;

// Re-export key types for convenience
pub use archive::{
    build_framed_archive, ArchiveError, ArchiveExtractor, ArchiveKind, ExtractedArchive,
    FramedArchiveReader, FramedManifest, PackageMetadata,
};
pub use config::RepositoryConfig;
pub use drop_folder::{DropFolderState, FileOutcome, ScanReport};
pub use error::{ErrorCode, RepositoryError, RepositoryResult};
pub use identity::PackageIdentity;
pub use index::PackageIndex;
pub use repository::PackageRepository;
pub use types::{LatestFlags, PackageEntry, TierFlags};
pub use validation::{ValidationError, ValidationResult};
pub use version::{compare, CompatibilityTier, ParseError, ParsedVersion};
