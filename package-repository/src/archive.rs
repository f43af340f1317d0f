//! # Archive Extraction
//!
//! The repository never looks inside a package archive itself. It hands the
//! raw bytes to an [`ArchiveExtractor`] and gets back an [`ExtractedArchive`]:
//! the raw identity strings, an opaque [`PackageMetadata`] blob and the content
//! to persist. Hosts plug in whatever archive format they serve.
//!
//! [`FramedArchiveReader`] is the adapter shipped with the crate. It reads a
//! length-prefixed framing:
//!
//! ```text
//! +-----------------+----------------+-----------------+-----------------+
//! | u32 LE manifest | JSON manifest  | u32 LE payload  | payload bytes   |
//! | length          |                | length          |                 |
//! +-----------------+----------------+-----------------+-----------------+
//! ```
//!
//! The manifest carries `id`, `version`, an optional `kind` and the metadata
//! fields; the payload is opaque.

use crate::validation::{validate_file_size, MAX_MANIFEST_SIZE};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Errors reported by an archive extractor
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArchiveError {
    #[error("Corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("Archive has no manifest: {0}")]
    MissingManifest(String),
}

/// Kind of archive, as reported by the extractor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveKind {
    #[default]
    Package,
    /// Debug-symbols companion archive, skipped when symbols are ignored.
    Symbols,
}

/// Descriptive metadata carried by an archive.
///
/// The repository passes this through untouched. It only reads it to match
/// search text and target frameworks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_frameworks: Vec<String>,
    /// File manifest of the archive content.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    /// Any other manifest fields, kept verbatim.
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

impl PackageMetadata {
    /// Case-insensitive substring match over the descriptive fields.
    ///
    /// `needle` must already be lowercase.
    pub fn matches_text(&self, needle: &str) -> bool {
        let contains = |s: &str| s.to_lowercase().contains(needle);

        self.title.as_deref().is_some_and(contains)
            || self.description.as_deref().is_some_and(contains)
            || self.summary.as_deref().is_some_and(contains)
            || self.authors.iter().any(|a| contains(a))
            || self.tags.iter().any(|t| contains(t))
    }

    /// Whether the package can serve any of the requested frameworks.
    ///
    /// A package that declares no frameworks is framework-neutral and always
    /// matches, as does an empty request.
    pub fn supports_any_framework(&self, requested: &[String]) -> bool {
        requested.is_empty()
            || self.target_frameworks.is_empty()
            || self.target_frameworks.iter().any(|declared| {
                requested
                    .iter()
                    .any(|wanted| declared.eq_ignore_ascii_case(wanted))
            })
    }
}

/// Result of extracting an archive: identity strings, metadata and content.
#[derive(Debug, Clone)]
pub struct ExtractedArchive {
    pub id: String,
    pub version: String,
    pub kind: ArchiveKind,
    pub metadata: PackageMetadata,
    /// The bytes to persist. Usually the original archive, shared not copied.
    pub content: Bytes,
}

/// Narrow interface to the archive-format parser.
pub trait ArchiveExtractor: Send + Sync {
    /// Extract identity and metadata from raw archive bytes.
    fn extract(&self, content: Bytes) -> Result<ExtractedArchive, ArchiveError>;
}

/// Manifest section of a framed archive
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FramedManifest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub kind: ArchiveKind,
    #[serde(flatten)]
    pub metadata: PackageMetadata,
}

impl FramedManifest {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            version: Some(version.into()),
            ..Default::default()
        }
    }
}

/// Reader for the length-prefixed archive framing described in the module docs
#[derive(Debug, Clone, Copy, Default)]
pub struct FramedArchiveReader;

impl FramedArchiveReader {
    pub fn new() -> Self {
        Self
    }
}

fn read_u32_le(data: &[u8], offset: usize) -> Option<usize> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize)
}

impl ArchiveExtractor for FramedArchiveReader {
    fn extract(&self, content: Bytes) -> Result<ExtractedArchive, ArchiveError> {
        let data = &content[..];

        validate_file_size(data.len() as u64, None).map_err(|e| {
            warn!(size = data.len(), "Archive size validation failed");
            ArchiveError::CorruptArchive(e.to_string())
        })?;

        let manifest_len = read_u32_le(data, 0).ok_or_else(|| {
            ArchiveError::CorruptArchive("Archive too small - missing manifest header".to_string())
        })?;

        if manifest_len == 0 {
            return Err(ArchiveError::MissingManifest(
                "manifest section is empty".to_string(),
            ));
        }

        if manifest_len > MAX_MANIFEST_SIZE {
            return Err(ArchiveError::CorruptArchive(format!(
                "Manifest section too large: {manifest_len} bytes (max: {MAX_MANIFEST_SIZE} bytes)"
            )));
        }

        let manifest_bytes = data.get(4..4 + manifest_len).ok_or_else(|| {
            ArchiveError::CorruptArchive("Insufficient data for manifest section".to_string())
        })?;

        let manifest: FramedManifest = serde_json::from_slice(manifest_bytes).map_err(|e| {
            warn!(error = %e, "Failed to parse archive manifest JSON");
            ArchiveError::CorruptArchive(format!("Invalid manifest JSON: {e}"))
        })?;

        let payload_len_offset = 4 + manifest_len;
        let payload_len = read_u32_le(data, payload_len_offset).ok_or_else(|| {
            ArchiveError::CorruptArchive("Archive missing payload length header".to_string())
        })?;

        let payload_offset = payload_len_offset + 4;
        if data.len() != payload_offset + payload_len {
            return Err(ArchiveError::CorruptArchive(format!(
                "Payload length mismatch: header says {payload_len} bytes, archive holds {}",
                data.len().saturating_sub(payload_offset)
            )));
        }

        let id = manifest
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ArchiveError::MissingManifest("manifest has no 'id'".to_string()))?;
        let version = manifest.version.filter(|v| !v.is_empty()).ok_or_else(|| {
            ArchiveError::MissingManifest("manifest has no 'version'".to_string())
        })?;

        debug!(
            id = %id,
            version = %version,
            payload_size = payload_len,
            "Extracted framed archive"
        );

        Ok(ExtractedArchive {
            id,
            version,
            kind: manifest.kind,
            metadata: manifest.metadata,
            content,
        })
    }
}

/// Build a framed archive from a manifest and payload.
pub fn build_framed_archive(
    manifest: &FramedManifest,
    payload: &[u8],
) -> Result<Vec<u8>, serde_json::Error> {
    let manifest_bytes = serde_json::to_vec(manifest)?;

    let mut archive = Vec::with_capacity(8 + manifest_bytes.len() + payload.len());
    archive.extend_from_slice(&(manifest_bytes.len() as u32).to_le_bytes());
    archive.extend_from_slice(&manifest_bytes);
    archive.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    archive.extend_from_slice(payload);
    Ok(archive)
}
