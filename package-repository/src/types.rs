//! Index entry types shared by the store, the index and the facade

use crate::archive::PackageMetadata;
use crate::error::RepositoryResult;
use crate::identity::PackageIdentity;
use crate::store::StoredPackage;
use crate::version::{CompatibilityTier, ParsedVersion};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Latest-version flags of one entry under one tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestFlags {
    /// Highest stable qualifying version of its id
    pub is_latest: bool,
    /// Highest qualifying version of its id, prerelease included
    pub is_absolute_latest: bool,
}

/// Latest flags for both tiers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierFlags {
    pub legacy: LatestFlags,
    pub full: LatestFlags,
}

impl TierFlags {
    pub fn get(&self, tier: CompatibilityTier) -> LatestFlags {
        match tier {
            CompatibilityTier::Legacy => self.legacy,
            CompatibilityTier::Full => self.full,
        }
    }

    pub fn set(&mut self, tier: CompatibilityTier, flags: LatestFlags) {
        match tier {
            CompatibilityTier::Legacy => self.legacy = flags,
            CompatibilityTier::Full => self.full = flags,
        }
    }
}

/// One indexed package version.
///
/// Entries are values: the index never changes one after publishing it.
/// A mutation builds fresh entries for the affected id.
#[derive(Debug, Clone)]
pub struct PackageEntry {
    pub identity: PackageIdentity,
    /// `false` once the package has been delisted
    pub listed: bool,
    /// Location of the stored archive
    pub path: PathBuf,
    /// When the package was ingested
    pub published: DateTime<Utc>,
    /// Opaque metadata from the archive, shared between snapshots
    pub metadata: Arc<PackageMetadata>,
    /// Base64 SHA512 of the stored archive
    pub hash: String,
    pub size: u64,
    pub flags: TierFlags,
}

impl PackageEntry {
    /// Index entry for a stored package. Flags are computed by the index.
    pub fn from_stored(record: StoredPackage) -> RepositoryResult<Self> {
        let identity = PackageIdentity::parse(&record.id, &record.version)?;
        Ok(Self {
            identity,
            listed: record.listed,
            path: record.path,
            published: record.published,
            metadata: Arc::new(record.metadata),
            hash: record.hash,
            size: record.size,
            flags: TierFlags::default(),
        })
    }

    pub fn id(&self) -> &str {
        self.identity.id()
    }

    pub fn version(&self) -> &ParsedVersion {
        self.identity.version()
    }

    pub fn is_prerelease(&self) -> bool {
        self.version().is_prerelease()
    }

    pub fn qualifies_for_tier(&self, tier: CompatibilityTier) -> bool {
        self.version().qualifies_for_tier(tier)
    }

    pub fn latest_flags(&self, tier: CompatibilityTier) -> LatestFlags {
        self.flags.get(tier)
    }

    /// Whether `text` (already lowercase) appears in the id or metadata.
    pub fn matches_text(&self, text: &str) -> bool {
        text.is_empty()
            || self.id().to_lowercase().contains(text)
            || self.metadata.matches_text(text)
    }
}
