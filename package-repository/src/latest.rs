//! Latest-version selection for the entries of one package id.
//!
//! Only listed entries that qualify for a tier take part. `latest` is the
//! highest stable candidate, `absolute latest` the highest candidate overall.
//! The selection is recomputed from scratch for both tiers whenever the entry
//! set of an id changes.

use crate::types::{LatestFlags, PackageEntry};
use crate::version::CompatibilityTier;

/// Positions of the selected entries within the slice passed to [`select`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatestSelection {
    pub latest: Option<usize>,
    pub absolute_latest: Option<usize>,
}

/// Select the latest and absolute latest entry of one id under `tier`.
pub fn select(entries: &[PackageEntry], tier: CompatibilityTier) -> LatestSelection {
    let mut selection = LatestSelection::default();

    for (i, entry) in entries.iter().enumerate() {
        if !entry.listed || !entry.qualifies_for_tier(tier) {
            continue;
        }

        let is_higher = |current: Option<usize>| {
            current.is_none_or(|c| entry.version() > entries[c].version())
        };

        if is_higher(selection.absolute_latest) {
            selection.absolute_latest = Some(i);
        }
        if !entry.is_prerelease() && is_higher(selection.latest) {
            selection.latest = Some(i);
        }
    }

    selection
}

/// Recompute the flags of every entry for both tiers.
pub fn apply(entries: &mut [PackageEntry]) {
    for tier in CompatibilityTier::ALL {
        let selection = select(entries, tier);
        for (i, entry) in entries.iter_mut().enumerate() {
            entry.flags.set(
                tier,
                LatestFlags {
                    is_latest: selection.latest == Some(i),
                    is_absolute_latest: selection.absolute_latest == Some(i),
                },
            );
        }
    }
}
