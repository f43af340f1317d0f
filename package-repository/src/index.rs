//! # Package Index
//!
//! An immutable snapshot mapping lowercase package ids to their entries, and
//! the [`SnapshotCell`] that publishes snapshots to readers.
//!
//! Each id owns an `Arc<[PackageEntry]>` kept in ascending version order.
//! Deriving a new snapshot from a delta rebuilds only the affected id's list;
//! every other list is shared with the previous snapshot through the
//! persistent [`im::OrdMap`].

use crate::identity::{normalize_id, PackageIdentity};
use crate::latest;
use crate::types::PackageEntry;
use crate::version::ParsedVersion;
use arc_swap::ArcSwap;
use im::OrdMap;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One immutable index snapshot
#[derive(Debug, Clone, Default)]
pub struct PackageIndex {
    packages: OrdMap<String, Arc<[PackageEntry]>>,
    generation: u64,
}

impl PackageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot from loose entries, computing all flags.
    ///
    /// When two entries share an identity the later one wins.
    pub fn from_entries(entries: impl IntoIterator<Item = PackageEntry>) -> Self {
        let mut grouped: BTreeMap<String, Vec<PackageEntry>> = BTreeMap::new();
        for entry in entries {
            let list = grouped.entry(entry.identity.id_key()).or_default();
            list.retain(|existing| existing.identity != entry.identity);
            list.push(entry);
        }

        let packages = grouped
            .into_iter()
            .map(|(key, list)| (key, finish(list)))
            .collect();

        Self {
            packages,
            generation: 0,
        }
    }

    /// Publish counter; bumped by every derived snapshot.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of distinct ids.
    pub fn id_count(&self) -> usize {
        self.packages.len()
    }

    /// Number of entries, listed or not.
    pub fn len(&self) -> usize {
        self.packages.values().map(|list| list.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// All entries of `id` (case-insensitive) in ascending version order.
    pub fn lookup(&self, id: &str) -> &[PackageEntry] {
        self.packages
            .get(&normalize_id(id))
            .map(|list| &list[..])
            .unwrap_or(&[])
    }

    /// Every entry, ordered by case-insensitive id then version.
    pub fn all(&self, include_unlisted: bool) -> impl Iterator<Item = &PackageEntry> {
        self.packages
            .values()
            .flat_map(|list| list.iter())
            .filter(move |entry| include_unlisted || entry.listed)
    }

    /// The entry with exactly this normalized identity, listed or not.
    pub fn find_exact(&self, id: &str, version: &ParsedVersion) -> Option<&PackageEntry> {
        self.lookup(id).iter().find(|entry| entry.version() == version)
    }

    /// Snapshot with `entry` added, replacing any entry of the same identity.
    pub fn with_entry(&self, entry: PackageEntry) -> Self {
        let key = entry.identity.id_key();
        let mut list: Vec<PackageEntry> = self
            .lookup(&key)
            .iter()
            .filter(|existing| existing.identity != entry.identity)
            .cloned()
            .collect();
        list.push(entry);
        self.derive(key, list)
    }

    /// Snapshot without `identity`, or `None` if it is not indexed.
    pub fn without(&self, identity: &PackageIdentity) -> Option<Self> {
        let current = self.lookup(identity.id());
        if !current.iter().any(|entry| &entry.identity == identity) {
            return None;
        }

        let list = current
            .iter()
            .filter(|entry| &entry.identity != identity)
            .cloned()
            .collect();
        Some(self.derive(identity.id_key(), list))
    }

    /// Snapshot with the listed state of `identity` changed, or `None` if it
    /// is not indexed.
    pub fn with_listed(&self, identity: &PackageIdentity, listed: bool) -> Option<Self> {
        let current = self.find_exact(identity.id(), identity.version())?;
        let mut updated = current.clone();
        updated.listed = listed;
        Some(self.with_entry(updated))
    }

    /// Snapshot rebuilt from `entries`, taking the next generation.
    pub fn rebuilt(&self, entries: impl IntoIterator<Item = PackageEntry>) -> Self {
        Self {
            generation: self.generation + 1,
            ..Self::from_entries(entries)
        }
    }

    fn derive(&self, key: String, list: Vec<PackageEntry>) -> Self {
        let mut packages = self.packages.clone();
        if list.is_empty() {
            packages.remove(&key);
        } else {
            packages.insert(key, finish(list));
        }
        Self {
            packages,
            generation: self.generation + 1,
        }
    }

    /// Whether both snapshots share the list of `id` without copying it.
    #[cfg(test)]
    fn shares_entries_with(&self, other: &Self, id: &str) -> bool {
        match (
            self.packages.get(&normalize_id(id)),
            other.packages.get(&normalize_id(id)),
        ) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Sort one id's entries and compute their flags.
fn finish(mut list: Vec<PackageEntry>) -> Arc<[PackageEntry]> {
    list.sort_by(|a, b| a.version().cmp(b.version()));
    latest::apply(&mut list);
    list.into()
}

/// The current snapshot, readable with a single atomic load.
///
/// Writers must be serialized by the caller; `publish` does not check that
/// the new snapshot was derived from the current one.
#[derive(Debug)]
pub struct SnapshotCell {
    current: ArcSwap<PackageIndex>,
}

impl SnapshotCell {
    pub fn new(index: PackageIndex) -> Self {
        Self {
            current: ArcSwap::from_pointee(index),
        }
    }

    /// The snapshot at the time of the call.
    pub fn load(&self) -> Arc<PackageIndex> {
        self.current.load_full()
    }

    pub fn publish(&self, index: PackageIndex) {
        self.current.store(Arc::new(index));
    }
}

impl Default for SnapshotCell {
    fn default() -> Self {
        Self::new(PackageIndex::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::PackageMetadata;
    use crate::version::CompatibilityTier;
    use chrono::Utc;
    use std::path::PathBuf;

    fn entry(id: &str, version: &str) -> PackageEntry {
        PackageEntry {
            identity: PackageIdentity::parse(id, version).unwrap(),
            listed: true,
            path: PathBuf::from(format!("{id}.{version}.nupkg")),
            published: Utc::now(),
            metadata: Arc::new(PackageMetadata::default()),
            hash: String::new(),
            size: 0,
            flags: Default::default(),
        }
    }

    fn identity(id: &str, version: &str) -> PackageIdentity {
        PackageIdentity::parse(id, version).unwrap()
    }

    fn versions(index: &PackageIndex, id: &str) -> Vec<String> {
        index
            .lookup(id)
            .iter()
            .map(|e| e.version().to_normalized_string())
            .collect()
    }

    #[test]
    fn test_lookup_is_case_insensitive_and_ordered() {
        let index = PackageIndex::from_entries([
            entry("Foo", "2.0"),
            entry("foo", "1.0-beta"),
            entry("FOO", "1.0"),
        ]);

        assert_eq!(versions(&index, "fOO"), vec!["1.0.0-beta", "1.0.0", "2.0.0"]);
        assert!(index.lookup("bar").is_empty());
        assert_eq!(index.id_count(), 1);
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_all_orders_by_id_then_version() {
        let index = PackageIndex::from_entries([
            entry("beta", "1.0"),
            entry("Alpha", "2.0"),
            entry("alpha", "1.0"),
        ]);

        let names: Vec<String> = index.all(false).map(|e| e.identity.display_name()).collect();
        assert_eq!(names, vec!["alpha.1.0.0", "Alpha.2.0.0", "beta.1.0.0"]);
    }

    #[test]
    fn test_find_exact_ignores_metadata() {
        let index = PackageIndex::from_entries([entry("test4", "3.0.0+tagged")]);
        let found = index
            .find_exact("TEST4", &ParsedVersion::parse("3.0").unwrap())
            .unwrap();
        assert_eq!(found.version().to_full_string(), "3.0.0+tagged");
        assert!(index
            .find_exact("test4", &ParsedVersion::parse("3.0.0-alpha").unwrap())
            .is_none());
    }

    #[test]
    fn test_deltas_leave_previous_snapshot_untouched() {
        let base = PackageIndex::from_entries([entry("a", "1.0"), entry("b", "1.0")]);
        let added = base.with_entry(entry("a", "2.0"));

        assert_eq!(versions(&base, "a"), vec!["1.0.0"]);
        assert_eq!(versions(&added, "a"), vec!["1.0.0", "2.0.0"]);
        assert_eq!(added.generation(), base.generation() + 1);
        assert!(base.lookup("a")[0].flags.full.is_latest);
        assert!(!added.lookup("a")[0].flags.full.is_latest);
        assert!(added.lookup("a")[1].flags.full.is_latest);

        assert!(added.shares_entries_with(&base, "b"));
        assert!(!added.shares_entries_with(&base, "a"));
    }

    #[test]
    fn test_with_entry_replaces_same_identity() {
        let base = PackageIndex::from_entries([entry("a", "1.0+old")]);
        let replaced = base.with_entry(entry("A", "1.0.0+new"));

        assert_eq!(replaced.len(), 1);
        assert_eq!(
            replaced.lookup("a")[0].version().to_full_string(),
            "1.0.0+new"
        );
    }

    #[test]
    fn test_without() {
        let base = PackageIndex::from_entries([entry("a", "1.0"), entry("a", "2.0")]);

        let removed = base.without(&identity("a", "2.0")).unwrap();
        assert_eq!(versions(&removed, "a"), vec!["1.0.0"]);
        assert!(removed.lookup("a")[0].flags.full.is_absolute_latest);

        let empty = removed.without(&identity("A", "1.0")).unwrap();
        assert!(empty.is_empty());
        assert!(empty.without(&identity("a", "1.0")).is_none());
    }

    #[test]
    fn test_with_listed_recomputes_flags() {
        let base = PackageIndex::from_entries([entry("a", "1.0"), entry("a", "2.0")]);
        let delisted = base.with_listed(&identity("a", "2.0"), false).unwrap();

        assert_eq!(delisted.all(false).count(), 1);
        assert_eq!(delisted.all(true).count(), 2);
        let first = &delisted.lookup("a")[0];
        assert!(first.latest_flags(CompatibilityTier::Legacy).is_latest);
        assert!(base.with_listed(&identity("a", "3.0"), false).is_none());
    }

    #[test]
    fn test_rebuilt_bumps_generation() {
        let base = PackageIndex::from_entries([entry("a", "1.0")]).with_entry(entry("b", "1.0"));
        let rebuilt = base.rebuilt([entry("c", "1.0")]);

        assert_eq!(rebuilt.generation(), 2);
        assert!(rebuilt.lookup("a").is_empty());
        assert!(rebuilt.lookup("c")[0].flags.legacy.is_latest);
    }

    #[test]
    fn test_snapshot_cell_publish() {
        let cell = SnapshotCell::default();
        let before = cell.load();

        cell.publish(before.with_entry(entry("a", "1.0")));
        assert!(before.is_empty());
        assert_eq!(cell.load().len(), 1);
        assert_eq!(cell.load().generation(), 1);
    }
}
