//! # Package Repository
//!
//! [`PackageRepository`] is the public surface of the crate. It owns the
//! store, the published index snapshot and the drop-folder monitor.
//!
//! ## Concurrency
//!
//! Every mutation (push, remove, relist, drop-folder ingestion, refresh) runs
//! under one mutation gate: extract, validate, store, then publish a new
//! snapshot. Queries never take the gate; they load the current snapshot with
//! a single atomic load and answer from it, so a query sees either the
//! snapshot before a publish or the one after it.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use package_repository::{CompatibilityTier, FramedArchiveReader, PackageRepository, RepositoryConfig};
//! use std::sync::Arc;
//!
//! let config = RepositoryConfig::with_root("/srv/packages");
//! let repository = PackageRepository::open(config, Arc::new(FramedArchiveReader::new()))?;
//!
//! let archive = std::fs::read("Foo.1.0.0.nupkg")?;
//! let entry = repository.add_package(archive, false)?;
//! assert!(repository.exists(entry.id(), "1.0.0"));
//!
//! for entry in repository.search("foo", true, CompatibilityTier::Full) {
//!     println!("{} latest={}", entry.identity, entry.latest_flags(CompatibilityTier::Full).is_latest);
//! }
//! # Ok::<(), package_repository::RepositoryError>(())
//! ```

use crate::archive::{ArchiveExtractor, ArchiveKind, ExtractedArchive};
use crate::config::RepositoryConfig;
use crate::drop_folder::{
    self, DropFolderMonitor, DropFolderSink, DropFolderState, FileOutcome, MonitorSettings,
    ScanReport, StateCell,
};
use crate::error::{RepositoryError, RepositoryResult};
use crate::hash_utils::sha512_base64;
use crate::identity::PackageIdentity;
use crate::index::{PackageIndex, SnapshotCell};
use crate::store::{PackageStore, RetryPolicy};
use crate::types::PackageEntry;
use crate::validation::validate_file_size;
use crate::version::{CompatibilityTier, ParsedVersion};
use bytes::Bytes;
use parking_lot::Mutex;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Package storage and index with duplicate detection and drop-folder
/// ingestion.
///
/// Dropping the repository stops its monitor threads.
pub struct PackageRepository {
    core: Arc<RepositoryCore>,
    monitor: Option<DropFolderMonitor>,
}

/// State shared between the facade and the monitor worker
struct RepositoryCore {
    config: RepositoryConfig,
    store: PackageStore,
    extractor: Arc<dyn ArchiveExtractor>,
    snapshot: SnapshotCell,
    /// Serializes every mutation of the store and the snapshot.
    gate: Mutex<()>,
    drop_state: Arc<StateCell>,
}

impl PackageRepository {
    /// Open the repository described by `config`.
    ///
    /// Loads the stored packages, ingests any archives already sitting in the
    /// root and, when configured, starts watching the root and the periodic
    /// rescan.
    ///
    /// # Errors
    ///
    /// Fails when the configuration is invalid, the root is unusable or the
    /// file-system watcher cannot be started.
    pub fn open(
        config: RepositoryConfig,
        extractor: Arc<dyn ArchiveExtractor>,
    ) -> RepositoryResult<Self> {
        config.validate()?;

        let retry = RetryPolicy::new(config.io_retry_attempts, config.io_retry_base_delay());
        let store = PackageStore::open(&config.root_path, retry)?;
        let index = PackageIndex::from_entries(load_entries(&store)?);
        info!(
            root = %store.root().display(),
            packages = index.len(),
            "Loaded package index"
        );

        let core = Arc::new(RepositoryCore {
            config,
            store,
            extractor,
            snapshot: SnapshotCell::new(index),
            gate: Mutex::new(()),
            drop_state: Arc::new(StateCell::default()),
        });

        // Monitor first so files dropped during the startup scan raise events.
        let monitor = if core.config.enable_file_system_monitoring
            || core.config.run_background_tasks
        {
            let settings = MonitorSettings {
                root: core.store.root().to_path_buf(),
                ignore_symbols: core.config.ignore_symbols_packages,
                watch_file_system: core.config.enable_file_system_monitoring,
                debounce: core.config.monitor_debounce(),
                rescan_interval: core
                    .config
                    .run_background_tasks
                    .then(|| core.config.background_scan_interval()),
            };
            let sink: Arc<dyn DropFolderSink> = core.clone();
            Some(DropFolderMonitor::start(
                settings,
                sink,
                core.drop_state.clone(),
            )?)
        } else {
            None
        };

        core.scan_drop_folder();

        Ok(Self { core, monitor })
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.core.config
    }

    /// Push an archive.
    ///
    /// An existing package with the same identity is replaced only when both
    /// `allow_override` and the configured push policy allow it.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Duplicate`] when the identity exists and may not be
    /// overwritten; archive, validation and parse errors for malformed input;
    /// I/O errors from the store.
    pub fn add_package(
        &self,
        content: impl Into<Bytes>,
        allow_override: bool,
    ) -> RepositoryResult<PackageEntry> {
        let allow_override =
            allow_override && self.core.config.allow_override_existing_package_on_push;
        let (extracted, identity) = self.core.extract(content.into())?;

        if self.core.is_ignored_symbols(&extracted) {
            return Err(RepositoryError::Ignored(format!(
                "Symbols package {identity} ignored by configuration"
            )));
        }

        let _gate = self.core.gate.lock();
        let existing = self
            .core
            .snapshot
            .load()
            .find_exact(identity.id(), identity.version())
            .is_some();
        if existing && !allow_override {
            warn!(package = %identity, "Rejected duplicate push");
            return Err(duplicate_error(&identity));
        }

        self.core.store_and_publish(extracted, &identity, existing)
    }

    /// Push an archive read from `path`.
    ///
    /// Files larger than the archive size limit are rejected before reading.
    pub fn add_package_file(
        &self,
        path: impl AsRef<Path>,
        allow_override: bool,
    ) -> RepositoryResult<PackageEntry> {
        let content = read_archive_file(path.as_ref())?;
        self.add_package(content, allow_override)
    }

    /// Remove a package: delist it when delisting is enabled, otherwise
    /// delete its files and entry.
    pub fn remove_package(&self, id: &str, version: &str) -> RepositoryResult<()> {
        let identity = PackageIdentity::parse(id, version)?;
        let _gate = self.core.gate.lock();
        let current = self.core.snapshot.load();
        let entry = current
            .find_exact(identity.id(), identity.version())
            .ok_or_else(|| not_found(&identity))?;
        let identity = entry.identity.clone();

        if self.core.config.enable_delisting {
            self.core.store.set_listed(&identity, false)?;
            if let Some(next) = current.with_listed(&identity, false) {
                self.core.snapshot.publish(next);
            }
            info!(package = %identity, "Package delisted");
        } else {
            self.core.store.remove(&identity)?;
            if let Some(next) = current.without(&identity) {
                self.core.snapshot.publish(next);
            }
            info!(package = %identity, "Package deleted");
        }
        Ok(())
    }

    /// Make a delisted package visible again.
    pub fn relist_package(&self, id: &str, version: &str) -> RepositoryResult<PackageEntry> {
        let identity = PackageIdentity::parse(id, version)?;
        let _gate = self.core.gate.lock();
        let current = self.core.snapshot.load();
        let entry = current
            .find_exact(identity.id(), identity.version())
            .ok_or_else(|| not_found(&identity))?;
        if entry.listed {
            return Ok(entry.clone());
        }

        let identity = entry.identity.clone();
        self.core.store.set_listed(&identity, true)?;
        let next = current
            .with_listed(&identity, true)
            .ok_or_else(|| not_found(&identity))?;
        let relisted = next
            .find_exact(identity.id(), identity.version())
            .cloned()
            .ok_or_else(|| not_found(&identity))?;
        self.core.snapshot.publish(next);

        info!(package = %identity, "Package relisted");
        Ok(relisted)
    }

    /// Whether a listed package with this identity exists.
    pub fn exists(&self, id: &str, version: &str) -> bool {
        self.find_package(id, version).is_some()
    }

    /// Listed package with this identity; build metadata is ignored on both
    /// sides.
    pub fn find_package(&self, id: &str, version: &str) -> Option<PackageEntry> {
        let version = ParsedVersion::parse(version).ok()?;
        self.snapshot()
            .find_exact(id, &version)
            .filter(|entry| entry.listed)
            .cloned()
    }

    /// All listed versions of `id`, in ascending version order.
    pub fn find_packages_by_id(&self, id: &str) -> Vec<PackageEntry> {
        self.find_packages_by_id_for(id, CompatibilityTier::Full)
    }

    /// Listed versions of `id` that qualify for `tier`.
    pub fn find_packages_by_id_for(&self, id: &str, tier: CompatibilityTier) -> Vec<PackageEntry> {
        self.snapshot()
            .lookup(id)
            .iter()
            .filter(|entry| entry.listed && entry.qualifies_for_tier(tier))
            .cloned()
            .collect()
    }

    /// Every package qualifying for `tier`, ordered by id then version.
    ///
    /// Each entry carries its flags for both tiers; read the requested one
    /// with [`PackageEntry::latest_flags`].
    pub fn get_packages(
        &self,
        tier: CompatibilityTier,
        include_unlisted: bool,
    ) -> Vec<PackageEntry> {
        self.snapshot()
            .all(include_unlisted)
            .filter(|entry| entry.qualifies_for_tier(tier))
            .cloned()
            .collect()
    }

    /// Listed packages whose id or metadata contains `text`
    /// (case-insensitive).
    pub fn search(
        &self,
        text: &str,
        allow_prerelease: bool,
        tier: CompatibilityTier,
    ) -> Vec<PackageEntry> {
        self.search_with_frameworks(text, &[], allow_prerelease, tier)
    }

    /// [`search`](Self::search) restricted to packages supporting one of
    /// `target_frameworks`, when framework filtering is enabled.
    pub fn search_with_frameworks(
        &self,
        text: &str,
        target_frameworks: &[String],
        allow_prerelease: bool,
        tier: CompatibilityTier,
    ) -> Vec<PackageEntry> {
        let needle = text.trim().to_lowercase();
        let filter_frameworks = self.core.config.enable_framework_filtering;

        self.snapshot()
            .all(false)
            .filter(|entry| entry.qualifies_for_tier(tier))
            .filter(|entry| allow_prerelease || !entry.is_prerelease())
            .filter(|entry| entry.matches_text(&needle))
            .filter(|entry| {
                !filter_frameworks || entry.metadata.supports_any_framework(target_frameworks)
            })
            .cloned()
            .collect()
    }

    /// Verified archive bytes of a package, listed or not.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::NotFound`] if the package is not indexed,
    /// [`RepositoryError::Corruption`] if the stored file fails its hash check.
    pub fn read_package(&self, id: &str, version: &str) -> RepositoryResult<Bytes> {
        let version = ParsedVersion::parse(version)?;
        let snapshot = self.snapshot();
        let entry = snapshot.find_exact(id, &version).ok_or_else(|| {
            RepositoryError::NotFound(format!(
                "Package {id}.{} not found",
                version.to_normalized_string()
            ))
        })?;
        Ok(Bytes::from(self.core.store.read(&entry.identity)?))
    }

    /// Scan the drop folder now, on the calling thread.
    pub fn rescan(&self) -> ScanReport {
        self.core.scan_drop_folder()
    }

    /// Rebuild the index from the on-disk layout.
    pub fn refresh(&self) -> RepositoryResult<()> {
        self.core.reconcile()
    }

    /// Ask the monitor for a scan and reconcile without waiting for it.
    pub fn request_background_rescan(&self) {
        match &self.monitor {
            Some(monitor) => monitor.request_rescan(),
            None => debug!("No monitor running; background rescan request ignored"),
        }
    }

    pub fn drop_folder_state(&self) -> DropFolderState {
        self.core.drop_state.get()
    }

    /// Generation of the current snapshot; increases with every publish.
    pub fn generation(&self) -> u64 {
        self.snapshot().generation()
    }

    /// The current snapshot, for consistent multi-step reads.
    pub fn snapshot(&self) -> Arc<PackageIndex> {
        self.core.snapshot.load()
    }

    /// Stop the monitor threads. Called automatically on drop.
    pub fn shutdown(&mut self) {
        if let Some(mut monitor) = self.monitor.take() {
            monitor.shutdown();
            debug!("Repository monitor stopped");
        }
    }
}

impl Drop for PackageRepository {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl RepositoryCore {
    fn extract(&self, content: Bytes) -> RepositoryResult<(ExtractedArchive, PackageIdentity)> {
        let extracted = self.extractor.extract(content)?;
        let identity = PackageIdentity::parse(&extracted.id, &extracted.version)?;
        Ok((extracted, identity))
    }

    fn is_ignored_symbols(&self, extracted: &ExtractedArchive) -> bool {
        self.config.ignore_symbols_packages && extracted.kind == ArchiveKind::Symbols
    }

    /// Store the archive and publish a snapshot containing it.
    ///
    /// Must be called with the gate held.
    fn store_and_publish(
        &self,
        extracted: ExtractedArchive,
        identity: &PackageIdentity,
        replace: bool,
    ) -> RepositoryResult<PackageEntry> {
        let record = if replace {
            self.store.replace(identity, &extracted.content, &extracted.metadata)?
        } else {
            self.store.place(identity, &extracted.content, &extracted.metadata)?
        };

        let next = self.snapshot.load().with_entry(PackageEntry::from_stored(record)?);
        let entry = next
            .find_exact(identity.id(), identity.version())
            .cloned()
            .ok_or_else(|| not_found(identity))?;
        self.snapshot.publish(next);

        info!(
            package = %identity,
            replaced = replace,
            generation = self.snapshot.load().generation(),
            "Package published"
        );
        Ok(entry)
    }

    fn scan_drop_folder(&self) -> ScanReport {
        drop_folder::scan(
            self.store.root(),
            self.config.ignore_symbols_packages,
            &self.drop_state,
            self,
        )
    }
}

impl DropFolderSink for RepositoryCore {
    fn ingest_drop_file(&self, path: &Path) -> RepositoryResult<FileOutcome> {
        let content = match read_archive_file(path) {
            Ok(content) => Bytes::from(content),
            // Consumed by a concurrent scan since it was listed.
            Err(RepositoryError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(FileOutcome::Skipped("file no longer present".to_string()));
            }
            Err(e) => return Err(e),
        };
        let (extracted, identity) = self.extract(content)?;

        if self.is_ignored_symbols(&extracted) {
            return Ok(FileOutcome::Skipped(format!(
                "symbols package {identity} ignored by configuration"
            )));
        }

        let _gate = self.gate.lock();
        let existing = self
            .snapshot
            .load()
            .find_exact(identity.id(), identity.version())
            .cloned();

        let entry = match existing {
            Some(existing) if existing.hash == sha512_base64(&extracted.content) => {
                debug!(
                    path = %path.display(),
                    package = %identity,
                    "Drop-folder file already indexed"
                );
                remove_source(path);
                return Ok(FileOutcome::AlreadyPresent(existing));
            }
            Some(_) if !self.config.allow_override_existing_package_on_push => {
                return Ok(FileOutcome::Skipped(duplicate_error(&identity).to_string()));
            }
            Some(_) => self.store_and_publish(extracted, &identity, true)?,
            None => self.store_and_publish(extracted, &identity, false)?,
        };

        remove_source(path);
        Ok(FileOutcome::Ingested(entry))
    }

    fn reconcile(&self) -> RepositoryResult<()> {
        let _gate = self.gate.lock();
        let entries = load_entries(&self.store)?;
        let current = self.snapshot.load();
        let next = current.rebuilt(entries);
        debug!(
            before = current.len(),
            after = next.len(),
            generation = next.generation(),
            "Reconciled index with store"
        );
        self.snapshot.publish(next);
        Ok(())
    }
}

/// Entries for every package in the store, skipping unparseable records.
fn load_entries(store: &PackageStore) -> RepositoryResult<Vec<PackageEntry>> {
    Ok(store
        .load_all()?
        .into_iter()
        .filter_map(|record| {
            let path = record.path.clone();
            PackageEntry::from_stored(record)
                .inspect_err(|e| {
                    warn!(path = %path.display(), error = %e, "Skipping stored package")
                })
                .ok()
        })
        .collect())
}

/// Read an archive file, rejecting it by size before loading it.
fn read_archive_file(path: &Path) -> RepositoryResult<Vec<u8>> {
    validate_file_size(fs::metadata(path)?.len(), None)?;
    Ok(fs::read(path)?)
}

/// Delete an ingested drop-folder file. A failure only means the next scan
/// sees the file again and treats it as already present.
fn remove_source(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "Failed to remove ingested drop-folder file");
    }
}

fn duplicate_error(identity: &PackageIdentity) -> RepositoryError {
    RepositoryError::Duplicate {
        package: identity.display_name(),
    }
}

fn not_found(identity: &PackageIdentity) -> RepositoryError {
    RepositoryError::NotFound(format!("Package {identity} not found"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{build_framed_archive, FramedArchiveReader, FramedManifest};
    use crate::ErrorCode;
    use tempfile::TempDir;

    fn archive(id: &str, version: &str) -> Vec<u8> {
        build_framed_archive(&FramedManifest::new(id, version), id.as_bytes()).unwrap()
    }

    fn open(configure: impl FnOnce(&mut RepositoryConfig)) -> (PackageRepository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = RepositoryConfig::with_root(temp_dir.path());
        config.enable_file_system_monitoring = false;
        configure(&mut config);
        let repository = PackageRepository::open(config, Arc::new(FramedArchiveReader)).unwrap();
        (repository, temp_dir)
    }

    #[test]
    fn test_add_and_find() {
        let (repository, _temp_dir) = open(|_| {});
        let entry = repository.add_package(archive("Foo", "1.0.0+build"), false).unwrap();

        assert_eq!(entry.id(), "Foo");
        assert!(entry.flags.full.is_latest);
        assert!(repository.exists("foo", "1.0"));
        assert!(repository.find_package("FOO", "1.0.0+other").is_some());
        assert_eq!(repository.generation(), 1);
    }

    #[test]
    fn test_override_requires_argument_and_config() {
        let (repository, _temp_dir) = open(|_| {});
        repository.add_package(archive("Foo", "1.0.0"), false).unwrap();

        let err = repository.add_package(archive("Foo", "1.0.0"), false).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::Duplicate);
        repository.add_package(archive("Foo", "1.0.0"), true).unwrap();

        let (strict, _temp_dir) = open(|c| c.allow_override_existing_package_on_push = false);
        strict.add_package(archive("Foo", "1.0.0"), true).unwrap();
        assert!(matches!(
            strict.add_package(archive("Foo", "1.0.0"), true),
            Err(RepositoryError::Duplicate { .. })
        ));
    }

    #[test]
    fn test_invalid_input_is_rejected() {
        let (repository, _temp_dir) = open(|_| {});
        assert!(matches!(
            repository.add_package(archive("Foo", "not-a-version"), false),
            Err(RepositoryError::Parse(_))
        ));
        assert!(matches!(
            repository.add_package(archive("../evil", "1.0"), false),
            Err(RepositoryError::Validation(_))
        ));
        assert!(matches!(
            repository.add_package(b"junk".to_vec(), false),
            Err(RepositoryError::Archive(_))
        ));
        assert_eq!(repository.generation(), 0);
    }

    #[test]
    fn test_hard_delete() {
        let (repository, temp_dir) = open(|_| {});
        repository.add_package(archive("Foo", "1.0.0"), false).unwrap();

        repository.remove_package("foo", "1.0.0").unwrap();
        assert!(!repository.exists("Foo", "1.0.0"));
        assert!(repository.get_packages(CompatibilityTier::Full, true).is_empty());
        assert!(!temp_dir.path().join("foo").exists());
        assert!(matches!(
            repository.remove_package("Foo", "1.0.0"),
            Err(RepositoryError::NotFound(_))
        ));
    }

    #[test]
    fn test_delist_and_relist() {
        let (repository, _temp_dir) = open(|c| c.enable_delisting = true);
        repository.add_package(archive("Foo", "1.0.0"), false).unwrap();

        repository.remove_package("Foo", "1.0.0").unwrap();
        assert!(!repository.exists("Foo", "1.0.0"));
        assert!(repository.read_package("Foo", "1.0.0").is_ok());

        let relisted = repository.relist_package("Foo", "1.0.0").unwrap();
        assert!(relisted.listed);
        assert!(relisted.flags.legacy.is_latest);
        assert!(repository.exists("Foo", "1.0.0"));
    }

    #[test]
    fn test_ignored_symbols_push() {
        let (repository, _temp_dir) = open(|c| c.ignore_symbols_packages = true);
        let mut manifest = FramedManifest::new("Foo", "1.0.0");
        manifest.kind = ArchiveKind::Symbols;
        let content = build_framed_archive(&manifest, b"pdb").unwrap();

        assert!(matches!(
            repository.add_package(content, false),
            Err(RepositoryError::Ignored(_))
        ));
    }

    #[test]
    fn test_framework_filter_only_when_enabled() {
        let mut manifest = FramedManifest::new("Foo", "1.0.0");
        manifest.metadata.target_frameworks = vec!["net8.0".to_string()];
        let content = build_framed_archive(&manifest, b"").unwrap();
        let wanted = vec!["net48".to_string()];

        let (plain, _temp_dir) = open(|_| {});
        plain.add_package(content.clone(), false).unwrap();
        assert_eq!(
            plain
                .search_with_frameworks("foo", &wanted, true, CompatibilityTier::Full)
                .len(),
            1
        );

        let (filtering, _temp_dir) = open(|c| c.enable_framework_filtering = true);
        filtering.add_package(content, false).unwrap();
        assert!(filtering
            .search_with_frameworks("foo", &wanted, true, CompatibilityTier::Full)
            .is_empty());
    }
}
