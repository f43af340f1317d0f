//! # Package Store
//!
//! On-disk placement of package archives. Each package version gets its own
//! directory under the root:
//!
//! ```text
//! {root}/
//!   newtonsoft.json/
//!     13.0.1/
//!       newtonsoft.json.13.0.1.nupkg                archive
//!       newtonsoft.json.13.0.1.nupkg.sha512         content hash sidecar
//!       newtonsoft.json.13.0.1.manifest.json        metadata sidecar
//!   incoming.1.0.0.nupkg                            loose file: drop-folder candidate
//! ```
//!
//! Every file is written to a `.tmp` sibling, synced and renamed into place.
//! The metadata sidecar is renamed last and acts as the commit marker: a
//! directory without it is an interrupted placement and is never loaded.
//!
//! The store has no locking of its own. The repository only calls the
//! mutating methods while holding its mutation gate.

use crate::archive::PackageMetadata;
use crate::error::{is_transient_io, RepositoryError, RepositoryResult};
use crate::hash_utils::{sha512_base64, HASH_ALGORITHM};
use crate::identity::PackageIdentity;
use crate::validation::{validate_path_segment, validate_safe_path};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// File extension of package archives
pub const ARCHIVE_EXTENSION: &str = "nupkg";

/// File name suffix of symbols archives
pub const SYMBOLS_SUFFIX: &str = ".symbols.nupkg";

const HASH_SUFFIX: &str = ".sha512";
const MANIFEST_SUFFIX: &str = ".manifest.json";
const TEMP_SUFFIX: &str = ".tmp";
const TOMBSTONE_SUFFIX: &str = ".removing";
const PROBE_FILE: &str = ".write-probe";

/// Bounded exponential backoff for transient I/O failures
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Upper bound for a single backoff sleep.
    const MAX_DELAY: Duration = Duration::from_secs(2);

    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(Self::MAX_DELAY)
            .min(Self::MAX_DELAY)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(50))
    }
}

/// Contents of the metadata sidecar, one per stored package
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredPackage {
    /// Id with its original casing
    pub id: String,
    /// Full version string, build metadata included
    pub version: String,
    pub listed: bool,
    pub published: DateTime<Utc>,
    pub hash: String,
    pub hash_algorithm: String,
    pub size: u64,
    #[serde(default)]
    pub metadata: PackageMetadata,
    /// Archive location; derived from the layout, not persisted
    #[serde(skip)]
    pub path: PathBuf,
}

/// Physical package storage rooted at one directory
#[derive(Debug, Clone)]
pub struct PackageStore {
    root: PathBuf,
    retry: RetryPolicy,
}

impl PackageStore {
    /// Open (creating if needed) the store at `root`.
    ///
    /// # Errors
    ///
    /// Fails with [`RepositoryError::Configuration`] when the root cannot be
    /// created, read or written. This is fatal and never retried.
    pub fn open(root: impl Into<PathBuf>, retry: RetryPolicy) -> RepositoryResult<Self> {
        let root = root.into();

        fs::create_dir_all(&root).map_err(|e| {
            RepositoryError::Configuration(format!(
                "cannot create repository root {}: {e}",
                root.display()
            ))
        })?;

        fs::read_dir(&root).map_err(|e| {
            RepositoryError::Configuration(format!(
                "repository root {} is not readable: {e}",
                root.display()
            ))
        })?;

        let probe = root.join(PROBE_FILE);
        fs::write(&probe, b"probe")
            .and_then(|()| fs::remove_file(&probe))
            .map_err(|e| {
                RepositoryError::Configuration(format!(
                    "repository root {} is not writable: {e}",
                    root.display()
                ))
            })?;

        debug!(root = %root.display(), "Opened package store");
        Ok(Self { root, retry })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store-relative directory of a package version.
    fn relative_dir(identity: &PackageIdentity) -> RepositoryResult<PathBuf> {
        let id = identity.id_key();
        let version = identity.version().to_normalized_string().to_ascii_lowercase();
        validate_path_segment(&id)?;
        validate_path_segment(&version)?;
        Ok(validate_safe_path(Path::new(&id).join(&version))?)
    }

    fn file_stem(identity: &PackageIdentity) -> String {
        format!(
            "{}.{}",
            identity.id_key(),
            identity.version().to_normalized_string().to_ascii_lowercase()
        )
    }

    pub fn package_dir(&self, identity: &PackageIdentity) -> RepositoryResult<PathBuf> {
        Ok(self.root.join(Self::relative_dir(identity)?))
    }

    pub fn archive_path(&self, identity: &PackageIdentity) -> RepositoryResult<PathBuf> {
        Ok(self.package_dir(identity)?.join(format!(
            "{}.{ARCHIVE_EXTENSION}",
            Self::file_stem(identity)
        )))
    }

    fn hash_path(archive: &Path) -> PathBuf {
        append_suffix(archive, HASH_SUFFIX)
    }

    /// Hidden sibling a version directory is renamed to while it is deleted.
    /// Versions never start with a dot, so it cannot collide with a package.
    fn tombstone_path(dir: &Path) -> PathBuf {
        let name = dir
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_default();
        dir.with_file_name(format!(".{name}{TOMBSTONE_SUFFIX}"))
    }

    fn manifest_path(&self, identity: &PackageIdentity) -> RepositoryResult<PathBuf> {
        Ok(self
            .package_dir(identity)?
            .join(format!("{}{MANIFEST_SUFFIX}", Self::file_stem(identity))))
    }

    /// Whether a committed package exists for `identity`.
    pub fn contains(&self, identity: &PackageIdentity) -> bool {
        self.manifest_path(identity)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }

    /// Place a new package.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::AlreadyExists`] if a committed package already
    /// occupies the target directory.
    pub fn place(
        &self,
        identity: &PackageIdentity,
        content: &[u8],
        metadata: &PackageMetadata,
    ) -> RepositoryResult<StoredPackage> {
        let manifest_path = self.manifest_path(identity)?;
        let archive_path = self.archive_path(identity)?;

        if manifest_path.exists() {
            warn!(
                package = %identity,
                path = %archive_path.display(),
                "Refusing to overwrite stored package"
            );
            return Err(RepositoryError::AlreadyExists { path: archive_path });
        }

        if archive_path.exists() {
            warn!(
                path = %archive_path.display(),
                "Replacing leftover archive from an interrupted placement"
            );
        }

        self.commit(identity, content, metadata)
    }

    /// Replace the stored content of an existing package (override push).
    ///
    /// The previous files stay in place until every new file has been
    /// written, so a failed replacement leaves the old package readable.
    pub fn replace(
        &self,
        identity: &PackageIdentity,
        content: &[u8],
        metadata: &PackageMetadata,
    ) -> RepositoryResult<StoredPackage> {
        if !self.contains(identity) {
            debug!(package = %identity, "Nothing stored to replace, placing instead");
        }
        self.commit(identity, content, metadata)
    }

    /// Stage the archive and both sidecars as synced `.tmp` files, then rename
    /// them into place with the metadata sidecar last.
    fn commit(
        &self,
        identity: &PackageIdentity,
        content: &[u8],
        metadata: &PackageMetadata,
    ) -> RepositoryResult<StoredPackage> {
        let dir = self.package_dir(identity)?;
        self.with_retry("create package directory", &dir, || fs::create_dir_all(&dir))?;

        let archive_path = self.archive_path(identity)?;
        let hash_path = Self::hash_path(&archive_path);
        let manifest_path = self.manifest_path(identity)?;

        let record = StoredPackage {
            id: identity.id().to_string(),
            version: identity.version().to_full_string(),
            listed: true,
            published: Utc::now(),
            hash: sha512_base64(content),
            hash_algorithm: HASH_ALGORITHM.to_string(),
            size: content.len() as u64,
            metadata: metadata.clone(),
            path: archive_path.clone(),
        };
        let manifest = serde_json::to_vec_pretty(&record)?;

        let files: [(&Path, &[u8]); 3] = [
            (archive_path.as_path(), content),
            (hash_path.as_path(), record.hash.as_bytes()),
            (manifest_path.as_path(), &manifest),
        ];

        let mut staged: Vec<(PathBuf, &Path)> = Vec::with_capacity(files.len());
        for (path, bytes) in files {
            match self.write_temp(path, bytes) {
                Ok(temp) => staged.push((temp, path)),
                Err(e) => {
                    discard_staged(&staged);
                    return Err(e);
                }
            }
        }

        for (index, (temp, path)) in staged.iter().enumerate() {
            if let Err(e) = self.with_retry("commit file", path, || fs::rename(temp, path)) {
                discard_staged(&staged[index..]);
                return Err(e.into());
            }
        }
        sync_dir(&dir);

        info!(
            package = %identity,
            path = %archive_path.display(),
            size = record.size,
            "Package stored"
        );
        Ok(record)
    }

    /// Remove a stored package and its sidecars.
    ///
    /// The version directory is renamed to a hidden tombstone first, which
    /// removes the package in one step; the tombstone is deleted afterwards.
    pub fn remove(&self, identity: &PackageIdentity) -> RepositoryResult<()> {
        let manifest_path = self.manifest_path(identity)?;
        if !manifest_path.exists() {
            return Err(RepositoryError::NotFound(format!(
                "Package {identity} is not in the store"
            )));
        }

        let dir = self.package_dir(identity)?;
        let tombstone = Self::tombstone_path(&dir);
        self.with_retry("clear tombstone", &tombstone, || {
            match fs::remove_dir_all(&tombstone) {
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                other => other,
            }
        })?;
        self.with_retry("retire package directory", &dir, || fs::rename(&dir, &tombstone))?;

        if let Some(id_dir) = dir.parent() {
            sync_dir(id_dir);
            if let Err(e) = fs::remove_dir_all(&tombstone) {
                warn!(
                    path = %tombstone.display(),
                    error = %e,
                    "Could not delete retired package directory"
                );
            }
            remove_dir_if_empty(id_dir);
        }

        info!(package = %identity, "Package removed from store");
        Ok(())
    }

    /// Read a stored archive, verifying it against its hash sidecar.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::NotFound`] if nothing is stored for `identity`,
    /// [`RepositoryError::Corruption`] if the content no longer matches.
    pub fn read(&self, identity: &PackageIdentity) -> RepositoryResult<Vec<u8>> {
        let archive_path = self.archive_path(identity)?;
        if !self.contains(identity) || !archive_path.is_file() {
            warn!(path = %archive_path.display(), "Archive not found");
            return Err(RepositoryError::NotFound(format!(
                "Package {identity} is not in the store"
            )));
        }

        let content = self.with_retry("read archive", &archive_path, || fs::read(&archive_path))?;
        let hash_path = Self::hash_path(&archive_path);
        let expected = self.with_retry("read hash", &hash_path, || fs::read_to_string(&hash_path))?;

        let actual = sha512_base64(&content);
        if expected.trim() != actual {
            warn!(path = %archive_path.display(), "Stored archive does not match its hash");
            return Err(RepositoryError::Corruption {
                path: archive_path,
                expected: expected.trim().to_string(),
                actual,
            });
        }

        Ok(content)
    }

    /// Read the metadata sidecar of a stored package.
    pub fn read_record(&self, identity: &PackageIdentity) -> RepositoryResult<StoredPackage> {
        let manifest_path = self.manifest_path(identity)?;
        if !manifest_path.is_file() {
            return Err(RepositoryError::NotFound(format!(
                "Package {identity} is not in the store"
            )));
        }
        let mut record = read_manifest(&manifest_path)?;
        record.path = self.archive_path(identity)?;
        Ok(record)
    }

    /// Persist the listed state of a stored package.
    pub fn set_listed(
        &self,
        identity: &PackageIdentity,
        listed: bool,
    ) -> RepositoryResult<StoredPackage> {
        let mut record = self.read_record(identity)?;
        if record.listed != listed {
            record.listed = listed;
            let manifest_path = self.manifest_path(identity)?;
            self.write_atomic(&manifest_path, &serde_json::to_vec_pretty(&record)?)?;
            debug!(package = %identity, listed, "Updated listed state");
        }
        Ok(record)
    }

    /// Load every committed package in the layout.
    ///
    /// Unreadable sidecars and sidecars without an archive are skipped with a
    /// warning so one damaged directory does not hide the rest.
    pub fn load_all(&self) -> RepositoryResult<Vec<StoredPackage>> {
        let mut records = Vec::new();

        let walker = WalkDir::new(&self.root)
            .min_depth(3)
            .max_depth(3)
            .into_iter()
            .filter_entry(|entry| !is_tombstone(entry.path()));
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable store entry");
                    continue;
                }
            };

            let path = entry.path();
            let is_manifest = entry.file_type().is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(MANIFEST_SUFFIX));
            if !is_manifest {
                continue;
            }

            let mut record = match read_manifest(path) {
                Ok(record) => record,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "Skipping unreadable metadata sidecar"
                    );
                    continue;
                }
            };

            let identity = match PackageIdentity::parse(&record.id, &record.version) {
                Ok(identity) => identity,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "Skipping sidecar with invalid identity"
                    );
                    continue;
                }
            };

            let archive_path = self.archive_path(&identity)?;
            if !archive_path.is_file() {
                warn!(path = %archive_path.display(), "Skipping package whose archive is missing");
                continue;
            }

            record.path = archive_path;
            records.push(record);
        }

        debug!(count = records.len(), root = %self.root.display(), "Loaded stored packages");
        Ok(records)
    }

    /// Write `content` to a synced `.tmp` sibling of `path` and return the
    /// sibling's location.
    fn write_temp(&self, path: &Path, content: &[u8]) -> RepositoryResult<PathBuf> {
        let temp = append_suffix(path, TEMP_SUFFIX);
        self.with_retry("write file", path, || {
            let mut file = File::create(&temp)?;
            file.write_all(content)?;
            file.sync_all()
        })
        .inspect_err(|_| {
            let _ = fs::remove_file(&temp);
        })?;
        Ok(temp)
    }

    /// Write `content` to `path` through a synced temporary file.
    fn write_atomic(&self, path: &Path, content: &[u8]) -> RepositoryResult<()> {
        let temp = self.write_temp(path, content)?;
        self.with_retry("commit file", path, || fs::rename(&temp, path))
            .inspect_err(|_| {
                let _ = fs::remove_file(&temp);
            })?;
        Ok(())
    }

    /// Run `op`, retrying transient failures with exponential backoff.
    fn with_retry<T>(
        &self,
        operation: &str,
        path: &Path,
        mut op: impl FnMut() -> io::Result<T>,
    ) -> io::Result<T> {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.retry.attempts && is_transient_io(&e) => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        operation,
                        path = %path.display(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient I/O failure, retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn read_manifest(path: &Path) -> RepositoryResult<StoredPackage> {
    let content = fs::read(path)?;
    Ok(serde_json::from_slice(&content)?)
}

/// Delete staged files that were never renamed into place.
fn discard_staged(staged: &[(PathBuf, &Path)]) {
    for (temp, _) in staged {
        if let Err(e) = fs::remove_file(temp) {
            debug!(path = %temp.display(), error = %e, "Could not delete staged file");
        }
    }
}

fn is_tombstone(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') && n.ends_with(TOMBSTONE_SUFFIX))
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn remove_dir_if_empty(dir: &Path) {
    let is_empty = fs::read_dir(dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false);
    if is_empty {
        if let Err(e) = fs::remove_dir(dir) {
            debug!(dir = %dir.display(), error = %e, "Could not remove empty directory");
        }
    }
}

/// Make renames inside `dir` durable.
#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        debug!(dir = %dir.display(), error = %e, "Directory sync failed");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}
