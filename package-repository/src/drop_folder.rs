//! # Drop Folder
//!
//! Archives copied directly into the repository root are picked up and fed
//! through the same ingestion path as an explicit push. A file is deleted from
//! the root only once the snapshot that publishes it is live, so a crash in
//! between leaves the file for the next scan, which then finds it already
//! present and removes it.
//!
//! The monitor is message driven: the notify callback and the periodic timer
//! only send [`MonitorMessage`]s to one worker thread. The worker debounces
//! file events and runs scans; ingestion itself goes through the repository's
//! mutation gate.

use crate::error::RepositoryResult;
use crate::store::{ARCHIVE_EXTENSION, SYMBOLS_SUFFIX};
use crate::types::PackageEntry;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, error, info, warn};

/// Observable state of the drop-folder scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropFolderState {
    Idle,
    Scanning,
    IngestingFile,
}

impl DropFolderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropFolderState::Idle => "idle",
            DropFolderState::Scanning => "scanning",
            DropFolderState::IngestingFile => "ingesting_file",
        }
    }
}

/// Atomically readable [`DropFolderState`]
#[derive(Debug, Default)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn get(&self) -> DropFolderState {
        match self.0.load(Ordering::Acquire) {
            1 => DropFolderState::Scanning,
            2 => DropFolderState::IngestingFile,
            _ => DropFolderState::Idle,
        }
    }

    fn set(&self, state: DropFolderState) {
        let value = match state {
            DropFolderState::Idle => 0,
            DropFolderState::Scanning => 1,
            DropFolderState::IngestingFile => 2,
        };
        self.0.store(value, Ordering::Release);
    }
}

/// What happened to one drop-folder file
#[derive(Debug, Clone)]
pub enum FileOutcome {
    /// Stored, published and removed from the root.
    Ingested(PackageEntry),
    /// Identical content was already indexed; the file was removed.
    AlreadyPresent(PackageEntry),
    /// Intentionally left alone (symbols archive, duplicate under a
    /// no-override policy).
    Skipped(String),
}

/// Per-file results of one scan
#[derive(Debug, Default, Clone)]
pub struct ScanReport {
    pub ingested: Vec<PackageEntry>,
    pub already_present: Vec<PathBuf>,
    pub skipped: Vec<(PathBuf, String)>,
    pub failed: Vec<(PathBuf, String)>,
}

impl ScanReport {
    /// Number of candidate files looked at.
    pub fn processed(&self) -> usize {
        self.ingested.len() + self.already_present.len() + self.skipped.len() + self.failed.len()
    }
}

/// Ingestion side of the drop folder, implemented by the repository.
pub(crate) trait DropFolderSink: Send + Sync {
    /// Ingest one loose archive, deleting it once published.
    fn ingest_drop_file(&self, path: &Path) -> RepositoryResult<FileOutcome>;

    /// Bring the index in line with the on-disk layout.
    fn reconcile(&self) -> RepositoryResult<()>;
}

/// Whether `path` names a loose archive that should be considered.
pub fn is_candidate_name(path: &Path, ignore_symbols: bool) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let lower = name.to_ascii_lowercase();
    if !lower.ends_with(&format!(".{ARCHIVE_EXTENSION}")) {
        return false;
    }
    !(ignore_symbols && lower.ends_with(SYMBOLS_SUFFIX))
}

/// Loose archives directly in `root`, oldest first.
pub fn list_candidates(root: &Path, ignore_symbols: bool) -> io::Result<Vec<PathBuf>> {
    let mut candidates: Vec<(SystemTime, PathBuf)> = Vec::new();

    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Skipping unreadable drop-folder entry");
                continue;
            }
        };
        if !metadata.is_file() || !is_candidate_name(&path, ignore_symbols) {
            continue;
        }
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        candidates.push((modified, path));
    }

    candidates.sort();
    Ok(candidates.into_iter().map(|(_, path)| path).collect())
}

/// Run one scan of `root`, processing every candidate independently.
///
/// Per-file failures are logged and recorded; they never abort the scan.
pub(crate) fn scan(
    root: &Path,
    ignore_symbols: bool,
    state: &StateCell,
    sink: &dyn DropFolderSink,
) -> ScanReport {
    let mut report = ScanReport::default();
    state.set(DropFolderState::Scanning);

    let candidates = match list_candidates(root, ignore_symbols) {
        Ok(candidates) => candidates,
        Err(e) => {
            error!(root = %root.display(), error = %e, "Failed to list drop folder");
            state.set(DropFolderState::Idle);
            return report;
        }
    };

    if !candidates.is_empty() {
        debug!(count = candidates.len(), "Found drop-folder candidates");
    }

    for path in candidates {
        state.set(DropFolderState::IngestingFile);
        match sink.ingest_drop_file(&path) {
            Ok(FileOutcome::Ingested(entry)) => report.ingested.push(entry),
            Ok(FileOutcome::AlreadyPresent(_)) => report.already_present.push(path),
            Ok(FileOutcome::Skipped(reason)) => {
                warn!(path = %path.display(), reason = %reason, "Left drop-folder file in place");
                report.skipped.push((path, reason));
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    code = e.error_code().as_str(),
                    "Failed to ingest drop-folder file"
                );
                report.failed.push((path, e.to_string()));
            }
        }
        state.set(DropFolderState::Scanning);
    }

    state.set(DropFolderState::Idle);

    if report.processed() > 0 {
        info!(
            ingested = report.ingested.len(),
            already_present = report.already_present.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Drop-folder scan finished"
        );
    }
    report
}

/// Messages driving the monitor worker
#[derive(Debug)]
pub(crate) enum MonitorMessage {
    /// A file in the root was created or renamed.
    FileEvent(PathBuf),
    /// Run a full scan and reconcile now.
    Rescan,
    Shutdown,
}

/// Settings the monitor worker needs from the repository configuration
#[derive(Debug, Clone)]
pub(crate) struct MonitorSettings {
    pub root: PathBuf,
    pub ignore_symbols: bool,
    pub watch_file_system: bool,
    pub debounce: Duration,
    /// Period of the background rescan, if enabled.
    pub rescan_interval: Option<Duration>,
}

/// Background monitor: an optional file-system watcher plus one worker thread
pub(crate) struct DropFolderMonitor {
    sender: Sender<MonitorMessage>,
    worker: Option<JoinHandle<()>>,
    _watcher: Option<RecommendedWatcher>,
}

impl DropFolderMonitor {
    /// Start the worker and, when enabled, the file-system watcher.
    pub fn start(
        settings: MonitorSettings,
        sink: Arc<dyn DropFolderSink>,
        state: Arc<StateCell>,
    ) -> RepositoryResult<Self> {
        let (sender, receiver) = mpsc::channel();

        let watcher = if settings.watch_file_system {
            Some(start_watcher(&settings, sender.clone())?)
        } else {
            None
        };

        let worker = thread::Builder::new()
            .name("drop-folder-monitor".to_string())
            .spawn(move || run_worker(settings, receiver, sink, state))?;

        Ok(Self {
            sender,
            worker: Some(worker),
            _watcher: watcher,
        })
    }

    /// Ask the worker for an immediate scan and reconcile.
    pub fn request_rescan(&self) {
        let _ = self.sender.send(MonitorMessage::Rescan);
    }

    /// Stop the worker, waiting for an in-flight scan to finish.
    pub fn shutdown(&mut self) {
        let _ = self.sender.send(MonitorMessage::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Drop-folder monitor thread panicked");
            }
        }
    }
}

impl Drop for DropFolderMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn start_watcher(
    settings: &MonitorSettings,
    sender: Sender<MonitorMessage>,
) -> RepositoryResult<RecommendedWatcher> {
    let ignore_symbols = settings.ignore_symbols;

    let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
        match res {
            Ok(event) => {
                if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    return;
                }
                for path in event.paths {
                    if is_candidate_name(&path, ignore_symbols) {
                        let _ = sender.send(MonitorMessage::FileEvent(path));
                    }
                }
            }
            Err(e) => error!(error = %e, "File system watch error"),
        }
    })?;

    watcher.watch(&settings.root, RecursiveMode::NonRecursive)?;
    info!(root = %settings.root.display(), "Watching drop folder");
    Ok(watcher)
}

fn run_worker(
    settings: MonitorSettings,
    receiver: mpsc::Receiver<MonitorMessage>,
    sink: Arc<dyn DropFolderSink>,
    state: Arc<StateCell>,
) {
    // Deadline of the debounced scan, pushed back by every new event.
    let mut pending_scan: Option<Instant> = None;
    let mut next_rescan = settings.rescan_interval.map(|interval| Instant::now() + interval);

    let full_rescan = |state: &StateCell| {
        scan(&settings.root, settings.ignore_symbols, state, sink.as_ref());
        if let Err(e) = sink.reconcile() {
            error!(error = %e, "Failed to reconcile index with store");
        }
    };

    loop {
        let deadline = match (pending_scan, next_rescan) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        let message = match deadline {
            Some(deadline) => {
                receiver.recv_timeout(deadline.saturating_duration_since(Instant::now()))
            }
            None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match message {
            Ok(MonitorMessage::FileEvent(path)) => {
                debug!(path = %path.display(), "Drop-folder event");
                pending_scan = Some(Instant::now() + settings.debounce);
            }
            Ok(MonitorMessage::Rescan) => {
                pending_scan = None;
                full_rescan(&state);
            }
            Ok(MonitorMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let now = Instant::now();
        if pending_scan.is_some_and(|at| at <= now) {
            pending_scan = None;
            scan(&settings.root, settings.ignore_symbols, &state, sink.as_ref());
        }
        if let (Some(at), Some(interval)) = (next_rescan, settings.rescan_interval) {
            if at <= now {
                debug!("Running background rescan");
                full_rescan(&state);
                next_rescan = Some(Instant::now() + interval);
            }
        }
    }

    debug!("Drop-folder monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RepositoryError;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    /// Records the files it is asked to ingest and removes them.
    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<PathBuf>>,
        reconciles: Mutex<usize>,
    }

    impl DropFolderSink for RecordingSink {
        fn ingest_drop_file(&self, path: &Path) -> RepositoryResult<FileOutcome> {
            self.seen.lock().push(path.to_path_buf());
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            if name.starts_with("bad") {
                return Err(RepositoryError::NotFound(name));
            }
            if name.starts_with("dup") {
                return Ok(FileOutcome::Skipped("duplicate".to_string()));
            }
            fs::remove_file(path)?;
            Ok(FileOutcome::Skipped("removed".to_string()))
        }

        fn reconcile(&self) -> RepositoryResult<()> {
            *self.reconciles.lock() += 1;
            Ok(())
        }
    }

    #[test]
    fn test_candidate_names() {
        let path = Path::new;
        assert!(is_candidate_name(path("/r/Foo.1.0.0.nupkg"), false));
        assert!(is_candidate_name(path("/r/FOO.1.0.0.NUPKG"), false));
        assert!(is_candidate_name(path("/r/Foo.1.0.0.symbols.nupkg"), false));
        assert!(!is_candidate_name(path("/r/Foo.1.0.0.symbols.nupkg"), true));
        assert!(!is_candidate_name(path("/r/Foo.1.0.0.nupkg.tmp"), false));
        assert!(!is_candidate_name(path("/r/readme.txt"), false));
    }

    #[test]
    fn test_list_candidates_ignores_directories_and_other_files() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("a.1.0.nupkg"), b"a").unwrap();
        fs::write(root.join("notes.txt"), b"n").unwrap();
        fs::create_dir(root.join("dir.nupkg")).unwrap();
        fs::create_dir_all(root.join("foo/1.0.0")).unwrap();
        fs::write(root.join("foo/1.0.0/foo.1.0.0.nupkg"), b"f").unwrap();

        let candidates = list_candidates(root, false).unwrap();
        assert_eq!(candidates, vec![root.join("a.1.0.nupkg")]);
    }

    #[test]
    fn test_scan_continues_past_failures() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("bad.1.0.nupkg"), b"x").unwrap();
        fs::write(root.join("dup.1.0.nupkg"), b"x").unwrap();
        fs::write(root.join("good.1.0.nupkg"), b"x").unwrap();

        let sink = RecordingSink::default();
        let state = StateCell::default();
        let report = scan(root, false, &state, &sink);

        assert_eq!(sink.seen.lock().len(), 3);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(report.processed(), 3);
        assert_eq!(state.get(), DropFolderState::Idle);
        assert!(root.join("bad.1.0.nupkg").exists());
        assert!(!root.join("good.1.0.nupkg").exists());
    }

    #[test]
    fn test_monitor_rescan_and_shutdown() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("good.1.0.nupkg"), b"x").unwrap();

        let sink = Arc::new(RecordingSink::default());
        let settings = MonitorSettings {
            root: temp_dir.path().to_path_buf(),
            ignore_symbols: false,
            watch_file_system: false,
            debounce: Duration::from_millis(10),
            rescan_interval: None,
        };

        let mut monitor =
            DropFolderMonitor::start(settings, sink.clone(), Arc::new(StateCell::default()))
                .unwrap();
        monitor.request_rescan();
        monitor.shutdown();

        assert_eq!(*sink.reconciles.lock(), 1);
        assert!(!temp_dir.path().join("good.1.0.nupkg").exists());
    }

    #[test]
    fn test_background_rescan_runs_periodically() {
        let temp_dir = TempDir::new().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let settings = MonitorSettings {
            root: temp_dir.path().to_path_buf(),
            ignore_symbols: false,
            watch_file_system: false,
            debounce: Duration::from_millis(10),
            rescan_interval: Some(Duration::from_millis(20)),
        };

        let mut monitor =
            DropFolderMonitor::start(settings, sink.clone(), Arc::new(StateCell::default()))
                .unwrap();
        let started = Instant::now();
        while *sink.reconciles.lock() < 2 && started.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(10));
        }
        monitor.shutdown();

        assert!(*sink.reconciles.lock() >= 2);
    }
}
