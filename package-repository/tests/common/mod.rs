//! Common test utilities and helpers
//!
//! Shared setup for the integration tests: isolated repository roots, framed
//! test archives and tracing output.

#![allow(dead_code)]

use anyhow::Result;
use package_repository::{
    build_framed_archive, FramedArchiveReader, FramedManifest, PackageRepository,
    RepositoryConfig,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

static TRACING: Once = Once::new();

/// Route `tracing` output to the test harness.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "package_repository=debug".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Repository over a temporary root, removed when dropped
pub struct TestRepository {
    pub repository: PackageRepository,
    pub temp_dir: TempDir,
}

impl TestRepository {
    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }
}

/// Test configuration: monitoring off so tests control every scan.
pub fn test_config(root: &Path) -> RepositoryConfig {
    let mut config = RepositoryConfig::with_root(root);
    config.enable_file_system_monitoring = false;
    config.monitor_debounce_ms = 50;
    config
}

/// Open a repository on a fresh root after adjusting the test configuration.
pub fn create_repository(
    configure: impl FnOnce(&mut RepositoryConfig),
) -> Result<TestRepository> {
    init_tracing();
    let temp_dir = TempDir::new()?;
    let mut config = test_config(temp_dir.path());
    configure(&mut config);
    let repository = open_repository(config)?;
    Ok(TestRepository {
        repository,
        temp_dir,
    })
}

pub fn open_repository(config: RepositoryConfig) -> Result<PackageRepository> {
    Ok(PackageRepository::open(
        config,
        Arc::new(FramedArchiveReader::new()),
    )?)
}

/// A framed archive for `id`/`version` whose payload names the package.
pub fn archive(id: &str, version: &str) -> Vec<u8> {
    archive_with_payload(id, version, format!("{id} {version}").as_bytes())
}

pub fn archive_with_payload(id: &str, version: &str, payload: &[u8]) -> Vec<u8> {
    build_manifest_archive(&FramedManifest::new(id, version), payload)
}

pub fn build_manifest_archive(manifest: &FramedManifest, payload: &[u8]) -> Vec<u8> {
    build_framed_archive(manifest, payload).expect("manifest serializes")
}

/// Write an archive as a loose file in the drop folder.
pub fn drop_file(root: &Path, file_name: &str, content: &[u8]) -> Result<PathBuf> {
    let path = root.join(file_name);
    fs::write(&path, content)?;
    Ok(path)
}

/// Loose archive files left in the root.
pub fn loose_archives(root: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if entry.file_type()?.is_file() && name.ends_with(".nupkg") {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let started = Instant::now();
    while started.elapsed() < timeout {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(25));
    }
    condition()
}
