//! # Configuration Management
//!
//! Configuration for a [`PackageRepository`](crate::PackageRepository). A
//! single [`RepositoryConfig`] value is passed at construction; there is no
//! global configuration.
//!
//! The configuration supports JSON serialization with camelCase keys. Every
//! field is optional in the file and falls back to its default:
//!
//! ```json
//! {
//!   "rootPath": "/srv/packages",
//!   "enableDelisting": true,
//!   "allowOverrideExistingPackageOnPush": false
//! }
//! ```
//!
//! ## Loading Configuration
//!
//! ```rust,no_run
//! # use package_repository::RepositoryConfig;
//! // Load from file with fallback to defaults
//! let config = RepositoryConfig::load_or_default("repository.json")?;
//!
//! // Build in code
//! let config = RepositoryConfig::with_root("/srv/packages");
//! # Ok::<(), package_repository::RepositoryError>(())
//! ```

use crate::error::{RepositoryError, RepositoryResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Repository configuration.
///
/// The first seven fields are the behavioral switches of the repository; the
/// rest tune the drop-folder monitor and store I/O retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RepositoryConfig {
    /// Store location; also the monitored drop folder
    pub root_path: PathBuf,
    /// Soft delete (delist) instead of removing files
    pub enable_delisting: bool,
    /// Apply the target-framework filter to searches
    pub enable_framework_filtering: bool,
    /// Watch the root directory for dropped archives
    pub enable_file_system_monitoring: bool,
    /// Skip symbols archives during ingestion
    pub ignore_symbols_packages: bool,
    /// Default duplicate policy for pushes
    pub allow_override_existing_package_on_push: bool,
    /// Run periodic full rescans
    pub run_background_tasks: bool,
    /// Quiet period after the last file-system event before a scan starts
    pub monitor_debounce_ms: u64,
    /// Interval between background rescans
    pub background_scan_interval_secs: u64,
    /// Attempts for store I/O that fails with a transient error
    pub io_retry_attempts: u32,
    /// Delay before the first retry; doubled for each further attempt
    pub io_retry_base_delay_ms: u64,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        RepositoryConfig {
            root_path: PathBuf::from("packages"),
            enable_delisting: false,
            enable_framework_filtering: false,
            enable_file_system_monitoring: true,
            ignore_symbols_packages: false,
            allow_override_existing_package_on_push: true,
            run_background_tasks: false,
            monitor_debounce_ms: 500,
            background_scan_interval_secs: 300,
            io_retry_attempts: 3,
            io_retry_base_delay_ms: 50,
        }
    }
}

impl RepositoryConfig {
    /// Default configuration rooted at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        RepositoryConfig {
            root_path: root.into(),
            ..Default::default()
        }
    }

    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> RepositoryResult<Self> {
        let config_str = fs::read_to_string(path)?;
        let config = serde_json::from_str(&config_str)?;
        Ok(config)
    }

    /// Load configuration from a file if it exists, otherwise use defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> RepositoryResult<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Check the values that cannot be corrected at runtime.
    pub fn validate(&self) -> RepositoryResult<()> {
        if self.root_path.as_os_str().is_empty() {
            return Err(RepositoryError::Configuration(
                "rootPath must not be empty".to_string(),
            ));
        }
        if self.io_retry_attempts == 0 {
            return Err(RepositoryError::Configuration(
                "ioRetryAttempts must be at least 1".to_string(),
            ));
        }
        if self.run_background_tasks && self.background_scan_interval_secs == 0 {
            return Err(RepositoryError::Configuration(
                "backgroundScanIntervalSecs must be positive when background tasks run"
                    .to_string(),
            ));
        }
        Ok(())
    }

    pub fn monitor_debounce(&self) -> Duration {
        Duration::from_millis(self.monitor_debounce_ms)
    }

    pub fn background_scan_interval(&self) -> Duration {
        Duration::from_secs(self.background_scan_interval_secs)
    }

    pub fn io_retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.io_retry_base_delay_ms)
    }
}
