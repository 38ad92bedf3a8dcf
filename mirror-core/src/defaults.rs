//! Tunables and the on-disk layout under the state directory.
//!
//! ```text
//! <state>/
//!   metadata/localrepo_metadata.yml         persisted snapshot
//!   metadata/localrepo_rerun_metadata.yml   scratch candidate
//!   status/status.csv                       per-artifact ledger
//!   status/software.csv                     per-software ledger
//!   logs/package_status_<worker>.log
//!   store/                                  downloaded artifacts
//!   task_results_table.log
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(100);
pub const DEFAULT_IGNORE_KEYS: &[&str] = &["lastrun_timestamp"];

/// Policy values mapped to mirror download modes.
pub fn mirror_mode(policy: &str) -> &'static str {
    match policy {
        "never" => "streamed",
        _ => "on_demand",
    }
}

/// Container remotes always fetch eagerly.
pub const CONTAINER_POLICY: &str = "immediate";

pub fn default_ignore_keys() -> Vec<String> {
    DEFAULT_IGNORE_KEYS.iter().map(|k| k.to_string()).collect()
}

/// Resolved paths for one state directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    pub root: PathBuf,
}

impl StatePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<home>/.mirror`
    pub fn at_home(home: &Path) -> Self {
        Self::new(home.join(".mirror"))
    }

    pub fn from_home_dir() -> Result<Self, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(Self::at_home(&home))
    }

    pub fn metadata(&self) -> PathBuf {
        self.root.join("metadata").join("localrepo_metadata.yml")
    }

    pub fn rerun_metadata(&self) -> PathBuf {
        self.root.join("metadata").join("localrepo_rerun_metadata.yml")
    }

    pub fn status_csv(&self) -> PathBuf {
        self.root.join("status").join("status.csv")
    }

    pub fn software_csv(&self) -> PathBuf {
        self.root.join("status").join("software.csv")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn store(&self) -> PathBuf {
        self.root.join("store")
    }

    pub fn results_table(&self) -> PathBuf {
        self.root.join("task_results_table.log")
    }
}
