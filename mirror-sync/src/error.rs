//! Error types for mirror-sync.

use std::path::PathBuf;

use thiserror::Error;

use mirror_core::ConfigError;

use crate::credentials::CredentialError;

/// All errors that can arise from sync operations.
///
/// Inside a batch these are stringified into a `FAILED` result for the task
/// that raised them; only pipeline setup propagates them to the caller.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An error loading inputs or building tasks.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML error while persisting a snapshot.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A snapshot file did not hold a mapping at the top level.
    #[error("metadata at {path} is not a mapping")]
    InvalidSnapshot { path: PathBuf },

    /// An external command exited non-zero or could not be spawned.
    #[error("command `{command}` failed: {detail}")]
    Command { command: String, detail: String },

    /// Credentials required by this task are unavailable.
    #[error("credentials unavailable: {0}")]
    Credential(#[from] CredentialError),

    /// A task needed credentials but resolution failed earlier in the batch.
    #[error("credentials unavailable: {0}")]
    CredentialUnavailable(String),

    /// The image names a registry with no known upstream.
    #[error("unknown registry prefix in '{0}'")]
    UnknownRegistry(String),

    /// A required field was missing from a task.
    #[error("task '{task}' is missing required field '{field}'")]
    MissingField { task: String, field: &'static str },

    /// A background task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
