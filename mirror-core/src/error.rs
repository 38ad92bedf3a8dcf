//! Error types for mirror-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while loading inputs and building tasks.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure (permission denied, unreadable file, etc.).
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load, with file path and line context from serde_yaml.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// JSON parse error on load.
    #[error("failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A required input file did not exist.
    #[error("input file not found at {path}")]
    NotFound { path: PathBuf },

    /// `cluster_os_type` is not one of the supported families.
    #[error("unsupported cluster_os_type: '{0}'")]
    UnsupportedOs(String),

    /// A reference template failed to render.
    #[error("failed to render '{template}': {source}")]
    Template {
        template: String,
        #[source]
        source: tera::Error,
    },

    /// Two manifest entries resolved to the same identity with different content.
    #[error("duplicate task '{0}' with conflicting definitions")]
    DuplicateTask(String),

    /// A source list entry was not in the expected shape.
    #[error("invalid entry in '{list}': {source}")]
    InvalidSource {
        list: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
