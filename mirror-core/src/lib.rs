//! Mirror core library: domain types, input loading, reference templating.
//!
//! - [`types`]: newtypes, task/result/outcome types, [`PolicySnapshot`]
//! - [`config`]: software config and local repository config
//! - [`manifest`]: per-software artifact manifests
//! - [`template`]: one-shot reference rendering
//! - [`defaults`]: tunables and state-directory layout

pub mod config;
pub mod defaults;
pub mod error;
pub mod manifest;
pub mod template;
pub mod types;

pub use error::ConfigError;
pub use types::{
    ArtifactId, ArtifactKind, ArtifactSpec, BatchOutcome, BatchStatus, PolicySnapshot,
    RegistryCredential, Secret, Task, TaskState, TaskStatus, WorkerResult,
};
