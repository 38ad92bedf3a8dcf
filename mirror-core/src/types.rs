//! Domain types for the mirror engine.
//!
//! Inputs ([`ArtifactSpec`]) are deserialized from software manifests; the
//! rest are produced by the engine while a batch runs and are never persisted
//! except through the ledgers and the [`PolicySnapshot`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identity of a task within a batch: the reference after template
/// substitution, plus `:<tag>` or `@<digest>` for images.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactId(pub String);

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ArtifactId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ArtifactId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A credential value that never prints itself.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The plaintext value. Only command construction should call this.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("******")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("******")
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// The closed set of artifact types a manifest may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Image,
    Rpm,
    Tarball,
    Manifest,
    Iso,
    Shell,
    Git,
    PipModule,
    AnsibleGalaxyCollection,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Image => "image",
            ArtifactKind::Rpm => "rpm",
            ArtifactKind::Tarball => "tarball",
            ArtifactKind::Manifest => "manifest",
            ArtifactKind::Iso => "iso",
            ArtifactKind::Shell => "shell",
            ArtifactKind::Git => "git",
            ArtifactKind::PipModule => "pip_module",
            ArtifactKind::AnsibleGalaxyCollection => "ansible_galaxy_collection",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal status of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Success,
    Failed,
    Timeout,
}

impl TaskStatus {
    /// Capitalized form used in the status ledger.
    pub fn ledger_label(&self) -> &'static str {
        match self {
            TaskStatus::Success => "Success",
            TaskStatus::Failed => "Failed",
            TaskStatus::Timeout => "Timeout",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Success => write!(f, "SUCCESS"),
            TaskStatus::Failed => write!(f, "FAILED"),
            TaskStatus::Timeout => write!(f, "TIMEOUT"),
        }
    }
}

/// Lifecycle of a task inside a worker: `Pending → Running → terminal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskState {
    #[default]
    Pending,
    Running,
    Finished(TaskStatus),
}

impl TaskState {
    /// Advance to `next`, or `None` if the transition is not allowed.
    pub fn advance(self, next: TaskState) -> Option<TaskState> {
        match (self, next) {
            (TaskState::Pending, TaskState::Running) => Some(next),
            (TaskState::Running, TaskState::Finished(_)) => Some(next),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Finished(_))
    }
}

/// Aggregate status of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BatchStatus {
    Success,
    Failed,
    Partial,
    Timeout,
}

impl BatchStatus {
    /// Fold per-task results into an overall status.
    ///
    /// A batch timeout wins unconditionally. An empty result list is a
    /// success.
    pub fn aggregate(results: &[WorkerResult], timed_out: bool) -> Self {
        if timed_out {
            return BatchStatus::Timeout;
        }
        if results.iter().all(|r| r.status == TaskStatus::Success) {
            BatchStatus::Success
        } else if results.iter().all(|r| r.status == TaskStatus::Failed) {
            BatchStatus::Failed
        } else {
            BatchStatus::Partial
        }
    }

    /// Lowercased status for the software ledger; partial counts as failed.
    pub fn software_label(&self) -> &'static str {
        match self {
            BatchStatus::Success => "success",
            BatchStatus::Failed | BatchStatus::Partial => "failed",
            BatchStatus::Timeout => "timeout",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchStatus::Success => write!(f, "SUCCESS"),
            BatchStatus::Failed => write!(f, "FAILED"),
            BatchStatus::Partial => write!(f, "PARTIAL"),
            BatchStatus::Timeout => write!(f, "TIMEOUT"),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// One artifact entry as written in a software manifest.
///
/// `package` and `url` may carry `{{ <software>_version }}` placeholders
/// until the catalog resolves them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    #[serde(rename = "type")]
    pub kind: ArtifactKind,
    pub package: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default)]
    pub reboot: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    /// Type-specific fields not modelled above.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ArtifactSpec {
    /// String-valued extra field.
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(|v| v.as_str())
    }
}

/// A task with its reference resolved once at intake.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: ArtifactId,
    /// Software the artifact was listed under.
    pub software: String,
    pub spec: ArtifactSpec,
}

impl Task {
    pub fn kind(&self) -> ArtifactKind {
        self.spec.kind
    }

    /// The resolved reference (package name, image path or URL-bearing name).
    pub fn reference(&self) -> &str {
        &self.spec.package
    }
}

/// The single, immutable result a worker emits for a task.
#[derive(Debug, Clone)]
pub struct WorkerResult {
    pub task: Task,
    pub reference: ArtifactId,
    pub status: TaskStatus,
    pub output: Option<String>,
    pub error: Option<String>,
    /// Worker log file holding this task's trail.
    pub log_ref: PathBuf,
    pub elapsed: Duration,
}

/// Derived result of one batch; never persisted.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub overall_status: BatchStatus,
    pub results: Vec<WorkerResult>,
    pub elapsed: Duration,
}

impl BatchOutcome {
    pub fn empty() -> Self {
        Self {
            overall_status: BatchStatus::Success,
            results: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }
}

/// Credentials and TLS material for a user-supplied registry.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryCredential {
    pub name: String,
    pub host: String,
    pub username: Option<String>,
    pub password: Option<Secret>,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    pub requires_auth: bool,
}

/// Persisted policy metadata:
/// `{source-list -> {<item>_policy -> value}, repository_mode, lastrun_timestamp}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicySnapshot(pub serde_yaml::Mapping);

impl PolicySnapshot {
    pub const REPOSITORY_MODE: &'static str = "repository_mode";
    pub const LASTRUN_TIMESTAMP: &'static str = "lastrun_timestamp";

    pub fn get(&self, key: &str) -> Option<&serde_yaml::Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: &str, value: serde_yaml::Value) {
        self.0.insert(serde_yaml::Value::from(key), value);
    }

    pub fn lastrun_timestamp(&self) -> Option<&str> {
        self.get(Self::LASTRUN_TIMESTAMP).and_then(|v| v.as_str())
    }

    /// Copy with the given top-level keys removed.
    pub fn without(&self, keys: &[String]) -> PolicySnapshot {
        let mut map = self.0.clone();
        for key in keys {
            map.remove(key.as_str());
        }
        PolicySnapshot(map)
    }
}
