//! External command execution.
//!
//! Handlers describe the commands they need as [`CommandSpec`] values and run
//! them through a [`CommandRunner`]. The production [`ProcessRunner`] spawns
//! real processes; tests script responses instead.

use std::future::Future;
use std::sync::LazyLock;

use regex::Regex;
use tokio::process::Command;

use crate::error::SyncError;

static SENSITIVE_FLAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(--password|--username|--token|--user)([=\s]+)('[^']*'|\S+)")
        .expect("sensitive flag regex is valid")
});

/// Replace the value following any credential-bearing flag with `******`.
pub fn mask_sensitive(command: &str) -> String {
    SENSITIVE_FLAG
        .replace_all(command, "${1}${2}******")
        .into_owned()
}

/// A program and its arguments, passed to the OS without a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// `pulp <args...>`
    pub fn pulp<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new("pulp").args(args)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Command line with credentials masked; the only form that may be logged.
    pub fn masked(&self) -> String {
        mask_sensitive(&self.to_string())
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Failure the mirror service or upstream is expected to recover from.
    pub fn is_transient(&self) -> bool {
        if self.success() {
            return false;
        }
        let text = format!("{} {}", self.stdout, self.stderr).to_ascii_lowercase();
        [
            "429",
            "502",
            "503",
            "504",
            "temporarily unavailable",
            "timed out",
            "connection reset",
        ]
        .iter()
        .any(|needle| text.contains(needle))
    }
}

/// Runs external commands on behalf of handlers.
pub trait CommandRunner: Send + Sync + 'static {
    /// Run to completion. A non-zero exit is returned as output, not as an
    /// error; only failing to spawn is an error.
    fn run(&self, cmd: &CommandSpec) -> impl Future<Output = Result<CommandOutput, SyncError>> + Send;
}

/// Spawns real child processes. Children are killed if the awaiting task is
/// dropped, so aborting a batch leaves nothing running.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    async fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput, SyncError> {
        tracing::debug!("executing: {}", cmd.masked());
        let output = Command::new(&cmd.program)
            .args(&cmd.args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SyncError::Command {
                command: cmd.masked(),
                detail: e.to_string(),
            })?;

        let result = CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        };
        if !result.success() {
            tracing::debug!("exit {} from: {}", result.code, cmd.masked());
        }
        Ok(result)
    }
}
