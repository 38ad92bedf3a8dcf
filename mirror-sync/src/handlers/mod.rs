//! Artifact handlers and the context they share.

pub mod fetch;
pub mod file;
pub mod image;
pub mod rpm;

use std::path::PathBuf;

use mirror_core::Task;

use crate::command::{mask_sensitive, CommandRunner, CommandSpec};
use crate::credentials::CredentialContext;
use crate::error::SyncError;
use crate::locks::MirrorLocks;
use crate::worker_log::WorkerLog;

/// Why an attempt stopped early.
#[derive(Debug)]
pub enum Halt {
    /// Transient condition; the poll loop should try again.
    Retry,
    Fail(SyncError),
}

impl From<SyncError> for Halt {
    fn from(e: SyncError) -> Self {
        Halt::Fail(e)
    }
}

pub type Step<T> = Result<T, Halt>;

/// Everything a handler needs, shared by all workers of a batch.
pub struct MirrorContext<R> {
    pub runner: R,
    pub locks: MirrorLocks,
    pub credentials: CredentialContext,
    /// Root for downloaded artifacts.
    pub store: PathBuf,
    /// Policy for items without their own.
    pub default_policy: String,
}

impl<R: CommandRunner> MirrorContext<R> {
    pub fn new(runner: R, store: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            locks: MirrorLocks::new(),
            credentials: CredentialContext::default(),
            store: store.into(),
            default_policy: "always".to_string(),
        }
    }

    /// Run `cmd`, returning stdout. Transient failures ask for a retry.
    pub(crate) async fn exec(&self, log: &WorkerLog, cmd: CommandSpec) -> Step<String> {
        log.info(&format!("executing: {}", cmd.masked()));
        let out = self.runner.run(&cmd).await?;
        if out.success() {
            return Ok(out.stdout);
        }
        if out.is_transient() {
            log.info(&format!("transient failure ({}), will retry", out.code));
            return Err(Halt::Retry);
        }
        let detail = mask_sensitive(&out.stderr);
        log.error(&format!("exit {}: {detail}", out.code));
        Err(Halt::Fail(SyncError::Command {
            command: cmd.masked(),
            detail,
        }))
    }

    /// Run a `show`-style command: success means the resource exists.
    pub(crate) async fn exists(&self, log: &WorkerLog, cmd: CommandSpec) -> Step<bool> {
        log.info(&format!("checking: {}", cmd.masked()));
        let out = self.runner.run(&cmd).await?;
        if !out.success() && out.is_transient() {
            return Err(Halt::Retry);
        }
        Ok(out.success())
    }
}

pub(crate) fn required<'a>(
    task: &Task,
    value: Option<&'a str>,
    field: &'static str,
) -> Result<&'a str, SyncError> {
    value.ok_or_else(|| SyncError::MissingField {
        task: task.id.to_string(),
        field,
    })
}

/// Last path segment of a URL, used as the stored file name.
pub(crate) fn file_name_from_url(url: &str) -> Option<&str> {
    url.split(['?', '#'])
        .next()
        .and_then(|u| u.rsplit('/').next())
        .filter(|s| !s.is_empty())
}

/// Distribution `show` then `create` or `update`; not lock-protected.
pub(crate) async fn publish_distribution<R: CommandRunner>(
    ctx: &MirrorContext<R>,
    log: &WorkerLog,
    plugin: &str,
    name: &str,
    base_path: &str,
    repository: &str,
) -> Step<()> {
    let exists = ctx
        .exists(log, CommandSpec::pulp([plugin, "distribution", "show", "--name", name]))
        .await?;
    let action = if exists { "update" } else { "create" };
    ctx.exec(
        log,
        CommandSpec::pulp([
            plugin,
            "distribution",
            action,
            "--name",
            name,
            "--base-path",
            base_path,
            "--repository",
            repository,
        ]),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted command runner shared by handler tests.

    use std::sync::{Arc, Mutex};

    use mirror_core::{ArtifactId, ArtifactSpec, Task};

    use crate::command::{CommandOutput, CommandRunner, CommandSpec};
    use crate::error::SyncError;

    type Rule = Box<dyn Fn(&str) -> Option<CommandOutput> + Send + Sync>;

    /// Answers commands from prefix rules; unmatched commands succeed with
    /// empty output. Records every command line it sees.
    #[derive(Clone, Default)]
    pub struct FakeRunner {
        rules: Arc<Mutex<Vec<Rule>>>,
        pub seen: Arc<Mutex<Vec<String>>>,
    }

    impl FakeRunner {
        pub fn on(self, prefix: &str, out: CommandOutput) -> Self {
            let prefix = prefix.to_string();
            self.rules.lock().expect("rules").push(Box::new(move |line| {
                line.starts_with(&prefix).then(|| out.clone())
            }));
            self
        }

        pub fn seen(&self) -> Vec<String> {
            self.seen.lock().expect("seen").clone()
        }

        pub fn count(&self, prefix: &str) -> usize {
            self.seen().iter().filter(|l| l.starts_with(prefix)).count()
        }
    }

    impl CommandRunner for FakeRunner {
        async fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput, SyncError> {
            let line = cmd.to_string();
            self.seen.lock().expect("seen").push(line.clone());
            let rules = self.rules.lock().expect("rules");
            Ok(rules
                .iter()
                .find_map(|rule| rule(&line))
                .unwrap_or_else(|| CommandOutput::ok("")))
        }
    }

    pub fn task(json: &str) -> Task {
        let spec: ArtifactSpec = serde_json::from_str(json).expect("spec");
        let id = match (&spec.tag, &spec.digest) {
            (Some(tag), _) => format!("{}:{tag}", spec.package),
            (None, Some(digest)) => format!("{}@{digest}", spec.package),
            _ => spec.package.clone(),
        };
        Task {
            id: ArtifactId::from(id),
            software: "test".into(),
            spec,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_strips_query() {
        assert_eq!(
            file_name_from_url("https://get.helm.sh/helm-v3.tar.gz?x=1"),
            Some("helm-v3.tar.gz")
        );
        assert_eq!(file_name_from_url("https://example.com/"), None);
    }
}
