//! Artifacts fetched straight into the store: git trees, pip modules and
//! Ansible Galaxy collections. None of these touch the mirror service, so
//! no lock is taken.

use std::path::{Path, PathBuf};

use mirror_core::{ArtifactKind, Task};

use crate::command::{CommandRunner, CommandSpec};
use crate::error::io_err;
use crate::handlers::{required, MirrorContext, Step};
use crate::worker_log::WorkerLog;

pub(crate) async fn attempt<R: CommandRunner>(
    ctx: &MirrorContext<R>,
    task: &Task,
    log: &WorkerLog,
) -> Step<String> {
    let package = task.reference();
    let kind = task.kind();
    let dir = ctx
        .store
        .join(kind.as_str())
        .join(package.replace(['/', ':', '='], "_"));
    let dir_str = dir.display().to_string();

    let cmd = match kind {
        ArtifactKind::Git => return clone(ctx, task, log, &dir).await,
        ArtifactKind::PipModule => {
            create_dir(&dir).await?;
            CommandSpec::new("pip").args(["download", package, "-d", dir_str.as_str()])
        }
        _ => {
            create_dir(&dir).await?;
            let coordinate = match task.spec.version.as_deref() {
                Some(version) => format!("{package}:{version}"),
                None => package.to_string(),
            };
            CommandSpec::new("ansible-galaxy").args([
                "collection",
                "download",
                coordinate.as_str(),
                "-p",
                dir_str.as_str(),
            ])
        }
    };

    ctx.exec(log, cmd).await?;
    Ok(format!("{} fetched into {dir_str}", task.id))
}

/// Clone into `<dir>_<version>.tmp` and rename into place once git exits
/// cleanly, so the final directory only ever holds a complete checkout of
/// that version.
async fn clone<R: CommandRunner>(
    ctx: &MirrorContext<R>,
    task: &Task,
    log: &WorkerLog,
    dir: &Path,
) -> Step<String> {
    let version = task.spec.version.as_deref();
    let target = match version {
        Some(v) => versioned(dir, v),
        None => dir.to_path_buf(),
    };
    let target_str = target.display().to_string();
    if target.join(".git").is_dir() {
        log.info(&format!("{} already cloned at {target_str}", task.id));
        return Ok(format!("{} present at {target_str}", task.id));
    }

    let url = required(task, task.spec.url.as_deref(), "url")?;
    let staging = PathBuf::from(format!("{target_str}.tmp"));
    if staging.exists() {
        log.info(&format!("discarding interrupted clone at {}", staging.display()));
        tokio::fs::remove_dir_all(&staging)
            .await
            .map_err(|e| io_err(&staging, e))?;
    }
    create_dir(&staging).await?;

    let mut cmd = CommandSpec::new("git").arg("clone");
    if let Some(v) = version {
        cmd = cmd.args(["--branch", v]);
    }
    ctx.exec(log, cmd.args([url.to_string(), staging.display().to_string()]))
        .await?;
    tokio::fs::rename(&staging, &target)
        .await
        .map_err(|e| io_err(&target, e))?;
    Ok(format!("{} fetched into {target_str}", task.id))
}

fn versioned(dir: &Path, version: &str) -> PathBuf {
    let mut name = dir.as_os_str().to_owned();
    name.push(format!("_{}", version.replace(['/', ':'], "_")));
    PathBuf::from(name)
}

async fn create_dir(dir: &Path) -> Step<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| io_err(dir, e).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutput;
    use crate::handlers::testing::{task, FakeRunner};
    use tempfile::TempDir;

    #[tokio::test]
    async fn git_clones_requested_branch() {
        let dir = TempDir::new().expect("dir");
        let log = WorkerLog::open(dir.path(), 0).expect("log");
        let runner = FakeRunner::default();
        let ctx = MirrorContext::new(runner.clone(), dir.path().join("store"));
        let t = task(
            r#"{"type": "git", "package": "kubespray", "url": "https://github.com/kubernetes-sigs/kubespray.git", "version": "v2.26.0"}"#,
        );
        attempt(&ctx, &t, &log).await.expect("attempt");
        let expected = format!(
            "git clone --branch v2.26.0 https://github.com/kubernetes-sigs/kubespray.git {}",
            dir.path().join("store/git/kubespray_v2.26.0.tmp").display()
        );
        assert_eq!(runner.seen(), vec![expected]);
        assert!(dir.path().join("store/git/kubespray_v2.26.0").is_dir());
        assert!(!dir.path().join("store/git/kubespray_v2.26.0.tmp").exists());
    }

    #[tokio::test]
    async fn existing_clone_of_same_version_is_left_alone() {
        let dir = TempDir::new().expect("dir");
        std::fs::create_dir_all(dir.path().join("store/git/kubespray_v2.26.0/.git")).expect("mkdir");
        let log = WorkerLog::open(dir.path(), 0).expect("log");
        let runner = FakeRunner::default();
        let ctx = MirrorContext::new(runner.clone(), dir.path().join("store"));
        let t = task(r#"{"type": "git", "package": "kubespray", "url": "https://x", "version": "v2.26.0"}"#);
        attempt(&ctx, &t, &log).await.expect("attempt");
        assert!(runner.seen().is_empty());
    }

    #[tokio::test]
    async fn version_bump_clones_again() {
        let dir = TempDir::new().expect("dir");
        std::fs::create_dir_all(dir.path().join("store/git/kubespray_v2.25.0/.git")).expect("mkdir");
        let log = WorkerLog::open(dir.path(), 0).expect("log");
        let runner = FakeRunner::default();
        let ctx = MirrorContext::new(runner.clone(), dir.path().join("store"));
        let t = task(r#"{"type": "git", "package": "kubespray", "url": "https://x", "version": "v2.26.0"}"#);
        let out = attempt(&ctx, &t, &log).await.expect("attempt");
        assert!(out.contains("fetched into"), "{out}");
        assert_eq!(runner.count("git clone --branch v2.26.0"), 1);
    }

    #[tokio::test]
    async fn interrupted_clone_is_discarded_and_retried() {
        let dir = TempDir::new().expect("dir");
        let staging = dir.path().join("store/git/kubespray_v2.26.0.tmp");
        std::fs::create_dir_all(staging.join(".git")).expect("mkdir");
        std::fs::write(staging.join(".git/HEAD"), "partial").expect("write");
        let log = WorkerLog::open(dir.path(), 0).expect("log");
        let runner = FakeRunner::default();
        let ctx = MirrorContext::new(runner.clone(), dir.path().join("store"));
        let t = task(r#"{"type": "git", "package": "kubespray", "url": "https://x", "version": "v2.26.0"}"#);
        attempt(&ctx, &t, &log).await.expect("attempt");
        assert_eq!(runner.count("git clone"), 1);
        let done = dir.path().join("store/git/kubespray_v2.26.0");
        assert!(done.is_dir());
        assert!(!done.join(".git/HEAD").exists());
    }

    #[tokio::test]
    async fn failed_clone_leaves_no_checkout() {
        let dir = TempDir::new().expect("dir");
        let log = WorkerLog::open(dir.path(), 0).expect("log");
        let runner = FakeRunner::default()
            .on("git clone", CommandOutput::failed(128, "Remote branch v9 not found"));
        let ctx = MirrorContext::new(runner.clone(), dir.path().join("store"));
        let t = task(r#"{"type": "git", "package": "kubespray", "url": "https://x", "version": "v9"}"#);
        assert!(attempt(&ctx, &t, &log).await.is_err());
        assert!(!dir.path().join("store/git/kubespray_v9").exists());
    }

    #[tokio::test]
    async fn galaxy_collection_pins_version() {
        let dir = TempDir::new().expect("dir");
        let log = WorkerLog::open(dir.path(), 0).expect("log");
        let runner = FakeRunner::default();
        let ctx = MirrorContext::new(runner.clone(), dir.path().join("store"));
        let t = task(
            r#"{"type": "ansible_galaxy_collection", "package": "community.general", "version": "8.6.0"}"#,
        );
        attempt(&ctx, &t, &log).await.expect("attempt");
        assert!(runner.seen()[0].starts_with("ansible-galaxy collection download community.general:8.6.0 -p "));
    }

    #[tokio::test]
    async fn pip_module_downloads_into_store() {
        let dir = TempDir::new().expect("dir");
        let log = WorkerLog::open(dir.path(), 0).expect("log");
        let runner = FakeRunner::default();
        let ctx = MirrorContext::new(runner.clone(), dir.path().join("store"));
        let t = task(r#"{"type": "pip_module", "package": "PyMySQL==1.1.1"}"#);
        attempt(&ctx, &t, &log).await.expect("attempt");
        assert!(dir.path().join("store/pip_module/PyMySQL__1.1.1").is_dir());
        assert!(runner.seen()[0].starts_with("pip download PyMySQL==1.1.1 -d "));
    }
}
