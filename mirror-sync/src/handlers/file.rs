//! Single-file artifacts: tarball, manifest, iso and shell.
//!
//! The file is downloaded into the store, uploaded into a file repository of
//! the same name and published.

use mirror_core::Task;

use crate::command::{CommandRunner, CommandSpec};
use crate::error::io_err;
use crate::handlers::{file_name_from_url, publish_distribution, required, MirrorContext, Step};
use crate::locks::LockName;
use crate::worker_log::WorkerLog;

/// Repository name for a file artifact.
pub fn repository_name(package: &str) -> String {
    package.replace(['/', ':'], "_")
}

pub(crate) async fn attempt<R: CommandRunner>(
    ctx: &MirrorContext<R>,
    task: &Task,
    log: &WorkerLog,
) -> Step<String> {
    let url = required(task, task.spec.url.as_deref(), "url")?;
    let repo = repository_name(task.reference());
    let repo = repo.as_str();
    let kind = task.kind().as_str();
    let file_name = file_name_from_url(url).unwrap_or(repo);

    let dir = ctx.store.join(kind).join(repo);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| io_err(&dir, e))?;
    let target = dir.join(file_name);
    let target_str = target.display().to_string();

    ctx.locks
        .create_if_absent(
            LockName::Repository,
            || ctx.exists(log, CommandSpec::pulp(["file", "repository", "show", "--name", repo])),
            || async {
                ctx.exec(log, CommandSpec::pulp(["file", "repository", "create", "--name", repo]))
                    .await
                    .map(|_| ())
            },
        )
        .await?;

    ctx.exec(
        log,
        CommandSpec::new("wget").args(["-c", "-O", target_str.as_str(), url]),
    )
    .await?;
    ctx.exec(
        log,
        CommandSpec::pulp([
            "file",
            "content",
            "upload",
            "--repository",
            repo,
            "--file",
            target_str.as_str(),
            "--relative-path",
            file_name,
        ]),
    )
    .await?;
    ctx.exec(
        log,
        CommandSpec::pulp(["file", "publication", "create", "--repository", repo]),
    )
    .await?;
    let base_path = format!("{kind}/{repo}");
    publish_distribution(ctx, log, "file", repo, &base_path, repo).await?;

    Ok(format!("{} stored at {target_str}", task.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutput;
    use crate::handlers::testing::{task, FakeRunner};
    use tempfile::TempDir;

    #[tokio::test]
    async fn tarball_is_downloaded_uploaded_and_published() {
        let dir = TempDir::new().expect("dir");
        let log = WorkerLog::open(&dir.path().join("logs"), 0).expect("log");
        let runner = FakeRunner::default()
            .on("pulp file repository show", CommandOutput::failed(1, "not found"));
        let ctx = MirrorContext::new(runner.clone(), dir.path().join("store"));
        let t = task(
            r#"{"type": "tarball", "package": "helm-v3.16", "url": "https://get.helm.sh/helm-v3.16-linux-amd64.tar.gz"}"#,
        );

        attempt(&ctx, &t, &log).await.expect("attempt");

        let target = dir
            .path()
            .join("store/tarball/helm-v3.16/helm-v3.16-linux-amd64.tar.gz");
        let seen = runner.seen();
        assert_eq!(seen[0], "pulp file repository show --name helm-v3.16");
        assert_eq!(seen[1], "pulp file repository create --name helm-v3.16");
        assert_eq!(
            seen[2],
            format!(
                "wget -c -O {} https://get.helm.sh/helm-v3.16-linux-amd64.tar.gz",
                target.display()
            )
        );
        assert!(seen[3].ends_with("--relative-path helm-v3.16-linux-amd64.tar.gz"));
        assert!(seen.contains(
            &"pulp file distribution update --name helm-v3.16 --base-path tarball/helm-v3.16 --repository helm-v3.16"
                .to_string()
        ));
        assert!(target.parent().expect("parent").is_dir());
    }
}
