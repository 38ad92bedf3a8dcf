//! Package repositories.
//!
//! The task's `package` names the repository, `url` is the upstream and
//! `policy` (or the configured default) selects the download mode.

use mirror_core::defaults::mirror_mode;
use mirror_core::Task;

use crate::command::{CommandRunner, CommandSpec};
use crate::handlers::{publish_distribution, required, MirrorContext, Step};
use crate::locks::LockName;
use crate::worker_log::WorkerLog;

pub(crate) async fn attempt<R: CommandRunner>(
    ctx: &MirrorContext<R>,
    task: &Task,
    log: &WorkerLog,
) -> Step<String> {
    let name = task.reference();
    let url = required(task, task.spec.url.as_deref(), "url")?;
    let policy = task.spec.policy.as_deref().unwrap_or(&ctx.default_policy);
    let mode = mirror_mode(policy);

    ctx.locks
        .create_if_absent(
            LockName::Repository,
            || ctx.exists(log, CommandSpec::pulp(["rpm", "repository", "show", "--name", name])),
            || async {
                ctx.exec(log, CommandSpec::pulp(["rpm", "repository", "create", "--name", name]))
                    .await
                    .map(|_| ())
            },
        )
        .await?;

    ctx.locks
        .with_lock(LockName::Remote, || async {
            let exists = ctx
                .exists(log, CommandSpec::pulp(["rpm", "remote", "show", "--name", name]))
                .await?;
            let action = if exists { "update" } else { "create" };
            let mut cmd = CommandSpec::pulp([
                "rpm", "remote", action, "--name", name, "--url", url, "--policy", mode,
            ]);
            if let (Some(ca), Some(cert), Some(key)) = (
                task.spec.extra_str("sslcacert"),
                task.spec.extra_str("sslclientcert"),
                task.spec.extra_str("sslclientkey"),
            ) {
                cmd = cmd.args(["--ca-cert", ca, "--client-cert", cert, "--client-key", key]);
            }
            ctx.exec(log, cmd).await.map(|_| ())
        })
        .await?;

    ctx.exec(
        log,
        CommandSpec::pulp(["rpm", "repository", "sync", "--name", name, "--remote", name]),
    )
    .await?;
    ctx.exec(
        log,
        CommandSpec::pulp(["rpm", "publication", "create", "--repository", name]),
    )
    .await?;
    let base_path = format!("rpm/{name}");
    publish_distribution(ctx, log, "rpm", name, &base_path, name).await?;

    Ok(format!("{name} synced ({mode})"))
}
