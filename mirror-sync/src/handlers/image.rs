//! Container images.
//!
//! Sequence per image:
//! 1. `repository_creation_lock`: show repository, else create it.
//! 2. `remote_creation_lock`: show remote, else create it; if it exists,
//!    update it with the merged tag list.
//! 3. Unlocked: sync, then distribution show and create or update.
//!
//! Images served by a configured user registry are pulled from there with
//! its TLS material instead of from the public upstream.

use mirror_core::defaults::CONTAINER_POLICY;
use mirror_core::{RegistryCredential, Task};

use crate::command::{CommandRunner, CommandSpec};
use crate::error::SyncError;
use crate::handlers::{publish_distribution, MirrorContext, Step};
use crate::locks::LockName;
use crate::worker_log::WorkerLog;

/// Upstream base URL for a known registry prefix.
pub fn upstream_url(host: &str) -> Option<&'static str> {
    match host {
        "docker.io" => Some("https://registry-1.docker.io"),
        "ghcr.io" => Some("https://ghcr.io"),
        "quay.io" => Some("https://quay.io"),
        "registry.k8s.io" => Some("https://registry.k8s.io"),
        "nvcr.io" => Some("https://nvcr.io"),
        "public.ecr.aws" => Some("https://public.ecr.aws"),
        "gcr.io" => Some("https://gcr.io"),
        _ => None,
    }
}

/// `container_repo_<package with / and : replaced>`
pub fn repository_name(package: &str) -> String {
    format!("container_repo_{}", package.replace(['/', ':'], "_"))
}

/// `remote_<package>` or `user_remote_<package>`, `/` replaced.
pub fn remote_name(package: &str, user: bool) -> String {
    let prefix = if user { "user_remote_" } else { "remote_" };
    format!("{prefix}{}", package.replace('/', "_"))
}

/// What the remote should point at.
enum Source<'a> {
    Upstream { url: &'static str, docker_hub: bool },
    User(&'a RegistryCredential),
}

enum Selector<'a> {
    Tag(&'a str),
    Digest(&'a str),
}

impl Selector<'_> {
    fn manifest_ref(&self) -> &str {
        match self {
            Selector::Tag(t) => t,
            Selector::Digest(d) => d,
        }
    }
}

pub(crate) async fn attempt<R: CommandRunner>(
    ctx: &MirrorContext<R>,
    task: &Task,
    log: &WorkerLog,
) -> Step<String> {
    let package = task.reference();
    let selector = match (task.spec.tag.as_deref(), task.spec.digest.as_deref()) {
        (Some(tag), _) => Selector::Tag(tag),
        (None, Some(digest)) => Selector::Digest(digest),
        (None, None) => {
            return Err(SyncError::MissingField {
                task: task.id.to_string(),
                field: "tag",
            }
            .into())
        }
    };
    let (host, upstream_name) = package
        .split_once('/')
        .ok_or_else(|| SyncError::UnknownRegistry(package.to_string()))?;

    let user_registry = find_user_registry(ctx, log, upstream_name, &selector).await?;
    let source = match user_registry {
        Some(reg) => {
            log.info(&format!("{} served by user registry {}", task.id, reg.host));
            Source::User(reg)
        }
        None => Source::Upstream {
            url: upstream_url(host).ok_or_else(|| SyncError::UnknownRegistry(package.to_string()))?,
            docker_hub: host == "docker.io",
        },
    };

    let repo = repository_name(package);
    let repo = repo.as_str();
    let remote = remote_name(package, matches!(source, Source::User(_)));
    let remote = remote.as_str();

    ctx.locks
        .create_if_absent(
            LockName::Repository,
            || ctx.exists(log, CommandSpec::pulp(["container", "repository", "show", "--name", repo])),
            || async {
                ctx.exec(log, CommandSpec::pulp(["container", "repository", "create", "--name", repo]))
                    .await
                    .map(|_| ())
            },
        )
        .await?;

    ctx.locks
        .with_lock(LockName::Remote, || {
            ensure_remote(ctx, log, remote, &source, upstream_name, &selector)
        })
        .await?;

    ctx.exec(
        log,
        CommandSpec::pulp([
            "container", "repository", "sync", "--name", repo, "--remote", remote,
        ]),
    )
    .await?;
    publish_distribution(ctx, log, "container", repo, package, repo).await?;

    Ok(format!("{} mirrored into {repo}", task.id))
}

/// First user registry that has the manifest, if any. An unreadable
/// registry credential file fails the task rather than falling back to
/// upstream.
async fn find_user_registry<'a, R: CommandRunner>(
    ctx: &'a MirrorContext<R>,
    log: &WorkerLog,
    image: &str,
    selector: &Selector<'_>,
) -> Step<Option<&'a RegistryCredential>> {
    let registries = ctx.credentials.registries.get().inspect_err(|e| {
        log.error(&format!("user registries unusable: {e}"));
    })?;
    for reg in registries {
        let mut probe = CommandSpec::new("curl").args(["-s", "-o", "/dev/null", "-w", "%{http_code}"]);
        if let Some(ca) = &reg.cert_path {
            probe = probe.arg("--cacert").arg(ca.display().to_string());
        }
        if let (Some(user), Some(pass)) = (&reg.username, &reg.password) {
            probe = probe.arg("--user").arg(format!("{user}:{}", pass.expose()));
        }
        let probe = probe.arg(format!(
            "https://{}/v2/{image}/manifests/{}",
            reg.host,
            selector.manifest_ref()
        ));
        // An unreachable registry means the image comes from upstream.
        if let Ok(code) = ctx.exec(log, probe).await {
            if code.trim() == "200" {
                return Ok(Some(reg));
            }
        }
    }
    Ok(None)
}

async fn ensure_remote<R: CommandRunner>(
    ctx: &MirrorContext<R>,
    log: &WorkerLog,
    remote: &str,
    source: &Source<'_>,
    upstream_name: &str,
    selector: &Selector<'_>,
) -> Step<()> {
    let exists = ctx
        .exists(log, CommandSpec::pulp(["container", "remote", "show", "--name", remote]))
        .await?;

    let include_tags = match selector {
        Selector::Tag(tag) if exists => {
            let mut tags = current_tags(ctx, log, remote).await?;
            if !tags.iter().any(|t| t.as_str() == *tag) {
                tags.push(tag.to_string());
            }
            Some(tags)
        }
        Selector::Tag(tag) => Some(vec![tag.to_string()]),
        Selector::Digest(_) => None,
    };

    let url = match source {
        Source::Upstream { url, .. } => url.to_string(),
        Source::User(reg) => format!("https://{}", reg.host),
    };
    let action = if exists { "update" } else { "create" };
    let mut cmd = CommandSpec::pulp([
        "container",
        "remote",
        action,
        "--name",
        remote,
        "--url",
        url.as_str(),
        "--upstream-name",
        upstream_name,
        "--policy",
        CONTAINER_POLICY,
    ]);
    if let Some(tags) = include_tags {
        let encoded = serde_json::to_string(&tags).map_err(|e| SyncError::Command {
            command: "encode include_tags".into(),
            detail: e.to_string(),
        })?;
        cmd = cmd.arg("--include-tags").arg(encoded);
    }
    match source {
        Source::Upstream { docker_hub: true, .. } => {
            if let Some(login) = ctx.credentials.docker.get()? {
                cmd = cmd
                    .arg("--username")
                    .arg(login.username.as_str())
                    .arg("--password")
                    .arg(login.password.expose());
            }
        }
        Source::Upstream { .. } => {}
        Source::User(reg) => {
            if let Some(ca) = &reg.cert_path {
                cmd = cmd.arg("--ca-cert").arg(format!("@{}", ca.display()));
            }
            if let Some(key) = &reg.key_path {
                cmd = cmd.arg("--client-key").arg(format!("@{}", key.display()));
            }
            cmd = cmd.args(["--tls-validation", "false"]);
        }
    }
    ctx.exec(log, cmd).await?;
    Ok(())
}

/// `include_tags` of an existing remote; unparseable output reads as none.
async fn current_tags<R: CommandRunner>(
    ctx: &MirrorContext<R>,
    log: &WorkerLog,
    remote: &str,
) -> Step<Vec<String>> {
    let out = ctx
        .exec(
            log,
            CommandSpec::pulp([
                "container", "remote", "list", "--name", remote, "--field", "include_tags",
            ]),
        )
        .await?;
    #[derive(serde::Deserialize)]
    struct Row {
        #[serde(default)]
        include_tags: Option<Vec<String>>,
    }
    let rows: Vec<Row> = serde_json::from_str(&out).unwrap_or_default();
    Ok(rows
        .into_iter()
        .flat_map(|r| r.include_tags.unwrap_or_default())
        .collect())
}
