//! `mirror sync`: run one sync batch and report it.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use mirror_core::defaults::StatePaths;
use mirror_core::{BatchOutcome, BatchStatus, TaskStatus};
use mirror_sync::credentials::CredentialSources;
use mirror_sync::pipeline::{self, PipelineConfig, PipelineReport, SnapshotUpdate};

use super::InputArgs;

/// Arguments for `mirror sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    #[command(flatten)]
    pub inputs: InputArgs,

    /// Directory holding one `<software>.json` manifest per software.
    #[arg(long)]
    pub manifest_dir: PathBuf,

    /// Number of parallel workers.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Seconds a single task may keep polling before it times out.
    #[arg(long)]
    pub task_timeout: Option<u64>,

    /// Seconds the whole batch may run.
    #[arg(long)]
    pub batch_timeout: Option<u64>,

    /// Give up on a task after this many attempts.
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Run even if metadata is unchanged and re-sync recorded successes.
    #[arg(long)]
    pub force: bool,

    /// Exit successfully when the batch is PARTIAL.
    #[arg(long)]
    pub allow_partial: bool,

    /// Vault-encrypted file with `docker_username`/`docker_password`.
    #[arg(long, requires = "docker_vault_key")]
    pub docker_credentials: Option<PathBuf>,

    /// Vault password file for `--docker-credentials`.
    #[arg(long)]
    pub docker_vault_key: Option<PathBuf>,

    /// File with `user_registry_credential` entries.
    #[arg(long, requires = "registry_vault_key")]
    pub registry_credentials: Option<PathBuf>,

    /// Vault password file for `--registry-credentials`.
    #[arg(long)]
    pub registry_vault_key: Option<PathBuf>,
}

impl SyncArgs {
    fn pipeline_config(self, state: StatePaths) -> PipelineConfig {
        let mut cfg = PipelineConfig::new(
            self.inputs.software_config,
            self.inputs.repo_config,
            self.manifest_dir,
            state,
        );
        if let Some(workers) = self.workers {
            cfg.pool.workers = workers;
        }
        if let Some(secs) = self.batch_timeout {
            cfg.pool.batch_timeout = Duration::from_secs(secs);
            cfg.pool.task_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.task_timeout {
            cfg.pool.task_timeout = Duration::from_secs(secs);
        }
        cfg.pool.max_attempts = self.max_attempts;
        cfg.credentials = CredentialSources {
            docker_file: self.docker_credentials,
            docker_key: self.docker_vault_key,
            registry_file: self.registry_credentials,
            registry_key: self.registry_vault_key,
        };
        cfg.force = self.force;
        cfg
    }

    pub fn run(self, state: StatePaths) -> Result<()> {
        let allow_partial = self.allow_partial;
        let results_log = state.results_table();
        let cfg = self.pipeline_config(state);

        tracing::info!(state = %cfg.state.root.display(), "using state directory");
        let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
        let report = runtime
            .block_on(pipeline::run(&cfg))
            .context("sync failed")?;

        let (outcome, already_done, snapshot) = match report {
            PipelineReport::Skipped => {
                println!("✓ metadata unchanged; nothing to sync (use --force to rerun)");
                return Ok(());
            }
            PipelineReport::Ran {
                outcome,
                already_done,
                snapshot,
            } => (outcome, already_done, snapshot),
        };

        let table = render_table(&outcome);
        println!("{table}");
        if already_done > 0 {
            println!("{already_done} artifacts already synced were skipped");
        }
        match snapshot {
            SnapshotUpdate::Created => {
                println!("metadata written to {}", cfg.state.metadata().display())
            }
            SnapshotUpdate::Reconciled { changed: true } => println!("metadata updated"),
            SnapshotUpdate::Reconciled { changed: false } | SnapshotUpdate::Kept => {}
        }
        colored::control::set_override(false);
        let plain = render_table(&outcome);
        colored::control::unset_override();
        append_results_log(&results_log, &plain)?;

        match outcome.overall_status {
            BatchStatus::Success => Ok(()),
            BatchStatus::Partial if allow_partial => Ok(()),
            status => bail!("batch finished {status}; see {}", results_log.display()),
        }
    }
}

#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "task")]
    task: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "log file")]
    log_file: String,
    #[tabled(rename = "duration")]
    duration: String,
}

fn render_table(outcome: &BatchOutcome) -> String {
    let rows: Vec<ResultRow> = outcome
        .results
        .iter()
        .map(|r| ResultRow {
            task: r.reference.to_string(),
            status: match r.status {
                TaskStatus::Success => r.status.to_string().green().to_string(),
                TaskStatus::Failed => r.status.to_string().red().to_string(),
                TaskStatus::Timeout => r.status.to_string().yellow().to_string(),
            },
            log_file: r.log_ref.display().to_string(),
            duration: format_duration(r.elapsed),
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    format!(
        "{table}\ntotal duration: {} | overall status: {}",
        format_duration(outcome.elapsed),
        status_label(outcome.overall_status)
    )
}

fn status_label(status: BatchStatus) -> String {
    let label = status.to_string();
    match status {
        BatchStatus::Success => label.green().bold().to_string(),
        BatchStatus::Partial => label.yellow().bold().to_string(),
        BatchStatus::Failed | BatchStatus::Timeout => label.red().bold().to_string(),
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

fn append_results_log(path: &Path, table: &str) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let stamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S");
    writeln!(file, "{stamp}\n{table}\n")
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_render_as_clock() {
        assert_eq!(format_duration(Duration::from_secs(0)), "00:00:00");
        assert_eq!(format_duration(Duration::from_secs(3725)), "01:02:05");
    }
}
