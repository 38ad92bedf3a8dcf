//! Shared sync pipeline entrypoint used by the CLI.
//!
//! One invocation: load inputs, take the metadata fast-path if nothing
//! changed, build the catalog, resolve credentials, run the batch, write the
//! ledgers, and reconcile the snapshot when the batch fully succeeded.

use std::path::PathBuf;
use std::sync::Arc;

use mirror_core::config::{load_local_repo_config, load_software_config};
use mirror_core::defaults::{default_ignore_keys, StatePaths};
use mirror_core::template::TemplateVars;
use mirror_core::{BatchOutcome, BatchStatus};

use crate::catalog::load_tasks;
use crate::command::{CommandRunner, ProcessRunner};
use crate::credentials::{
    AnsibleVault, CredentialContext, CredentialResolver, CredentialSources, Vault,
};
use crate::dispatch::MirrorDispatch;
use crate::error::{io_err, SyncError};
use crate::executor::{self, PoolOptions};
use crate::handlers::MirrorContext;
use crate::{ledger, metadata};

/// Inputs and knobs for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub software_config: PathBuf,
    pub repo_config: PathBuf,
    pub manifest_dir: PathBuf,
    pub state: StatePaths,
    pub pool: PoolOptions,
    pub credentials: CredentialSources,
    pub ignore_keys: Vec<String>,
    /// Ignore the fast-path and the success ledger.
    pub force: bool,
}

impl PipelineConfig {
    pub fn new(
        software_config: impl Into<PathBuf>,
        repo_config: impl Into<PathBuf>,
        manifest_dir: impl Into<PathBuf>,
        state: StatePaths,
    ) -> Self {
        let pool = PoolOptions::new(state.log_dir());
        Self {
            software_config: software_config.into(),
            repo_config: repo_config.into(),
            manifest_dir: manifest_dir.into(),
            state,
            pool,
            credentials: CredentialSources::default(),
            ignore_keys: default_ignore_keys(),
            force: false,
        }
    }
}

/// What a batch did to the persisted snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotUpdate {
    /// First snapshot written.
    Created,
    Reconciled { changed: bool },
    /// Batch was not a full success; the old snapshot stays.
    Kept,
}

/// Result of a pipeline run.
#[derive(Debug)]
pub enum PipelineReport {
    /// Snapshot unchanged and not forced; nothing ran.
    Skipped,
    Ran {
        outcome: BatchOutcome,
        /// Tasks dropped because the ledger already records them as successful.
        already_done: usize,
        snapshot: SnapshotUpdate,
    },
}

impl PipelineReport {
    pub fn overall_status(&self) -> BatchStatus {
        match self {
            PipelineReport::Skipped => BatchStatus::Success,
            PipelineReport::Ran { outcome, .. } => outcome.overall_status,
        }
    }
}

/// Run the pipeline with the production runner and vault.
pub async fn run(cfg: &PipelineConfig) -> Result<PipelineReport, SyncError> {
    run_with(cfg, ProcessRunner, AnsibleVault::default()).await
}

/// Run the pipeline with the given command runner and vault.
pub async fn run_with<R, V>(
    cfg: &PipelineConfig,
    runner: R,
    vault: V,
) -> Result<PipelineReport, SyncError>
where
    R: CommandRunner,
    V: Vault + 'static,
{
    let software = load_software_config(&cfg.software_config)?;
    let repos = load_local_repo_config(&cfg.repo_config)?;

    let metadata_path = cfg.state.metadata();
    let rerun_path = cfg.state.rerun_metadata();
    let candidate = metadata::generate(&software, &repos)?;
    metadata::save(&rerun_path, &candidate)?;

    if metadata_path.exists() {
        let cmp = metadata::compare(&metadata_path, &rerun_path, &cfg.ignore_keys)?;
        if cmp.identical && !cfg.force {
            tracing::info!("metadata unchanged; skipping sync");
            remove_rerun(&rerun_path)?;
            return Ok(PipelineReport::Skipped);
        }
    }

    let vars = TemplateVars::new(&software.version_variables());
    let softwares = software.software_names();
    let mut tasks = load_tasks(&cfg.manifest_dir, &softwares, &vars)?;
    let mut already_done = 0;
    if !cfg.force {
        let done = ledger::succeeded(&cfg.state.status_csv())?;
        let before = tasks.len();
        tasks.retain(|t| !done.contains(&t.id.0));
        already_done = before - tasks.len();
        if already_done > 0 {
            tracing::info!("{already_done} tasks already synced; skipping them");
        }
    }

    let credentials = {
        let sources = cfg.credentials.clone();
        let registries = repos.user_registry.clone();
        tokio::task::spawn_blocking(move || {
            CredentialContext::resolve(&CredentialResolver::new(vault), &sources, &registries)
        })
        .await?
    };

    let mut ctx = MirrorContext::new(runner, cfg.state.store());
    ctx.credentials = credentials;
    ctx.default_policy = software.repo_config.clone();
    let dispatch = Arc::new(MirrorDispatch::new(ctx));

    let outcome = executor::run(tasks, dispatch, &cfg.pool).await?;

    ledger::record_results(&cfg.state.status_csv(), &outcome.results)?;
    ledger::upsert_software(&cfg.state.software_csv(), &softwares, outcome.overall_status)?;

    let snapshot = if outcome.overall_status == BatchStatus::Success {
        if metadata_path.exists() {
            let reconciled = metadata::reconcile(&metadata_path, &rerun_path, &cfg.ignore_keys)?;
            SnapshotUpdate::Reconciled {
                changed: reconciled.changed,
            }
        } else {
            metadata::save(&metadata_path, &candidate)?;
            remove_rerun(&rerun_path)?;
            SnapshotUpdate::Created
        }
    } else {
        tracing::warn!(
            "batch finished {}; metadata left unchanged so the next run retries",
            outcome.overall_status
        );
        remove_rerun(&rerun_path)?;
        SnapshotUpdate::Kept
    };

    Ok(PipelineReport::Ran {
        outcome,
        already_done,
        snapshot,
    })
}

fn remove_rerun(path: &std::path::Path) -> Result<(), SyncError> {
    if path.exists() {
        std::fs::remove_file(path).map_err(|e| io_err(path, e))?;
    }
    Ok(())
}
