//! `mirror metadata`: policy snapshot generation and reconciliation.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde_json::json;

use mirror_core::defaults::{default_ignore_keys, StatePaths};
use mirror_sync::metadata::{self, ManageOutcome};

use super::InputArgs;

#[derive(Args, Debug)]
pub struct MetadataArgs {
    #[command(flatten)]
    pub inputs: InputArgs,

    /// Top-level keys left out of comparisons (repeatable).
    #[arg(long = "ignore-key")]
    pub ignore_keys: Vec<String>,
}

impl MetadataArgs {
    fn ignore_keys(&self) -> Vec<String> {
        if self.ignore_keys.is_empty() {
            default_ignore_keys()
        } else {
            self.ignore_keys.clone()
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum MetadataCommand {
    /// Write the snapshot for the current inputs, replacing any existing one.
    Generate(MetadataArgs),
    /// Compare the current inputs against the persisted snapshot.
    Compare(MetadataArgs),
    /// Merge changes from the current inputs into the persisted snapshot.
    Reconcile(MetadataArgs),
}

pub fn run(command: MetadataCommand, state: StatePaths) -> Result<()> {
    let payload = match command {
        MetadataCommand::Generate(args) => {
            let metadata_path = state.metadata();
            let (software, repos) = args.inputs.load()?;
            let snapshot =
                metadata::generate(&software, &repos).context("failed to generate metadata")?;
            metadata::save(&metadata_path, &snapshot)
                .with_context(|| format!("failed to write {}", metadata_path.display()))?;
            json!({
                "path": metadata_path.display().to_string(),
                "snapshot": serde_json::to_value(&snapshot)?,
            })
        }
        MetadataCommand::Compare(args) => manage(&args, &state, false)?,
        MetadataCommand::Reconcile(args) => manage(&args, &state, true)?,
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize metadata JSON")?
    );
    Ok(())
}

/// Generate on first use, otherwise compare or reconcile against the
/// persisted snapshot.
fn manage(args: &MetadataArgs, state: &StatePaths, update: bool) -> Result<serde_json::Value> {
    let (software, repos) = args.inputs.load()?;
    let outcome = metadata::manage(
        &software,
        &repos,
        &state.metadata(),
        &state.rerun_metadata(),
        update,
        &args.ignore_keys(),
    )
    .context("metadata update failed")?;

    Ok(match outcome {
        ManageOutcome::Generated(snapshot) => json!({
            "generated": true,
            "changed": true,
            "snapshot": serde_json::to_value(&snapshot)?,
        }),
        ManageOutcome::Compared(cmp) => json!({
            "generated": false,
            "changed": cmp.changed,
            "identical": cmp.identical,
        }),
        ManageOutcome::Reconciled(rec) => json!({
            "generated": false,
            "changed": rec.changed,
            "diff": serde_json::to_value(&rec.diff)?,
        }),
    })
}
