//! `mirror status`: ledger visibility.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use mirror_core::defaults::StatePaths;
use mirror_sync::ledger::{self, LedgerRow};

/// Arguments for `mirror status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Only show artifacts whose status is not `Success`.
    #[arg(long)]
    pub pending: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self, state: StatePaths) -> Result<()> {
        let status_path = state.status_csv();
        let software_path = state.software_csv();
        let mut artifacts = ledger::load_status(&status_path)
            .with_context(|| format!("failed to read {}", status_path.display()))?;
        let softwares = ledger::load_software(&software_path)
            .with_context(|| format!("failed to read {}", software_path.display()))?;
        if self.pending {
            artifacts.retain(|row| !row.status.eq_ignore_ascii_case("success"));
        }

        if self.json {
            return print_json(artifacts, softwares);
        }
        print_table(&artifacts, &softwares);
        Ok(())
    }
}

#[derive(Serialize)]
struct StatusJson {
    summary: SummaryJson,
    artifacts: Vec<ArtifactJson>,
    softwares: Vec<SoftwareJson>,
}

#[derive(Serialize)]
struct SummaryJson {
    artifacts: usize,
    succeeded: usize,
    softwares: usize,
}

#[derive(Serialize)]
struct ArtifactJson {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    status: String,
}

#[derive(Serialize)]
struct SoftwareJson {
    name: String,
    status: String,
}

#[derive(Tabled)]
struct ArtifactTableRow {
    #[tabled(rename = "artifact")]
    name: String,
    #[tabled(rename = "type")]
    kind: String,
    #[tabled(rename = "status")]
    status: String,
}

#[derive(Tabled)]
struct SoftwareTableRow {
    #[tabled(rename = "software")]
    name: String,
    #[tabled(rename = "status")]
    status: String,
}

fn succeeded(rows: &[LedgerRow]) -> usize {
    rows.iter()
        .filter(|r| r.status.eq_ignore_ascii_case("success"))
        .count()
}

fn print_json(artifacts: Vec<LedgerRow>, softwares: Vec<(String, String)>) -> Result<()> {
    let payload = StatusJson {
        summary: SummaryJson {
            artifacts: artifacts.len(),
            succeeded: succeeded(&artifacts),
            softwares: softwares.len(),
        },
        artifacts: artifacts
            .into_iter()
            .map(|row| ArtifactJson {
                name: row.name,
                kind: row.kind,
                status: row.status,
            })
            .collect(),
        softwares: softwares
            .into_iter()
            .map(|(name, status)| SoftwareJson { name, status })
            .collect(),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
    );
    Ok(())
}

fn print_table(artifacts: &[LedgerRow], softwares: &[(String, String)]) {
    println!(
        "Mirror v{} | {} artifacts | {} succeeded | {} softwares",
        env!("CARGO_PKG_VERSION"),
        artifacts.len(),
        succeeded(artifacts),
        softwares.len(),
    );

    if artifacts.is_empty() && softwares.is_empty() {
        println!("No artifacts recorded. Run `mirror sync` first.");
        return;
    }

    if !softwares.is_empty() {
        let rows: Vec<SoftwareTableRow> = softwares
            .iter()
            .map(|(name, status)| SoftwareTableRow {
                name: name.clone(),
                status: colorize(status),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }

    if !artifacts.is_empty() {
        let rows: Vec<ArtifactTableRow> = artifacts
            .iter()
            .map(|row| ArtifactTableRow {
                name: row.name.clone(),
                kind: row.kind.clone(),
                status: colorize(&row.status),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }
}

fn colorize(status: &str) -> String {
    match status.to_ascii_lowercase().as_str() {
        "success" => status.green().to_string(),
        "timeout" => status.yellow().to_string(),
        _ => status.red().to_string(),
    }
}
