//! Mirror: parallel artifact mirror sync CLI.
//!
//! # Usage
//!
//! ```text
//! mirror sync --software-config <json> --repo-config <yml> --manifest-dir <dir> [--force] [--allow-partial]
//! mirror metadata generate|compare|reconcile --software-config <json> --repo-config <yml>
//! mirror status [--json]
//! ```
//!
//! Every subcommand accepts `--state-dir` (default `~/.mirror`).

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use commands::{metadata::MetadataCommand, status::StatusArgs, sync::SyncArgs};
use mirror_core::defaults::StatePaths;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "mirror",
    version,
    about = "Mirror container images, packages and files into a local repository",
    long_about = None,
)]
struct Cli {
    /// State directory holding metadata, ledgers, logs and the store.
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one sync batch over every software in the config.
    Sync(SyncArgs),

    /// Generate, compare or reconcile the repository policy snapshot.
    Metadata {
        #[command(subcommand)]
        command: MetadataCommand,
    },

    /// Show the artifact and software ledgers.
    Status(StatusArgs),
}

fn state_paths(state_dir: Option<PathBuf>) -> Result<StatePaths> {
    match state_dir {
        Some(dir) => Ok(StatePaths::new(dir)),
        None => StatePaths::from_home_dir().context("could not determine home directory"),
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let state = state_paths(cli.state_dir)?;
    match cli.command {
        Commands::Sync(args) => args.run(state),
        Commands::Metadata { command } => commands::metadata::run(command, state),
        Commands::Status(args) => args.run(state),
    }
}
