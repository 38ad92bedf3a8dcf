pub mod metadata;
pub mod status;
pub mod sync;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use mirror_core::config::{load_local_repo_config, load_software_config, LocalRepoConfig, SoftwareConfig};

/// The two input files every command that touches metadata needs.
#[derive(Args, Debug, Clone)]
pub struct InputArgs {
    /// Path to `software_config.json`.
    #[arg(long)]
    pub software_config: PathBuf,

    /// Path to `local_repo_config.yml`.
    #[arg(long)]
    pub repo_config: PathBuf,
}

impl InputArgs {
    pub fn load(&self) -> Result<(SoftwareConfig, LocalRepoConfig)> {
        let software = load_software_config(&self.software_config)
            .with_context(|| format!("failed to load {}", self.software_config.display()))?;
        let repos = load_local_repo_config(&self.repo_config)
            .with_context(|| format!("failed to load {}", self.repo_config.display()))?;
        Ok((software, repos))
    }
}
