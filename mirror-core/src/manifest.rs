//! Software manifests: `<manifest_dir>/<software>.json`, shaped
//! `{<group>: {"cluster": [ArtifactSpec, ...]}}`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{io_err, ConfigError};
use crate::types::ArtifactSpec;

#[derive(Debug, Deserialize)]
struct ManifestGroup {
    #[serde(default)]
    cluster: Vec<ArtifactSpec>,
}

pub fn manifest_path(dir: &Path, software: &str) -> PathBuf {
    dir.join(format!("{software}.json"))
}

/// Every artifact listed for `software`, groups in name order.
pub fn load_manifest(dir: &Path, software: &str) -> Result<Vec<ArtifactSpec>, ConfigError> {
    let path = manifest_path(dir, software);
    if !path.exists() {
        return Err(ConfigError::NotFound { path });
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    let groups: BTreeMap<String, ManifestGroup> =
        serde_json::from_str(&contents).map_err(|source| ConfigError::Json {
            path: path.clone(),
            source,
        })?;
    Ok(groups.into_values().flat_map(|g| g.cluster).collect())
}
