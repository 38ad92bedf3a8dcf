//! Input loading: software config (JSON) and local repository config (YAML).
//!
//! Schema validation is the caller's concern; these loaders only enforce what
//! the engine cannot work without.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::Deserialize;

use crate::error::{io_err, ConfigError};

/// Supported cluster OS families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    Rhel,
    Rocky,
    Ubuntu,
}

impl OsFamily {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw.to_ascii_lowercase().as_str() {
            "rhel" => Ok(OsFamily::Rhel),
            "rocky" => Ok(OsFamily::Rocky),
            "ubuntu" => Ok(OsFamily::Ubuntu),
            other => Err(ConfigError::UnsupportedOs(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OsFamily::Rhel => "rhel",
            OsFamily::Rocky => "rocky",
            OsFamily::Ubuntu => "ubuntu",
        }
    }

    /// Source lists that feed the policy snapshot, in processing order.
    pub fn source_lists(&self) -> [String; 3] {
        let os = self.as_str();
        [
            "user_repo_url".to_string(),
            format!("omnia_repo_url_{os}"),
            format!("{os}_os_url"),
        ]
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Software config
// ---------------------------------------------------------------------------

fn default_policy() -> String {
    "always".to_string()
}

/// A software the cluster wants mirrored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SoftwareEntry {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub arch: Vec<String>,
}

/// `software_config.json`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SoftwareConfig {
    pub cluster_os_type: String,
    pub cluster_os_version: String,
    /// Default policy for every source list item without an override.
    #[serde(default = "default_policy")]
    pub repo_config: String,
    #[serde(default)]
    pub softwares: Vec<SoftwareEntry>,
}

impl SoftwareConfig {
    pub fn os_family(&self) -> Result<OsFamily, ConfigError> {
        OsFamily::parse(&self.cluster_os_type)
    }

    /// `<name>_version -> version` for every software that pins one.
    pub fn version_variables(&self) -> BTreeMap<String, String> {
        self.softwares
            .iter()
            .filter_map(|sw| {
                sw.version
                    .as_ref()
                    .map(|v| (format!("{}_version", sw.name.replace('-', "_")), v.clone()))
            })
            .collect()
    }

    pub fn software_names(&self) -> Vec<String> {
        self.softwares.iter().map(|s| s.name.clone()).collect()
    }
}

// ---------------------------------------------------------------------------
// Local repository config
// ---------------------------------------------------------------------------

/// One entry of a source list such as `rhel_os_url`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RepoSource {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub policy: Option<String>,
    #[serde(default)]
    pub sslcacert: Option<String>,
    #[serde(default)]
    pub sslclientcert: Option<String>,
    #[serde(default)]
    pub sslclientkey: Option<String>,
}

/// A user-operated container registry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserRegistry {
    pub name: String,
    pub host: String,
    #[serde(default)]
    pub cert_path: Option<String>,
    #[serde(default)]
    pub key_path: Option<String>,
    #[serde(default)]
    pub requires_auth: bool,
}

/// `local_repo_config.yml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LocalRepoConfig {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub user_registry: Vec<UserRegistry>,
    /// Every other top-level key; source lists are picked out by name.
    #[serde(flatten)]
    pub lists: BTreeMap<String, serde_yaml::Value>,
}

fn null_as_empty<'de, D>(de: D) -> Result<Vec<UserRegistry>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<UserRegistry>>::deserialize(de)?.unwrap_or_default())
}

impl LocalRepoConfig {
    /// Entries of the named source list; missing or null lists are empty.
    pub fn source_list(&self, key: &str) -> Result<Vec<RepoSource>, ConfigError> {
        match self.lists.get(key) {
            None | Some(serde_yaml::Value::Null) => Ok(Vec::new()),
            Some(value) => {
                serde_yaml::from_value(value.clone()).map_err(|source| ConfigError::InvalidSource {
                    list: key.to_string(),
                    source,
                })
            }
        }
    }

    /// Every source list relevant to `os`, as `(list name, entries)`.
    pub fn sources_for(&self, os: OsFamily) -> Result<Vec<(String, Vec<RepoSource>)>, ConfigError> {
        os.source_lists()
            .into_iter()
            .map(|key| {
                let entries = self.source_list(&key)?;
                Ok((key, entries))
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Loaders
// ---------------------------------------------------------------------------

pub fn load_software_config(path: &Path) -> Result<SoftwareConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    serde_json::from_str(&contents).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Load `local_repo_config.yml`. An empty file yields an empty config.
pub fn load_local_repo_config(path: &Path) -> Result<LocalRepoConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    if contents.trim().is_empty() {
        return Ok(LocalRepoConfig::default());
    }
    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
