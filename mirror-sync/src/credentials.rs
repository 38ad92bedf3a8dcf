//! Credential resolution against vault-encrypted YAML files.
//!
//! Encrypted files are read through the vault's `view` operation, so the
//! plaintext only ever lives in memory. A plaintext file can be sealed after
//! it is read, leaving it encrypted at rest.
//!
//! Resolution happens once per batch; the result (or the failure) is held in
//! a [`CredentialContext`] that handlers consult. A failure only affects the
//! tasks that need the missing credentials.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;
use thiserror::Error;

use mirror_core::config::UserRegistry;
use mirror_core::{RegistryCredential, Secret};

/// First-line marker of a vault-encrypted file.
pub const VAULT_MARKER: &str = "$ANSIBLE_VAULT";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("vault key not found at {path}")]
    KeyMissing { path: PathBuf },

    /// The vault tool failed. `detail` never contains file contents.
    #[error("vault operation on {file} failed: {detail}")]
    Vault { file: PathBuf, detail: String },

    #[error("failed to parse credentials in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CredentialError {
    CredentialError::Io {
        path: path.into(),
        source,
    }
}

/// Whether `path` starts with the vault marker.
pub fn is_encrypted(path: &Path) -> Result<bool, CredentialError> {
    let file = std::fs::File::open(path).map_err(|e| io_err(path, e))?;
    let mut first = String::new();
    BufReader::new(file)
        .read_line(&mut first)
        .map_err(|e| io_err(path, e))?;
    Ok(first.contains(VAULT_MARKER))
}

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

/// The encrypt/decrypt primitive.
pub trait Vault: Send + Sync {
    /// Decrypted contents of `file`, without touching the file.
    fn view(&self, file: &Path, key: &Path) -> Result<String, CredentialError>;

    /// Encrypt `file` in place.
    fn encrypt(&self, file: &Path, key: &Path) -> Result<(), CredentialError>;
}

/// `ansible-vault view|encrypt <file> --vault-password-file <key>`.
#[derive(Debug, Clone)]
pub struct AnsibleVault {
    program: String,
}

impl Default for AnsibleVault {
    fn default() -> Self {
        Self {
            program: "ansible-vault".to_string(),
        }
    }
}

impl AnsibleVault {
    fn invoke(&self, action: &str, file: &Path, key: &Path) -> Result<String, CredentialError> {
        let output = Command::new(&self.program)
            .arg(action)
            .arg(file)
            .arg("--vault-password-file")
            .arg(key)
            .output()
            .map_err(|e| CredentialError::Vault {
                file: file.to_path_buf(),
                detail: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(CredentialError::Vault {
                file: file.to_path_buf(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Vault for AnsibleVault {
    fn view(&self, file: &Path, key: &Path) -> Result<String, CredentialError> {
        self.invoke("view", file, key)
    }

    fn encrypt(&self, file: &Path, key: &Path) -> Result<(), CredentialError> {
        self.invoke("encrypt", file, key).map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Docker Hub login used for `docker.io` remotes.
#[derive(Debug, Clone, PartialEq)]
pub struct DockerLogin {
    pub username: String,
    pub password: Secret,
}

#[derive(Debug, Default, Deserialize)]
struct DockerDoc {
    #[serde(default)]
    docker_username: Option<String>,
    #[serde(default)]
    docker_password: Option<Secret>,
}

#[derive(Debug, Deserialize)]
struct RegistryLogin {
    name: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<Secret>,
}

#[derive(Debug, Default, Deserialize)]
struct RegistryDoc {
    #[serde(default)]
    user_registry_credential: Option<Vec<RegistryLogin>>,
}

#[derive(Debug, Clone)]
pub struct CredentialResolver<V> {
    vault: V,
}

impl<V: Vault> CredentialResolver<V> {
    pub fn new(vault: V) -> Self {
        Self { vault }
    }

    /// Read and parse `file`. A missing file reads as an empty document.
    ///
    /// With `seal`, a plaintext file is encrypted after it is read.
    fn read_document<T>(&self, file: &Path, key: &Path, seal: bool) -> Result<T, CredentialError>
    where
        T: for<'de> Deserialize<'de> + Default,
    {
        if !file.exists() {
            return Ok(T::default());
        }
        let encrypted = is_encrypted(file)?;
        if (encrypted || seal) && !key.exists() {
            return Err(CredentialError::KeyMissing {
                path: key.to_path_buf(),
            });
        }

        let text = if encrypted {
            self.vault.view(file, key)?
        } else {
            std::fs::read_to_string(file).map_err(|e| io_err(file, e))?
        };
        let parsed = if text.trim().is_empty() {
            Ok(T::default())
        } else {
            serde_yaml::from_str(&text).map_err(|source| CredentialError::Parse {
                path: file.to_path_buf(),
                source,
            })
        };

        if seal && !encrypted {
            tracing::info!("encrypting {}", file.display());
            self.vault.encrypt(file, key)?;
        }
        parsed
    }

    /// `(username, password)` from `docker_username`/`docker_password`, or
    /// `(None, None)` unless both are present.
    pub fn docker_credentials(
        &self,
        file: &Path,
        key: &Path,
    ) -> Result<(Option<String>, Option<Secret>), CredentialError> {
        let doc: DockerDoc = self.read_document(file, key, false)?;
        match (doc.docker_username, doc.docker_password) {
            (Some(user), Some(pass)) if !user.is_empty() => Ok((Some(user), Some(pass))),
            _ => Ok((None, None)),
        }
    }

    /// Join `registries` with the logins in `file` by name. The file is only
    /// read when some registry requires authentication.
    pub fn registry_credentials(
        &self,
        file: &Path,
        key: &Path,
        registries: &[UserRegistry],
    ) -> Result<Vec<RegistryCredential>, CredentialError> {
        let logins = if registries.iter().any(|r| r.requires_auth) {
            let doc: RegistryDoc = self.read_document(file, key, true)?;
            doc.user_registry_credential.unwrap_or_default()
        } else {
            Vec::new()
        };

        Ok(registries
            .iter()
            .map(|reg| {
                let login = logins
                    .iter()
                    .find(|l| reg.requires_auth && l.name == reg.name);
                RegistryCredential {
                    name: reg.name.clone(),
                    host: reg.host.clone(),
                    username: login.and_then(|l| l.username.clone()),
                    password: login.and_then(|l| l.password.clone()),
                    cert_path: reg.cert_path.as_ref().map(PathBuf::from),
                    key_path: reg.key_path.as_ref().map(PathBuf::from),
                    requires_auth: reg.requires_auth,
                }
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Per-batch context
// ---------------------------------------------------------------------------

/// A value resolved once per batch, or the reason it could not be.
#[derive(Debug, Clone)]
pub enum Resolved<T> {
    Ready(T),
    Unavailable(String),
}

impl<T> Resolved<T> {
    pub fn from_result<E: std::fmt::Display>(result: Result<T, E>) -> Self {
        match result {
            Ok(v) => Resolved::Ready(v),
            Err(e) => Resolved::Unavailable(e.to_string()),
        }
    }

    pub fn get(&self) -> Result<&T, crate::SyncError> {
        match self {
            Resolved::Ready(v) => Ok(v),
            Resolved::Unavailable(reason) => {
                Err(crate::SyncError::CredentialUnavailable(reason.clone()))
            }
        }
    }
}

/// Where credentials live on disk.
#[derive(Debug, Clone, Default)]
pub struct CredentialSources {
    pub docker_file: Option<PathBuf>,
    pub docker_key: Option<PathBuf>,
    pub registry_file: Option<PathBuf>,
    pub registry_key: Option<PathBuf>,
}

/// Credentials held in memory for the duration of one batch.
#[derive(Debug, Clone)]
pub struct CredentialContext {
    pub docker: Resolved<Option<DockerLogin>>,
    pub registries: Resolved<Vec<RegistryCredential>>,
}

impl Default for CredentialContext {
    fn default() -> Self {
        Self {
            docker: Resolved::Ready(None),
            registries: Resolved::Ready(Vec::new()),
        }
    }
}

impl CredentialContext {
    /// Resolve everything once. Failures are recorded, not returned.
    pub fn resolve<V: Vault>(
        resolver: &CredentialResolver<V>,
        sources: &CredentialSources,
        registries: &[UserRegistry],
    ) -> Self {
        let docker = match (&sources.docker_file, &sources.docker_key) {
            (Some(file), Some(key)) => Resolved::from_result(
                resolver
                    .docker_credentials(file, key)
                    .map(|(user, pass)| match (user, pass) {
                        (Some(username), Some(password)) => Some(DockerLogin { username, password }),
                        _ => None,
                    }),
            ),
            _ => Resolved::Ready(None),
        };

        let registries = match (&sources.registry_file, &sources.registry_key) {
            (Some(file), Some(key)) => {
                Resolved::from_result(resolver.registry_credentials(file, key, registries))
            }
            _ => Resolved::Ready(
                registries
                    .iter()
                    .map(|reg| RegistryCredential {
                        name: reg.name.clone(),
                        host: reg.host.clone(),
                        username: None,
                        password: None,
                        cert_path: reg.cert_path.as_ref().map(PathBuf::from),
                        key_path: reg.key_path.as_ref().map(PathBuf::from),
                        requires_auth: reg.requires_auth,
                    })
                    .collect(),
            ),
        };

        if let Resolved::Unavailable(reason) = &docker {
            tracing::warn!("docker credentials unavailable: {reason}");
        }
        if let Resolved::Unavailable(reason) = &registries {
            tracing::warn!("user registry credentials unavailable: {reason}");
        }
        Self { docker, registries }
    }
}
