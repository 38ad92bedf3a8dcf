//! Metadata reconciler.
//!
//! A [`PolicySnapshot`] records, per source list, the policy of every item
//! plus `repository_mode` and `lastrun_timestamp`. Before a batch a
//! candidate is generated into a scratch file and compared with the
//! persisted one (the fast-path); after a batch the candidate is reconciled
//! into the persisted snapshot.
//!
//! Writes use the same atomic `.tmp` + rename pattern as the ledgers.

use std::path::Path;

use chrono::{NaiveDateTime, Utc};
use serde_yaml::{Mapping, Value};

use mirror_core::config::{LocalRepoConfig, SoftwareConfig};
use mirror_core::PolicySnapshot;

use crate::error::{io_err, SyncError};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Load a snapshot. Missing or empty files load as an empty snapshot.
pub fn load(path: &Path) -> Result<PolicySnapshot, SyncError> {
    if !path.exists() {
        return Ok(PolicySnapshot::default());
    }
    let text = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    if text.trim().is_empty() {
        return Ok(PolicySnapshot::default());
    }
    match serde_yaml::from_str::<Value>(&text)? {
        Value::Mapping(map) => Ok(PolicySnapshot(map)),
        Value::Null => Ok(PolicySnapshot::default()),
        _ => Err(SyncError::InvalidSnapshot {
            path: path.to_path_buf(),
        }),
    }
}

/// Save a snapshot atomically, creating parent directories.
pub fn save(path: &Path, snapshot: &PolicySnapshot) -> Result<(), SyncError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    let yaml = serde_yaml::to_string(&snapshot.0)?;
    let tmp = path.with_extension("yml.tmp");
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Structural operations
// ---------------------------------------------------------------------------

/// One-directional diff of `other` against `base`.
///
/// Keys only in `other` are taken whole; keys mapping to mappings on both
/// sides recurse; differing leaves take `other`'s value. Keys only in
/// `base` are never reported.
pub fn structural_diff(base: &Mapping, other: &Mapping) -> Mapping {
    let mut diff = Mapping::new();
    for (key, value) in other {
        match (base.get(key), value) {
            (None, _) => {
                diff.insert(key.clone(), value.clone());
            }
            (Some(Value::Mapping(base_inner)), Value::Mapping(other_inner)) => {
                let nested = structural_diff(base_inner, other_inner);
                if !nested.is_empty() {
                    diff.insert(key.clone(), Value::Mapping(nested));
                }
            }
            (Some(existing), _) if existing != value => {
                diff.insert(key.clone(), value.clone());
            }
            _ => {}
        }
    }
    diff
}

/// Recursively merge `diff` into `target`. Mappings merge; anything else
/// overwrites.
pub fn deep_merge(target: &mut Mapping, diff: &Mapping) {
    for (key, value) in diff {
        match value {
            Value::Mapping(inner) => {
                let mut merged = match target.get(key) {
                    Some(Value::Mapping(existing)) => existing.clone(),
                    _ => Mapping::new(),
                };
                deep_merge(&mut merged, inner);
                target.insert(key.clone(), Value::Mapping(merged));
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Current UTC time, never earlier than `previous`.
pub fn stamp(previous: Option<&str>) -> String {
    let now = Utc::now().naive_utc();
    let latest = previous
        .and_then(|p| NaiveDateTime::parse_from_str(p, TIMESTAMP_FORMAT).ok())
        .filter(|p| *p > now)
        .unwrap_or(now);
    latest.format(TIMESTAMP_FORMAT).to_string()
}

// ---------------------------------------------------------------------------
// generate / compare / reconcile
// ---------------------------------------------------------------------------

/// `<name with - replaced by _>_policy`
pub fn policy_key(item: &str) -> String {
    format!("{}_policy", item.replace('-', "_"))
}

/// Desired policy state for the active OS family.
pub fn generate(
    software: &SoftwareConfig,
    repos: &LocalRepoConfig,
) -> Result<PolicySnapshot, SyncError> {
    let default_policy = software.repo_config.as_str();
    let os = software.os_family()?;

    let mut snapshot = PolicySnapshot::default();
    for (list, entries) in repos.sources_for(os)? {
        if entries.is_empty() {
            continue;
        }
        let mut policies = Mapping::new();
        for entry in &entries {
            let policy = entry.policy.as_deref().unwrap_or(default_policy);
            policies.insert(Value::from(policy_key(&entry.name)), Value::from(policy));
        }
        snapshot.insert(&list, Value::Mapping(policies));
    }
    snapshot.insert(PolicySnapshot::REPOSITORY_MODE, Value::from(default_policy));
    snapshot.insert(PolicySnapshot::LASTRUN_TIMESTAMP, Value::from(stamp(None)));
    Ok(snapshot)
}

/// Result of [`compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Comparison {
    pub changed: bool,
    pub identical: bool,
}

/// Structural equality of two snapshot files, ignoring `ignore_keys`.
pub fn compare(old: &Path, new: &Path, ignore_keys: &[String]) -> Result<Comparison, SyncError> {
    let old = load(old)?.without(ignore_keys);
    let new = load(new)?.without(ignore_keys);
    let identical = old == new;
    Ok(Comparison {
        changed: !identical,
        identical,
    })
}

/// Result of [`reconcile`].
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub changed: bool,
    pub diff: Mapping,
}

/// Merge what `new` adds or changes into `old`, re-stamp, persist to `old`
/// and remove `new`.
pub fn reconcile(old: &Path, new: &Path, ignore_keys: &[String]) -> Result<Reconciled, SyncError> {
    let previous = load(old)?;
    let previous_stamp = previous.lastrun_timestamp().map(str::to_string);
    let mut merged = previous.without(ignore_keys);
    let candidate = load(new)?.without(ignore_keys);

    let diff = structural_diff(&merged.0, &candidate.0);
    deep_merge(&mut merged.0, &diff);
    merged.insert(
        PolicySnapshot::LASTRUN_TIMESTAMP,
        Value::from(stamp(previous_stamp.as_deref())),
    );
    save(old, &merged)?;

    if new.exists() {
        std::fs::remove_file(new).map_err(|e| io_err(new, e))?;
    }
    if !diff.is_empty() {
        tracing::info!("metadata updated: {} top-level keys changed", diff.len());
    }
    Ok(Reconciled {
        changed: !diff.is_empty(),
        diff,
    })
}

// ---------------------------------------------------------------------------
// Manager flow
// ---------------------------------------------------------------------------

/// What [`manage`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum ManageOutcome {
    /// No persisted snapshot existed; one was generated.
    Generated(PolicySnapshot),
    Compared(Comparison),
    Reconciled(Reconciled),
}

/// Generate the persisted snapshot if missing; otherwise generate a candidate
/// into `rerun` and either compare it (`update == false`) or reconcile it.
pub fn manage(
    software: &SoftwareConfig,
    repos: &LocalRepoConfig,
    metadata: &Path,
    rerun: &Path,
    update: bool,
    ignore_keys: &[String],
) -> Result<ManageOutcome, SyncError> {
    let candidate = generate(software, repos)?;
    if !metadata.exists() {
        save(metadata, &candidate)?;
        tracing::info!("metadata generated at {}", metadata.display());
        return Ok(ManageOutcome::Generated(candidate));
    }
    save(rerun, &candidate)?;
    if update {
        Ok(ManageOutcome::Reconciled(reconcile(metadata, rerun, ignore_keys)?))
    } else {
        Ok(ManageOutcome::Compared(compare(metadata, rerun, ignore_keys)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> Mapping {
        serde_yaml::from_str(text).expect("yaml")
    }

    #[test]
    fn diff_takes_new_and_changed_keys_only() {
        let base = yaml("repoA: {policy: always}\nrepoC: {policy: never}\n");
        let other = yaml("repoA: {policy: on_demand}\nrepoB: {policy: always}\n");
        let diff = structural_diff(&base, &other);
        assert_eq!(
            diff,
            yaml("repoA: {policy: on_demand}\nrepoB: {policy: always}\n")
        );

        let mut merged = base.clone();
        deep_merge(&mut merged, &diff);
        assert_eq!(
            merged,
            yaml("repoA: {policy: on_demand}\nrepoB: {policy: always}\nrepoC: {policy: never}\n")
        );
    }

    #[test]
    fn diff_recurses_and_omits_unchanged_branches() {
        let base = yaml("a: {x: 1, y: 2}\nb: {z: 3}\n");
        let other = yaml("a: {x: 1, y: 5}\nb: {z: 3}\n");
        assert_eq!(structural_diff(&base, &other), yaml("a: {y: 5}\n"));
    }

    #[test]
    fn leaf_replaced_by_mapping_is_taken_whole() {
        let base = yaml("a: 1\n");
        let other = yaml("a: {b: 2}\n");
        let diff = structural_diff(&base, &other);
        let mut merged = base.clone();
        deep_merge(&mut merged, &diff);
        assert_eq!(merged, other);
    }

    #[test]
    fn stamp_never_goes_backwards() {
        assert_eq!(stamp(Some("2999-01-01T00:00:00Z")), "2999-01-01T00:00:00Z");
        let now = stamp(Some("2000-01-01T00:00:00Z"));
        assert!(now.as_str() > "2000-01-01T00:00:00Z");
        assert!(NaiveDateTime::parse_from_str(&stamp(Some("garbage")), TIMESTAMP_FORMAT).is_ok());
    }

    #[test]
    fn policy_keys_normalize_dashes() {
        assert_eq!(policy_key("cuda-repo"), "cuda_repo_policy");
    }
}
