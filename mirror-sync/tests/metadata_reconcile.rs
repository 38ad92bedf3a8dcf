use std::fs;
use std::path::{Path, PathBuf};

use mirror_core::config::{load_local_repo_config, load_software_config, LocalRepoConfig, SoftwareConfig};
use mirror_core::defaults::{default_ignore_keys, StatePaths};
use mirror_core::{ConfigError, PolicySnapshot};
use mirror_sync::metadata::{self, ManageOutcome};
use mirror_sync::SyncError;
use serde_yaml::Value;
use tempfile::TempDir;

const REPO_CONFIG: &str = "\
user_repo_url:
  - name: custom-epel
    url: https://mirror.example.com/epel
    policy: never
omnia_repo_url_rhel:
  - name: docker-ce
    url: https://download.docker.com/linux/centos/9/x86_64/stable
  - name: cuda-repo
    url: https://developer.download.nvidia.com/compute/cuda/repos/rhel9/x86_64
    policy: partial
rhel_os_url: null
omnia_repo_url_ubuntu:
  - name: kubernetes
    url: https://pkgs.k8s.io/core:/stable:/v1.31/deb
";

fn write_inputs(dir: &Path, os: &str, policy: &str) -> (PathBuf, PathBuf) {
    let software = dir.join("software_config.json");
    fs::write(
        &software,
        format!(
            r#"{{"cluster_os_type": "{os}", "cluster_os_version": "9.4",
                "repo_config": "{policy}", "softwares": [{{"name": "k8s"}}]}}"#
        ),
    )
    .expect("software config");
    let repos = dir.join("local_repo_config.yml");
    fs::write(&repos, REPO_CONFIG).expect("repo config");
    (software, repos)
}

fn load_inputs(software: &Path, repos: &Path) -> (SoftwareConfig, LocalRepoConfig) {
    (
        load_software_config(software).expect("software"),
        load_local_repo_config(repos).expect("repos"),
    )
}

fn str_at<'a>(snapshot: &'a PolicySnapshot, list: &str, key: &str) -> Option<&'a str> {
    snapshot.get(list)?.get(key)?.as_str()
}

#[test]
fn generate_covers_os_lists_with_item_or_default_policy() {
    let dir = TempDir::new().expect("dir");
    let (sw, repos) = write_inputs(dir.path(), "rhel", "always");
    let (sw, repos) = load_inputs(&sw, &repos);

    let snapshot = metadata::generate(&sw, &repos).expect("generate");
    assert_eq!(str_at(&snapshot, "user_repo_url", "custom_epel_policy"), Some("never"));
    assert_eq!(str_at(&snapshot, "omnia_repo_url_rhel", "docker_ce_policy"), Some("always"));
    assert_eq!(str_at(&snapshot, "omnia_repo_url_rhel", "cuda_repo_policy"), Some("partial"));
    assert!(snapshot.get("rhel_os_url").is_none());
    assert!(snapshot.get("omnia_repo_url_ubuntu").is_none());
    assert_eq!(
        snapshot.get(PolicySnapshot::REPOSITORY_MODE).and_then(Value::as_str),
        Some("always")
    );
    assert!(snapshot.lastrun_timestamp().is_some());
}

#[test]
fn unsupported_os_is_rejected() {
    let dir = TempDir::new().expect("dir");
    let (sw, repos) = write_inputs(dir.path(), "windows", "always");
    let (sw, repos) = load_inputs(&sw, &repos);
    let err = metadata::generate(&sw, &repos).unwrap_err();
    assert!(matches!(
        err,
        SyncError::Config(ConfigError::UnsupportedOs(ref os)) if os == "windows"
    ));
}

#[test]
fn manage_generates_then_compares_identical() {
    let dir = TempDir::new().expect("dir");
    let state = StatePaths::at_home(dir.path());
    let (sw, repos) = write_inputs(dir.path(), "rhel", "always");
    let (sw, repos) = load_inputs(&sw, &repos);
    let ignore = default_ignore_keys();

    let first = metadata::manage(&sw, &repos, &state.metadata(), &state.rerun_metadata(), false, &ignore)
        .expect("first");
    assert!(matches!(first, ManageOutcome::Generated(_)));
    assert!(state.metadata().exists());

    let second = metadata::manage(&sw, &repos, &state.metadata(), &state.rerun_metadata(), false, &ignore)
        .expect("second");
    let ManageOutcome::Compared(cmp) = second else {
        panic!("expected a comparison");
    };
    assert!(cmp.identical);
    assert!(!cmp.changed);
}

#[test]
fn compare_detects_policy_change_but_not_timestamp_change() {
    let dir = TempDir::new().expect("dir");
    let old = dir.path().join("old.yml");
    let same = dir.path().join("same.yml");
    let changed = dir.path().join("changed.yml");
    fs::write(&old, "repository_mode: always\nlastrun_timestamp: '2024-01-01T00:00:00Z'\n").expect("old");
    fs::write(&same, "repository_mode: always\nlastrun_timestamp: '2025-06-01T00:00:00Z'\n").expect("same");
    fs::write(&changed, "repository_mode: never\nlastrun_timestamp: '2024-01-01T00:00:00Z'\n").expect("changed");

    let ignore = default_ignore_keys();
    assert!(metadata::compare(&old, &same, &ignore).expect("cmp").identical);
    assert!(metadata::compare(&old, &changed, &ignore).expect("cmp").changed);
    assert!(metadata::compare(&old, &same, &[]).expect("cmp").changed);
}

#[test]
fn reconcile_merges_removes_rerun_and_is_idempotent() {
    let dir = TempDir::new().expect("dir");
    let old = dir.path().join("localrepo_metadata.yml");
    let new = dir.path().join("localrepo_rerun_metadata.yml");
    fs::write(
        &old,
        "repoA:\n  policy: always\nrepoC:\n  policy: never\nlastrun_timestamp: '2024-01-01T00:00:00Z'\n",
    )
    .expect("old");
    fs::write(&new, "repoA:\n  policy: on_demand\nrepoB:\n  policy: always\n").expect("new");

    let ignore = default_ignore_keys();
    let first = metadata::reconcile(&old, &new, &ignore).expect("reconcile");
    assert!(first.changed);
    assert!(!new.exists());

    let merged = metadata::load(&old).expect("load");
    assert_eq!(str_at(&merged, "repoA", "policy"), Some("on_demand"));
    assert_eq!(str_at(&merged, "repoB", "policy"), Some("always"));
    assert_eq!(str_at(&merged, "repoC", "policy"), Some("never"));
    let stamp = merged.lastrun_timestamp().expect("stamp").to_string();
    assert!(stamp.as_str() > "2024-01-01T00:00:00Z");

    fs::write(&new, "repoA:\n  policy: on_demand\nrepoB:\n  policy: always\n").expect("new again");
    let second = metadata::reconcile(&old, &new, &ignore).expect("again");
    assert!(!second.changed);
    assert!(second.diff.is_empty());
    let again = metadata::load(&old).expect("load");
    assert_eq!(again.without(&ignore), merged.without(&ignore));
    assert!(again.lastrun_timestamp().expect("stamp") >= stamp.as_str());
}

#[test]
fn reconcile_keeps_a_future_timestamp() {
    let dir = TempDir::new().expect("dir");
    let old = dir.path().join("old.yml");
    let new = dir.path().join("new.yml");
    fs::write(&old, "repository_mode: always\nlastrun_timestamp: '2999-12-31T23:59:59Z'\n").expect("old");
    fs::write(&new, "repository_mode: always\nlastrun_timestamp: '2000-01-01T00:00:00Z'\n").expect("new");

    metadata::reconcile(&old, &new, &default_ignore_keys()).expect("reconcile");
    let merged = metadata::load(&old).expect("load");
    assert_eq!(merged.lastrun_timestamp(), Some("2999-12-31T23:59:59Z"));
}

#[test]
fn non_mapping_snapshot_is_rejected() {
    let dir = TempDir::new().expect("dir");
    let path = dir.path().join("metadata.yml");
    fs::write(&path, "- just\n- a list\n").expect("write");
    let err = metadata::load(&path).unwrap_err();
    assert!(matches!(err, SyncError::InvalidSnapshot { .. }));
}

#[test]
fn missing_and_empty_snapshots_load_empty() {
    let dir = TempDir::new().expect("dir");
    assert!(metadata::load(&dir.path().join("absent.yml")).expect("absent").0.is_empty());
    let empty = dir.path().join("empty.yml");
    fs::write(&empty, "\n").expect("write");
    assert!(metadata::load(&empty).expect("empty").0.is_empty());
}
