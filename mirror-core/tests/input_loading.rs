//! Loader error messages and manifest collection.

use assert_fs::prelude::*;
use mirror_core::{
    config::{load_local_repo_config, load_software_config},
    manifest::load_manifest,
    types::ArtifactKind,
    ConfigError,
};
use predicates::prelude::predicate;

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn missing_software_config_is_not_found() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let err = load_software_config(&dir.path().join("software_config.json")).unwrap_err();
    assert!(matches!(err, ConfigError::NotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("software_config.json"));
}

#[test]
fn corrupt_repo_config_reports_path() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("local_repo_config.yml");
    file.write_str(": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = load_local_repo_config(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("local_repo_config.yml"));
}

#[test]
fn empty_repo_config_is_empty() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("local_repo_config.yml");
    file.write_str("").expect("write");
    let cfg = load_local_repo_config(file.path()).expect("load");
    assert!(cfg.lists.is_empty());
}

// ---------------------------------------------------------------------------
// 2. Manifests
// ---------------------------------------------------------------------------

#[test]
fn manifest_collects_every_group() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    dir.child("k8s.json")
        .write_str(
            r#"{
              "k8s": {"cluster": [
                {"package": "registry.k8s.io/pause", "type": "image", "tag": "3.9"},
                {"package": "kubectl-{{ k8s_version }}", "type": "tarball",
                 "url": "https://dl.k8s.io/v{{ k8s_version }}/bin/linux/amd64/kubectl"}
              ]},
              "k8s_extras": {"cluster": [
                {"package": "helm", "type": "tarball", "url": "https://get.helm.sh/helm.tar.gz"}
              ]}
            }"#,
        )
        .expect("write");

    let specs = load_manifest(dir.path(), "k8s").expect("load");
    assert_eq!(specs.len(), 3);
    assert_eq!(specs[0].kind, ArtifactKind::Image);
    assert_eq!(specs[0].tag.as_deref(), Some("3.9"));
    dir.child("k8s.json").assert(predicate::path::exists());
}

#[test]
fn manifest_with_unknown_type_is_rejected() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    dir.child("odd.json")
        .write_str(r#"{"odd": {"cluster": [{"package": "x", "type": "floppy"}]}}"#)
        .expect("write");
    let err = load_manifest(dir.path(), "odd").unwrap_err();
    assert!(matches!(err, ConfigError::Json { .. }), "got: {err}");
}
