use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn mirror_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("mirror"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env("NO_COLOR", "1");
    cmd
}

/// Inputs for one software whose only artifact is a git tree that is
/// already present in the store, so the batch runs no external commands.
fn seed(home: &Path, os: &str) -> Vec<String> {
    fs::write(
        home.join("software_config.json"),
        format!(
            r#"{{"cluster_os_type": "{os}", "cluster_os_version": "9.4",
                "softwares": [{{"name": "kubespray", "version": "v2.26.0"}}]}}"#
        ),
    )
    .expect("software config");
    fs::write(
        home.join("local_repo_config.yml"),
        "user_repo_url:\n  - name: epel\n    url: https://dl.fedoraproject.org/pub/epel/9/Everything/x86_64\n",
    )
    .expect("repo config");
    let manifests = home.join("manifests");
    fs::create_dir_all(&manifests).expect("manifests");
    fs::write(
        manifests.join("kubespray.json"),
        r#"{"kubespray": {"cluster": [
            {"type": "git", "package": "kubespray",
             "url": "https://github.com/kubernetes-sigs/kubespray.git",
             "version": "{{ kubespray_version }}"}
        ]}}"#,
    )
    .expect("manifest");
    fs::create_dir_all(home.join(".mirror/store/git/kubespray_v2.26.0/.git")).expect("seed clone");

    let path = |name: &str| -> String {
        let p: PathBuf = home.join(name);
        p.to_str().expect("utf8").to_string()
    };
    vec![
        "sync".into(),
        "--software-config".into(),
        path("software_config.json"),
        "--repo-config".into(),
        path("local_repo_config.yml"),
        "--manifest-dir".into(),
        path("manifests"),
        "--workers".into(),
        "2".into(),
    ]
}

#[test]
fn sync_records_ledgers_then_takes_the_fast_path() {
    let home = TempDir::new().expect("home");
    let args = seed(home.path(), "rhel");

    mirror_cmd(home.path())
        .args(&args)
        .assert()
        .success()
        .stdout(contains("kubespray"))
        .stdout(contains("overall status: SUCCESS"));

    let state = home.path().join(".mirror");
    let status = fs::read_to_string(state.join("status/status.csv")).expect("status.csv");
    assert_eq!(status, "name,type,status\nkubespray,git,Success\n");
    let software = fs::read_to_string(state.join("status/software.csv")).expect("software.csv");
    assert_eq!(software, "name,status\nkubespray,success\n");
    assert!(state.join("metadata/localrepo_metadata.yml").exists());
    assert!(state.join("logs").is_dir());
    let results = fs::read_to_string(state.join("task_results_table.log")).expect("results log");
    assert!(results.contains("overall status: SUCCESS"));

    mirror_cmd(home.path())
        .args(&args)
        .assert()
        .success()
        .stdout(contains("nothing to sync"));
}

#[test]
fn status_reports_ledger_as_json() {
    let home = TempDir::new().expect("home");
    let args = seed(home.path(), "rhel");
    mirror_cmd(home.path()).args(&args).assert().success();

    let output = mirror_cmd(home.path())
        .args(["status", "--json"])
        .output()
        .expect("status");
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(json["summary"]["artifacts"], 1);
    assert_eq!(json["summary"]["succeeded"], 1);
    assert_eq!(json["artifacts"][0]["name"], "kubespray");
    assert_eq!(json["artifacts"][0]["type"], "git");
    assert_eq!(json["softwares"][0]["status"], "success");
}

#[test]
fn status_without_ledgers_points_at_sync() {
    let home = TempDir::new().expect("home");
    mirror_cmd(home.path())
        .arg("status")
        .assert()
        .success()
        .stdout(contains("No artifacts recorded"));
}

#[test]
fn unsupported_os_fails_before_any_batch() {
    let home = TempDir::new().expect("home");
    let args = seed(home.path(), "windows");
    mirror_cmd(home.path())
        .args(&args)
        .assert()
        .failure()
        .stderr(contains("unsupported cluster_os_type"));
    assert!(!home.path().join(".mirror/status/status.csv").exists());
}

#[test]
fn credentials_without_vault_key_are_rejected() {
    let home = TempDir::new().expect("home");
    let mut args = seed(home.path(), "rhel");
    args.push("--docker-credentials".into());
    args.push(home.path().join("docker.yml").to_str().expect("utf8").into());
    mirror_cmd(home.path())
        .args(&args)
        .assert()
        .failure()
        .stderr(contains("--docker-vault-key"));
}
