// Command-line tests for the backup-sidecar binary

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_validate_prints_summary() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(
        &config_path,
        r#"
[identity]
namespace = "demo"
pod_name = "web-0"

[target]
kind = "StatefulSet"
name = "web"
replicas = 2
"#,
    )
    .unwrap();

    Command::cargo_bin("backup-sidecar")
        .unwrap()
        .arg("--config")
        .arg(&config_path)
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid!"))
        .stdout(predicate::str::contains("Target: StatefulSet web"))
        .stdout(predicate::str::contains("Hosts per session: 2"));
}

#[test]
fn test_validate_rejects_bad_config() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, "[target]\nkind = \"Deployment\"\n").unwrap();

    Command::cargo_bin("backup-sidecar")
        .unwrap()
        .arg("--config")
        .arg(&config_path)
        .arg("validate")
        .assert()
        .failure();
}

#[test]
fn test_missing_config_file() {
    Command::cargo_bin("backup-sidecar")
        .unwrap()
        .args(["--config", "/nonexistent/backup-sidecar.toml", "validate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read config file"));
}

#[test]
fn test_process_requires_kind() {
    Command::cargo_bin("backup-sidecar")
        .unwrap()
        .args(["process", "--session", "nightly-1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--kind"));
}
