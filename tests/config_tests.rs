// Integration tests for configuration loading and validation

use std::fs;
use tempfile::TempDir;

fn write_config(dir: &TempDir, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.toml");
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_statefulset_without_pod_name_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_config(
        &temp_dir,
        r#"
[identity]
namespace = "demo"
pod_name = ""

[target]
kind = "StatefulSet"
name = "web"
replicas = 3
"#,
    );

    // POD_NAME may be set where the tests run
    if std::env::var("POD_NAME").is_err() {
        let err = backup_sidecar::config::load_config(&path).unwrap_err();
        assert!(err.to_string().contains("identity.pod_name"));
    }
}

#[test]
fn test_election_timing_order() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_config(
        &temp_dir,
        r#"
[identity]
namespace = "demo"
pod_name = "api-1"

[target]
kind = "Deployment"
name = "api"

[election]
lease_duration_seconds = 10
renew_deadline_seconds = 10
retry_period_seconds = 2
"#,
    );

    let err = backup_sidecar::config::load_config(&path).unwrap_err();
    assert!(err.to_string().contains("election timing"));
}

#[test]
fn test_metrics_need_a_sink() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_config(
        &temp_dir,
        r#"
[identity]
namespace = "demo"
pod_name = "api-1"

[target]
kind = "Deployment"
name = "api"

[metrics]
enabled = true
"#,
    );

    assert!(backup_sidecar::config::load_config(&path).is_err());
}

#[test]
fn test_full_config() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_config(
        &temp_dir,
        &format!(
            r#"
[identity]
namespace = "prod"
pod_name = "db-2"
node_name = "node-a"

[target]
kind = "StatefulSet"
name = "db"
replicas = 3
alias = "postgres"

[restic]
binary = "/usr/local/bin/restic"
timeout_seconds = 0
scratch_dir = "{scratch}"
enable_cache = true

[metrics]
enabled = true
metric_file_dir = "{metrics}"
job_name = "db-backup"

[queue]
workers = 2
"#,
            scratch = temp_dir.path().join("scratch").display(),
            metrics = temp_dir.path().join("metrics").display(),
        ),
    );

    let config = backup_sidecar::config::load_config(&path).unwrap();
    assert_eq!(config.target.total_hosts(), 3);
    assert_eq!(config.restic.timeout(), None);
    assert!(config.restic.setup_options().enable_cache);
    assert_eq!(config.metrics.job_name, "db-backup");
    assert_eq!(config.queue.workers, 2);
}
