//! Metrics written to the textfile sink

use std::fs;
use test_utils::{ConfigBuilder, MockResticOps, SidecarHarness};

fn metric_line<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    text.lines().find(|l| l.starts_with(&format!("{}{{", name)))
}

#[tokio::test]
async fn test_successful_backup_metrics() {
    let harness = SidecarHarness::new(ConfigBuilder::deployment("api").with_metric_file());
    let key = harness.create_backup_session("nightly-1");

    harness.backup_controller().process(&key).await.unwrap();

    let text = fs::read_to_string(harness.temp_path().join("metrics/backup-sidecar.prom")).unwrap();
    let success = metric_line(&text, "backup_host_backup_success").unwrap();
    assert!(success.contains("hostname=\"host-0\""));
    assert!(success.contains("driver=\"restic\""));
    assert!(success.ends_with(" 1"));
    assert!(metric_line(&text, "backup_session_last_success_time_seconds").is_some());
    assert!(metric_line(&text, "backup_host_files_total").unwrap().ends_with(" 17"));
    assert!(metric_line(&text, "backup_repository_integrity").unwrap().ends_with(" 1"));
}

#[tokio::test]
async fn test_failed_backup_metrics() {
    let restic = MockResticOps::new().with_failing_backup("Fatal: wrong password");
    let harness = SidecarHarness::with_restic(ConfigBuilder::deployment("api").with_metric_file(), restic);
    let key = harness.create_backup_session("nightly-2");

    harness.backup_controller().process(&key).await.unwrap();

    let text = fs::read_to_string(harness.temp_path().join("metrics/backup-sidecar.prom")).unwrap();
    assert!(metric_line(&text, "backup_host_backup_success").unwrap().ends_with(" 0"));
    assert!(metric_line(&text, "backup_session_success").unwrap().ends_with(" 0"));
    assert!(metric_line(&text, "backup_session_last_success_time_seconds").is_none());
}
