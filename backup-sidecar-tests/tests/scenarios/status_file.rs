//! Applying an output file written by an earlier run

use backup_sidecar::utils::output::{BackupOutput, RestoreOutput, TargetStatus};
use test_utils::{target_ref, ConfigBuilder, HostPhase, HostStats, SessionPhase, SidecarHarness};

#[test]
fn test_backup_status_from_file() {
    let harness = SidecarHarness::new(ConfigBuilder::deployment("api"));
    let key = harness.create_backup_session("nightly-1");
    let output = BackupOutput {
        target_status: TargetStatus {
            target_ref: target_ref("Deployment", "api"),
            stats: vec![HostStats::failed("host-0", "restic exited 1".to_string())],
        },
        repository_stats: None,
    };
    let path = harness.temp_path().join("output.json");
    output.write_output(&path).unwrap();

    let session = harness
        .context()
        .status
        .update_backup_status_from_file(&key, &path)
        .unwrap();

    assert_eq!(session.status.phase, SessionPhase::Failed);
    assert_eq!(session.status.stats[0].phase, HostPhase::Failed);
    assert_eq!(harness.backup_session("nightly-1").status, session.status);
}

#[test]
fn test_restore_status_from_file() {
    let harness = SidecarHarness::new(ConfigBuilder::stateful_set("db", 1, 0));
    let key = harness.create_restore_session("restore-1", Vec::new());
    let output = RestoreOutput {
        target_status: TargetStatus {
            target_ref: target_ref("StatefulSet", "db"),
            stats: vec![HostStats::succeeded("host-0", "3.000s".to_string(), Vec::new())],
        },
    };
    let path = harness.temp_path().join("restore.json");
    output.write_output(&path).unwrap();

    let session = harness
        .context()
        .status
        .update_restore_status_from_file(&key, &path)
        .unwrap();
    assert_eq!(session.status.phase, SessionPhase::Succeeded);
}

#[test]
fn test_missing_output_file() {
    let harness = SidecarHarness::new(ConfigBuilder::deployment("api"));
    let key = harness.create_backup_session("nightly-2");
    let err = harness
        .context()
        .status
        .update_backup_status_from_file(&key, &harness.temp_path().join("absent.json"))
        .unwrap_err();
    assert!(format!("{:#}", err).contains("absent.json"));
    assert!(harness.backup_session("nightly-2").status.stats.is_empty());
}
