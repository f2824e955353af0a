//! Backup sessions on a single replica

use backup_sidecar::api::Hook;
use backup_sidecar::utils::output::read_backup_output;
use test_utils::{
    backup_session, invoker, sample_snapshots, ConfigBuilder, EventType, HostPhase, MockExecutor,
    MockResponse, MockResticOps, ObjectKey, ResticCall, SessionPhase, SidecarHarness,
};

#[tokio::test]
async fn test_statefulset_backup_end_to_end() {
    let harness = SidecarHarness::new(ConfigBuilder::stateful_set("web", 1, 0));
    let key = harness.create_backup_session("nightly-1");

    harness.backup_controller().process(&key).await.unwrap();

    let session = harness.backup_session("nightly-1");
    assert_eq!(session.status.phase, SessionPhase::Succeeded);
    assert_eq!(session.status.total_hosts, Some(1));
    assert!(session.status.session_duration.is_some());

    let stats = &session.status.stats;
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].hostname, "host-0");
    assert_eq!(stats[0].phase, HostPhase::Succeeded);
    assert_eq!(stats[0].snapshots.len(), 1);
    assert_eq!(stats[0].snapshots[0].path, "/data");

    let calls = harness.restic.get_calls();
    assert_eq!(calls[0], ResticCall::EnsureRepository);
    assert_eq!(
        calls[1],
        ResticCall::Backup {
            host: "host-0".to_string(),
            tags: vec!["statefulset/web/host-0".to_string()],
        }
    );
    assert!(calls.contains(&ResticCall::Cleanup {
        policy: "keep-last-5".to_string(),
        host: "host-0".to_string(),
    }));
    assert!(!harness.restic.unlock_called());

    let repo = harness
        .stores
        .repositories
        .get(&ObjectKey::new("demo", "local-repo"))
        .unwrap();
    assert_eq!(repo.status.integrity, Some(true));
    assert_eq!(repo.status.size, "1.000 GiB");

    let events = harness.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::Normal);
    assert_eq!(events[0].involved_object.name, "nightly-1");
}

#[tokio::test]
async fn test_aliased_statefulset_backs_up_as_web_0() {
    let harness = SidecarHarness::new(ConfigBuilder::stateful_set("web", 1, 0).with_alias("web"));
    let key = harness.create_backup_session("nightly-alias");

    harness.backup_controller().process(&key).await.unwrap();

    let session = harness.backup_session("nightly-alias");
    assert_eq!(session.status.phase, SessionPhase::Succeeded);
    assert_eq!(session.status.stats.len(), 1);
    assert_eq!(session.status.stats[0].hostname, "web-0");
    assert_eq!(session.status.stats[0].phase, HostPhase::Succeeded);

    assert!(harness.restic.get_calls().contains(&ResticCall::Backup {
        host: "web-0".to_string(),
        tags: vec!["statefulset/web/web-0".to_string()],
    }));
    assert!(harness.restic.get_calls().contains(&ResticCall::Cleanup {
        policy: "keep-last-5".to_string(),
        host: "web-0".to_string(),
    }));
}

#[tokio::test]
async fn test_second_pass_is_a_no_op() {
    let harness = SidecarHarness::new(ConfigBuilder::stateful_set("web", 1, 0));
    let key = harness.create_backup_session("nightly-2");
    let controller = harness.backup_controller();

    controller.process(&key).await.unwrap();
    let calls_after_first = harness.restic.get_calls().len();
    let first = harness.backup_session("nightly-2");

    controller.process(&key).await.unwrap();

    assert_eq!(harness.restic.get_calls().len(), calls_after_first);
    assert_eq!(harness.restic.backup_count(), 1);
    assert_eq!(harness.backup_session("nightly-2").status, first.status);
    assert_eq!(harness.events().len(), 1);
}

#[tokio::test]
async fn test_host_with_entry_is_not_run_again_while_session_waits() {
    // Two hosts expected, only this one reports: the session stays Running
    let harness = SidecarHarness::new(ConfigBuilder::stateful_set("web", 2, 1));
    let key = harness.create_backup_session("nightly-3");
    let controller = harness.backup_controller();

    controller.process(&key).await.unwrap();
    let session = harness.backup_session("nightly-3");
    assert_eq!(session.status.phase, SessionPhase::Running);
    assert_eq!(session.status.stats[0].hostname, "host-1");

    controller.process(&key).await.unwrap();
    assert_eq!(harness.restic.backup_count(), 1);
}

#[tokio::test]
async fn test_failed_backup_is_recorded_once() {
    let restic = MockResticOps::new().with_failing_backup("Fatal: unable to open repository");
    let harness = SidecarHarness::with_restic(ConfigBuilder::deployment("api"), restic);
    let key = harness.create_backup_session("nightly-4");

    harness.backup_controller().process(&key).await.unwrap();

    let session = harness.backup_session("nightly-4");
    assert_eq!(session.status.phase, SessionPhase::Failed);
    assert_eq!(session.status.stats.len(), 1);
    let host = &session.status.stats[0];
    assert_eq!(host.phase, HostPhase::Failed);
    let error = host.error.as_deref().unwrap();
    assert!(error.starts_with("failed to complete backup for host host-0. Reason:"));
    assert!(error.contains("Fatal: unable to open repository"));
    assert!(harness.restic.unlock_called());

    let warnings: Vec<_> = harness
        .events()
        .into_iter()
        .filter(|e| e.event_type == EventType::Warning)
        .collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].reason, "Host Backup Failed");
    assert_eq!(warnings[0].message, error);
}

#[tokio::test]
async fn test_paused_invoker_skips_session() {
    let harness = SidecarHarness::new(ConfigBuilder::deployment("api"));
    harness.stores.invokers.create(invoker("api-backup", true)).unwrap();
    let key = harness.create_backup_session("nightly-5");

    harness.backup_controller().process(&key).await.unwrap();

    let session = harness.backup_session("nightly-5");
    assert_eq!(session.status.phase, SessionPhase::Skipped);
    assert!(session.status.stats.is_empty());
    assert!(harness.restic.get_calls().is_empty());
}

#[tokio::test]
async fn test_missing_pod_name_records_warning() {
    let harness = SidecarHarness::new(ConfigBuilder::new("StatefulSet", "web"));
    let key = harness.create_backup_session("nightly-6");

    harness.backup_controller().process(&key).await.unwrap();

    assert!(harness.restic.get_calls().is_empty());
    let events = harness.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::Warning);
    assert!(events[0].message.contains("pod name is required"));
}

#[tokio::test]
async fn test_output_file_written_per_session() {
    let restic = MockResticOps::new().with_snapshots(sample_snapshots(3));
    let harness = SidecarHarness::with_restic(ConfigBuilder::deployment("api").with_output_dir(), restic);
    let key = harness.create_backup_session("nightly-7");

    harness.backup_controller().process(&key).await.unwrap();

    let path = harness.temp_path().join("output/nightly-7/output.json");
    let output = read_backup_output(&path).unwrap();
    assert_eq!(output.target_status.target_ref.name, "api");
    assert_eq!(output.target_status.stats[0].hostname, "host-0");
    let repo = output.repository_stats.unwrap();
    assert_eq!(repo.snapshot_count, 3);
    assert_eq!(repo.snapshots_removed_on_last_cleanup, 0);
}

#[tokio::test]
async fn test_failed_pre_hook_stops_backup() {
    let executor = MockExecutor::new().expect("sh", MockResponse::failure("pg_dump: connection refused"));
    let harness = SidecarHarness::with_mocks(ConfigBuilder::deployment("api"), MockResticOps::new(), executor);
    let mut session = backup_session("nightly-8", "Deployment", "api");
    session.spec.target.hooks.pre_backup = Some(Hook {
        command: "pg_dump -f /data/dump.sql".to_string(),
        working_dir: None,
        timeout_seconds: Some(30),
    });
    let key = harness.insert_backup_session(session);

    harness.backup_controller().process(&key).await.unwrap();

    assert_eq!(harness.restic.backup_count(), 0);
    assert!(harness.restic.unlock_called());
    let session = harness.backup_session("nightly-8");
    assert_eq!(session.status.phase, SessionPhase::Failed);
    let error = session.status.stats[0].error.as_deref().unwrap();
    assert!(error.contains("Pre-backup hook failed"));
    assert!(error.contains("pg_dump: connection refused"));
}
