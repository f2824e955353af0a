//! Restore sessions across replicas

use backup_sidecar::api::{Hook, RestoreRule};
use test_utils::{
    restore_session, ConfigBuilder, HostPhase, MockExecutor, MockResponse, MockResticOps, ResticCall,
    SessionPhase, SidecarHarness,
};

fn restore_latest() -> Vec<RestoreRule> {
    vec![RestoreRule {
        snapshots: vec!["latest".to_string()],
        paths: vec!["/data".to_string()],
        ..Default::default()
    }]
}

#[tokio::test]
async fn test_restore_across_statefulset_replicas() {
    let harness = SidecarHarness::new(ConfigBuilder::stateful_set("db", 2, 0));
    let (second, _second_dir) = ConfigBuilder::stateful_set("db", 2, 1).build();
    let key = harness.create_restore_session("restore-1", restore_latest());

    harness.restore_controller().process(&key).await.unwrap();
    assert_eq!(harness.restore_session("restore-1").status.phase, SessionPhase::Running);

    harness.restore_controller_for(second).process(&key).await.unwrap();

    let session = harness.restore_session("restore-1");
    assert_eq!(session.status.phase, SessionPhase::Succeeded);
    assert_eq!(session.status.total_hosts, Some(2));
    assert!(session.status.stats.iter().all(|s| s.phase == HostPhase::Succeeded));

    let calls = harness.restic.get_calls();
    for host in ["host-0", "host-1"] {
        assert!(calls.contains(&ResticCall::Restore {
            source_host: host.to_string(),
            snapshots: vec!["latest".to_string()],
        }));
    }
}

#[tokio::test]
async fn test_one_failed_replica_fails_the_session() {
    let restic = MockResticOps::new().with_failing_restore("Fatal: no matching ID found");
    let harness = SidecarHarness::with_restic(ConfigBuilder::stateful_set("db", 1, 0), restic);
    let key = harness.create_restore_session("restore-2", restore_latest());

    harness.restore_controller().process(&key).await.unwrap();

    let session = harness.restore_session("restore-2");
    assert_eq!(session.status.phase, SessionPhase::Failed);
    let error = session.status.stats[0].error.as_deref().unwrap();
    assert!(error.starts_with("failed to complete restore for host host-0. Reason:"));

    // Failed sessions are terminal
    harness.restore_controller().process(&key).await.unwrap();
    assert_eq!(harness.restic.get_calls().len(), 1);
}

#[tokio::test]
async fn test_rule_for_other_host_leaves_nothing_to_restore() {
    let harness = SidecarHarness::new(ConfigBuilder::stateful_set("db", 1, 0));
    let rules = vec![RestoreRule {
        target_hosts: vec!["host-3".to_string()],
        snapshots: vec!["latest".to_string()],
        ..Default::default()
    }];
    let key = harness.create_restore_session("restore-3", rules);

    harness.restore_controller().process(&key).await.unwrap();

    assert!(!harness.restic.restore_called());
    assert_eq!(harness.restore_session("restore-3").status.phase, SessionPhase::Succeeded);
}

fn hook(command: &str) -> Option<Hook> {
    Some(Hook {
        command: command.to_string(),
        working_dir: None,
        timeout_seconds: Some(30),
    })
}

#[tokio::test]
async fn test_failed_pre_restore_hook_skips_restore() {
    let executor = MockExecutor::new().expect_subcommand(
        "sh",
        "systemctl stop postgres",
        MockResponse::failure("Failed to stop postgres.service"),
    );
    let harness = SidecarHarness::with_mocks(ConfigBuilder::stateful_set("db", 1, 0), MockResticOps::new(), executor);
    let mut session = restore_session("restore-4", "StatefulSet", "db", restore_latest());
    session.spec.target.hooks.pre_restore = hook("systemctl stop postgres");
    let key = harness.insert_restore_session(session);

    harness.restore_controller().process(&key).await.unwrap();

    assert!(!harness.restic.restore_called());
    let session = harness.restore_session("restore-4");
    assert_eq!(session.status.phase, SessionPhase::Failed);
    let error = session.status.stats[0].error.as_deref().unwrap();
    assert!(error.contains("Pre-restore hook failed"));
    assert!(error.contains("Failed to stop postgres.service"));
}

#[tokio::test]
async fn test_post_restore_hook_runs_after_failed_restore() {
    let restic = MockResticOps::new().with_failing_restore("Fatal: no matching ID found");
    let harness = SidecarHarness::with_restic(ConfigBuilder::stateful_set("db", 1, 0), restic);
    let mut session = restore_session("restore-5", "StatefulSet", "db", restore_latest());
    session.spec.target.hooks.pre_restore = hook("systemctl stop postgres");
    session.spec.target.hooks.post_restore = hook("systemctl start postgres");
    let key = harness.insert_restore_session(session);

    harness.restore_controller().process(&key).await.unwrap();

    let scripts: Vec<String> = harness
        .executor
        .get_calls()
        .iter()
        .filter(|c| c.program == "sh")
        .filter_map(|c| c.args.last().cloned())
        .collect();
    assert_eq!(scripts, vec!["systemctl stop postgres", "systemctl start postgres"]);

    let session = harness.restore_session("restore-5");
    assert_eq!(session.status.phase, SessionPhase::Failed);
    let error = session.status.stats[0].error.as_deref().unwrap();
    assert!(error.contains("Fatal: no matching ID found"));
}
