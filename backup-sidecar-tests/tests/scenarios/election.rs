//! Replicas sharing one host take turns through the lease

use backup_sidecar::api::ObjectKey;
use std::time::Duration;
use test_utils::{ConfigBuilder, MockResticOps, SessionPhase, SidecarHarness};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_only_one_deployment_replica_backs_up() {
    let restic = MockResticOps::new().with_backup_delay(Duration::from_millis(500));
    let harness = SidecarHarness::with_restic(ConfigBuilder::deployment("api"), restic);
    let (second, _second_dir) = ConfigBuilder::deployment("api")
        .with_pod("api-7d9f8-m3n5p")
        .build();
    let key = harness.create_backup_session("nightly-1");

    let first = harness.backup_controller();
    let second = harness.backup_controller_for(second);
    let (a, b) = tokio::join!(first.process(&key), second.process(&key));
    a.unwrap();
    b.unwrap();

    assert_eq!(harness.restic.backup_count(), 1);
    let session = harness.backup_session("nightly-1");
    assert_eq!(session.status.phase, SessionPhase::Succeeded);
    assert_eq!(session.status.stats.len(), 1);
    assert_eq!(harness.events().len(), 1);

    let lease = harness
        .stores
        .leases
        .get(&ObjectKey::new("demo", "lock-deployment-api-backup"))
        .unwrap();
    assert!(lease.spec.holder_identity.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_statefulset_replicas_do_not_elect() {
    let harness = SidecarHarness::new(ConfigBuilder::stateful_set("web", 2, 0));
    let (second, _second_dir) = ConfigBuilder::stateful_set("web", 2, 1).build();
    let key = harness.create_backup_session("nightly-2");

    let first = harness.backup_controller();
    let second = harness.backup_controller_for(second);
    let (a, b) = tokio::join!(first.process(&key), second.process(&key));
    a.unwrap();
    b.unwrap();

    assert_eq!(harness.restic.backup_count(), 2);
    let session = harness.backup_session("nightly-2");
    assert_eq!(session.status.phase, SessionPhase::Succeeded);
    let mut hosts: Vec<_> = session.status.stats.iter().map(|s| s.hostname.as_str()).collect();
    hosts.sort();
    assert_eq!(hosts, vec!["host-0", "host-1"]);
    assert!(harness
        .stores
        .leases
        .list("demo", &backup_sidecar::api::LabelSelector::everything())
        .unwrap()
        .is_empty());
}
