//! Controllers driven by store watches

use backup_sidecar::api::BackupSession;
use backup_sidecar::config::QueueConfig;
use backup_sidecar::managers::Controller;
use std::sync::Arc;
use std::time::Duration;
use test_utils::{ConfigBuilder, SessionPhase, SidecarHarness};
use tokio::sync::oneshot;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_controller_picks_up_new_session() {
    let harness = SidecarHarness::new(ConfigBuilder::stateful_set("web", 1, 0));
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let controller = Controller::<BackupSession>::new(
        harness.stores.backup_sessions.clone(),
        "demo",
        &QueueConfig::default(),
    );
    let reconciler = Arc::new(harness.backup_controller());
    let running = tokio::spawn(controller.run(reconciler, async move {
        let _ = stop_rx.await;
    }));

    harness.create_backup_session("nightly-1");

    let mut phase = SessionPhase::Pending;
    for _ in 0..50 {
        phase = harness.backup_session("nightly-1").status.phase;
        if phase.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let _ = stop_tx.send(());
    running.await.unwrap();

    assert_eq!(phase, SessionPhase::Succeeded);
    assert_eq!(harness.restic.backup_count(), 1);
}
