//! Session controllers wired to in-memory stores and mocked restic
//!
//! Several replicas of one workload share the harness stores and mocks, so
//! a test can run them side by side and count what reached restic.

use crate::config_builder::ConfigBuilder;
use crate::fixtures::{self, NAMESPACE};
use backup_sidecar::api::{
    BackupSession, Event, LabelSelector, ObjectKey, RestoreRule, RestoreSession,
};
use backup_sidecar::config::Config;
use backup_sidecar::managers::{BackupSessionController, RestoreSessionController, SessionContext};
use backup_sidecar::store::Stores;
use backup_sidecar::utils::executor::mock::MockExecutor;
use backup_sidecar::utils::restic_ops::mock::MockResticOps;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

pub struct SidecarHarness {
    pub stores: Stores,
    pub restic: Arc<MockResticOps>,
    pub executor: Arc<MockExecutor>,
    pub config: Config,
    temp_dir: TempDir,
}

impl SidecarHarness {
    pub fn new(builder: ConfigBuilder) -> Self {
        Self::with_mocks(builder, MockResticOps::new(), MockExecutor::new())
    }

    pub fn with_restic(builder: ConfigBuilder, restic: MockResticOps) -> Self {
        Self::with_mocks(builder, restic, MockExecutor::new())
    }

    /// Seed the repository and its secret, then keep the mocks for inspection
    pub fn with_mocks(builder: ConfigBuilder, restic: MockResticOps, executor: MockExecutor) -> Self {
        let (config, temp_dir) = builder.build();
        let stores = Stores::in_memory();
        stores
            .repositories
            .create(fixtures::local_repository(temp_dir.path()))
            .expect("Failed to seed repository");
        stores
            .secrets
            .create(fixtures::password_secret())
            .expect("Failed to seed secret");

        Self {
            stores,
            restic: Arc::new(restic),
            executor: Arc::new(executor),
            config,
            temp_dir,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Context of the replica described by the harness config
    pub fn context(&self) -> SessionContext {
        self.context_for(self.config.clone())
    }

    /// Context of another replica sharing the stores and mocks
    pub fn context_for(&self, config: Config) -> SessionContext {
        let identity = config.identity.pod_name.clone();
        SessionContext::new(
            config,
            self.stores.clone(),
            self.executor.clone(),
            self.restic.clone(),
            identity,
        )
    }

    pub fn backup_controller(&self) -> BackupSessionController {
        BackupSessionController::new(self.context())
    }

    pub fn backup_controller_for(&self, config: Config) -> BackupSessionController {
        BackupSessionController::new(self.context_for(config))
    }

    pub fn restore_controller(&self) -> RestoreSessionController {
        RestoreSessionController::new(self.context())
    }

    pub fn restore_controller_for(&self, config: Config) -> RestoreSessionController {
        RestoreSessionController::new(self.context_for(config))
    }

    /// Store a pending backup session for the configured workload
    pub fn create_backup_session(&self, name: &str) -> ObjectKey {
        let target = &self.config.target;
        self.insert_backup_session(fixtures::backup_session(name, &target.kind, &target.name))
    }

    pub fn insert_backup_session(&self, session: BackupSession) -> ObjectKey {
        self.stores
            .backup_sessions
            .create(session)
            .expect("Failed to create backup session")
            .metadata
            .key()
    }

    /// Store a pending restore session for the configured workload
    pub fn create_restore_session(&self, name: &str, rules: Vec<RestoreRule>) -> ObjectKey {
        let target = &self.config.target;
        self.insert_restore_session(fixtures::restore_session(name, &target.kind, &target.name, rules))
    }

    pub fn insert_restore_session(&self, session: RestoreSession) -> ObjectKey {
        self.stores
            .restore_sessions
            .create(session)
            .expect("Failed to create restore session")
            .metadata
            .key()
    }

    pub fn backup_session(&self, name: &str) -> BackupSession {
        self.stores
            .backup_sessions
            .get(&ObjectKey::new(NAMESPACE, name))
            .expect("Backup session not found")
    }

    pub fn restore_session(&self, name: &str) -> RestoreSession {
        self.stores
            .restore_sessions
            .get(&ObjectKey::new(NAMESPACE, name))
            .expect("Restore session not found")
    }

    /// All events recorded in the namespace
    pub fn events(&self) -> Vec<Event> {
        self.stores
            .events
            .list(NAMESPACE, &LabelSelector::everything())
            .expect("Failed to list events")
    }
}
