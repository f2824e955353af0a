//! Write a host result back into its session
//!
//! The session record is shared by every host of a workload, so each write
//! is a read-modify-write retried on conflict. The host entry is upserted by
//! hostname and the overall phase recomputed from all entries.

use super::events::{
    EventRecorder, REASON_HOST_BACKUP_FAILED, REASON_HOST_BACKUP_SUCCEEDED,
    REASON_HOST_RESTORE_FAILED, REASON_HOST_RESTORE_SUCCEEDED,
};
use super::metrics::{MetricsEmitter, SessionLabels};
use crate::api::{
    BackupSession, EventType, HostPhase, HostStats, InvokerRef, ObjectKey, ObjectReference,
    Repository, RestoreSession,
};
use crate::store::{update_with_retry, Record, Store};
use crate::utils::host::Operation;
use crate::utils::output::{read_backup_output, read_restore_output, BackupOutput, RestoreOutput};
use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub struct StatusUpdater {
    backup_sessions: Arc<dyn Store<BackupSession>>,
    restore_sessions: Arc<dyn Store<RestoreSession>>,
    repositories: Arc<dyn Store<Repository>>,
    recorder: Arc<dyn EventRecorder>,
    metrics: Arc<MetricsEmitter>,
}

fn session_labels(invoker: Option<&InvokerRef>, namespace: &str, repository: &str) -> SessionLabels {
    SessionLabels {
        invoker_kind: invoker.map(|i| i.kind.clone()).unwrap_or_default(),
        invoker_name: invoker.map(|i| i.name.clone()).unwrap_or_default(),
        namespace: namespace.to_string(),
        repository: repository.to_string(),
    }
}

fn reference<T: Record>(obj: &T) -> ObjectReference {
    ObjectReference {
        kind: T::KIND.to_string(),
        name: obj.meta().name.clone(),
        namespace: obj.meta().namespace.clone(),
    }
}

impl StatusUpdater {
    pub fn new(
        backup_sessions: Arc<dyn Store<BackupSession>>,
        restore_sessions: Arc<dyn Store<RestoreSession>>,
        repositories: Arc<dyn Store<Repository>>,
        recorder: Arc<dyn EventRecorder>,
        metrics: Arc<MetricsEmitter>,
    ) -> Self {
        Self {
            backup_sessions,
            restore_sessions,
            repositories,
            recorder,
            metrics,
        }
    }

    pub fn update_backup_status(&self, key: &ObjectKey, output: &BackupOutput) -> Result<BackupSession> {
        let session = update_with_retry(self.backup_sessions.as_ref(), key, |session| {
            for stats in &output.target_status.stats {
                session.status.upsert_host_stats(stats.clone());
            }
            session.status.reconcile_phase(Utc::now());
        })
        .with_context(|| format!("Failed to update status of backup session {}", key))?;
        info!("Backup session {} is now {:?}", key, session.status.phase);

        let repo_name = &session.spec.repository.name;
        if let Some(ref repo_stats) = output.repository_stats {
            let repo_key = ObjectKey::new(&key.namespace, repo_name);
            // The session outcome is already recorded; a stale repository status is tolerable
            if let Err(e) = update_with_retry(self.repositories.as_ref(), &repo_key, |repo| {
                repo.status = repo_stats.clone();
            }) {
                warn!("Failed to update status of repository {}: {}", repo_key, e);
            }
        }

        let involved = reference(&session);
        let labels = session_labels(session.spec.invoker.as_ref(), &key.namespace, repo_name);
        for host in &output.target_status.stats {
            self.record_host_event(&involved, host, Operation::Backup);
            self.metrics.emit_backup(
                &labels,
                &session.status,
                host,
                output.repository_stats.as_ref(),
            );
        }

        Ok(session)
    }

    pub fn update_restore_status(&self, key: &ObjectKey, output: &RestoreOutput) -> Result<RestoreSession> {
        let session = update_with_retry(self.restore_sessions.as_ref(), key, |session| {
            for stats in &output.target_status.stats {
                session.status.upsert_host_stats(stats.clone());
            }
            session.status.reconcile_phase(Utc::now());
        })
        .with_context(|| format!("Failed to update status of restore session {}", key))?;
        info!("Restore session {} is now {:?}", key, session.status.phase);

        let involved = reference(&session);
        let labels = session_labels(
            session.spec.invoker.as_ref(),
            &key.namespace,
            &session.spec.repository.name,
        );
        for host in &output.target_status.stats {
            self.record_host_event(&involved, host, Operation::Restore);
            self.metrics.emit_restore(&labels, &session.status, host);
        }

        Ok(session)
    }

    /// Apply an output file written by an earlier run
    pub fn update_backup_status_from_file(&self, key: &ObjectKey, path: &Path) -> Result<BackupSession> {
        let output = read_backup_output(path)?;
        self.update_backup_status(key, &output)
    }

    pub fn update_restore_status_from_file(&self, key: &ObjectKey, path: &Path) -> Result<RestoreSession> {
        let output = read_restore_output(path)?;
        self.update_restore_status(key, &output)
    }

    fn record_host_event(&self, involved: &ObjectReference, host: &HostStats, operation: Operation) {
        let (event_type, reason) = match (operation, host.phase) {
            (Operation::Backup, HostPhase::Succeeded) => (EventType::Normal, REASON_HOST_BACKUP_SUCCEEDED),
            (Operation::Backup, HostPhase::Failed) => (EventType::Warning, REASON_HOST_BACKUP_FAILED),
            (Operation::Restore, HostPhase::Succeeded) => (EventType::Normal, REASON_HOST_RESTORE_SUCCEEDED),
            (Operation::Restore, HostPhase::Failed) => (EventType::Warning, REASON_HOST_RESTORE_FAILED),
        };
        let message = match host.error {
            Some(ref error) => error.clone(),
            None => format!(
                "{} for host {} succeeded",
                operation.as_str(),
                host.hostname
            ),
        };
        self.recorder.record(involved, event_type, reason, &message);
    }
}
