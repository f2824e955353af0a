//! Backup session controller - runs this host's part of a backup session

use super::context::SessionContext;
use super::events::REASON_HOST_BACKUP_FAILED;
use super::failure;
use super::queue::Reconcile;
use crate::api::{BackupSession, HostStats, ObjectKey, RepositoryStats, SessionPhase};
use crate::store::{update_with_retry, Record};
use crate::utils::backend::BackendConfig;
use crate::utils::host::{lease_key, requires_election, HostIdentity, Operation};
use crate::utils::output::{format_duration, BackupOutput, TargetStatus};
use crate::utils::restic_ops::{BackupOptions, BackupSource};
use anyhow::{Context, Result};
use chrono::Utc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct BackupSessionController {
    ctx: SessionContext,
}

impl BackupSessionController {
    pub fn new(ctx: SessionContext) -> Self {
        Self { ctx }
    }

    /// One reconcile pass for a session
    ///
    /// Returns `Err` only for record store failures; everything that goes
    /// wrong while backing up is written to the session as a failed host.
    pub async fn process(&self, key: &ObjectKey) -> Result<()> {
        let session = match self.ctx.stores.backup_sessions.get(key) {
            Ok(session) => session,
            Err(e) if e.is_not_found() => {
                debug!("Backup session {} no longer exists", key);
                return Ok(());
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to read backup session {}", key)),
        };

        if !self.ctx.config.target.matches(&session.spec.target.target_ref) {
            debug!("Backup session {} targets another workload, ignoring", key);
            return Ok(());
        }
        if session.status.phase.is_terminal() {
            debug!("Backup session {} is already {:?}", key, session.status.phase);
            return Ok(());
        }

        if session.status.phase == SessionPhase::Pending
            && self
                .ctx
                .invoker_paused(&key.namespace, session.spec.invoker.as_ref())?
        {
            info!("Invoker of backup session {} is paused, skipping", key);
            update_with_retry(self.ctx.stores.backup_sessions.as_ref(), key, |s| {
                if s.status.phase == SessionPhase::Pending {
                    s.status.phase = SessionPhase::Skipped;
                }
            })
            .with_context(|| format!("Failed to mark backup session {} skipped", key))?;
            return Ok(());
        }

        let host = match self.ctx.host_identity(session.spec.target.alias.as_deref()) {
            Ok(host) => host,
            Err(e) => {
                error!("Cannot determine host for backup session {}: {}", key, e);
                self.ctx.record_unattributed_failure(
                    BackupSession::KIND,
                    key,
                    REASON_HOST_BACKUP_FAILED,
                    &e.to_string(),
                );
                return Ok(());
            }
        };

        if session.status.is_processed_for(&host.hostname) {
            debug!("Backup session {} already has a result for {}", key, host.hostname);
            return Ok(());
        }

        let total_hosts = self.ctx.config.target.total_hosts();
        update_with_retry(self.ctx.stores.backup_sessions.as_ref(), key, |s| {
            s.status.mark_running(total_hosts, Utc::now())
        })
        .with_context(|| format!("Failed to mark backup session {} running", key))?;

        let target = &self.ctx.config.target;
        let kind = target.workload_kind();
        let lease = requires_election(&kind).then(|| lease_key(&kind, &target.name, Operation::Backup));

        let this = self.clone();
        let attempt_key = key.clone();
        self.ctx
            .run_attempt(lease, move || this.attempt(&attempt_key, &host))
            .await?
    }

    /// Runs while holding the lease, if any
    fn attempt(&self, key: &ObjectKey, host: &HostIdentity) -> Result<()> {
        // Another replica may have finished this host while we waited for the lease
        let session = match self.ctx.stores.backup_sessions.get(key) {
            Ok(session) => session,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e).with_context(|| format!("Failed to read backup session {}", key)),
        };
        if session.status.is_processed_for(&host.hostname) {
            info!("Backup session {} was completed for {} elsewhere", key, host.hostname);
            return Ok(());
        }

        info!("Starting backup of {} for session {}", host.hostname, key);
        let output = match self.execute(&session, host) {
            Ok(output) => {
                info!("Backup of {} for session {} succeeded", host.hostname, key);
                output
            }
            Err(e) => {
                error!("Backup of {} for session {} failed: {:#}", host.hostname, key, e);
                failure::failed_backup(session.spec.target.target_ref.clone(), &host.hostname, &e)
            }
        };

        if let Some(ref dir) = self.ctx.config.restic.output_dir {
            let path = crate::config::expand_tilde(dir)
                .join(&key.name)
                .join("output.json");
            if let Err(e) = output.write_output(&path) {
                warn!("Failed to write {:?}: {:#}", path, e);
            }
        }

        self.ctx.status.update_backup_status(key, &output)?;
        Ok(())
    }

    fn execute(&self, session: &BackupSession, host: &HostIdentity) -> Result<BackupOutput> {
        let backend = self
            .ctx
            .resolve_backend(&session.metadata.namespace, &session.spec.repository.name)?;

        let result = self.run_backup(session, host, &backend);
        if result.is_err() {
            if let Err(e) = self.ctx.restic.unlock(&backend) {
                warn!("Failed to unlock repository after error: {}", e);
            }
        }
        result
    }

    fn run_backup(
        &self,
        session: &BackupSession,
        host: &HostIdentity,
        backend: &BackendConfig,
    ) -> Result<BackupOutput> {
        let started = Instant::now();
        let spec = &session.spec;
        let restic = &self.ctx.restic;

        self.ctx
            .run_hook(spec.target.hooks.pre_backup.as_ref(), "pre-backup")
            .context("Pre-backup hook failed")?;

        restic
            .ensure_repository(backend)
            .context("Failed to initialize repository")?;

        let source = match spec.target.stdin {
            Some(ref stdin) => BackupSource::Stdin {
                command: stdin.command.clone(),
                file_name: stdin.file_name.clone(),
            },
            None => BackupSource::Paths(spec.target.paths.clone()),
        };
        let mut tags = vec![host.path_prefix.clone()];
        tags.extend(spec.tags.iter().cloned());
        let opts = BackupOptions {
            host: host.hostname.clone(),
            source,
            exclude: spec.target.exclude.clone(),
            tags,
        };
        let backup_result = restic.backup(backend, &opts);

        // The post hook runs whatever the backup did
        let post_result = self
            .ctx
            .run_hook(spec.target.hooks.post_backup.as_ref(), "post-backup");

        let snapshots = backup_result.context("restic backup failed")?;
        post_result.context("Post-backup hook failed")?;

        let removed = restic
            .cleanup(backend, &spec.retention_policy, &host.hostname)
            .context("Failed to apply retention policy")?
            .map(|(_, removed)| removed)
            .unwrap_or(0);
        let integrity = restic.check(backend).context("Failed to check repository")?;
        let size = restic.stats(backend).context("Failed to read repository stats")?;
        let snapshot_count = restic
            .list_snapshots(backend, &[])
            .context("Failed to list snapshots")?
            .len() as i64;

        Ok(BackupOutput {
            target_status: TargetStatus {
                target_ref: spec.target.target_ref.clone(),
                stats: vec![HostStats::succeeded(
                    &host.hostname,
                    format_duration(started.elapsed()),
                    snapshots,
                )],
            },
            repository_stats: Some(RepositoryStats {
                integrity: Some(integrity),
                size,
                snapshot_count,
                snapshots_removed_on_last_cleanup: removed,
            }),
        })
    }
}

impl Reconcile<ObjectKey> for BackupSessionController {
    async fn reconcile(&self, key: ObjectKey) -> Result<()> {
        self.process(&key).await
    }
}
