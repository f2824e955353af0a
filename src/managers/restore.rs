//! Restore session controller

use super::context::SessionContext;
use super::events::REASON_HOST_RESTORE_FAILED;
use super::failure;
use super::queue::Reconcile;
use crate::api::{HostStats, ObjectKey, RestoreRule, RestoreSession, SessionPhase};
use crate::store::{update_with_retry, Record};
use crate::utils::host::{lease_key, requires_election, HostIdentity, Operation};
use crate::utils::output::{format_duration, RestoreOutput, TargetStatus};
use crate::utils::restic_ops::RestoreOptions;
use anyhow::{Context, Result};
use chrono::Utc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct RestoreSessionController {
    ctx: SessionContext,
}

impl RestoreSessionController {
    pub fn new(ctx: SessionContext) -> Self {
        Self { ctx }
    }

    pub async fn process(&self, key: &ObjectKey) -> Result<()> {
        let session = match self.ctx.stores.restore_sessions.get(key) {
            Ok(session) => session,
            Err(e) if e.is_not_found() => {
                debug!("Restore session {} no longer exists", key);
                return Ok(());
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to read restore session {}", key)),
        };

        if !self.ctx.config.target.matches(&session.spec.target.target_ref) {
            debug!("Restore session {} targets another workload, ignoring", key);
            return Ok(());
        }
        if session.status.phase.is_terminal() {
            return Ok(());
        }

        if session.status.phase == SessionPhase::Pending
            && self
                .ctx
                .invoker_paused(&key.namespace, session.spec.invoker.as_ref())?
        {
            info!("Invoker of restore session {} is paused, skipping", key);
            update_with_retry(self.ctx.stores.restore_sessions.as_ref(), key, |s| {
                if s.status.phase == SessionPhase::Pending {
                    s.status.phase = SessionPhase::Skipped;
                }
            })
            .with_context(|| format!("Failed to mark restore session {} skipped", key))?;
            return Ok(());
        }

        let host = match self.ctx.host_identity(session.spec.target.alias.as_deref()) {
            Ok(host) => host,
            Err(e) => {
                error!("Cannot determine host for restore session {}: {}", key, e);
                self.ctx.record_unattributed_failure(
                    RestoreSession::KIND,
                    key,
                    REASON_HOST_RESTORE_FAILED,
                    &e.to_string(),
                );
                return Ok(());
            }
        };

        if session.status.is_processed_for(&host.hostname) {
            debug!("Restore session {} already has a result for {}", key, host.hostname);
            return Ok(());
        }

        let total_hosts = self.ctx.config.target.total_hosts();
        update_with_retry(self.ctx.stores.restore_sessions.as_ref(), key, |s| {
            s.status.mark_running(total_hosts, Utc::now())
        })
        .with_context(|| format!("Failed to mark restore session {} running", key))?;

        let target = &self.ctx.config.target;
        let kind = target.workload_kind();
        let lease = requires_election(&kind).then(|| lease_key(&kind, &target.name, Operation::Restore));

        let this = self.clone();
        let attempt_key = key.clone();
        self.ctx
            .run_attempt(lease, move || this.attempt(&attempt_key, &host))
            .await?
    }

    fn attempt(&self, key: &ObjectKey, host: &HostIdentity) -> Result<()> {
        let session = match self.ctx.stores.restore_sessions.get(key) {
            Ok(session) => session,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e).with_context(|| format!("Failed to read restore session {}", key)),
        };
        if session.status.is_processed_for(&host.hostname) {
            info!("Restore session {} was completed for {} elsewhere", key, host.hostname);
            return Ok(());
        }

        info!("Starting restore of {} for session {}", host.hostname, key);
        let output = match self.execute(&session, host) {
            Ok(output) => output,
            Err(e) => {
                error!("Restore of {} for session {} failed: {:#}", host.hostname, key, e);
                failure::failed_restore(session.spec.target.target_ref.clone(), &host.hostname, &e)
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

        self.ctx.status.update_restore_status(key, &output)?;
        Ok(())
    }

    fn execute(&self, session: &RestoreSession, host: &HostIdentity) -> Result<RestoreOutput> {
        let started = Instant::now();
        let spec = &session.spec;
        let done = |started: Instant| RestoreOutput {
            target_status: TargetStatus {
                target_ref: spec.target.target_ref.clone(),
                stats: vec![HostStats::succeeded(
                    &host.hostname,
                    format_duration(started.elapsed()),
                    Vec::new(),
                )],
            },
        };

        let Some(rule) = spec.target.rule_for(&host.hostname) else {
            info!("No restore rule matches {}, nothing to restore", host.hostname);
            return Ok(done(started));
        };

        self.ctx
            .run_hook(spec.target.hooks.pre_restore.as_ref(), "pre-restore")
            .context("Pre-restore hook failed")?;

        let restore_result = self.restore_rule(session, host, rule);

        // The post hook runs whatever the restore did
        let post_result = self
            .ctx
            .run_hook(spec.target.hooks.post_restore.as_ref(), "post-restore");

        let source_host = restore_result?;
        post_result.context("Post-restore hook failed")?;

        info!(
            "Restored {} from host {} in {}",
            host.hostname,
            source_host,
            format_duration(started.elapsed())
        );
        Ok(done(started))
    }

    /// Restore what `rule` selects, returning the source host
    fn restore_rule(&self, session: &RestoreSession, host: &HostIdentity, rule: &RestoreRule) -> Result<String> {
        let spec = &session.spec;
        let backend = self
            .ctx
            .resolve_backend(&session.metadata.namespace, &spec.repository.name)?;
        let opts = RestoreOptions {
            source_host: rule
                .source_host
                .clone()
                .unwrap_or_else(|| host.hostname.clone()),
            destination: spec.destination.clone(),
            snapshots: rule.snapshots.clone(),
            paths: rule.paths.clone(),
            include: rule.include.clone(),
            exclude: rule.exclude.clone(),
        };
        self.ctx
            .restic
            .restore(&backend, &opts)
            .context("restic restore failed")?;
        Ok(opts.source_host)
    }
}

impl Reconcile<ObjectKey> for RestoreSessionController {
    async fn reconcile(&self, key: ObjectKey) -> Result<()> {
        self.process(&key).await
    }
}
