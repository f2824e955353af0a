//! Dependencies shared by the backup and restore controllers

use super::election::{LeaderElector, LeaseTiming};
use super::events::{EventRecorder, StoreEventRecorder};
use super::metrics::{MetricsEmitter, MetricsOptions};
use super::status::StatusUpdater;
use crate::api::{EventType, Hook, Invoker, InvokerRef, ObjectKey, ObjectReference};
use crate::config::Config;
use crate::store::Stores;
use crate::utils::backend::{self, BackendConfig};
use crate::utils::host::{self, HostError, HostIdentity};
use crate::utils::{CommandExecutor, ResticOperations};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Everything a session attempt needs, held behind `Arc`s
#[derive(Clone)]
pub struct SessionContext {
    pub config: Arc<Config>,
    pub stores: Stores,
    pub executor: Arc<dyn CommandExecutor>,
    pub restic: Arc<dyn ResticOperations>,
    pub elector: Arc<LeaderElector>,
    pub recorder: Arc<dyn EventRecorder>,
    pub status: Arc<StatusUpdater>,
}

impl SessionContext {
    /// Wire the default collaborators around the given stores and tools
    pub fn new(
        config: Config,
        stores: Stores,
        executor: Arc<dyn CommandExecutor>,
        restic: Arc<dyn ResticOperations>,
        identity: impl Into<String>,
    ) -> Self {
        let elector = Arc::new(LeaderElector::new(
            stores.leases.clone(),
            config.identity.namespace.clone(),
            identity,
            LeaseTiming::from_config(&config.election),
        ));
        let recorder: Arc<dyn EventRecorder> = Arc::new(StoreEventRecorder::new(stores.events.clone()));
        let metrics = Arc::new(MetricsEmitter::new(MetricsOptions::from_config(&config.metrics)));
        let status = Arc::new(StatusUpdater::new(
            stores.backup_sessions.clone(),
            stores.restore_sessions.clone(),
            stores.repositories.clone(),
            recorder.clone(),
            metrics,
        ));

        Self {
            config: Arc::new(config),
            stores,
            executor,
            restic,
            elector,
            recorder,
            status,
        }
    }

    /// Host identity of this replica; the session alias wins over the configured one
    pub fn host_identity(&self, session_alias: Option<&str>) -> Result<HostIdentity, HostError> {
        let identity = &self.config.identity;
        let target = &self.config.target;
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        let alias = session_alias
            .and_then(non_empty)
            .or_else(|| target.alias.as_deref().and_then(non_empty));
        host::resolve_host(
            &target.workload_kind(),
            &target.name,
            Some(identity.pod_name.as_str()),
            Some(identity.node_name.as_str()),
            alias.as_deref(),
        )
    }

    /// Pending sessions of a paused invoker are skipped; a missing invoker is not paused
    pub fn invoker_paused(&self, namespace: &str, invoker: Option<&InvokerRef>) -> Result<bool> {
        let Some(invoker) = invoker else {
            return Ok(false);
        };
        match self.stores.invokers.get(&ObjectKey::new(namespace, &invoker.name)) {
            Ok(Invoker { spec, .. }) => Ok(spec.paused),
            Err(e) if e.is_not_found() => {
                debug!("Invoker {}/{} not found", namespace, invoker.name);
                Ok(false)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to read invoker {}", invoker.name)),
        }
    }

    /// Look up the repository and its secret, then resolve the backend
    pub fn resolve_backend(&self, namespace: &str, repository: &str) -> Result<BackendConfig> {
        let repo = self
            .stores
            .repositories
            .get(&ObjectKey::new(namespace, repository))
            .with_context(|| format!("Failed to read repository {}", repository))?;
        let secret_name = &repo.spec.backend.storage_secret_name;
        let secret = self
            .stores
            .secrets
            .get(&ObjectKey::new(namespace, secret_name))
            .with_context(|| format!("Failed to read storage secret {}", secret_name))?;

        let config = backend::resolve(&repo, &secret.data, &self.config.restic.setup_options())
            .with_context(|| format!("Failed to configure backend of repository {}", repository))?;
        debug!("Resolved {} backend for repository {}", config.provider, repository);
        Ok(config)
    }

    /// Run a hook; a non-zero exit is an error
    pub fn run_hook(&self, hook: Option<&Hook>, name: &str) -> Result<()> {
        let Some(hook) = hook else {
            return Ok(());
        };
        info!("Running {} hook", name);
        let output = self
            .executor
            .run_shell_command(
                &hook.command,
                hook.working_dir.as_deref().map(Path::new),
                hook.timeout_seconds.map(Duration::from_secs),
            )
            .with_context(|| format!("Failed to run {} hook", name))?;
        if !output.success() {
            anyhow::bail!(
                "{} hook exited with {:?}: {}",
                name,
                output.exit_code,
                output.last_line().unwrap_or_default()
            );
        }
        Ok(())
    }

    /// Run `attempt` on the blocking pool, holding the lease when one is given
    pub async fn run_attempt<T, F>(&self, lease: Option<String>, attempt: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        match lease {
            Some(lease) => {
                let outcome = self
                    .elector
                    .run_exclusive(&lease, |_leadership| tokio::task::spawn_blocking(attempt))
                    .await?;
                if outcome.is_lost() {
                    warn!("Lease {} was lost before the attempt finished", lease);
                }
                Ok(outcome.into_inner()?)
            }
            None => Ok(tokio::task::spawn_blocking(attempt).await?),
        }
    }

    /// Report a session that cannot be attributed to a host
    pub fn record_unattributed_failure(&self, kind: &str, key: &ObjectKey, reason: &str, message: &str) {
        let involved = ObjectReference {
            kind: kind.to_string(),
            name: key.name.clone(),
            namespace: key.namespace.clone(),
        };
        self.recorder.record(&involved, EventType::Warning, reason, message);
    }
}
