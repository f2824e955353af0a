//! Restic operations abstraction for testability
//!
//! This module provides a trait-based abstraction for restic operations,
//! enabling dependency injection and mocking for tests.

use super::backend::BackendConfig;
use super::executor::CommandExecutor;
use super::restic::{self, Restic, ResticError};
use crate::api::{RetentionPolicy, SnapshotStats};
use std::sync::Arc;
use std::time::Duration;

// Re-export types callers need alongside the trait
pub use super::output::Snapshot;
pub use super::restic::{BackupOptions, BackupSource, RestoreOptions};

/// Abstraction for restic operations, enabling mocking in tests
pub trait ResticOperations: Send + Sync {
    /// Initialize the repository unless it already exists
    fn ensure_repository(&self, backend: &BackendConfig) -> Result<(), ResticError>;

    /// Back up and return one stats entry per snapshot taken
    fn backup(
        &self,
        backend: &BackendConfig,
        opts: &BackupOptions,
    ) -> Result<Vec<SnapshotStats>, ResticError>;

    fn restore(&self, backend: &BackendConfig, opts: &RestoreOptions) -> Result<(), ResticError>;

    /// Repository integrity; a failing check is `Ok(false)`
    fn check(&self, backend: &BackendConfig) -> Result<bool, ResticError>;

    /// Apply retention to `host`'s snapshots, returning `(kept, removed)` or
    /// `None` when skipped
    fn cleanup(
        &self,
        backend: &BackendConfig,
        policy: &RetentionPolicy,
        host: &str,
    ) -> Result<Option<(i64, i64)>, ResticError>;

    /// Total repository size, formatted
    fn stats(&self, backend: &BackendConfig) -> Result<String, ResticError>;

    fn list_snapshots(
        &self,
        backend: &BackendConfig,
        ids: &[String],
    ) -> Result<Vec<Snapshot>, ResticError>;

    fn delete_snapshots(&self, backend: &BackendConfig, ids: &[String]) -> Result<(), ResticError>;

    /// Remove stale locks (useful after failures)
    fn unlock(&self, backend: &BackendConfig) -> Result<(), ResticError>;
}

/// Default implementation running the restic binary
#[derive(Clone)]
pub struct RealResticOps {
    executor: Arc<dyn CommandExecutor>,
    binary: String,
    timeout: Option<Duration>,
}

impl RealResticOps {
    pub fn new(executor: Arc<dyn CommandExecutor>, binary: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            executor,
            binary: binary.into(),
            timeout,
        }
    }

    fn restic<'a>(&'a self, backend: &'a BackendConfig) -> Restic<'a> {
        Restic::new(self.executor.as_ref(), &self.binary, backend, self.timeout)
    }
}

impl ResticOperations for RealResticOps {
    fn ensure_repository(&self, backend: &BackendConfig) -> Result<(), ResticError> {
        restic::ensure_repository(&self.restic(backend))
    }

    fn backup(
        &self,
        backend: &BackendConfig,
        opts: &BackupOptions,
    ) -> Result<Vec<SnapshotStats>, ResticError> {
        restic::backup(&self.restic(backend), opts)
    }

    fn restore(&self, backend: &BackendConfig, opts: &RestoreOptions) -> Result<(), ResticError> {
        restic::restore(&self.restic(backend), opts)
    }

    fn check(&self, backend: &BackendConfig) -> Result<bool, ResticError> {
        restic::check(&self.restic(backend))
    }

    fn cleanup(
        &self,
        backend: &BackendConfig,
        policy: &RetentionPolicy,
        host: &str,
    ) -> Result<Option<(i64, i64)>, ResticError> {
        restic::cleanup(&self.restic(backend), policy, host)
    }

    fn stats(&self, backend: &BackendConfig) -> Result<String, ResticError> {
        restic::stats(&self.restic(backend))
    }

    fn list_snapshots(
        &self,
        backend: &BackendConfig,
        ids: &[String],
    ) -> Result<Vec<Snapshot>, ResticError> {
        restic::list_snapshots(&self.restic(backend), ids)
    }

    fn delete_snapshots(&self, backend: &BackendConfig, ids: &[String]) -> Result<(), ResticError> {
        restic::delete_snapshots(&self.restic(backend), ids)
    }

    fn unlock(&self, backend: &BackendConfig) -> Result<(), ResticError> {
        restic::unlock(&self.restic(backend))
    }
}

/// Mock implementation for testing
/// Available for use in external test crates
pub mod mock {
    use super::*;
    use crate::api::FileStats;
    use std::sync::Mutex;

    /// Recorded operation call
    #[derive(Clone, Debug, PartialEq)]
    pub enum ResticCall {
        EnsureRepository,
        Backup { host: String, tags: Vec<String> },
        Restore { source_host: String, snapshots: Vec<String> },
        Check,
        Cleanup { policy: String, host: String },
        Stats,
        ListSnapshots { ids: Vec<String> },
        DeleteSnapshots { ids: Vec<String> },
        Unlock,
    }

    /// Mock restic operations for testing
    #[derive(Clone, Default)]
    pub struct MockResticOps {
        /// Recorded operation calls
        pub calls: Arc<Mutex<Vec<ResticCall>>>,
        /// Pre-configured snapshots to return
        pub snapshots: Arc<Mutex<Vec<Snapshot>>>,
        /// Error message for a failing backup
        pub backup_failure: Arc<Mutex<Option<String>>>,
        /// Error message for a failing restore
        pub restore_failure: Arc<Mutex<Option<String>>>,
        /// Whether ensure_repository should fail
        pub should_fail_init: Arc<Mutex<bool>>,
        /// Check result to return
        pub check_result: Arc<Mutex<bool>>,
        /// Cleanup result to return
        pub cleanup_result: Arc<Mutex<Option<(i64, i64)>>>,
        /// Stats to return
        pub stats: Arc<Mutex<String>>,
        /// Per-snapshot stats returned by backup
        pub snapshot_stats: Arc<Mutex<Option<SnapshotStats>>>,
        /// Time spent inside backup, to hold a lease open in tests
        pub backup_delay: Arc<Mutex<Option<Duration>>>,
    }

    impl MockResticOps {
        pub fn new() -> Self {
            Self {
                stats: Arc::new(Mutex::new("1.000 GiB".to_string())),
                check_result: Arc::new(Mutex::new(true)),
                ..Default::default()
            }
        }

        /// Configure snapshots to return
        pub fn with_snapshots(self, snapshots: Vec<Snapshot>) -> Self {
            *self.snapshots.lock().unwrap() = snapshots;
            self
        }

        /// Configure backup to fail with the given restic message
        pub fn with_failing_backup(self, message: &str) -> Self {
            *self.backup_failure.lock().unwrap() = Some(message.to_string());
            self
        }

        /// Configure restore to fail with the given restic message
        pub fn with_failing_restore(self, message: &str) -> Self {
            *self.restore_failure.lock().unwrap() = Some(message.to_string());
            self
        }

        /// Configure repository initialization to fail
        pub fn with_failing_init(self) -> Self {
            *self.should_fail_init.lock().unwrap() = true;
            self
        }

        /// Configure check result
        pub fn with_check_result(self, ok: bool) -> Self {
            *self.check_result.lock().unwrap() = ok;
            self
        }

        /// Configure cleanup response
        pub fn with_cleanup(self, kept: i64, removed: i64) -> Self {
            *self.cleanup_result.lock().unwrap() = Some((kept, removed));
            self
        }

        /// Configure stats response
        pub fn with_stats(self, stats: &str) -> Self {
            *self.stats.lock().unwrap() = stats.to_string();
            self
        }

        /// Configure the stats reported for every backed-up snapshot
        pub fn with_snapshot_stats(self, stats: SnapshotStats) -> Self {
            *self.snapshot_stats.lock().unwrap() = Some(stats);
            self
        }

        /// Make each backup take this long
        pub fn with_backup_delay(self, delay: Duration) -> Self {
            *self.backup_delay.lock().unwrap() = Some(delay);
            self
        }

        /// Get all recorded calls
        pub fn get_calls(&self) -> Vec<ResticCall> {
            self.calls.lock().unwrap().clone()
        }

        /// Check if backup was called
        pub fn backup_called(&self) -> bool {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .any(|c| matches!(c, ResticCall::Backup { .. }))
        }

        /// Number of backup calls
        pub fn backup_count(&self) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| matches!(c, ResticCall::Backup { .. }))
                .count()
        }

        /// Check if restore was called
        pub fn restore_called(&self) -> bool {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .any(|c| matches!(c, ResticCall::Restore { .. }))
        }

        /// Check if unlock was called
        pub fn unlock_called(&self) -> bool {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .any(|c| matches!(c, ResticCall::Unlock))
        }

        fn record_call(&self, call: ResticCall) {
            self.calls.lock().unwrap().push(call);
        }

        fn failure(message: &str) -> ResticError {
            ResticError::CommandFailed {
                message: message.to_string(),
                exit_code: Some(1),
                stdout: String::new(),
                stderr: message.to_string(),
            }
        }

        fn default_stats(path: &str) -> SnapshotStats {
            SnapshotStats {
                name: "mock-snapshot".to_string(),
                path: path.to_string(),
                size: "2.000 MiB".to_string(),
                uploaded: "1.000 MiB".to_string(),
                processing_time: "0:12".to_string(),
                file_stats: FileStats {
                    total_files: Some(17),
                    new_files: Some(5),
                    modified_files: Some(2),
                    unmodified_files: Some(10),
                },
            }
        }
    }

    impl ResticOperations for MockResticOps {
        fn ensure_repository(&self, _backend: &BackendConfig) -> Result<(), ResticError> {
            self.record_call(ResticCall::EnsureRepository);
            if *self.should_fail_init.lock().unwrap() {
                return Err(Self::failure("Fatal: create repository failed"));
            }
            Ok(())
        }

        fn backup(
            &self,
            _backend: &BackendConfig,
            opts: &BackupOptions,
        ) -> Result<Vec<SnapshotStats>, ResticError> {
            self.record_call(ResticCall::Backup {
                host: opts.host.clone(),
                tags: opts.tags.clone(),
            });
            let delay = *self.backup_delay.lock().unwrap();
            if let Some(delay) = delay {
                std::thread::sleep(delay);
            }
            if let Some(ref message) = *self.backup_failure.lock().unwrap() {
                return Err(Self::failure(message));
            }

            let paths = match opts.source {
                BackupSource::Paths(ref paths) => paths.clone(),
                BackupSource::Stdin { ref file_name, .. } => vec![file_name.clone()],
            };
            let configured = self.snapshot_stats.lock().unwrap().clone();
            Ok(paths
                .iter()
                .map(|p| match configured {
                    Some(ref stats) => SnapshotStats {
                        path: p.clone(),
                        ..stats.clone()
                    },
                    None => Self::default_stats(p),
                })
                .collect())
        }

        fn restore(&self, _backend: &BackendConfig, opts: &RestoreOptions) -> Result<(), ResticError> {
            self.record_call(ResticCall::Restore {
                source_host: opts.source_host.clone(),
                snapshots: opts.snapshots.clone(),
            });
            if let Some(ref message) = *self.restore_failure.lock().unwrap() {
                return Err(Self::failure(message));
            }
            Ok(())
        }

        fn check(&self, _backend: &BackendConfig) -> Result<bool, ResticError> {
            self.record_call(ResticCall::Check);
            Ok(*self.check_result.lock().unwrap())
        }

        fn cleanup(
            &self,
            _backend: &BackendConfig,
            policy: &RetentionPolicy,
            host: &str,
        ) -> Result<Option<(i64, i64)>, ResticError> {
            self.record_call(ResticCall::Cleanup {
                policy: policy.name.clone(),
                host: host.to_string(),
            });
            if crate::utils::retention::build_forget_args(policy).is_none() {
                return Ok(None);
            }
            Ok(Some(self.cleanup_result.lock().unwrap().unwrap_or((1, 0))))
        }

        fn stats(&self, _backend: &BackendConfig) -> Result<String, ResticError> {
            self.record_call(ResticCall::Stats);
            Ok(self.stats.lock().unwrap().clone())
        }

        fn list_snapshots(
            &self,
            _backend: &BackendConfig,
            ids: &[String],
        ) -> Result<Vec<Snapshot>, ResticError> {
            self.record_call(ResticCall::ListSnapshots { ids: ids.to_vec() });
            let snapshots = self.snapshots.lock().unwrap();
            Ok(snapshots
                .iter()
                .filter(|s| ids.is_empty() || ids.contains(&s.id))
                .cloned()
                .collect())
        }

        fn delete_snapshots(&self, _backend: &BackendConfig, ids: &[String]) -> Result<(), ResticError> {
            self.record_call(ResticCall::DeleteSnapshots { ids: ids.to_vec() });
            self.snapshots.lock().unwrap().retain(|s| !ids.contains(&s.id));
            Ok(())
        }

        fn unlock(&self, _backend: &BackendConfig) -> Result<(), ResticError> {
            self.record_call(ResticCall::Unlock);
            Ok(())
        }
    }
}
