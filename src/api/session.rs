//! Backup and restore session records and their state machine
//!
//! A session moves `Pending -> Running -> {Succeeded, Failed, Skipped}`.
//! Per-host outcomes live in `status.stats`, keyed by hostname. The overall
//! phase is derived from those outcomes, never set directly by a host.

use super::meta::ObjectMeta;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::Record;
use crate::utils::output::format_duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum SessionPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl SessionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionPhase::Succeeded | SessionPhase::Failed | SessionPhase::Skipped
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum HostPhase {
    Succeeded,
    Failed,
}

/// Outcome for one host of a session
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostStats {
    pub hostname: String,
    pub phase: HostPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub snapshots: Vec<SnapshotStats>,
}

impl HostStats {
    pub fn succeeded(hostname: &str, duration: String, snapshots: Vec<SnapshotStats>) -> Self {
        Self {
            hostname: hostname.to_string(),
            phase: HostPhase::Succeeded,
            error: None,
            duration: Some(duration),
            snapshots,
        }
    }

    pub fn failed(hostname: &str, error: String) -> Self {
        Self {
            hostname: hostname.to_string(),
            phase: HostPhase::Failed,
            error: Some(error),
            duration: None,
            snapshots: Vec::new(),
        }
    }
}

/// Result of one restic backup invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotStats {
    /// Snapshot id reported by restic
    pub name: String,
    pub path: String,
    pub size: String,
    pub uploaded: String,
    pub processing_time: String,
    pub file_stats: FileStats,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_files: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_files: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_files: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unmodified_files: Option<i64>,
}

/// Workload a session operates on
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRef {
    #[serde(default)]
    pub api_version: String,
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RepositoryRef {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct InvokerRef {
    pub kind: String,
    pub name: String,
}

/// Shell command run around a backup or restore
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Hook {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupHooks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_backup: Option<Hook>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_backup: Option<Hook>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreHooks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_restore: Option<Hook>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_restore: Option<Hook>,
}

/// Data piped into `restic backup --stdin` instead of reading paths
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StdinSource {
    pub command: String,
    pub file_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupTarget {
    #[serde(rename = "ref")]
    pub target_ref: TargetRef,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<StdinSource>,
    #[serde(default)]
    pub hooks: BackupHooks,
}

/// Which snapshots to keep; zero means "no constraint of that kind"
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionPolicy {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub keep_last: u32,
    #[serde(default)]
    pub keep_hourly: u32,
    #[serde(default)]
    pub keep_daily: u32,
    #[serde(default)]
    pub keep_weekly: u32,
    #[serde(default)]
    pub keep_monthly: u32,
    #[serde(default)]
    pub keep_yearly: u32,
    #[serde(default)]
    pub keep_tags: Vec<String>,
    #[serde(default)]
    pub prune: bool,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSessionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoker: Option<InvokerRef>,
    pub repository: RepositoryRef,
    pub target: BackupTarget,
    #[serde(default)]
    pub retention_policy: RetentionPolicy,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreRule {
    /// Hosts this rule applies to; empty matches every host
    #[serde(default)]
    pub target_hosts: Vec<String>,
    /// Host whose snapshots are restored; defaults to the restoring host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_host: Option<String>,
    #[serde(default)]
    pub snapshots: Vec<String>,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreTarget {
    #[serde(rename = "ref")]
    pub target_ref: TargetRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default)]
    pub rules: Vec<RestoreRule>,
    #[serde(default)]
    pub hooks: RestoreHooks,
}

impl RestoreTarget {
    /// Pick the rule for a host: an explicit match wins over a catch-all rule
    pub fn rule_for(&self, host: &str) -> Option<&RestoreRule> {
        self.rules
            .iter()
            .find(|r| r.target_hosts.iter().any(|h| h == host))
            .or_else(|| self.rules.iter().find(|r| r.target_hosts.is_empty()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSessionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoker: Option<InvokerRef>,
    pub repository: RepositoryRef,
    pub target: RestoreTarget,
    /// Directory restored files are written under; restic restores to `/` by default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    #[serde(default)]
    pub phase: SessionPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_hosts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_duration: Option<String>,
    #[serde(default)]
    pub stats: Vec<HostStats>,
}

impl SessionStatus {
    pub fn host_stats(&self, hostname: &str) -> Option<&HostStats> {
        self.stats.iter().find(|s| s.hostname == hostname)
    }

    /// Idempotence guard: terminal sessions and hosts that already have an
    /// entry are never processed again
    pub fn is_processed_for(&self, hostname: &str) -> bool {
        self.phase.is_terminal() || self.host_stats(hostname).is_some()
    }

    /// Replace the entry for this hostname, or append it
    pub fn upsert_host_stats(&mut self, stats: HostStats) {
        match self.stats.iter_mut().find(|s| s.hostname == stats.hostname) {
            Some(existing) => *existing = stats,
            None => self.stats.push(stats),
        }
    }

    /// Move a pending session to running, recording the start time and the
    /// number of hosts expected to report
    pub fn mark_running(&mut self, total_hosts: u32, now: DateTime<Utc>) {
        if self.phase != SessionPhase::Pending {
            return;
        }
        self.phase = SessionPhase::Running;
        self.start_time.get_or_insert(now);
        self.total_hosts.get_or_insert(total_hosts);
    }

    /// Recompute the phase from the host entries
    pub fn reconcile_phase(&mut self, now: DateTime<Utc>) -> SessionPhase {
        if self.phase == SessionPhase::Skipped {
            return self.phase;
        }
        self.phase = derive_phase(&self.stats, self.total_hosts);
        if self.phase.is_terminal() && self.session_duration.is_none() {
            if let Some(start) = self.start_time {
                let elapsed = (now - start).to_std().unwrap_or_default();
                self.session_duration = Some(format_duration(elapsed));
            }
        }
        self.phase
    }
}

/// Overall phase from per-host outcomes; a missing host count means one host
pub fn derive_phase(stats: &[HostStats], total_hosts: Option<u32>) -> SessionPhase {
    let expected = total_hosts.unwrap_or(1) as usize;
    if stats.len() < expected {
        return SessionPhase::Running;
    }
    if stats.iter().any(|s| s.phase == HostPhase::Failed) {
        SessionPhase::Failed
    } else {
        SessionPhase::Succeeded
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct BackupSession {
    pub metadata: ObjectMeta,
    pub spec: BackupSessionSpec,
    #[serde(default)]
    pub status: SessionStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RestoreSession {
    pub metadata: ObjectMeta,
    pub spec: RestoreSessionSpec,
    #[serde(default)]
    pub status: SessionStatus,
}

impl Record for BackupSession {
    const KIND: &'static str = "BackupSession";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Record for RestoreSession {
    const KIND: &'static str = "RestoreSession";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
