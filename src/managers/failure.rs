//! Turn an error from a host attempt into a reportable result
//!
//! A failed attempt still produces a host entry, so the session can reach a
//! terminal phase and the failure is visible in status, events and metrics.

use crate::api::{HostStats, TargetRef};
use crate::utils::host::Operation;
use crate::utils::output::{BackupOutput, RestoreOutput, TargetStatus};

pub fn failure_message(operation: Operation, hostname: &str, error: &anyhow::Error) -> String {
    format!(
        "failed to complete {} for host {}. Reason: {:#}",
        operation.as_str(),
        hostname,
        error
    )
}

pub fn failed_backup(target_ref: TargetRef, hostname: &str, error: &anyhow::Error) -> BackupOutput {
    BackupOutput {
        target_status: TargetStatus {
            target_ref,
            stats: vec![HostStats::failed(
                hostname,
                failure_message(Operation::Backup, hostname, error),
            )],
        },
        repository_stats: None,
    }
}

pub fn failed_restore(target_ref: TargetRef, hostname: &str, error: &anyhow::Error) -> RestoreOutput {
    RestoreOutput {
        target_status: TargetStatus {
            target_ref,
            stats: vec![HostStats::failed(
                hostname,
                failure_message(Operation::Restore, hostname, error),
            )],
        },
    }
}
