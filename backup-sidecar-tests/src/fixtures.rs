//! Test fixtures and sample data
//!
//! Records are built the way an operator would create them: a session
//! pointing at a repository whose secret carries the restic password.

use backup_sidecar::api::{
    BackendSpec, BackupSession, BackupSessionSpec, BackupTarget, Invoker, InvokerRef, InvokerSpec,
    LocalSpec, ObjectMeta, Repository, RepositoryRef, RepositorySpec, RestoreRule,
    RestoreSession, RestoreSessionSpec, RestoreTarget, RetentionPolicy, Secret, TargetRef,
};
use backup_sidecar::utils::output::Snapshot;
use std::collections::BTreeMap;
use std::path::Path;

pub const NAMESPACE: &str = "demo";
pub const REPOSITORY: &str = "local-repo";
pub const SECRET: &str = "local-repo-secret";
pub const PASSWORD: &str = "not-so-secret";

/// `restic backup --json` output with progress lines before the summary
pub const BACKUP_OUTPUT: &str = r#"{"message_type":"status","percent_done":0.5,"total_files":17}
{"message_type":"status","percent_done":1,"total_files":17,"files_done":17}
{"message_type":"summary","files_new":5,"files_changed":2,"files_unmodified":10,"dirs_new":0,"dirs_changed":1,"dirs_unmodified":3,"data_blobs":4,"tree_blobs":2,"data_added":1048576,"total_files_processed":17,"total_bytes_processed":2097152,"total_duration":12.5,"snapshot_id":"abc123"}
"#;

/// `restic forget --json` output for two groups
pub const FORGET_OUTPUT: &str = r#"[{"tags":null,"host":"host-0","paths":["/data"],"keep":[{"id":"a"},{"id":"b"}],"remove":[{"id":"c"}],"reasons":[]},{"tags":null,"host":"host-1","paths":["/data"],"keep":[{"id":"d"}],"remove":null,"reasons":[]}]"#;

pub const STATS_OUTPUT: &str = r#"{"total_size":1073741824,"total_file_count":42}"#;

pub fn target_ref(kind: &str, name: &str) -> TargetRef {
    TargetRef {
        api_version: "apps/v1".to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

/// Pending backup session for a workload, backing up `/data`
pub fn backup_session(name: &str, kind: &str, workload: &str) -> BackupSession {
    BackupSession {
        metadata: ObjectMeta::new(NAMESPACE, name),
        spec: BackupSessionSpec {
            invoker: Some(InvokerRef {
                kind: "BackupConfiguration".to_string(),
                name: format!("{}-backup", workload),
            }),
            repository: RepositoryRef {
                name: REPOSITORY.to_string(),
            },
            target: BackupTarget {
                target_ref: target_ref(kind, workload),
                paths: vec!["/data".to_string()],
                ..Default::default()
            },
            retention_policy: RetentionPolicy {
                name: "keep-last-5".to_string(),
                keep_last: 5,
                prune: true,
                ..Default::default()
            },
            tags: Vec::new(),
        },
        ..Default::default()
    }
}

/// Pending restore session with the given rules
pub fn restore_session(name: &str, kind: &str, workload: &str, rules: Vec<RestoreRule>) -> RestoreSession {
    RestoreSession {
        metadata: ObjectMeta::new(NAMESPACE, name),
        spec: RestoreSessionSpec {
            invoker: None,
            repository: RepositoryRef {
                name: REPOSITORY.to_string(),
            },
            target: RestoreTarget {
                target_ref: target_ref(kind, workload),
                alias: None,
                rules,
                ..Default::default()
            },
            destination: None,
        },
        ..Default::default()
    }
}

/// Local repository under `root`
pub fn local_repository(root: &Path) -> Repository {
    Repository {
        metadata: ObjectMeta::new(NAMESPACE, REPOSITORY),
        spec: RepositorySpec {
            backend: BackendSpec {
                storage_secret_name: SECRET.to_string(),
                local: Some(LocalSpec {
                    mount_path: root.join("repository").display().to_string(),
                    sub_path: None,
                }),
                ..Default::default()
            },
        },
        ..Default::default()
    }
}

pub fn password_secret() -> Secret {
    Secret {
        metadata: ObjectMeta::new(NAMESPACE, SECRET),
        data: secret_data(&[("RESTIC_PASSWORD", PASSWORD)]),
    }
}

pub fn secret_data(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn invoker(name: &str, paused: bool) -> Invoker {
    Invoker {
        metadata: ObjectMeta::new(NAMESPACE, name),
        spec: InvokerSpec { paused },
    }
}

/// Create a sample snapshot for testing
pub fn sample_snapshot(id: &str, hostname: &str) -> Snapshot {
    Snapshot {
        id: format!("{:0<40}", id),
        short_id: id.chars().take(8).collect(),
        time: "2026-10-01T02:00:00.000000000Z".to_string(),
        hostname: hostname.to_string(),
        paths: vec!["/data".to_string()],
        tags: Vec::new(),
    }
}

/// Create multiple sample snapshots for testing
pub fn sample_snapshots(count: usize) -> Vec<Snapshot> {
    (0..count)
        .map(|i| sample_snapshot(&format!("snap{:04}", i), "host-0"))
        .collect()
}
