//! Per-replica host identity inside a shared repository
//!
//! Everything here is pure: the same inputs give the same host whether data
//! is being written or later located for restore or deletion.

use std::fmt;
use std::str::FromStr;

/// Host used when a workload backs up as one logical unit
pub const DEFAULT_HOST: &str = "host-0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkloadKind {
    Deployment,
    ReplicaSet,
    ReplicationController,
    DeploymentConfig,
    StatefulSet,
    DaemonSet,
    Pod,
    Other(String),
}

impl WorkloadKind {
    /// Replicas share one logical backup and must take turns through the lease
    pub fn is_replica_controlled(&self) -> bool {
        matches!(
            self,
            WorkloadKind::Deployment
                | WorkloadKind::ReplicaSet
                | WorkloadKind::ReplicationController
                | WorkloadKind::DeploymentConfig
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::ReplicaSet => "ReplicaSet",
            WorkloadKind::ReplicationController => "ReplicationController",
            WorkloadKind::DeploymentConfig => "DeploymentConfig",
            WorkloadKind::StatefulSet => "StatefulSet",
            WorkloadKind::DaemonSet => "DaemonSet",
            WorkloadKind::Pod => "Pod",
            WorkloadKind::Other(kind) => kind,
        }
    }
}

impl FromStr for WorkloadKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Deployment" => WorkloadKind::Deployment,
            "ReplicaSet" => WorkloadKind::ReplicaSet,
            "ReplicationController" => WorkloadKind::ReplicationController,
            "DeploymentConfig" => WorkloadKind::DeploymentConfig,
            "StatefulSet" => WorkloadKind::StatefulSet,
            "DaemonSet" => WorkloadKind::DaemonSet,
            "Pod" => WorkloadKind::Pod,
            other => WorkloadKind::Other(other.to_string()),
        })
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Backup,
    Restore,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Backup => "backup",
            Operation::Restore => "restore",
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HostError {
    #[error("pod name is required to derive the host of {kind} '{name}'")]
    MissingPodName { kind: String, name: String },

    #[error("cannot read a pod ordinal from pod name '{0}'")]
    InvalidOrdinal(String),

    #[error("node name is required to derive the host of DaemonSet '{0}'")]
    MissingNodeName(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    pub hostname: String,
    /// Namespace for this host's data inside the repository
    pub path_prefix: String,
}

/// Derive the host identity of the replica running this process
pub fn resolve_host(
    kind: &WorkloadKind,
    workload_name: &str,
    pod_name: Option<&str>,
    node_name: Option<&str>,
    alias: Option<&str>,
) -> Result<HostIdentity, HostError> {
    let alias = alias.filter(|a| !a.is_empty());

    let hostname = match kind {
        WorkloadKind::StatefulSet => {
            let pod = pod_name
                .filter(|p| !p.is_empty())
                .ok_or_else(|| HostError::MissingPodName {
                    kind: kind.to_string(),
                    name: workload_name.to_string(),
                })?;
            let ordinal = pod_ordinal(pod)?;
            match alias {
                Some(a) => format!("{}-{}", a, ordinal),
                None => format!("host-{}", ordinal),
            }
        }
        WorkloadKind::DaemonSet => node_name
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .ok_or_else(|| HostError::MissingNodeName(workload_name.to_string()))?,
        _ => alias.unwrap_or(DEFAULT_HOST).to_string(),
    };

    let path_prefix = format!("{}/{}/{}", kind, workload_name, hostname).to_lowercase();
    Ok(HostIdentity {
        hostname,
        path_prefix,
    })
}

/// Trailing `-<n>` of a StatefulSet pod name
fn pod_ordinal(pod_name: &str) -> Result<u32, HostError> {
    pod_name
        .rsplit_once('-')
        .and_then(|(_, n)| n.parse().ok())
        .ok_or_else(|| HostError::InvalidOrdinal(pod_name.to_string()))
}

/// Name of the lease guarding one target for one kind of operation
pub fn lease_key(kind: &WorkloadKind, workload_name: &str, operation: Operation) -> String {
    format!("lock-{}-{}-{}", kind, workload_name, operation.as_str()).to_lowercase()
}

/// Whether this workload must win the lease before touching the repository
pub fn requires_election(kind: &WorkloadKind) -> bool {
    kind.is_replica_controlled()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statefulset_uses_ordinal() {
        let id = resolve_host(&WorkloadKind::StatefulSet, "web", Some("web-2"), None, None).unwrap();
        assert_eq!(id.hostname, "host-2");
        assert_eq!(id.path_prefix, "statefulset/web/host-2");

        let aliased =
            resolve_host(&WorkloadKind::StatefulSet, "web", Some("web-2"), None, Some("db")).unwrap();
        assert_eq!(aliased.hostname, "db-2");
    }

    #[test]
    fn test_statefulset_errors() {
        assert!(matches!(
            resolve_host(&WorkloadKind::StatefulSet, "web", None, None, None),
            Err(HostError::MissingPodName { .. })
        ));
        assert_eq!(
            resolve_host(&WorkloadKind::StatefulSet, "web", Some("web"), None, None),
            Err(HostError::InvalidOrdinal("web".into()))
        );
    }

    #[test]
    fn test_daemonset_uses_node() {
        let id = resolve_host(&WorkloadKind::DaemonSet, "agent", Some("agent-x7"), Some("node-1"), None)
            .unwrap();
        assert_eq!(id.hostname, "node-1");
        assert!(resolve_host(&WorkloadKind::DaemonSet, "agent", None, None, None).is_err());
    }

    #[test]
    fn test_replica_controlled_is_stable() {
        let a = resolve_host(&WorkloadKind::Deployment, "api", Some("api-5d8f-abc"), None, None).unwrap();
        let b = resolve_host(&WorkloadKind::Deployment, "api", Some("api-5d8f-xyz"), None, None).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.hostname, DEFAULT_HOST);
    }

    #[test]
    fn test_lease_key_and_election() {
        assert_eq!(
            lease_key(&WorkloadKind::Deployment, "API", Operation::Backup),
            "lock-deployment-api-backup"
        );
        assert_eq!(
            lease_key(&"StatefulSet".parse().unwrap(), "web", Operation::Restore),
            "lock-statefulset-web-restore"
        );
        assert!(requires_election(&WorkloadKind::ReplicaSet));
        assert!(!requires_election(&WorkloadKind::StatefulSet));
        assert!(!requires_election(&WorkloadKind::DaemonSet));
        assert!(!requires_election(&WorkloadKind::Other("CronJob".into())));
    }
}
