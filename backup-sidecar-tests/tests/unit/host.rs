//! Host identity and lease naming

use backup_sidecar::utils::host::{
    lease_key, requires_election, resolve_host, HostError, Operation, WorkloadKind,
};
use rstest::rstest;

#[rstest]
#[case("Deployment", Some("api-7d9f8-x2k4q"), None, None, "host-0")]
#[case("ReplicaSet", None, None, None, "host-0")]
#[case("Deployment", Some("api-7d9f8-x2k4q"), None, Some("primary"), "primary")]
#[case("StatefulSet", Some("web-0"), None, None, "host-0")]
#[case("StatefulSet", Some("web-12"), None, None, "host-12")]
#[case("StatefulSet", Some("web-2"), None, Some("mysql"), "mysql-2")]
#[case("DaemonSet", Some("agent-x8z"), Some("node-a"), None, "node-a")]
#[case("Pod", Some("standalone"), None, None, "host-0")]
fn test_resolve_hostname(
    #[case] kind: &str,
    #[case] pod: Option<&str>,
    #[case] node: Option<&str>,
    #[case] alias: Option<&str>,
    #[case] expected: &str,
) {
    let kind: WorkloadKind = kind.parse().unwrap();
    let id = resolve_host(&kind, "app", pod, node, alias).unwrap();
    assert_eq!(id.hostname, expected);
}

#[test]
fn test_path_prefix_is_lowercase() {
    let id = resolve_host(&WorkloadKind::StatefulSet, "Web", Some("Web-1"), None, None).unwrap();
    assert_eq!(id.path_prefix, "statefulset/web/host-1");
}

#[test]
fn test_resolution_is_deterministic() {
    let first = resolve_host(&WorkloadKind::StatefulSet, "db", Some("db-3"), None, None).unwrap();
    let second = resolve_host(&WorkloadKind::StatefulSet, "db", Some("db-3"), None, None).unwrap();
    assert_eq!(first, second);
}

#[rstest]
#[case(None)]
#[case(Some(""))]
fn test_statefulset_requires_pod_name(#[case] pod: Option<&str>) {
    let err = resolve_host(&WorkloadKind::StatefulSet, "web", pod, None, None).unwrap_err();
    assert!(matches!(err, HostError::MissingPodName { .. }));
}

#[test]
fn test_statefulset_rejects_pod_without_ordinal() {
    let err = resolve_host(&WorkloadKind::StatefulSet, "web", Some("web-abc"), None, None).unwrap_err();
    assert_eq!(err, HostError::InvalidOrdinal("web-abc".to_string()));
}

#[test]
fn test_daemonset_requires_node_name() {
    let err = resolve_host(&WorkloadKind::DaemonSet, "agent", Some("agent-1"), None, None).unwrap_err();
    assert_eq!(err, HostError::MissingNodeName("agent".to_string()));
}

#[rstest]
#[case("Deployment", true)]
#[case("ReplicaSet", true)]
#[case("ReplicationController", true)]
#[case("DeploymentConfig", true)]
#[case("StatefulSet", false)]
#[case("DaemonSet", false)]
#[case("Pod", false)]
fn test_requires_election(#[case] kind: &str, #[case] expected: bool) {
    assert_eq!(requires_election(&kind.parse().unwrap()), expected);
}

#[test]
fn test_lease_key_per_operation() {
    let kind = WorkloadKind::Deployment;
    assert_eq!(lease_key(&kind, "api", Operation::Backup), "lock-deployment-api-backup");
    assert_eq!(lease_key(&kind, "api", Operation::Restore), "lock-deployment-api-restore");
}
