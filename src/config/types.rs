use crate::api::TargetRef;
use crate::utils::backend::SetupOptions;
use crate::utils::host::WorkloadKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub identity: IdentityConfig,
    pub target: TargetConfig,
    #[serde(default)]
    pub restic: ResticConfig,
    #[serde(default)]
    pub election: ElectionConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LogSettings,
    #[serde(default)]
    pub store: StoreConfig,
}

/// Where this process runs
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdentityConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Falls back to `POD_NAME`
    #[serde(default)]
    pub pod_name: String,

    /// Falls back to `NODE_NAME`
    #[serde(default)]
    pub node_name: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            pod_name: String::new(),
            node_name: String::new(),
        }
    }
}

/// The workload this sidecar backs up
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TargetConfig {
    pub kind: String,
    pub name: String,

    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Number of pods that each report a host (StatefulSet)
    #[serde(default)]
    pub replicas: Option<u32>,

    #[serde(default)]
    pub alias: Option<String>,
}

impl TargetConfig {
    pub fn workload_kind(&self) -> WorkloadKind {
        // infallible
        self.kind
            .parse()
            .unwrap_or_else(|_| WorkloadKind::Other(self.kind.clone()))
    }

    pub fn target_ref(&self) -> TargetRef {
        TargetRef {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
        }
    }

    /// Whether a session's target is the workload this sidecar serves
    pub fn matches(&self, target: &TargetRef) -> bool {
        target.kind == self.kind && target.name == self.name
    }

    /// Hosts expected to report into one session
    pub fn total_hosts(&self) -> u32 {
        if self.workload_kind().is_replica_controlled() {
            1
        } else {
            self.replicas.unwrap_or(1).max(1)
        }
    }
}

/// Restic invocation settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResticConfig {
    #[serde(default = "default_restic_binary")]
    pub binary: String,

    /// Cache, temp files and materialised credentials
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    #[serde(default = "default_true")]
    pub enable_cache: bool,

    #[serde(default)]
    pub max_connections: u32,

    #[serde(default)]
    pub nice_adjustment: Option<i32>,
    #[serde(default)]
    pub ionice_class: Option<u32>,
    #[serde(default)]
    pub ionice_class_data: Option<u32>,

    /// Hard limit per restic invocation; 0 disables it
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Also write `output.json` here after each run
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

impl Default for ResticConfig {
    fn default() -> Self {
        Self {
            binary: default_restic_binary(),
            scratch_dir: default_scratch_dir(),
            enable_cache: true,
            max_connections: 0,
            nice_adjustment: None,
            ionice_class: None,
            ionice_class_data: None,
            timeout_seconds: default_timeout(),
            output_dir: None,
        }
    }
}

impl ResticConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_seconds > 0).then(|| Duration::from_secs(self.timeout_seconds))
    }

    pub fn setup_options(&self) -> SetupOptions {
        SetupOptions {
            scratch_dir: super::expand_tilde(&self.scratch_dir),
            enable_cache: self.enable_cache,
            max_connections: self.max_connections,
            nice: self.nice_adjustment,
            ionice: self
                .ionice_class
                .map(|class| (class, self.ionice_class_data.unwrap_or(0))),
        }
    }
}

/// Lease timing, in seconds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ElectionConfig {
    #[serde(default = "default_lease_duration")]
    pub lease_duration_seconds: u64,
    #[serde(default = "default_renew_deadline")]
    pub renew_deadline_seconds: u64,
    #[serde(default = "default_retry_period")]
    pub retry_period_seconds: u64,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            lease_duration_seconds: default_lease_duration(),
            renew_deadline_seconds: default_renew_deadline(),
            retry_period_seconds: default_retry_period(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_requeues")]
    pub max_requeues: u32,
    #[serde(default = "default_resync")]
    pub resync_seconds: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_requeues: default_max_requeues(),
            resync_seconds: default_resync(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub pushgateway_url: Option<String>,

    /// Directory for `<job>.prom` text files
    #[serde(default)]
    pub metric_file_dir: Option<PathBuf>,

    #[serde(default = "default_job_name")]
    pub job_name: String,

    /// Extra const labels on every metric
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// `text` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Also write daily-rolling files here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_directory: Option<PathBuf>,
    #[serde(default = "default_log_max_files")]
    pub log_max_files: u32,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            format: default_log_format(),
            log_directory: None,
            log_max_files: default_log_max_files(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
        }
    }
}

// Default value functions

fn default_namespace() -> String { "default".to_string() }
fn default_api_version() -> String { "apps/v1".to_string() }
fn default_restic_binary() -> String { "restic".to_string() }
fn default_scratch_dir() -> PathBuf { PathBuf::from("/tmp/backup-sidecar") }
fn default_true() -> bool { true }
fn default_timeout() -> u64 { 3600 }
fn default_lease_duration() -> u64 { 15 }
fn default_renew_deadline() -> u64 { 10 }
fn default_retry_period() -> u64 { 2 }
fn default_workers() -> usize { 1 }
fn default_max_requeues() -> u32 { 5 }
fn default_resync() -> u64 { 30 }
fn default_job_name() -> String { "backup-sidecar".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }
fn default_log_max_files() -> u32 { 7 }
fn default_state_dir() -> PathBuf { PathBuf::from("/var/lib/backup-sidecar") }
