//! Fluent API for building test configurations
//!
//! Every path the sidecar writes to points into a temporary directory, and
//! the lease timings are short so election tests finish quickly.

use backup_sidecar::config::{
    Config, ElectionConfig, IdentityConfig, LogSettings, MetricsConfig, QueueConfig, ResticConfig,
    StoreConfig, TargetConfig,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Builder for creating test configurations
pub struct ConfigBuilder {
    temp_dir: TempDir,
    config: Config,
}

impl ConfigBuilder {
    /// Create a builder for the given workload
    pub fn new(kind: &str, name: &str) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path();

        let config = Config {
            identity: IdentityConfig {
                namespace: "demo".to_string(),
                pod_name: String::new(),
                node_name: String::new(),
            },
            target: TargetConfig {
                kind: kind.to_string(),
                name: name.to_string(),
                api_version: "apps/v1".to_string(),
                replicas: None,
                alias: None,
            },
            restic: ResticConfig {
                scratch_dir: root.join("scratch"),
                ..Default::default()
            },
            election: ElectionConfig {
                lease_duration_seconds: 3,
                renew_deadline_seconds: 2,
                retry_period_seconds: 1,
            },
            queue: QueueConfig::default(),
            metrics: MetricsConfig {
                job_name: "backup-sidecar".to_string(),
                ..Default::default()
            },
            logging: LogSettings {
                log_directory: Some(root.join("logs")),
                ..Default::default()
            },
            store: StoreConfig {
                state_dir: root.join("state"),
            },
        };

        Self { temp_dir, config }
    }

    /// A Deployment; replicas share `host-0` and take turns through the lease
    pub fn deployment(name: &str) -> Self {
        Self::new("Deployment", name).with_pod(&format!("{}-7d9f8-x2k4q", name))
    }

    /// A StatefulSet pod with the given ordinal
    pub fn stateful_set(name: &str, replicas: u32, ordinal: u32) -> Self {
        let mut builder = Self::new("StatefulSet", name).with_pod(&format!("{}-{}", name, ordinal));
        builder.config.target.replicas = Some(replicas);
        builder
    }

    pub fn with_pod(mut self, pod_name: &str) -> Self {
        self.config.identity.pod_name = pod_name.to_string();
        self
    }

    pub fn with_node(mut self, node_name: &str) -> Self {
        self.config.identity.node_name = node_name.to_string();
        self
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.config.target.alias = Some(alias.to_string());
        self
    }

    /// Write metrics as a `.prom` file into the temp dir
    pub fn with_metric_file(mut self) -> Self {
        let dir = self.temp_dir.path().join("metrics");
        fs::create_dir_all(&dir).expect("Failed to create metrics dir");
        self.config.metrics.enabled = true;
        self.config.metrics.metric_file_dir = Some(dir);
        self
    }

    pub fn with_output_dir(mut self) -> Self {
        self.config.restic.output_dir = Some(self.temp_dir.path().join("output"));
        self
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Build the config, keeping the temp dir alive
    pub fn build(self) -> (Config, TempDir) {
        (self.config, self.temp_dir)
    }

    /// Build and also write the config as `config.toml` into the temp dir
    pub fn persist(self) -> (Config, TempDir) {
        let path = self.temp_dir.path().join("config.toml");
        let toml_str = toml::to_string_pretty(&self.config).expect("Failed to serialize config");
        fs::write(&path, toml_str).expect("Failed to write config");
        (self.config, self.temp_dir)
    }
}
