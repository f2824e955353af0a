use super::types::*;
use crate::utils::host::WorkloadKind;
use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

pub const POD_NAME_ENV: &str = "POD_NAME";
pub const NODE_NAME_ENV: &str = "NODE_NAME";

/// Load and validate configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let contents = fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse, fill identity from the environment, and validate
pub fn parse_config(contents: &str) -> Result<Config> {
    let mut config: Config = toml::from_str(contents)?;
    apply_env_overrides(&mut config);
    validate_config(&config)?;
    Ok(config)
}

/// Empty identity fields come from the downward-API style environment
fn apply_env_overrides(config: &mut Config) {
    if config.identity.pod_name.is_empty() {
        if let Ok(pod) = std::env::var(POD_NAME_ENV) {
            config.identity.pod_name = pod;
        }
    }
    if config.identity.node_name.is_empty() {
        if let Ok(node) = std::env::var(NODE_NAME_ENV) {
            config.identity.node_name = node;
        }
    }
}

/// Validate the configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.target.name.is_empty() {
        return Err(ConfigError::ValidationError(
            "target.name must not be empty".to_string(),
        ));
    }
    if config.target.kind.is_empty() {
        return Err(ConfigError::ValidationError(
            "target.kind must not be empty".to_string(),
        ));
    }

    match config.target.workload_kind() {
        WorkloadKind::StatefulSet if config.identity.pod_name.is_empty() => {
            return Err(ConfigError::ValidationError(format!(
                "StatefulSet target '{}' needs identity.pod_name (or {})",
                config.target.name, POD_NAME_ENV
            )));
        }
        WorkloadKind::DaemonSet if config.identity.node_name.is_empty() => {
            return Err(ConfigError::ValidationError(format!(
                "DaemonSet target '{}' needs identity.node_name (or {})",
                config.target.name, NODE_NAME_ENV
            )));
        }
        _ => {}
    }

    let e = &config.election;
    if !(e.retry_period_seconds < e.renew_deadline_seconds
        && e.renew_deadline_seconds < e.lease_duration_seconds)
    {
        return Err(ConfigError::ValidationError(format!(
            "election timing must satisfy retry_period ({}) < renew_deadline ({}) < lease_duration ({})",
            e.retry_period_seconds, e.renew_deadline_seconds, e.lease_duration_seconds
        )));
    }

    if config.queue.workers == 0 {
        return Err(ConfigError::ValidationError(
            "queue.workers must be at least 1".to_string(),
        ));
    }

    if config.metrics.enabled
        && config.metrics.pushgateway_url.is_none()
        && config.metrics.metric_file_dir.is_none()
    {
        return Err(ConfigError::ValidationError(
            "metrics are enabled but neither pushgateway_url nor metric_file_dir is set".to_string(),
        ));
    }

    if config.restic.binary.is_empty() {
        return Err(ConfigError::ValidationError(
            "restic.binary must not be empty".to_string(),
        ));
    }

    Ok(())
}
