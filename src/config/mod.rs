//! Configuration module for backup-sidecar
//!
//! This module handles loading and validating the sidecar's TOML configuration.
//!
//! ## Example Usage
//!
//! ```no_run
//! use backup_sidecar::config;
//!
//! let config = config::load_config("backup-sidecar.toml")?;
//! println!("Target: {} {}", config.target.kind, config.target.name);
//! # Ok::<(), config::ConfigError>(())
//! ```

mod loader;
mod types;

pub use loader::{
    load_config, parse_config, validate_config, ConfigError, Result, NODE_NAME_ENV, POD_NAME_ENV,
};
pub use types::*;

/// Expand tilde (~) in path
pub fn expand_tilde(path: &std::path::Path) -> std::path::PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}
