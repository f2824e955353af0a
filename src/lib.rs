//! Backup Sidecar Library
//!
//! Runs restic backup and restore sessions for one workload, coordinating
//! replicas through leases and reporting results back into session records.

pub mod api;
pub mod config;
pub mod managers;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use config::{load_config, parse_config, Config};
pub use managers::logging::{init_console_logging, init_logging, LogGuard, LoggingConfig};
pub use managers::{BackupSessionController, Controller, RestoreSessionController, SessionContext};
pub use store::{Store, StoreError, Stores};
