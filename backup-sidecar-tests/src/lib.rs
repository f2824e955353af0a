//! Test utilities for backup-sidecar
//!
//! This crate provides shared fixtures, a config builder and a harness that
//! wires session controllers to in-memory stores and mocked restic.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use test_utils::{ConfigBuilder, SidecarHarness};
//!
//! #[tokio::test]
//! async fn my_test() {
//!     let harness = SidecarHarness::new(ConfigBuilder::deployment("api"));
//!     let key = harness.create_backup_session("nightly-1");
//!     harness.backup_controller().process(&key).await.unwrap();
//! }
//! ```

pub mod config_builder;
pub mod fixtures;
pub mod harness;

// Re-export commonly used items
pub use config_builder::ConfigBuilder;
pub use fixtures::*;
pub use harness::SidecarHarness;

// Re-export types from the main crate for convenience
pub use backup_sidecar::api::{
    BackupSession, Event, EventType, HostPhase, HostStats, ObjectKey, RestoreSession,
    RetentionPolicy, SessionPhase,
};
pub use backup_sidecar::config::Config;
pub use backup_sidecar::utils::output::Snapshot;

// Re-export mock implementations from the main crate
pub use backup_sidecar::utils::executor::mock::{MockExecutor, MockResponse};
pub use backup_sidecar::utils::restic_ops::mock::{MockResticOps, ResticCall};
