//! Unit tests for backup-sidecar
//!
//! Pure helpers: host identity, restic output parsing, retention flags
//! and backend resolution.

mod backend;
mod host;
mod output;
mod retention;
