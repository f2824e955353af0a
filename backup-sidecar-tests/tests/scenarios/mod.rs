//! Session scenarios for backup-sidecar
//!
//! Controllers run against in-memory stores with restic mocked out, so
//! each scenario checks what reached restic and what was written back.

mod backup;
mod election;
mod metrics;
mod restore;
mod status_file;
mod watch;
