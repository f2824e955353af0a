//! Record types exchanged through the store
//!
//! Field names serialize in camelCase so records look like the cluster
//! objects they mirror (`status.stats[].hostname`, `spec.retentionPolicy`).

pub mod event;
pub mod meta;
pub mod repository;
pub mod session;

pub use event::{Event, EventType, Lease, LeaseSpec};
pub use meta::{LabelSelector, ObjectKey, ObjectMeta, ObjectReference};
pub use repository::{
    AzureSpec, B2Spec, Backend, BackendSpec, GcsSpec, Invoker, InvokerSpec, LocalSpec,
    Repository, RepositorySpec, RepositoryStats, RestSpec, S3Spec, Secret, SwiftSpec,
};
pub use session::*;
