//! Declarative record storage
//!
//! The engine only needs get, create, update with optimistic concurrency,
//! list with a label selector and a watch stream. [`MemoryStore`] backs tests
//! and single-process use; [`FileStore`] keeps one JSON file per record so a
//! sidecar and a separate status updater can share state on disk.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::api::{
    BackupSession, Event, Invoker, LabelSelector, Lease, ObjectKey, ObjectMeta, Repository,
    RestoreSession, Secret,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Number of get/mutate/update rounds before a conflict is returned
const MAX_CONFLICT_RETRIES: usize = 5;

/// Capacity of each store's watch channel
const WATCH_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} '{key}' not found")]
    NotFound { kind: &'static str, key: String },

    #[error("{kind} '{key}' already exists")]
    AlreadyExists { kind: &'static str, key: String },

    #[error("{kind} '{key}' was modified concurrently (expected version {expected}, found {actual})")]
    Conflict {
        kind: &'static str,
        key: String,
        expected: u64,
        actual: u64,
    },

    #[error("invalid record name '{0}'")]
    InvalidName(String),

    #[error("store lock poisoned for {0}")]
    Lock(&'static str),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to (de)serialize record: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// A storable record
pub trait Record: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static {
    const KIND: &'static str;

    fn meta(&self) -> &ObjectMeta;

    fn meta_mut(&mut self) -> &mut ObjectMeta;

    fn key(&self) -> ObjectKey {
        self.meta().key()
    }
}

/// Change notification delivered to watchers
#[derive(Debug, Clone)]
pub enum WatchEvent<T> {
    Added(T),
    Modified(T),
}

impl<T> WatchEvent<T> {
    pub fn object(&self) -> &T {
        match self {
            WatchEvent::Added(o) | WatchEvent::Modified(o) => o,
        }
    }
}

pub trait Store<T: Record>: Send + Sync {
    fn get(&self, key: &ObjectKey) -> Result<T, StoreError>;

    /// Insert a new record; its resource version starts at 1
    fn create(&self, obj: T) -> Result<T, StoreError>;

    /// Compare-and-swap on `resource_version`
    fn update(&self, obj: T) -> Result<T, StoreError>;

    /// Records in `namespace` (all namespaces when empty) matching `selector`
    fn list(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<T>, StoreError>;

    fn watch(&self) -> broadcast::Receiver<WatchEvent<T>>;
}

/// Re-read, mutate and write back until the write is not a conflict
pub fn update_with_retry<T, F>(store: &dyn Store<T>, key: &ObjectKey, mut mutate: F) -> Result<T, StoreError>
where
    T: Record,
    F: FnMut(&mut T),
{
    let mut last_err = None;
    for attempt in 1..=MAX_CONFLICT_RETRIES {
        let mut obj = store.get(key)?;
        mutate(&mut obj);
        match store.update(obj) {
            Ok(updated) => return Ok(updated),
            Err(e) if e.is_conflict() => {
                debug!("Conflict updating {} {} (attempt {}): {}", T::KIND, key, attempt, e);
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or(StoreError::Lock(T::KIND)))
}

/// One store per record kind
#[derive(Clone)]
pub struct Stores {
    pub backup_sessions: Arc<dyn Store<BackupSession>>,
    pub restore_sessions: Arc<dyn Store<RestoreSession>>,
    pub repositories: Arc<dyn Store<Repository>>,
    pub secrets: Arc<dyn Store<Secret>>,
    pub invokers: Arc<dyn Store<Invoker>>,
    pub events: Arc<dyn Store<Event>>,
    pub leases: Arc<dyn Store<Lease>>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            backup_sessions: Arc::new(MemoryStore::new()),
            restore_sessions: Arc::new(MemoryStore::new()),
            repositories: Arc::new(MemoryStore::new()),
            secrets: Arc::new(MemoryStore::new()),
            invokers: Arc::new(MemoryStore::new()),
            events: Arc::new(MemoryStore::new()),
            leases: Arc::new(MemoryStore::new()),
        }
    }

    pub fn on_disk(root: &Path) -> Result<Self, StoreError> {
        Ok(Self {
            backup_sessions: Arc::new(FileStore::open(root)?),
            restore_sessions: Arc::new(FileStore::open(root)?),
            repositories: Arc::new(FileStore::open(root)?),
            secrets: Arc::new(FileStore::open(root)?),
            invokers: Arc::new(FileStore::open(root)?),
            events: Arc::new(FileStore::open(root)?),
            leases: Arc::new(FileStore::open(root)?),
        })
    }
}

fn validate_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{InvokerSpec, ObjectMeta};

    fn invoker(name: &str) -> Invoker {
        Invoker {
            metadata: ObjectMeta::new("default", name),
            spec: InvokerSpec::default(),
        }
    }

    #[test]
    fn test_update_with_retry_applies_mutation() {
        let store = MemoryStore::<Invoker>::new();
        let created = store.create(invoker("daily")).unwrap();

        let updated = update_with_retry(&store, &created.key(), |i| i.spec.paused = true).unwrap();
        assert!(updated.spec.paused);
        assert_eq!(updated.metadata.resource_version, 2);
    }

    #[test]
    fn test_update_with_retry_missing_record() {
        let store = MemoryStore::<Invoker>::new();
        let err = update_with_retry(&store, &ObjectKey::new("default", "nope"), |_| {}).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("backup-1").is_ok());
        assert!(validate_name("../etc").is_err());
        assert!(validate_name("").is_err());
    }
}
