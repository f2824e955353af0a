//! JSON-file store with file locking
//!
//! Layout: `<root>/<Kind>/<namespace>/<name>.json`. Every write holds an
//! exclusive `fd-lock` on `<root>/<Kind>/.lock` for the whole
//! read-compare-write, so separate processes sharing the directory get the
//! same compare-and-swap semantics as the in-memory store.

use super::{validate_name, Record, Store, StoreError, WatchEvent, WATCH_CAPACITY};
use crate::api::{LabelSelector, ObjectKey};
use fd_lock::RwLock;
use std::fs::{self, OpenOptions};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Directory used for records without a namespace
const CLUSTER_SCOPE_DIR: &str = "_cluster";

pub struct FileStore<T: Record> {
    root: PathBuf,
    events: broadcast::Sender<WatchEvent<T>>,
    _kind: PhantomData<T>,
}

impl<T: Record> FileStore<T> {
    pub fn open(base: &Path) -> Result<Self, StoreError> {
        let root = base.join(T::KIND);
        fs::create_dir_all(&root)?;
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        debug!("Opened {} store at {:?}", T::KIND, root);
        Ok(Self {
            root,
            events,
            _kind: PhantomData,
        })
    }

    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        if namespace.is_empty() {
            self.root.join(CLUSTER_SCOPE_DIR)
        } else {
            self.root.join(namespace)
        }
    }

    fn record_path(&self, key: &ObjectKey) -> PathBuf {
        self.namespace_dir(&key.namespace)
            .join(format!("{}.json", key.name))
    }

    /// Run `f` while holding the kind-wide write lock
    fn locked<R>(&self, f: impl FnOnce() -> Result<R, StoreError>) -> Result<R, StoreError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.root.join(".lock"))?;
        let mut lock = RwLock::new(file);
        let _guard = lock.write()?;
        f()
    }

    fn read(&self, key: &ObjectKey) -> Result<Option<T>, StoreError> {
        let path = self.record_path(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &ObjectKey, obj: &T) -> Result<(), StoreError> {
        let path = self.record_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Rename keeps readers from seeing a half-written file
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(obj)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn read_dir(&self, dir: &Path, selector: &LabelSelector, out: &mut Vec<T>) -> Result<(), StoreError> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read(&path).map_err(StoreError::from).and_then(|b| {
                serde_json::from_slice::<T>(&b).map_err(StoreError::from)
            }) {
                Ok(obj) if selector.matches(&obj.meta().labels) => out.push(obj),
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable {} record {:?}: {}", T::KIND, path, e),
            }
        }
        Ok(())
    }
}

impl<T: Record> Store<T> for FileStore<T> {
    fn get(&self, key: &ObjectKey) -> Result<T, StoreError> {
        validate_name(&key.name)?;
        self.read(key)?.ok_or_else(|| StoreError::NotFound {
            kind: T::KIND,
            key: key.to_string(),
        })
    }

    fn create(&self, mut obj: T) -> Result<T, StoreError> {
        validate_name(&obj.meta().name)?;
        let key = obj.key();
        let created = self.locked(|| {
            if self.read(&key)?.is_some() {
                return Err(StoreError::AlreadyExists {
                    kind: T::KIND,
                    key: key.to_string(),
                });
            }
            obj.meta_mut().resource_version = 1;
            self.write(&key, &obj)?;
            Ok(obj)
        })?;

        let _ = self.events.send(WatchEvent::Added(created.clone()));
        Ok(created)
    }

    fn update(&self, mut obj: T) -> Result<T, StoreError> {
        validate_name(&obj.meta().name)?;
        let key = obj.key();
        let updated = self.locked(|| {
            let current = self.read(&key)?.ok_or_else(|| StoreError::NotFound {
                kind: T::KIND,
                key: key.to_string(),
            })?;

            let expected = obj.meta().resource_version;
            let actual = current.meta().resource_version;
            if expected != actual {
                return Err(StoreError::Conflict {
                    kind: T::KIND,
                    key: key.to_string(),
                    expected,
                    actual,
                });
            }

            obj.meta_mut().resource_version = actual + 1;
            self.write(&key, &obj)?;
            Ok(obj)
        })?;

        let _ = self.events.send(WatchEvent::Modified(updated.clone()));
        Ok(updated)
    }

    fn list(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<T>, StoreError> {
        let mut out = Vec::new();
        if namespace.is_empty() {
            for entry in fs::read_dir(&self.root)?.filter_map(|e| e.ok()) {
                if entry.path().is_dir() {
                    self.read_dir(&entry.path(), selector, &mut out)?;
                }
            }
        } else {
            self.read_dir(&self.namespace_dir(namespace), selector, &mut out)?;
        }
        out.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(out)
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent<T>> {
        self.events.subscribe()
    }
}
