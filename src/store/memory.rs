use super::{validate_name, Record, Store, StoreError, WatchEvent, WATCH_CAPACITY};
use crate::api::{LabelSelector, ObjectKey};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;

/// Process-local store
pub struct MemoryStore<T: Record> {
    items: Mutex<BTreeMap<ObjectKey, T>>,
    events: broadcast::Sender<WatchEvent<T>>,
}

impl<T: Record> MemoryStore<T> {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            items: Mutex::new(BTreeMap::new()),
            events,
        }
    }

    fn items(&self) -> Result<MutexGuard<'_, BTreeMap<ObjectKey, T>>, StoreError> {
        self.items.lock().map_err(|_| StoreError::Lock(T::KIND))
    }
}

impl<T: Record> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Record> Store<T> for MemoryStore<T> {
    fn get(&self, key: &ObjectKey) -> Result<T, StoreError> {
        self.items()?
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: T::KIND,
                key: key.to_string(),
            })
    }

    fn create(&self, mut obj: T) -> Result<T, StoreError> {
        validate_name(&obj.meta().name)?;
        let key = obj.key();
        let mut items = self.items()?;
        if items.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: T::KIND,
                key: key.to_string(),
            });
        }
        obj.meta_mut().resource_version = 1;
        items.insert(key, obj.clone());
        drop(items);

        // No receivers is fine
        let _ = self.events.send(WatchEvent::Added(obj.clone()));
        Ok(obj)
    }

    fn update(&self, mut obj: T) -> Result<T, StoreError> {
        let key = obj.key();
        let mut items = self.items()?;
        let current = items.get(&key).ok_or_else(|| StoreError::NotFound {
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
        items.insert(key, obj.clone());
        drop(items);

        let _ = self.events.send(WatchEvent::Modified(obj.clone()));
        Ok(obj)
    }

    fn list(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<T>, StoreError> {
        Ok(self
            .items()?
            .values()
            .filter(|o| namespace.is_empty() || o.meta().namespace == namespace)
            .filter(|o| selector.matches(&o.meta().labels))
            .cloned()
            .collect())
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent<T>> {
        self.events.subscribe()
    }
}
