//! Session events
//!
//! Events are informational. Failing to write one is logged and never turns
//! a successful session into a failed one.

use crate::api::{Event, EventType, ObjectMeta, ObjectReference};
use crate::store::Store;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

pub const REASON_HOST_BACKUP_SUCCEEDED: &str = "Host Backup Succeeded";
pub const REASON_HOST_BACKUP_FAILED: &str = "Host Backup Failed";
pub const REASON_HOST_RESTORE_SUCCEEDED: &str = "Host Restore Succeeded";
pub const REASON_HOST_RESTORE_FAILED: &str = "Host Restore Failed";

/// Component name stamped on every event
pub const EVENT_SOURCE: &str = "backup-sidecar";

pub trait EventRecorder: Send + Sync {
    fn record(&self, involved: &ObjectReference, event_type: EventType, reason: &str, message: &str);
}

/// Writes events as records next to the sessions they describe
pub struct StoreEventRecorder {
    store: Arc<dyn Store<Event>>,
    source: String,
}

impl StoreEventRecorder {
    pub fn new(store: Arc<dyn Store<Event>>) -> Self {
        Self {
            store,
            source: EVENT_SOURCE.to_string(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

impl EventRecorder for StoreEventRecorder {
    fn record(&self, involved: &ObjectReference, event_type: EventType, reason: &str, message: &str) {
        let now = Utc::now();
        let name = format!(
            "{}.{}",
            involved.name,
            now.timestamp_nanos_opt().unwrap_or_default()
        );
        let event = Event {
            metadata: ObjectMeta::new(&involved.namespace, &name),
            involved_object: involved.clone(),
            event_type,
            reason: reason.to_string(),
            message: message.to_string(),
            source: self.source.clone(),
            timestamp: now,
        };

        match self.store.create(event) {
            Ok(_) => debug!("Recorded {:?} event '{}' for {}", event_type, reason, involved.name),
            Err(e) => warn!("Failed to record event '{}' for {}: {}", reason, involved.name, e),
        }
    }
}
