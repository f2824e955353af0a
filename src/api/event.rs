//! Observable events and leases

use super::meta::{ObjectMeta, ObjectReference};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum EventType {
    Normal,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub metadata: ObjectMeta,
    pub involved_object: ObjectReference,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

/// Exclusive, renewable ownership of a target
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder_identity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquire_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renew_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub lease_duration_seconds: u64,
    #[serde(default)]
    pub lease_transitions: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Lease {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: LeaseSpec,
}

impl LeaseSpec {
    /// Held by someone whose lease has not yet run out
    pub fn is_held_at(&self, now: DateTime<Utc>) -> bool {
        match (&self.holder_identity, self.renew_time) {
            (Some(holder), Some(renewed)) if !holder.is_empty() => {
                let ttl = chrono::Duration::seconds(self.lease_duration_seconds as i64);
                renewed + ttl > now
            }
            _ => false,
        }
    }

    pub fn is_held_by(&self, identity: &str) -> bool {
        self.holder_identity.as_deref() == Some(identity)
    }
}

impl Record for Event {
    const KIND: &'static str = "Event";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Record for Lease {
    const KIND: &'static str = "Lease";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
