//! Lease-based leader election
//!
//! Replicas of the same workload share one logical host, so only one of
//! them may run a session at a time. The elector wins a [`Lease`] record
//! with compare-and-swap writes, keeps it renewed while the work runs and
//! releases it afterwards.

use crate::api::{Lease, LeaseSpec, ObjectKey, ObjectMeta};
use crate::config::ElectionConfig;
use crate::store::{Store, StoreError};
use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

/// Lease timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseTiming {
    /// How long a non-renewed lease blocks other candidates
    pub lease_duration: Duration,
    /// Give up leadership if no renewal succeeded for this long
    pub renew_deadline: Duration,
    /// Pause between acquire and renew attempts
    pub retry_period: Duration,
}

impl Default for LeaseTiming {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(15),
            renew_deadline: Duration::from_secs(10),
            retry_period: Duration::from_secs(2),
        }
    }
}

impl LeaseTiming {
    pub fn from_config(config: &ElectionConfig) -> Self {
        Self {
            lease_duration: Duration::from_secs(config.lease_duration_seconds),
            renew_deadline: Duration::from_secs(config.renew_deadline_seconds),
            retry_period: Duration::from_secs(config.retry_period_seconds),
        }
    }

    /// Whole seconds stored on the record, never zero
    fn lease_seconds(&self) -> u64 {
        let millis = self.lease_duration.as_millis() as u64;
        millis.div_ceil(1000).max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectorState {
    Candidate,
    Leader,
    Resigning,
}

/// Outcome of [`LeaderElector::run_exclusive`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Leadership<T> {
    /// Work finished while the lease was held
    Completed(T),
    /// Renewal failed before the work finished; the value is still returned
    Lost(T),
}

impl<T> Leadership<T> {
    pub fn into_inner(self) -> T {
        match self {
            Leadership::Completed(v) | Leadership::Lost(v) => v,
        }
    }

    pub fn is_lost(&self) -> bool {
        matches!(self, Leadership::Lost(_))
    }
}

/// Handed to the work so it can notice a lost lease
#[derive(Debug, Clone)]
pub struct LeadershipHandle {
    lost: watch::Receiver<bool>,
}

impl LeadershipHandle {
    pub fn is_lost(&self) -> bool {
        *self.lost.borrow()
    }

    /// Resolves once the lease is lost
    pub async fn lost(&mut self) {
        while !*self.lost.borrow() {
            if self.lost.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Competes for leases on behalf of one replica
///
/// The record only knows the replica identity, so workers of the same
/// process are serialized per lease key before they reach the store.
pub struct LeaderElector {
    store: Arc<dyn Store<Lease>>,
    namespace: String,
    identity: String,
    timing: LeaseTiming,
    state: watch::Sender<ElectorState>,
    local: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    held: AtomicUsize,
}

impl LeaderElector {
    pub fn new(
        store: Arc<dyn Store<Lease>>,
        namespace: impl Into<String>,
        identity: impl Into<String>,
        timing: LeaseTiming,
    ) -> Self {
        let (state, _) = watch::channel(ElectorState::Candidate);
        Self {
            store,
            namespace: namespace.into(),
            identity: identity.into(),
            timing,
            state,
            local: Mutex::new(HashMap::new()),
            held: AtomicUsize::new(0),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn state(&self) -> ElectorState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ElectorState> {
        self.state.subscribe()
    }

    /// Wait for the lease on `key`, run `work` once while holding it, then release
    pub async fn run_exclusive<T, F, Fut>(&self, key: &str, work: F) -> anyhow::Result<Leadership<T>>
    where
        F: FnOnce(LeadershipHandle) -> Fut,
        Fut: Future<Output = T>,
    {
        let gate = self.local_gate(key)?;
        let _local = gate.lock().await;

        self.acquire(key).await;
        self.held.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(ElectorState::Leader);
        info!("{} became leader for {}", self.identity, key);

        let (lost_tx, lost_rx) = watch::channel(false);
        let (stop_tx, stop_rx) = oneshot::channel();
        let renewer = Renewer {
            store: self.store.clone(),
            key: ObjectKey::new(&self.namespace, key),
            identity: self.identity.clone(),
            timing: self.timing,
        };
        let renew_task = tokio::spawn(renewer.run(lost_tx, stop_rx));

        let value = work(LeadershipHandle { lost: lost_rx }).await;

        let _ = stop_tx.send(());
        let lost = renew_task.await?;

        if lost {
            warn!("{} lost leadership for {} while working", self.identity, key);
        } else if let Err(e) = self.release(key).await {
            // The lease simply expires
            warn!("Failed to release lease {}: {}", key, e);
        }

        // Other keys may still be held by this replica
        if self.held.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.state.send_replace(ElectorState::Resigning);
            self.state.send_replace(ElectorState::Candidate);
        }

        Ok(if lost {
            Leadership::Lost(value)
        } else {
            Leadership::Completed(value)
        })
    }

    fn local_gate(&self, key: &str) -> anyhow::Result<Arc<AsyncMutex<()>>> {
        let mut gates = self
            .local
            .lock()
            .map_err(|_| anyhow::anyhow!("lease gate lock poisoned"))?;
        Ok(gates.entry(key.to_string()).or_default().clone())
    }

    async fn acquire(&self, key: &str) {
        let object_key = ObjectKey::new(&self.namespace, key);
        loop {
            match acquire_or_renew(&self.store, &object_key, &self.identity, self.timing).await {
                Ok(true) => return,
                Ok(false) => debug!("Lease {} is held elsewhere, retrying", key),
                Err(e) => warn!("Error acquiring lease {}: {}", key, e),
            }
            tokio::time::sleep(self.timing.retry_period).await;
        }
    }

    /// Hand the lease back so the next candidate does not wait for expiry
    async fn release(&self, key: &str) -> anyhow::Result<()> {
        let store = self.store.clone();
        let object_key = ObjectKey::new(&self.namespace, key);
        let identity = self.identity.clone();
        tokio::task::spawn_blocking(move || release_lease(store.as_ref(), &object_key, &identity))
            .await??;
        debug!("{} released lease {}", self.identity, key);
        Ok(())
    }
}

fn release_lease(store: &dyn Store<Lease>, key: &ObjectKey, identity: &str) -> Result<(), StoreError> {
    let mut lease = store.get(key)?;
    if !lease.spec.is_held_by(identity) {
        return Ok(());
    }
    let now = Utc::now();
    lease.spec.holder_identity = None;
    lease.spec.renew_time = Some(now);
    lease.spec.acquire_time = Some(now);
    lease.spec.lease_duration_seconds = 1;
    store.update(lease)?;
    Ok(())
}

/// [`try_acquire_or_renew`] off the async workers; file-backed stores block on a lock
async fn acquire_or_renew(
    store: &Arc<dyn Store<Lease>>,
    key: &ObjectKey,
    identity: &str,
    timing: LeaseTiming,
) -> anyhow::Result<bool> {
    let store = store.clone();
    let key = key.clone();
    let identity = identity.to_string();
    let acquired = tokio::task::spawn_blocking(move || {
        try_acquire_or_renew(store.as_ref(), &key, &identity, &timing)
    })
    .await??;
    Ok(acquired)
}

/// Background renewal while the work runs
struct Renewer {
    store: Arc<dyn Store<Lease>>,
    key: ObjectKey,
    identity: String,
    timing: LeaseTiming,
}

impl Renewer {
    /// Returns true if leadership was lost
    async fn run(self, lost: watch::Sender<bool>, mut stop: oneshot::Receiver<()>) -> bool {
        let mut last_renew = Instant::now();
        loop {
            tokio::select! {
                _ = &mut stop => return false,
                _ = tokio::time::sleep(self.timing.retry_period) => {}
            }

            match acquire_or_renew(&self.store, &self.key, &self.identity, self.timing).await {
                Ok(true) => last_renew = Instant::now(),
                Ok(false) => debug!("Failed to renew lease {}", self.key),
                Err(e) => warn!("Error renewing lease {}: {}", self.key, e),
            }

            if last_renew.elapsed() > self.timing.renew_deadline {
                warn!(
                    "No renewal of {} within {:?}, giving up leadership",
                    self.key, self.timing.renew_deadline
                );
                let _ = lost.send(true);
                return true;
            }
        }
    }
}

/// One acquire-or-renew attempt; `Ok(false)` when someone else holds the lease
/// or a concurrent write won
fn try_acquire_or_renew(
    store: &dyn Store<Lease>,
    key: &ObjectKey,
    identity: &str,
    timing: &LeaseTiming,
) -> Result<bool, StoreError> {
    let now = Utc::now();

    let mut lease = match store.get(key) {
        Ok(lease) => lease,
        Err(e) if e.is_not_found() => {
            let lease = Lease {
                metadata: ObjectMeta::new(&key.namespace, &key.name),
                spec: LeaseSpec {
                    holder_identity: Some(identity.to_string()),
                    acquire_time: Some(now),
                    renew_time: Some(now),
                    lease_duration_seconds: timing.lease_seconds(),
                    lease_transitions: 0,
                },
            };
            return match store.create(lease) {
                Ok(_) => Ok(true),
                Err(StoreError::AlreadyExists { .. }) => Ok(false),
                Err(e) => Err(e),
            };
        }
        Err(e) => return Err(e),
    };

    let held_by_us = lease.spec.is_held_by(identity);
    if !held_by_us && lease.spec.is_held_at(now) {
        return Ok(false);
    }

    if !held_by_us {
        let had_holder = lease
            .spec
            .holder_identity
            .as_deref()
            .is_some_and(|h| !h.is_empty());
        if had_holder {
            lease.spec.lease_transitions += 1;
        }
        lease.spec.holder_identity = Some(identity.to_string());
        lease.spec.acquire_time = Some(now);
    }
    lease.spec.renew_time = Some(now);
    lease.spec.lease_duration_seconds = timing.lease_seconds();

    match store.update(lease) {
        Ok(_) => Ok(true),
        Err(e) if e.is_conflict() => Ok(false),
        Err(e) => Err(e),
    }
}
