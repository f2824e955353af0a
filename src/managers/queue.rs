//! Deduplicating work queue with per-key exclusivity and retry backoff
//!
//! A key is held by at most one worker. Adding a key that is already queued
//! is a no-op; adding one that is being processed parks it until the worker
//! calls [`WorkQueue::done`], after which it is queued again.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

const BASE_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Something that brings one key to its desired state
pub trait Reconcile<K>: Send + Sync + 'static {
    fn reconcile(&self, key: K) -> impl Future<Output = anyhow::Result<()>> + Send;
}

struct QueueState<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    requeues: HashMap<K, u32>,
    shutting_down: bool,
}

pub struct WorkQueue<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
    max_requeues: u32,
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Display + Send + Sync + 'static,
{
    pub fn new(max_requeues: u32) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                requeues: HashMap::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
            max_requeues,
        })
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<K>> {
        // A panic while holding the lock leaves the sets consistent
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add(&self, key: K) {
        let mut state = self.lock();
        if state.shutting_down || !state.dirty.insert(key.clone()) {
            return;
        }
        if state.processing.contains(&key) {
            debug!("{} is being processed, parking", key);
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Next key to process, or `None` once the queue is shut down
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Finish processing; a key re-added meanwhile is queued again
    pub fn done(&self, key: &K) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Reset the retry count of a key that succeeded
    pub fn forget(&self, key: &K) {
        self.lock().requeues.remove(key);
    }

    pub fn num_requeues(&self, key: &K) -> u32 {
        self.lock().requeues.get(key).copied().unwrap_or(0)
    }

    /// Schedule a retry with exponential backoff; false once retries are exhausted
    pub fn add_rate_limited(self: &Arc<Self>, key: K) -> bool {
        let attempt = {
            let mut state = self.lock();
            let count = state.requeues.entry(key.clone()).or_insert(0);
            *count += 1;
            let attempt = *count;
            if attempt > self.max_requeues {
                state.requeues.remove(&key);
                return false;
            }
            attempt
        };

        let delay = backoff(attempt);
        debug!("Requeueing {} in {:?} (attempt {})", key, delay, attempt);
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
        true
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop handing out keys; waiting workers return `None`
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.notify.notify_waiters();
    }
}

/// `500ms * 2^(attempt-1)`, capped at one minute
pub fn backoff(attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    BASE_BACKOFF.saturating_mul(factor).min(MAX_BACKOFF)
}

/// Spawn `workers` tasks that drain the queue into the reconciler
pub fn run_workers<K, R>(queue: Arc<WorkQueue<K>>, reconciler: Arc<R>, workers: usize) -> Vec<JoinHandle<()>>
where
    K: Clone + Eq + Hash + Display + Send + Sync + 'static,
    R: Reconcile<K>,
{
    (0..workers.max(1))
        .map(|_| {
            let queue = queue.clone();
            let reconciler = reconciler.clone();
            tokio::spawn(async move {
                while let Some(key) = queue.get().await {
                    match reconciler.reconcile(key.clone()).await {
                        Ok(()) => queue.forget(&key),
                        Err(e) => {
                            if queue.add_rate_limited(key.clone()) {
                                warn!("Error processing {}, will retry: {:#}", key, e);
                            } else {
                                error!("Dropping {} after repeated failures: {:#}", key, e);
                            }
                        }
                    }
                    queue.done(&key);
                }
            })
        })
        .collect()
}
