//! Watch-and-resync loop feeding a work queue
//!
//! Watch events give low latency; the periodic listing catches anything a
//! lagging watcher dropped and records written by other processes.

use super::queue::{run_workers, Reconcile, WorkQueue};
use crate::api::{LabelSelector, ObjectKey};
use crate::config::QueueConfig;
use crate::store::{Record, Store};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

pub struct Controller<T: Record> {
    store: Arc<dyn Store<T>>,
    namespace: String,
    workers: usize,
    max_requeues: u32,
    resync: Duration,
}

impl<T: Record> Controller<T> {
    pub fn new(store: Arc<dyn Store<T>>, namespace: impl Into<String>, queue: &QueueConfig) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            workers: queue.workers,
            max_requeues: queue.max_requeues,
            resync: Duration::from_secs(queue.resync_seconds.max(1)),
        }
    }

    fn in_scope(&self, obj: &T) -> bool {
        self.namespace.is_empty() || obj.meta().namespace == self.namespace
    }

    fn resync_into(&self, queue: &WorkQueue<ObjectKey>) {
        match self.store.list(&self.namespace, &LabelSelector::everything()) {
            Ok(items) => {
                debug!("Resync found {} {} records", items.len(), T::KIND);
                for item in items {
                    queue.add(item.key());
                }
            }
            Err(e) => warn!("Failed to list {} records: {}", T::KIND, e),
        }
    }

    /// Run until `shutdown` resolves, then drain the workers
    pub async fn run<R, S>(self, reconciler: Arc<R>, shutdown: S)
    where
        R: Reconcile<ObjectKey>,
        S: Future<Output = ()>,
    {
        let queue = WorkQueue::new(self.max_requeues);
        let mut events = self.store.watch();
        let workers = run_workers(queue.clone(), reconciler, self.workers);
        info!("{} controller started with {} worker(s)", T::KIND, self.workers.max(1));

        let mut resync = tokio::time::interval(self.resync);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = resync.tick() => self.resync_into(&queue),
                event = events.recv() => match event {
                    Ok(event) => {
                        let obj = event.object();
                        if self.in_scope(obj) {
                            queue.add(obj.key());
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Missed {} {} events, resyncing", missed, T::KIND);
                        self.resync_into(&queue);
                    }
                    Err(RecvError::Closed) => {
                        warn!("{} watch closed, relying on resync", T::KIND);
                        events = self.store.watch();
                    }
                },
            }
        }

        info!("Stopping {} controller", T::KIND);
        queue.shut_down();
        for worker in workers {
            if let Err(e) = worker.await {
                warn!("{} worker ended abnormally: {}", T::KIND, e);
            }
        }
    }
}
