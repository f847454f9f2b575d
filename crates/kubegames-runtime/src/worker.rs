//! Worker pool driving a reconciler from a work queue

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use kubegames_common::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::key::ObjectKey;
use crate::queue::WorkQueue;

/// A sync handler run for every dequeued key
///
/// Handlers must be idempotent: a key may be delivered again at any time, and
/// a failed key is delivered again after the pool's retry delay.
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Bring the object identified by `key` towards its desired state
    async fn sync(&self, key: &ObjectKey) -> Result<(), Error>;
}

/// Fixed-size pool of worker loops sharing one queue
#[derive(Clone, Debug)]
pub struct WorkerPool {
    workers: usize,
    retry_delay: Duration,
}

impl WorkerPool {
    /// Pool of `workers` loops (at least one) retrying failures after `retry_delay`
    pub fn new(workers: usize, retry_delay: Duration) -> Self {
        Self {
            workers: workers.max(1),
            retry_delay,
        }
    }

    /// Number of worker loops
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run workers until `shutdown` fires, then drain the queue and wait for them
    ///
    /// On shutdown the queue is closed; workers finish their current handler
    /// and whatever keys are still queued, then exit.
    pub async fn run<R>(&self, queue: WorkQueue<ObjectKey>, reconciler: Arc<R>, shutdown: CancellationToken)
    where
        R: Reconciler + ?Sized,
    {
        let name = reconciler.name();
        let mut workers = JoinSet::new();
        for id in 0..self.workers {
            let queue = queue.clone();
            let reconciler = Arc::clone(&reconciler);
            let retry_delay = self.retry_delay;
            workers.spawn(async move {
                while process_next(&queue, reconciler.as_ref(), retry_delay).await {}
                debug!(controller = reconciler.name(), worker = id, "worker stopped");
            });
        }
        info!(controller = name, workers = self.workers, "workers started");

        shutdown.cancelled().await;
        info!(controller = name, "shutting down workers");
        queue.shut_down();

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(controller = name, error = %e, "worker task failed");
            }
        }
        info!(controller = name, "workers stopped");
    }
}

/// Take one key off the queue and reconcile it
///
/// Returns `false` once the queue is shut down and empty. Failures and panics
/// re-queue the key after `retry_delay`; the key is released only after the
/// handler has returned.
pub async fn process_next<R>(queue: &WorkQueue<ObjectKey>, reconciler: &R, retry_delay: Duration) -> bool
where
    R: Reconciler + ?Sized,
{
    let Some(key) = queue.get().await else {
        return false;
    };
    let controller = reconciler.name();

    match AssertUnwindSafe(reconciler.sync(&key)).catch_unwind().await {
        Ok(Ok(())) => {
            debug!(controller, key = %key, "synced");
        }
        Ok(Err(e)) if e.is_waiting() => {
            info!(controller, key = %key, reason = %e, retry_in = ?retry_delay, "not ready, requeueing");
            queue.add_after(key.clone(), retry_delay);
        }
        Ok(Err(e)) if e.is_conflict() => {
            info!(controller, key = %key, retry_in = ?retry_delay, "stale write, requeueing");
            queue.add_after(key.clone(), retry_delay);
        }
        Ok(Err(e)) => {
            warn!(controller, key = %key, error = %e, retry_in = ?retry_delay, "sync failed, requeueing");
            queue.add_after(key.clone(), retry_delay);
        }
        Err(_) => {
            error!(controller, key = %key, retry_in = ?retry_delay, "sync panicked, requeueing");
            queue.add_after(key.clone(), retry_delay);
        }
    }

    queue.done(&key);
    true
}
