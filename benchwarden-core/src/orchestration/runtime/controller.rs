use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::orchestration::reconciler::{Reconciler, Requeue};
use crate::types::ResourceKey;

use super::work_queue::WorkQueue;

/// Worker pool draining one kind's work queue into its reconciler.
///
/// Reconciler errors and panics are logged and the key is requeued with
/// backoff; a single identity can never take the process down.
pub struct Controller<R: Reconciler> {
    reconciler: Arc<R>,
    queue: WorkQueue<ResourceKey>,
    workers: usize,
}

impl<R: Reconciler> fmt::Debug for Controller<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("kind", &R::KIND)
            .field("queue", &self.queue)
            .field("workers", &self.workers)
            .finish()
    }
}

impl<R: Reconciler> Controller<R> {
    pub fn new(reconciler: Arc<R>, queue: WorkQueue<ResourceKey>, workers: usize) -> Self {
        Self {
            reconciler,
            queue,
            workers: workers.max(1),
        }
    }

    pub fn queue(&self) -> &WorkQueue<ResourceKey> {
        &self.queue
    }

    pub fn spawn_workers(&self) -> Vec<JoinHandle<()>> {
        (0..self.workers)
            .map(|index| {
                let reconciler = Arc::clone(&self.reconciler);
                let queue = self.queue.clone();
                tokio::spawn(worker_loop(index, reconciler, queue))
            })
            .collect()
    }
}

async fn worker_loop<R: Reconciler>(
    index: usize,
    reconciler: Arc<R>,
    queue: WorkQueue<ResourceKey>,
) {
    tracing::debug!(target: "scan::controller", kind = %R::KIND, worker = index, "worker started");
    while let Some(key) = queue.get().await {
        process(&reconciler, &queue, key).await;
    }
    tracing::debug!(target: "scan::controller", kind = %R::KIND, worker = index, "worker stopped");
}

async fn process<R: Reconciler>(
    reconciler: &Arc<R>,
    queue: &WorkQueue<ResourceKey>,
    key: ResourceKey,
) {
    let task = {
        let reconciler = Arc::clone(reconciler);
        let key = key.clone();
        // Own task so a panicking pass surfaces as a JoinError.
        tokio::spawn(async move { reconciler.reconcile(&key).await })
    };

    let outcome = task.await;
    queue.done(&key);
    match outcome {
        Ok(Ok(Requeue::Never)) => queue.forget(&key),
        Ok(Ok(Requeue::After(delay))) => {
            queue.forget(&key);
            queue.add_after(key, delay);
        }
        Ok(Err(err)) => {
            let failures = queue.failures(&key) + 1;
            tracing::warn!(
                target: "scan::controller",
                kind = %R::KIND,
                key = %key,
                failures,
                error = %err,
                "reconcile failed; requeueing with backoff"
            );
            queue.add_rate_limited(key);
        }
        Err(join_err) => {
            tracing::error!(
                target: "scan::controller",
                kind = %R::KIND,
                key = %key,
                panicked = join_err.is_panic(),
                error = %join_err,
                "reconcile task aborted; requeueing with backoff"
            );
            queue.add_rate_limited(key);
        }
    }
}
