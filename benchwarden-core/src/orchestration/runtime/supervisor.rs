use futures::StreamExt;
use futures::stream::BoxStream;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::orchestration::backoff::Backoff;
use crate::orchestration::events::{WatchChange, WatchEvent};
use crate::orchestration::job::JobTransition;
use crate::orchestration::reconciler::{
    ReconcileContext, ScanReconciler, ScheduleReconciler,
};
use crate::types::{ResourceKey, ResourceKind};

use super::controller::Controller;
use super::work_queue::WorkQueue;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Owns both controllers and the feeds that keep their queues filled.
///
/// Work arrives from the store's watch streams, from runner transitions,
/// and from the periodic resync; all three only ever enqueue identities.
pub struct ControllerRuntime {
    ctx: ReconcileContext,
    scans: Controller<ScanReconciler>,
    schedules: Controller<ScheduleReconciler>,
    shutdown_token: CancellationToken,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl fmt::Debug for ControllerRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerRuntime")
            .field("scans", &self.scans)
            .field("schedules", &self.schedules)
            .field("started", &self.started.load(Ordering::Relaxed))
            .field("shutdown_cancelled", &self.shutdown_token.is_cancelled())
            .finish()
    }
}

impl ControllerRuntime {
    pub fn new(ctx: ReconcileContext) -> Self {
        let controller_config = &ctx.config.controller;
        let backoff = Backoff::from_controller(controller_config);

        let scans = Controller::new(
            Arc::new(ScanReconciler::new(ctx.clone())),
            WorkQueue::new(backoff),
            controller_config.scan_workers,
        );
        let schedules = Controller::new(
            Arc::new(ScheduleReconciler::new(ctx.clone())),
            WorkQueue::new(backoff),
            controller_config.schedule_workers,
        );

        Self {
            ctx,
            scans,
            schedules,
            shutdown_token: CancellationToken::new(),
            worker_handles: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    pub fn context(&self) -> &ReconcileContext {
        &self.ctx
    }

    /// Spawns worker pools and feeds, then enqueues every known resource.
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!(target: "scan::controller", "controller runtime already started");
            return Ok(());
        }

        // Subscribe before listing so nothing admitted in between is missed.
        let scan_watch = self.ctx.store.subscribe(ResourceKind::ScanRequest);
        let schedule_watch = self.ctx.store.subscribe(ResourceKind::ScheduleDefinition);

        let mut handles = Vec::new();
        handles.extend(self.scans.spawn_workers());
        handles.extend(self.schedules.spawn_workers());
        handles.push(self.spawn_watch_feeder(scan_watch, self.scans.queue().clone()));
        handles.push(
            self.spawn_watch_feeder(schedule_watch, self.schedules.queue().clone()),
        );
        if let Some(transitions) = self.ctx.runner.transitions() {
            handles.push(self.spawn_transition_feeder(transitions));
        }
        if let Some(interval) = self.ctx.config.controller.resync_interval() {
            handles.push(self.spawn_resync(interval));
        }
        self.worker_handles.lock().await.extend(handles);

        let (scans, schedules) = self.enqueue_all().await?;
        tracing::info!(
            target: "scan::controller",
            scans,
            schedules,
            scan_workers = self.ctx.config.controller.scan_workers,
            schedule_workers = self.ctx.config.controller.schedule_workers,
            "controller runtime started"
        );
        Ok(())
    }

    pub fn enqueue_scan(&self, key: ResourceKey) {
        self.scans.queue().add(key);
    }

    pub fn enqueue_schedule(&self, key: ResourceKey) {
        self.schedules.queue().add(key);
    }

    async fn enqueue_all(&self) -> Result<(usize, usize)> {
        resync(&self.ctx, self.scans.queue(), self.schedules.queue()).await
    }

    fn spawn_watch_feeder(
        &self,
        mut watch: BoxStream<'static, WatchEvent>,
        queue: WorkQueue<ResourceKey>,
    ) -> JoinHandle<()> {
        let shutdown = self.shutdown_token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = watch.next() => match event {
                        Some(event) => {
                            tracing::trace!(
                                target: "scan::controller",
                                kind = %event.kind,
                                key = %event.key,
                                version = event.resource_version,
                                deleted = matches!(event.change, WatchChange::Deleted),
                                "watch event"
                            );
                            queue.add(event.key);
                        }
                        None => {
                            tracing::warn!(target: "scan::controller", "watch stream closed");
                            break;
                        }
                    }
                }
            }
        })
    }

    fn spawn_transition_feeder(
        &self,
        mut transitions: broadcast::Receiver<JobTransition>,
    ) -> JoinHandle<()> {
        let shutdown = self.shutdown_token.clone();
        let ctx = self.ctx.clone();
        let scans = self.scans.queue().clone();
        let schedules = self.schedules.queue().clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    transition = transitions.recv() => match transition {
                        Ok(transition) => scans.add(transition.handle.owner),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(
                                target: "scan::controller",
                                skipped,
                                "job transition feed lagged; resyncing"
                            );
                            if let Err(err) = resync(&ctx, &scans, &schedules).await {
                                tracing::warn!(target: "scan::controller", error = %err, "resync failed");
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        })
    }

    fn spawn_resync(&self, interval: Duration) -> JoinHandle<()> {
        let shutdown = self.shutdown_token.clone();
        let ctx = self.ctx.clone();
        let scans = self.scans.queue().clone();
        let schedules = self.schedules.queue().clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        match resync(&ctx, &scans, &schedules).await {
                            Ok((scans, schedules)) => tracing::debug!(
                                target: "scan::controller",
                                scans,
                                schedules,
                                "periodic resync"
                            ),
                            Err(err) => tracing::warn!(
                                target: "scan::controller",
                                error = %err,
                                "periodic resync failed"
                            ),
                        }
                    }
                }
            }
        })
    }

    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!(target: "scan::controller", "initiating controller runtime shutdown");

        self.shutdown_token.cancel();
        self.scans.queue().shutdown();
        self.schedules.queue().shutdown();

        let handles = {
            let mut guard = self.worker_handles.lock().await;
            std::mem::take(&mut *guard)
        };

        for handle in handles {
            match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(target: "scan::controller", error = %err, "controller task failed")
                }
                Err(_) => {
                    tracing::warn!(target: "scan::controller", "controller task timed out during shutdown")
                }
            }
        }

        tracing::info!(target: "scan::controller", "controller runtime shutdown complete");
        Ok(())
    }
}

async fn resync(
    ctx: &ReconcileContext,
    scans: &WorkQueue<ResourceKey>,
    schedules: &WorkQueue<ResourceKey>,
) -> Result<(usize, usize)> {
    let scan_keys = ctx.store.list_scans().await?;
    let schedule_keys = ctx.store.list_schedules().await?;
    let counts = (scan_keys.len(), schedule_keys.len());
    for key in scan_keys {
        scans.add(key);
    }
    for key in schedule_keys {
        schedules.add(key);
    }
    Ok(counts)
}
