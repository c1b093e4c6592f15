use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Result, ScanError};
use crate::orchestration::events::ScanEvent;
use crate::types::{
    ConcurrencyPolicy, ResourceKey, ResourceKind, ScanOrigin, ScanRequest,
    ScheduleDefinition, ScheduleStatus,
};

use super::{ReconcileContext, Reconciler, Requeue, until};

/// Expands schedule definitions into scan requests on their cadence.
#[derive(Debug)]
pub struct ScheduleReconciler {
    ctx: ReconcileContext,
}

impl ScheduleReconciler {
    pub fn new(ctx: ReconcileContext) -> Self {
        Self { ctx }
    }

    fn requeue_for_next(
        definition: &ScheduleDefinition,
        after: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Requeue {
        match definition.cadence.next_after(after.max(now)) {
            Some(next) => Requeue::After(until(now, next)),
            None => Requeue::Never,
        }
    }

    fn spawn_request(
        definition: &ScheduleDefinition,
        boundary: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> ScanRequest {
        ScanRequest {
            key: ResourceKey::new(
                definition.key.scope.clone(),
                definition.spawned_name(boundary),
            ),
            profile: definition.profile.clone(),
            target: definition.target.clone(),
            deadline_secs: definition.deadline_secs,
            cancel_requested: false,
            origin: ScanOrigin::Schedule {
                schedule: definition.key.clone(),
            },
            created_at: now,
        }
    }

    /// The previously spawned request, if it still exists and is in flight.
    async fn in_flight(&self, status: &ScheduleStatus) -> Result<Option<ResourceKey>> {
        let Some(active) = &status.active else {
            return Ok(None);
        };
        let record = self.ctx.store.get_scan(active).await?;
        Ok(record
            .filter(|record| !record.is_terminal())
            .map(|record| record.request.key))
    }

    /// Drops the oldest spawned requests beyond the retention limit.
    async fn prune(
        &self,
        definition: &ScheduleDefinition,
        status: &mut ScheduleStatus,
        events: &mut Vec<ScanEvent>,
    ) -> Result<()> {
        let limit = definition
            .history_limit
            .unwrap_or(self.ctx.config.schedule.default_history_limit)
            .max(1);

        while status.spawned.len() > limit {
            let Some(oldest) = status.spawned.pop_front() else {
                break;
            };
            if let Some(record) = self.ctx.store.get_scan(&oldest).await?
                && let Some(run) = record.status.active.as_ref()
                && !run.is_terminal()
                && let Some(job) = run.job.as_ref()
                && let Err(err) = self.ctx.runner.cancel(job).await
            {
                tracing::warn!(
                    target: "scan::schedule",
                    schedule = %definition.key,
                    scan = %oldest,
                    error = %err,
                    "failed to cancel job of pruned scan"
                );
            }
            self.ctx.store.delete_scan(&oldest).await?;
            tracing::debug!(
                target: "scan::schedule",
                schedule = %definition.key,
                scan = %oldest,
                "pruned spawned scan"
            );
            events.push(ScanEvent::SchedulePruned {
                schedule: definition.key.clone(),
                pruned: oldest,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Reconciler for ScheduleReconciler {
    const KIND: ResourceKind = ResourceKind::ScheduleDefinition;

    async fn reconcile(&self, key: &ResourceKey) -> Result<Requeue> {
        let Some(record) = self.ctx.store.get_schedule(key).await? else {
            tracing::debug!(target: "scan::schedule", schedule = %key, "schedule gone");
            return Ok(Requeue::Never);
        };
        let definition = &record.definition;
        if definition.suspended {
            tracing::debug!(target: "scan::schedule", schedule = %key, "schedule suspended");
            return Ok(Requeue::Never);
        }

        let now = self.ctx.clock.now();
        let anchor = record.status.last_boundary.unwrap_or(definition.created_at);
        let Some(boundary) = definition.cadence.latest_due(anchor, now) else {
            return Ok(Self::requeue_for_next(definition, anchor, now));
        };

        let mut status = record.status.clone();
        let mut events = Vec::new();
        status.last_boundary = Some(boundary);

        match (definition.concurrency, self.in_flight(&status).await?) {
            (ConcurrencyPolicy::Forbid, Some(blocking)) => {
                tracing::info!(
                    target: "scan::schedule",
                    schedule = %key,
                    %boundary,
                    blocked_by = %blocking,
                    "previous scan still running; skipping firing"
                );
                status.skipped_firings += 1;
                events.push(ScanEvent::ScheduleSkipped {
                    schedule: key.clone(),
                    boundary,
                    blocked_by: blocking,
                });
            }
            (policy, previous) => {
                if policy == ConcurrencyPolicy::Replace
                    && let Some(previous) = previous
                {
                    match self.ctx.store.request_cancel(&previous).await {
                        Ok(_) | Err(ScanError::NotFound(_)) => {}
                        Err(err) => return Err(err),
                    }
                    tracing::info!(
                        target: "scan::schedule",
                        schedule = %key,
                        replaced = %previous,
                        "cancelled previous scan"
                    );
                }

                let request = Self::spawn_request(definition, boundary, now);
                let spawned = request.key.clone();
                match self.ctx.store.admit_scan(request).await {
                    Ok(_) => {}
                    // Same boundary fired before the status write landed.
                    Err(ScanError::AlreadyExists(_)) => {}
                    Err(err) => return Err(err),
                }
                tracing::info!(
                    target: "scan::schedule",
                    schedule = %key,
                    %boundary,
                    scan = %spawned,
                    "schedule fired"
                );

                status.active = Some(spawned.clone());
                status.last_fired_at = Some(now);
                if !status.spawned.contains(&spawned) {
                    status.spawned.push_back(spawned.clone());
                }
                events.push(ScanEvent::ScheduleFired {
                    schedule: key.clone(),
                    spawned,
                    boundary,
                });
                self.prune(definition, &mut status, &mut events).await?;
            }
        }

        match self.ctx.store.update_schedule_status(key, status).await {
            Ok(_) => {}
            Err(ScanError::NotFound(_)) => return Ok(Requeue::Never),
            Err(err) => return Err(err),
        }
        self.ctx.publish_all(events).await;
        Ok(Self::requeue_for_next(definition, boundary, now))
    }
}
