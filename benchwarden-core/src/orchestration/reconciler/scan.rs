use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::clock::chrono_span;
use crate::error::{Result, ScanError};
use crate::metrics::SeriesKey;
use crate::orchestration::backoff::Backoff;
use crate::orchestration::events::ScanEvent;
use crate::orchestration::job::{JobObservation, JobSpec};
use crate::report;
use crate::types::{
    FailureReason, ResourceKey, ResourceKind, RunStatus, ScanRequest, ScanRun,
    ScanStatus,
};

use super::{ReconcileContext, Reconciler, Requeue, until};

/// Owns the lifecycle of a single scan request's runs.
#[derive(Debug)]
pub struct ScanReconciler {
    ctx: ReconcileContext,
    retry: Backoff,
}

/// Outcome of one state-machine step.
enum Step {
    /// State advanced in memory; evaluate again.
    Continue,
    Yield(Requeue),
}

/// Working copy of a request's status for one pass.
struct ScanPass<'a> {
    request: &'a ScanRequest,
    status: ScanStatus,
    events: Vec<ScanEvent>,
    now: DateTime<Utc>,
}

impl ScanPass<'_> {
    fn active(&mut self) -> Result<&mut ScanRun> {
        self.status
            .active
            .as_mut()
            .ok_or_else(|| ScanError::Internal("no active run".into()))
    }

    fn transition(&mut self, to: RunStatus) -> Result<()> {
        let now = self.now;
        let request = self.request;
        let run = self.active()?;
        let from = run.status;
        run.transition(to, now)?;
        let event = ScanEvent::RunTransitioned {
            request: request.key.clone(),
            run: run.id,
            from: Some(from),
            to,
            failure: None,
            at: now,
        };
        self.events.push(event);
        Ok(())
    }

    fn fail(&mut self, reason: FailureReason) -> Result<()> {
        let now = self.now;
        let run = self.active()?;
        let from = run.status;
        run.fail(reason.clone(), now)?;
        let run_id = run.id;
        tracing::warn!(
            target: "scan::reconcile",
            scan = %self.request.key,
            run = %run_id,
            %from,
            reason = %reason,
            "scan run failed"
        );
        self.events.push(ScanEvent::RunTransitioned {
            request: self.request.key.clone(),
            run: run_id,
            from: Some(from),
            to: RunStatus::Failed,
            failure: Some(reason),
            at: now,
        });
        Ok(())
    }

    fn open(&mut self, run: ScanRun) {
        self.events.push(ScanEvent::RunTransitioned {
            request: self.request.key.clone(),
            run: run.id,
            from: None,
            to: run.status,
            failure: None,
            at: self.now,
        });
        self.status.active = Some(run);
    }
}

impl ScanReconciler {
    pub fn new(ctx: ReconcileContext) -> Self {
        let retry = Backoff::from_retry(&ctx.config.retry);
        Self { ctx, retry }
    }

    fn max_attempts(&self) -> u16 {
        self.ctx.config.retry.max_attempts.max(1)
    }

    fn poll_interval(&self) -> Duration {
        self.ctx.config.timeouts.poll_interval()
    }

    async fn drive(&self, pass: &mut ScanPass<'_>) -> Result<Requeue> {
        loop {
            let phase = pass.status.phase();
            let step = match phase {
                None => self.open_run(pass)?,
                Some(status) if status.is_terminal() => Step::Yield(Requeue::Never),
                // Checked before observing so cancellation wins over a late
                // success.
                Some(status)
                    if pass.request.cancel_requested && status.is_cancellable() =>
                {
                    self.cancel_run(pass).await?
                }
                Some(RunStatus::Pending) => self.step_pending(pass).await?,
                Some(RunStatus::Running) => self.step_running(pass).await?,
                Some(RunStatus::ReportReady) => self.step_report_ready(pass)?,
                Some(RunStatus::Completed | RunStatus::Failed) => {
                    Step::Yield(Requeue::Never)
                }
            };
            if let Step::Yield(requeue) = step {
                return Ok(requeue);
            }
        }
    }

    fn open_run(&self, pass: &mut ScanPass<'_>) -> Result<Step> {
        let reference = pass.request.profile.as_deref();
        match self.ctx.profiles.resolve(reference) {
            Ok(profile) => {
                tracing::info!(
                    target: "scan::reconcile",
                    scan = %pass.request.key,
                    profile = %profile.name,
                    "opening scan run"
                );
                pass.open(ScanRun::open(Some(profile), pass.now));
                Ok(Step::Continue)
            }
            Err(err) => {
                let detail = match err {
                    ScanError::InvalidProfile(detail) => detail,
                    other => other.to_string(),
                };
                pass.open(ScanRun::open(None, pass.now));
                pass.fail(FailureReason::InvalidProfile(detail))?;
                Ok(Step::Yield(Requeue::Never))
            }
        }
    }

    async fn cancel_run(&self, pass: &mut ScanPass<'_>) -> Result<Step> {
        if let Some(handle) = pass.active()?.job.clone()
            && let Err(err) = self.ctx.runner.cancel(&handle).await
        {
            tracing::warn!(
                target: "scan::reconcile",
                scan = %pass.request.key,
                job = %handle,
                error = %err,
                "job cancel failed; marking run cancelled anyway"
            );
        }
        pass.fail(FailureReason::Cancelled)?;
        Ok(Step::Yield(Requeue::Never))
    }

    async fn step_pending(&self, pass: &mut ScanPass<'_>) -> Result<Step> {
        let now = pass.now;
        let request = pass.request;
        let run = pass.active()?;
        if let Some(gate) = run.next_attempt_at
            && gate > now
        {
            return Ok(Step::Yield(Requeue::After(until(now, gate))));
        }

        let profile = run.profile.clone().ok_or_else(|| {
            ScanError::Internal("pending run without a resolved profile".into())
        })?;
        run.attempts = run.attempts.saturating_add(1);
        let attempt = run.attempts;
        let spec = JobSpec {
            owner: request.key.clone(),
            run: run.id,
            attempt,
            profile,
            target: request.target.clone(),
        };

        match self.ctx.runner.submit(spec).await {
            Ok(handle) => {
                tracing::info!(
                    target: "scan::reconcile",
                    scan = %request.key,
                    run = %run.id,
                    attempt,
                    job = %handle,
                    "scan job submitted"
                );
                run.job = Some(handle);
                run.running_since = Some(now);
                run.next_attempt_at = None;
                run.missing_since = None;
                run.observe_failures = 0;
                run.note = None;
                pass.transition(RunStatus::Running)?;
                Ok(Step::Yield(Requeue::After(self.poll_interval())))
            }
            Err(err) if attempt >= self.max_attempts() => {
                run.note = Some(format!("submission attempt {attempt} failed: {err}"));
                pass.fail(FailureReason::SubmissionExhausted)?;
                Ok(Step::Yield(Requeue::Never))
            }
            Err(err) => {
                let delay = self.retry.delay(attempt, &request.key);
                tracing::warn!(
                    target: "scan::reconcile",
                    scan = %request.key,
                    run = %run.id,
                    attempt,
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "scan job submission failed"
                );
                run.next_attempt_at = Some(now + chrono_span(delay));
                run.note = Some(format!("submission attempt {attempt} failed: {err}"));
                Ok(Step::Yield(Requeue::After(delay)))
            }
        }
    }

    async fn step_running(&self, pass: &mut ScanPass<'_>) -> Result<Step> {
        let now = pass.now;
        let request = pass.request;
        let deadline = request
            .deadline()
            .unwrap_or_else(|| self.ctx.config.timeouts.scan_timeout());
        let run = pass.active()?;
        let Some(handle) = run.job.clone() else {
            return self
                .execution_failure(
                    pass,
                    FailureReason::ExecutionFailed,
                    "running run has no job".to_string(),
                )
                .await;
        };

        let elapsed = now - run.running_since.unwrap_or(run.last_transition_at);
        if elapsed > chrono_span(deadline) {
            return self
                .execution_failure(
                    pass,
                    FailureReason::Timeout,
                    format!("deadline of {}s exceeded", deadline.as_secs()),
                )
                .await;
        }
        let remaining = (chrono_span(deadline) - elapsed)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let next_poll = self.poll_interval().min(remaining);

        let observation = match self.ctx.runner.observe(&handle).await {
            Ok(observation) => observation,
            Err(err) => {
                run.observe_failures = run.observe_failures.saturating_add(1);
                let failures = run.observe_failures;
                if failures >= self.max_attempts() {
                    return self
                        .execution_failure(
                            pass,
                            FailureReason::ExecutionFailed,
                            format!("job unobservable: {err}"),
                        )
                        .await;
                }
                let delay = self.retry.delay(failures, &handle.job_id);
                tracing::warn!(
                    target: "scan::reconcile",
                    scan = %request.key,
                    job = %handle,
                    failures,
                    error = %err,
                    "job observation failed"
                );
                run.note = Some(format!("observe failed: {err}"));
                return Ok(Step::Yield(Requeue::After(delay.min(remaining))));
            }
        };

        if run.observe_failures > 0 {
            run.observe_failures = 0;
            run.note = None;
        }
        if run.missing_since.is_some()
            && !matches!(observation, JobObservation::Missing)
        {
            run.missing_since = None;
        }

        match observation {
            JobObservation::Pending | JobObservation::Running => {
                Ok(Step::Yield(Requeue::After(next_poll)))
            }
            JobObservation::Succeeded => {
                let raw = match self.ctx.runner.fetch_output(&handle).await {
                    Ok(raw) => raw,
                    Err(err) => {
                        return self
                            .execution_failure(
                                pass,
                                FailureReason::ExecutionFailed,
                                format!("output unavailable: {err}"),
                            )
                            .await;
                    }
                };
                let summary = match report::parse(&raw) {
                    Ok(summary) => summary,
                    Err(err) => {
                        return self
                            .execution_failure(
                                pass,
                                FailureReason::ExecutionFailed,
                                format!("report unreadable: {err}"),
                            )
                            .await;
                    }
                };
                tracing::info!(
                    target: "scan::reconcile",
                    scan = %request.key,
                    run = %run.id,
                    passed = summary.passed(),
                    failed = summary.failed(),
                    total = summary.total(),
                    "scan report parsed"
                );
                run.summary = Some(summary);
                pass.transition(RunStatus::ReportReady)?;
                Ok(Step::Continue)
            }
            JobObservation::Failed { message } => self
                .execution_failure(
                    pass,
                    FailureReason::ExecutionFailed,
                    format!("job failed: {message}"),
                )
                .await,
            JobObservation::Missing => {
                let since = *run.missing_since.get_or_insert(now);
                let grace = chrono_span(self.ctx.config.timeouts.missing_job_grace());
                if now - since >= grace {
                    return self
                        .execution_failure(
                            pass,
                            FailureReason::ExecutionFailed,
                            format!("job {} disappeared", handle.job_id),
                        )
                        .await;
                }
                let left = until(now, since + grace);
                Ok(Step::Yield(Requeue::After(next_poll.min(left))))
            }
        }
    }

    /// Stops the run's job, then retries with a fresh run while attempts
    /// remain, otherwise fails the request with `reason`.
    async fn execution_failure(
        &self,
        pass: &mut ScanPass<'_>,
        reason: FailureReason,
        note: String,
    ) -> Result<Step> {
        // The job may still be running (timeout, unobservable).
        if let Some(handle) = pass.active()?.job.clone()
            && let Err(err) = self.ctx.runner.cancel(&handle).await
        {
            tracing::warn!(
                target: "scan::reconcile",
                scan = %pass.request.key,
                job = %handle,
                error = %err,
                "failed to cancel job of failed run"
            );
        }

        let now = pass.now;
        let request = pass.request;
        let max_attempts = self.max_attempts();
        let run = pass.active()?;
        run.note = Some(note);
        if run.attempts >= max_attempts {
            pass.fail(reason)?;
            return Ok(Step::Yield(Requeue::Never));
        }

        let delay = self.retry.delay(run.attempts, &request.key);
        run.retried = true;
        pass.fail(reason)?;

        let Some(retired) = pass.status.active.take() else {
            return Err(ScanError::Internal("active run vanished".into()));
        };
        let next = ScanRun::retry_of(&retired, now + chrono_span(delay), now);
        tracing::info!(
            target: "scan::reconcile",
            scan = %request.key,
            failed_run = %retired.id,
            run = %next.id,
            attempts = next.attempts,
            retry_in_ms = delay.as_millis() as u64,
            "retrying scan with a new run"
        );
        pass.status.history.push(retired);
        pass.open(next);
        Ok(Step::Yield(Requeue::After(delay)))
    }

    fn step_report_ready(&self, pass: &mut ScanPass<'_>) -> Result<Step> {
        let scan_label = pass.request.metric_scan_label().to_string();
        let request_key = pass.request.key.clone();
        let run = pass.active()?;
        let summary = run.summary.clone().ok_or_else(|| {
            ScanError::Internal("report-ready run without a summary".into())
        })?;
        let profile_name = run
            .profile
            .as_ref()
            .map(|p| p.name.clone())
            .unwrap_or_default();

        if !run.metrics_recorded {
            let series = SeriesKey::new(scan_label, profile_name);
            let run_id = run.id;
            run.metrics_recorded = true;
            if self.ctx.metrics.record(series.clone(), run_id, &summary) {
                pass.events.push(ScanEvent::MetricsRecorded {
                    request: request_key,
                    run: run_id,
                    series,
                });
            }
        }

        pass.transition(RunStatus::Completed)?;
        tracing::info!(
            target: "scan::reconcile",
            scan = %pass.request.key,
            "scan completed"
        );
        Ok(Step::Yield(Requeue::Never))
    }
}

#[async_trait]
impl Reconciler for ScanReconciler {
    const KIND: ResourceKind = ResourceKind::ScanRequest;

    async fn reconcile(&self, key: &ResourceKey) -> Result<Requeue> {
        let Some(record) = self.ctx.store.get_scan(key).await? else {
            tracing::debug!(target: "scan::reconcile", scan = %key, "scan request gone");
            return Ok(Requeue::Never);
        };

        let mut pass = ScanPass {
            request: &record.request,
            status: record.status.clone(),
            events: Vec::new(),
            now: self.ctx.clock.now(),
        };
        let requeue = self.drive(&mut pass).await?;

        if pass.status != record.status {
            match self.ctx.store.update_scan_status(key, pass.status).await {
                Ok(_) => {}
                Err(ScanError::NotFound(_)) => {
                    tracing::debug!(
                        target: "scan::reconcile",
                        scan = %key,
                        "scan request deleted mid-pass"
                    );
                    return Ok(Requeue::Never);
                }
                Err(err) => return Err(err),
            }
        }
        self.ctx.publish_all(pass.events).await;
        Ok(requeue)
    }
}
