mod support;

use std::time::Duration;

use benchwarden_core::orchestration::{
    ControllerRuntime, JobObservation, ResourceStore,
};
use benchwarden_core::types::{
    Cadence, ConcurrencyPolicy, ResourceKey, RunStatus, ScanRequest, ScheduleDefinition,
};

use support::{Harness, epoch, harness_with};

async fn phase_of(h: &Harness, key: &ResourceKey) -> Option<RunStatus> {
    h.store
        .get_scan(key)
        .await
        .unwrap()
        .and_then(|record| record.status.phase())
}

async fn wait_for_phase(h: &Harness, key: &ResourceKey, phase: RunStatus) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if phase_of(h, key).await == Some(phase) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{key} never reached {phase}"));
}

#[tokio::test]
async fn admitted_scans_run_to_completion() {
    let h = harness_with(|config| config.timeouts.poll_interval_ms = 10);
    h.runner.settle(JobObservation::Succeeded);
    let runtime = ControllerRuntime::new(h.ctx.clone());
    runtime.start().await.unwrap();

    let key = ResourceKey::new("default", "e2e");
    h.store
        .admit_scan(ScanRequest::manual(key.clone(), None))
        .await
        .unwrap();

    wait_for_phase(&h, &key, RunStatus::Completed).await;
    assert_eq!(h.runner.submit_calls(), 1);
    assert_eq!(h.metrics.snapshot().len(), 1);

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn existing_resources_are_picked_up_on_start() {
    let h = harness_with(|config| config.timeouts.poll_interval_ms = 10);
    h.runner.settle(JobObservation::Succeeded);
    let key = ResourceKey::new("default", "before-start");
    h.store
        .admit_scan(ScanRequest::manual(key.clone(), None))
        .await
        .unwrap();

    let runtime = ControllerRuntime::new(h.ctx.clone());
    runtime.start().await.unwrap();

    wait_for_phase(&h, &key, RunStatus::Completed).await;
    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn job_transitions_wake_the_owning_scan() {
    // Polling alone would not revisit the scan within the test window.
    let h = harness_with(|config| config.timeouts.poll_interval_ms = 600_000);
    let runtime = ControllerRuntime::new(h.ctx.clone());
    runtime.start().await.unwrap();

    let key = ResourceKey::new("default", "push");
    h.store
        .admit_scan(ScanRequest::manual(key.clone(), None))
        .await
        .unwrap();
    wait_for_phase(&h, &key, RunStatus::Running).await;

    let record = h.store.get_scan(&key).await.unwrap().unwrap();
    let handle = record.status.active.unwrap().job.unwrap();
    h.runner.settle(JobObservation::Succeeded);
    h.runner.emit(handle, JobObservation::Succeeded);

    wait_for_phase(&h, &key, RunStatus::Completed).await;
    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn cancellation_requests_reach_running_scans() {
    let h = harness_with(|config| config.timeouts.poll_interval_ms = 600_000);
    let runtime = ControllerRuntime::new(h.ctx.clone());
    runtime.start().await.unwrap();

    let key = ResourceKey::new("default", "abort");
    h.store
        .admit_scan(ScanRequest::manual(key.clone(), None))
        .await
        .unwrap();
    wait_for_phase(&h, &key, RunStatus::Running).await;

    h.store.request_cancel(&key).await.unwrap();
    wait_for_phase(&h, &key, RunStatus::Failed).await;
    assert_eq!(h.runner.cancelled().len(), 1);

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn schedules_spawn_scans_through_the_runtime() {
    let h = harness_with(|config| config.timeouts.poll_interval_ms = 10);
    h.runner.settle(JobObservation::Succeeded);
    let runtime = ControllerRuntime::new(h.ctx.clone());
    runtime.start().await.unwrap();

    let key = ResourceKey::new("default", "hourly");
    let mut definition = ScheduleDefinition::new(key.clone(), Cadence::parse("0 * * * *").unwrap())
        .with_concurrency(ConcurrencyPolicy::Forbid);
    definition.created_at = epoch();
    h.store.admit_schedule(definition).await.unwrap();

    h.clock.advance(Duration::from_secs(3_600));
    runtime.enqueue_schedule(key.clone());

    let spawned = ResourceKey::new("default", "hourly-20240301130000");
    wait_for_phase(&h, &spawned, RunStatus::Completed).await;

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_is_prompt_and_repeatable() {
    let h = harness_with(|_| {});
    let runtime = ControllerRuntime::new(h.ctx.clone());
    runtime.start().await.unwrap();
    runtime.start().await.unwrap();

    tokio::time::timeout(Duration::from_secs(2), runtime.shutdown())
        .await
        .expect("shutdown finished")
        .unwrap();
    runtime.shutdown().await.unwrap();
}
