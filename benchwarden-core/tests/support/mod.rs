#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast;

use benchwarden_core::clock::ManualClock;
use benchwarden_core::metrics::MetricsAggregator;
use benchwarden_core::orchestration::{
    InMemoryResourceStore, InProcEventBus, JobHandle, JobObservation, JobRunner,
    JobSpec, JobTransition, ReconcileContext, ReconcilerConfig, RunnerError,
    RunnerResult,
};
use benchwarden_core::types::{JobId, ProfileCatalog, ScanProfile};

pub const PROFILE: &str = "cis-1.6-profile";

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

/// Job runner whose answers are queued up front by the test.
#[derive(Debug)]
pub struct ScriptedJobRunner {
    submits: Mutex<VecDeque<RunnerResult<()>>>,
    observations: Mutex<VecDeque<RunnerResult<JobObservation>>>,
    fallback: Mutex<JobObservation>,
    output: Mutex<Vec<u8>>,
    submitted: Mutex<Vec<JobSpec>>,
    cancelled: Mutex<Vec<JobHandle>>,
    observe_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    transitions: broadcast::Sender<JobTransition>,
}

impl Default for ScriptedJobRunner {
    fn default() -> Self {
        let (transitions, _) = broadcast::channel(64);
        Self {
            submits: Mutex::new(VecDeque::new()),
            observations: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(JobObservation::Running),
            output: Mutex::new(report(8, 2, 0, 1)),
            submitted: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            observe_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            transitions,
        }
    }
}

impl ScriptedJobRunner {
    pub fn fail_submissions(&self, count: usize) {
        let mut submits = self.submits.lock();
        for _ in 0..count {
            submits.push_back(Err(RunnerError::Unavailable("substrate down".into())));
        }
    }

    pub fn push_observation(&self, observation: JobObservation) {
        self.observations.lock().push_back(Ok(observation));
    }

    pub fn push_observe_error(&self) {
        self.observations
            .lock()
            .push_back(Err(RunnerError::Unavailable("api timeout".into())));
    }

    /// Answer once the scripted observations run out.
    pub fn settle(&self, observation: JobObservation) {
        *self.fallback.lock() = observation;
    }

    pub fn set_output(&self, output: Vec<u8>) {
        *self.output.lock() = output;
    }

    pub fn submitted(&self) -> Vec<JobSpec> {
        self.submitted.lock().clone()
    }

    pub fn submit_calls(&self) -> usize {
        self.submitted.lock().len()
    }

    pub fn cancelled(&self) -> Vec<JobHandle> {
        self.cancelled.lock().clone()
    }

    pub fn observe_calls(&self) -> usize {
        self.observe_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn emit(&self, handle: JobHandle, state: JobObservation) {
        let _ = self.transitions.send(JobTransition {
            handle,
            state,
            at: Utc::now(),
        });
    }
}

#[async_trait]
impl JobRunner for ScriptedJobRunner {
    async fn submit(&self, spec: JobSpec) -> RunnerResult<JobHandle> {
        let scripted = self.submits.lock().pop_front().unwrap_or(Ok(()));
        let handle = JobHandle::for_spec(JobId::new(), &spec, Utc::now());
        self.submitted.lock().push(spec);
        scripted.map(|()| handle)
    }

    async fn observe(&self, _handle: &JobHandle) -> RunnerResult<JobObservation> {
        self.observe_calls.fetch_add(1, Ordering::SeqCst);
        match self.observations.lock().pop_front() {
            Some(scripted) => scripted,
            None => Ok(self.fallback.lock().clone()),
        }
    }

    async fn fetch_output(&self, _handle: &JobHandle) -> RunnerResult<Vec<u8>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.lock().clone())
    }

    async fn cancel(&self, handle: &JobHandle) -> RunnerResult<()> {
        self.cancelled.lock().push(handle.clone());
        Ok(())
    }

    fn transitions(&self) -> Option<broadcast::Receiver<JobTransition>> {
        Some(self.transitions.subscribe())
    }
}

/// kube-bench style report with the given outcome counts.
pub fn report(passed: usize, failed: usize, skipped: usize, na: usize) -> Vec<u8> {
    let mut results = Vec::new();
    let buckets = [("PASS", passed), ("FAIL", failed), ("WARN", skipped), ("INFO", na)];
    for (status, count) in buckets {
        for _ in 0..count {
            let number = format!("1.1.{}", results.len() + 1);
            results.push(json!({ "test_number": number, "test_desc": "check", "status": status }));
        }
    }
    serde_json::to_vec(&json!({
        "Controls": [ { "id": "1", "text": "Master Node", "tests": [
            { "section": "1.1", "results": results }
        ] } ]
    }))
    .unwrap()
}

pub struct Harness {
    pub store: Arc<InMemoryResourceStore>,
    pub runner: Arc<ScriptedJobRunner>,
    pub metrics: Arc<MetricsAggregator>,
    pub bus: Arc<InProcEventBus>,
    pub clock: ManualClock,
    pub ctx: ReconcileContext,
}

pub fn harness() -> Harness {
    harness_with(|_| {})
}

pub fn harness_with(configure: impl FnOnce(&mut ReconcilerConfig)) -> Harness {
    let mut config = ReconcilerConfig::default();
    config.retry.max_attempts = 3;
    config.retry.backoff_base_ms = 1_000;
    config.retry.backoff_max_ms = 10_000;
    config.retry.jitter_ratio = 0.0;
    config.retry.jitter_min_ms = 0;
    configure(&mut config);

    let store = Arc::new(InMemoryResourceStore::default());
    let runner = Arc::new(ScriptedJobRunner::default());
    let metrics = Arc::new(MetricsAggregator::new());
    let bus = Arc::new(InProcEventBus::new(1_024));
    let clock = ManualClock::new(epoch());
    let profiles = ProfileCatalog::new([
        ScanProfile::new(PROFILE, "cis-1.6"),
        ScanProfile::new("rke-profile-permissive", "rke-cis-1.6-permissive")
            .with_skip_checks(["1.1.12"]),
    ])
    .unwrap()
    .with_default(Some(PROFILE.to_string()));

    let ctx = ReconcileContext {
        store: store.clone(),
        runner: runner.clone(),
        metrics: metrics.clone(),
        events: bus.clone(),
        clock: Arc::new(clock.clone()),
        config: Arc::new(config),
        profiles: Arc::new(profiles),
    };

    Harness {
        store,
        runner,
        metrics,
        bus,
        clock,
        ctx,
    }
}
