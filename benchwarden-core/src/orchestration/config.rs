use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Every tunable of the reconciliation core.
///
/// All fields carry defaults so deployments can supply partial payloads.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Retry/backoff policy shared by submission and execution failures.
    pub retry: RetryConfig,
    /// Deadlines and polling cadence for running jobs.
    pub timeouts: TimeoutConfig,
    /// Worker pool sizes and requeue tuning for the controller runtime.
    pub controller: ControllerConfig,
    /// Defaults applied to schedule definitions.
    pub schedule: ScheduleConfig,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Submission/execution attempts per scan request, including the first.
    pub max_attempts: u16,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Percentage-based jitter to spread out retries.
    pub jitter_ratio: f32,
    /// Minimum jitter in milliseconds so tiny delays still spread a bit.
    pub jitter_min_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 2_000,
            backoff_max_ms: 5 * 60 * 1_000,
            jitter_ratio: 0.25,
            jitter_min_ms: 250,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline for requests that carry none, measured from Running.
    pub scan_timeout_secs: u64,
    /// How long a job may be missing before it counts as failed.
    pub missing_job_grace_secs: u64,
    /// Requeue delay while a job is pending or running.
    pub poll_interval_ms: u64,
}

impl TimeoutConfig {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }

    pub fn missing_job_grace(&self) -> Duration {
        Duration::from_secs(self.missing_job_grace_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            scan_timeout_secs: 30 * 60,
            missing_job_grace_secs: 60,
            poll_interval_ms: 5_000,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub scan_workers: usize,
    pub schedule_workers: usize,
    /// Every known identity is re-enqueued at this cadence; zero disables.
    pub resync_interval_secs: u64,
    /// Requeue backoff after a reconciler error or panic.
    pub error_backoff_base_ms: u64,
    pub error_backoff_max_ms: u64,
    pub watch_channel_capacity: usize,
}

impl ControllerConfig {
    pub fn resync_interval(&self) -> Option<Duration> {
        (self.resync_interval_secs > 0)
            .then(|| Duration::from_secs(self.resync_interval_secs))
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            scan_workers: 4,
            schedule_workers: 2,
            resync_interval_secs: 10 * 60,
            error_backoff_base_ms: 500,
            error_backoff_max_ms: 60_000,
            watch_channel_capacity: 1_024,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Spawned scan requests retained per schedule when it sets no limit.
    pub default_history_limit: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            default_history_limit: 3,
        }
    }
}
