use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{Result, ScanError};
use crate::orchestration::job::JobHandle;
use crate::report::ResultSummary;

use super::{
    ids::{ResourceKey, RunId},
    profile::ScanProfile,
};

/// Which part of the cluster a scan covers.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScanTarget {
    #[default]
    Cluster,
    Nodes {
        nodes: Vec<String>,
    },
}

/// Who asked for the scan. Drives the `scan_name` metric label.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScanOrigin {
    #[default]
    Manual,
    Schedule {
        schedule: ResourceKey,
    },
}

/// Declarative ask to run one scan. Immutable after admission except for
/// `cancel_requested`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub key: ResourceKey,
    /// Profile name; `None` selects the cluster default.
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub target: ScanTarget,
    /// Desired completion deadline, measured from the job entering Running.
    #[serde(default)]
    pub deadline_secs: Option<u64>,
    #[serde(default)]
    pub cancel_requested: bool,
    #[serde(default)]
    pub origin: ScanOrigin,
    pub created_at: DateTime<Utc>,
}

impl ScanRequest {
    pub fn manual(key: ResourceKey, profile: Option<String>) -> Self {
        Self {
            key,
            profile,
            target: ScanTarget::Cluster,
            deadline_secs: None,
            cancel_requested: false,
            origin: ScanOrigin::Manual,
            created_at: Utc::now(),
        }
    }

    pub fn with_target(mut self, target: ScanTarget) -> Self {
        self.target = target;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline_secs = Some(deadline.as_secs());
        self
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }

    /// `manual` for on-demand scans, the schedule's name otherwise.
    pub fn metric_scan_label(&self) -> &str {
        match &self.origin {
            ScanOrigin::Manual => "manual",
            ScanOrigin::Schedule { schedule } => &schedule.name,
        }
    }
}

/// Lifecycle of a single run. Only ever moves forward.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    ReportReady,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    /// Cancellation is only honoured before a report exists.
    pub fn is_cancellable(self) -> bool {
        matches!(self, RunStatus::Pending | RunStatus::Running)
    }

    pub fn can_transition_to(self, next: RunStatus) -> bool {
        use RunStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Running, ReportReady)
                | (Running, Failed)
                | (ReportReady, Completed)
                | (ReportReady, Failed)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunStatus::Pending => "Pending",
            RunStatus::Running => "Running",
            RunStatus::ReportReady => "ReportReady",
            RunStatus::Completed => "Completed",
            RunStatus::Failed => "Failed",
        };
        f.write_str(label)
    }
}

/// Terminal failure reasons surfaced to users.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    SubmissionExhausted,
    ExecutionFailed,
    Timeout,
    Cancelled,
    InvalidProfile(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::SubmissionExhausted => f.write_str("submission exhausted"),
            FailureReason::ExecutionFailed => f.write_str("execution failed"),
            FailureReason::Timeout => f.write_str("timeout"),
            FailureReason::Cancelled => f.write_str("cancelled"),
            FailureReason::InvalidProfile(name) => {
                write!(f, "invalid profile: {name}")
            }
        }
    }
}

/// One execution attempt backing a [`ScanRequest`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanRun {
    pub id: RunId,
    pub status: RunStatus,
    /// Resolved profile snapshot; `None` only when resolution failed.
    pub profile: Option<ScanProfile>,
    /// Submission attempts made for the owning request, carried across runs.
    pub attempts: u16,
    pub job: Option<JobHandle>,
    pub created_at: DateTime<Utc>,
    pub last_transition_at: DateTime<Utc>,
    pub running_since: Option<DateTime<Utc>>,
    /// Backoff gate: no submission before this instant.
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub missing_since: Option<DateTime<Utc>>,
    pub observe_failures: u16,
    pub summary: Option<ResultSummary>,
    pub failure: Option<FailureReason>,
    /// Recoverable status note (last transient error).
    pub note: Option<String>,
    /// Set when this run failed but a follow-up run was opened.
    pub retried: bool,
    pub metrics_recorded: bool,
}

impl ScanRun {
    pub fn open(profile: Option<ScanProfile>, now: DateTime<Utc>) -> Self {
        Self {
            id: RunId::new(),
            status: RunStatus::Pending,
            profile,
            attempts: 0,
            job: None,
            created_at: now,
            last_transition_at: now,
            running_since: None,
            next_attempt_at: None,
            missing_since: None,
            observe_failures: 0,
            summary: None,
            failure: None,
            note: None,
            retried: false,
            metrics_recorded: false,
        }
    }

    /// Follow-up run after an execution failure. Keeps the attempt count.
    pub fn retry_of(
        previous: &ScanRun,
        next_attempt_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut run = Self::open(previous.profile.clone(), now);
        run.attempts = previous.attempts;
        run.next_attempt_at = Some(next_attempt_at);
        run.note = previous.note.clone();
        run
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn transition(&mut self, to: RunStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(ScanError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.last_transition_at = now;
        Ok(())
    }

    pub fn fail(&mut self, reason: FailureReason, now: DateTime<Utc>) -> Result<()> {
        self.transition(RunStatus::Failed, now)?;
        self.failure = Some(reason);
        Ok(())
    }
}

/// Reconciler-owned status of a scan request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanStatus {
    pub active: Option<ScanRun>,
    /// Retired runs, oldest first. Never re-entered.
    #[serde(default)]
    pub history: Vec<ScanRun>,
}

impl ScanStatus {
    pub fn phase(&self) -> Option<RunStatus> {
        self.active.as_ref().map(|run| run.status)
    }
}

/// Stored view of a scan request: spec, status, and a version stamp.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub request: ScanRequest,
    pub status: ScanStatus,
    pub resource_version: u64,
}

impl ScanRecord {
    /// A request that has not opened a run yet counts as in flight.
    pub fn is_terminal(&self) -> bool {
        self.status
            .active
            .as_ref()
            .is_some_and(ScanRun::is_terminal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_edges_only() {
        use RunStatus::*;
        let all = [Pending, Running, ReportReady, Completed, Failed];
        let allowed = [
            (Pending, Running),
            (Pending, Failed),
            (Running, ReportReady),
            (Running, Failed),
            (ReportReady, Completed),
            (ReportReady, Failed),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn terminal_runs_refuse_to_move() {
        let now = Utc::now();
        let mut run = ScanRun::open(None, now);
        run.fail(FailureReason::Cancelled, now).unwrap();
        let err = run.transition(RunStatus::Running, now).unwrap_err();
        assert!(matches!(
            err,
            ScanError::InvalidTransition {
                from: RunStatus::Failed,
                to: RunStatus::Running
            }
        ));
        assert_eq!(run.failure, Some(FailureReason::Cancelled));
    }

    #[test]
    fn retry_carries_attempts_and_profile() {
        let now = Utc::now();
        let mut first =
            ScanRun::open(Some(ScanProfile::new("p", "cis-1.6")), now);
        first.attempts = 2;
        let later = now + chrono::Duration::seconds(5);
        let second = ScanRun::retry_of(&first, later, now);
        assert_ne!(first.id, second.id);
        assert_eq!(second.attempts, 2);
        assert_eq!(second.status, RunStatus::Pending);
        assert_eq!(second.next_attempt_at, Some(later));
        assert_eq!(second.profile, first.profile);
    }

    #[test]
    fn scan_label_follows_origin() {
        let manual = ScanRequest::manual(ResourceKey::new("default", "adhoc"), None);
        assert_eq!(manual.metric_scan_label(), "manual");

        let mut scheduled = manual.clone();
        scheduled.origin = ScanOrigin::Schedule {
            schedule: ResourceKey::new("default", "nightly"),
        };
        assert_eq!(scheduled.metric_scan_label(), "nightly");
    }

    #[test]
    fn failure_reasons_render_user_strings() {
        assert_eq!(
            FailureReason::SubmissionExhausted.to_string(),
            "submission exhausted"
        );
        assert_eq!(FailureReason::ExecutionFailed.to_string(), "execution failed");
        assert_eq!(FailureReason::Timeout.to_string(), "timeout");
        assert_eq!(FailureReason::Cancelled.to_string(), "cancelled");
    }
}
