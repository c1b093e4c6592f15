use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{JobId, ResourceKey, RunId, ScanProfile, ScanTarget};

/// Everything the execution substrate needs to start one scan job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Scan request the job reports back to.
    pub owner: ResourceKey,
    pub run: RunId,
    /// 1-based submission attempt for the owning request.
    pub attempt: u16,
    pub profile: ScanProfile,
    pub target: ScanTarget,
}

impl JobSpec {
    /// Stable label for substrate-side naming and logs.
    pub fn job_name(&self) -> String {
        format!("scan-{}-{}-{}", self.owner.name, self.attempt, self.run)
    }
}

/// Reference to a submitted job, recorded on the owning run.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: JobId,
    pub owner: ResourceKey,
    pub run: RunId,
    pub submitted_at: DateTime<Utc>,
}

impl JobHandle {
    pub fn for_spec(job_id: JobId, spec: &JobSpec, submitted_at: DateTime<Utc>) -> Self {
        Self {
            job_id,
            owner: spec.owner.clone(),
            run: spec.run,
            submitted_at,
        }
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.job_id, self.owner)
    }
}

/// Substrate view of a job.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum JobObservation {
    Pending,
    Running,
    Succeeded,
    Failed { message: String },
    /// Unknown to the substrate (evicted, deleted, never existed).
    Missing,
}

impl JobObservation {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobObservation::Succeeded | JobObservation::Failed { .. })
    }
}

/// Push notification of a job state change, used to wake the owner early.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobTransition {
    pub handle: JobHandle,
    pub state: JobObservation,
    pub at: DateTime<Utc>,
}
