//! Job Runner Adapter: the only path from the reconcilers to the execution
//! substrate.

mod process;

pub use process::*;

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::types::JobId;

use super::job::{JobHandle, JobObservation, JobSpec, JobTransition};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunnerError {
    /// Substrate unreachable or refusing work; worth retrying.
    #[error("execution substrate unavailable: {0}")]
    Unavailable(String),

    #[error("job {0} not known to the substrate")]
    NotFound(JobId),

    /// Output missing or unreadable after the job finished.
    #[error("job output unavailable: {0}")]
    Output(String),
}

pub type RunnerResult<T> = std::result::Result<T, RunnerError>;

/// Capability set the reconcilers need from an execution substrate.
///
/// `observe` is read-only and safe to call arbitrarily often. `submit` is
/// not idempotent; callers only submit when no job is recorded for the run.
#[async_trait]
pub trait JobRunner: Send + Sync + fmt::Debug {
    async fn submit(&self, spec: JobSpec) -> RunnerResult<JobHandle>;

    async fn observe(&self, handle: &JobHandle) -> RunnerResult<JobObservation>;

    async fn fetch_output(&self, handle: &JobHandle) -> RunnerResult<Vec<u8>>;

    /// Best-effort stop. Cancelling an unknown or finished job is not an error.
    async fn cancel(&self, handle: &JobHandle) -> RunnerResult<()>;

    /// Push feed of job state changes, when the substrate offers one.
    fn transitions(&self) -> Option<broadcast::Receiver<JobTransition>> {
        None
    }
}
