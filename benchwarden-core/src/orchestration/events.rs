use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Result;
use crate::metrics::SeriesKey;
use crate::types::{FailureReason, ResourceKey, ResourceKind, RunId, RunStatus};

/// Lifecycle notifications emitted after reconcilers persist their work.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ScanEvent {
    RunTransitioned {
        request: ResourceKey,
        run: RunId,
        /// `None` when the run was just opened.
        from: Option<RunStatus>,
        to: RunStatus,
        failure: Option<FailureReason>,
        at: DateTime<Utc>,
    },
    MetricsRecorded {
        request: ResourceKey,
        run: RunId,
        series: SeriesKey,
    },
    ScheduleFired {
        schedule: ResourceKey,
        spawned: ResourceKey,
        boundary: DateTime<Utc>,
    },
    ScheduleSkipped {
        schedule: ResourceKey,
        boundary: DateTime<Utc>,
        blocked_by: ResourceKey,
    },
    SchedulePruned {
        schedule: ResourceKey,
        pruned: ResourceKey,
    },
}

#[async_trait]
pub trait ScanEventPublisher: Send + Sync {
    async fn publish_scan_event(&self, event: ScanEvent) -> Result<()>;
}

pub trait ScanEventStream {
    fn subscribe_scan(&self) -> broadcast::Receiver<ScanEvent>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum WatchChange {
    Applied,
    Deleted,
}

/// Resource change notification delivered to the controller runtime.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub kind: ResourceKind,
    pub key: ResourceKey,
    pub resource_version: u64,
    pub change: WatchChange,
}
