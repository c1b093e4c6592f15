//! Level-triggered reconcilers for scan requests and schedules.

mod scan;
mod schedule;

pub use scan::ScanReconciler;
pub use schedule::ScheduleReconciler;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::error::Result;
use crate::metrics::MetricsAggregator;
use crate::types::{ProfileCatalog, ResourceKey, ResourceKind};

use super::config::ReconcilerConfig;
use super::events::{ScanEvent, ScanEventPublisher};
use super::runner::JobRunner;
use super::store::ResourceStore;

/// What the runtime should do with an identity after a pass.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Requeue {
    After(Duration),
    /// Nothing left to do until the resource changes.
    Never,
}

/// Drives one resource kind toward its desired state.
///
/// Passes for the same identity never overlap; the runtime guarantees
/// single-flight per key.
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    const KIND: ResourceKind;

    async fn reconcile(&self, key: &ResourceKey) -> Result<Requeue>;
}

/// Collaborators shared by both reconcilers.
#[derive(Clone)]
pub struct ReconcileContext {
    pub store: Arc<dyn ResourceStore>,
    pub runner: Arc<dyn JobRunner>,
    pub metrics: Arc<MetricsAggregator>,
    pub events: Arc<dyn ScanEventPublisher>,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<ReconcilerConfig>,
    pub profiles: Arc<ProfileCatalog>,
}

impl fmt::Debug for ReconcileContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconcileContext")
            .field("store", &self.store)
            .field("runner", &self.runner)
            .field("metrics", &self.metrics)
            .field("clock", &self.clock)
            .field("config", &self.config)
            .field("profiles", &self.profiles.len())
            .finish()
    }
}

impl ReconcileContext {
    /// Publishes after the owning write landed. Failures are logged only.
    async fn publish_all(&self, events: Vec<ScanEvent>) {
        for event in events {
            if let Err(err) = self.events.publish_scan_event(event).await {
                tracing::warn!(
                    target: "scan::controller",
                    error = %err,
                    "failed to publish scan event"
                );
            }
        }
    }
}

/// Non-negative span from `now` until `at`.
fn until(now: DateTime<Utc>, at: DateTime<Utc>) -> Duration {
    (at - now).to_std().unwrap_or(Duration::ZERO)
}
