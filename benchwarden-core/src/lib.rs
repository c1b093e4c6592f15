//! # Benchwarden Core
//!
//! Reconciliation core for security-benchmark scans: it turns declarative
//! scan requests and recurring schedules into benchmark job executions,
//! parses their JSON reports, and folds the results into per-scan metrics.
//!
//! ## Architecture
//!
//! - [`types`]: scan requests, runs, schedules and profiles
//! - [`report`]: benchmark report parsing into [`report::ResultSummary`]
//! - [`metrics`]: gauges and completion counters keyed by scan and profile
//! - [`orchestration`]: the job runner seam, resource store, reconcilers,
//!   and the controller runtime that drives them
//! - [`environment`]: cluster provider/version detection and default
//!   profile selection
//! - [`registration`]: resource kind registration at startup
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use benchwarden_core::{
//!     clock::SystemClock,
//!     metrics::MetricsAggregator,
//!     orchestration::{
//!         ControllerRuntime, InMemoryResourceStore, InProcEventBus, ProcessJobRunner,
//!         ProcessRunnerSettings, ReconcileContext, ReconcilerConfig, ResourceStore,
//!     },
//!     types::{ProfileCatalog, ResourceKey, ScanProfile, ScanRequest},
//! };
//!
//! # async fn run() -> benchwarden_core::Result<()> {
//! let store = Arc::new(InMemoryResourceStore::default());
//! let profiles = ProfileCatalog::new([ScanProfile::new("cis-1.6-profile", "cis-1.6")])?
//!     .with_default(Some("cis-1.6-profile".into()));
//! let ctx = ReconcileContext {
//!     store: store.clone(),
//!     runner: Arc::new(ProcessJobRunner::new(ProcessRunnerSettings::default())),
//!     metrics: Arc::new(MetricsAggregator::new()),
//!     events: Arc::new(InProcEventBus::new(256)),
//!     clock: Arc::new(SystemClock),
//!     config: Arc::new(ReconcilerConfig::default()),
//!     profiles: Arc::new(profiles),
//! };
//!
//! let runtime = ControllerRuntime::new(ctx);
//! runtime.start().await?;
//! store
//!     .admit_scan(ScanRequest::manual(ResourceKey::new("default", "nightly"), None))
//!     .await?;
//! runtime.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

/// Time source shared by the reconcilers
pub mod clock;
/// Cluster environment detection and profile selection
pub mod environment;
pub mod error;
/// Per-scan result gauges and completion counters
pub mod metrics;
pub mod orchestration;
/// Resource kind registration
pub mod registration;
/// Benchmark report parsing
pub mod report;
pub mod types;

pub use error::{Result, ScanError};
