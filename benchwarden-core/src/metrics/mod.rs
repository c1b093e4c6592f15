//! In-memory metric series for completed scans.
//!
//! One [`MetricsAggregator`] is built at startup and shared by reference; the
//! exposition endpoint reads [`MetricsAggregator::snapshot`].

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;

use crate::report::ResultSummary;
use crate::types::RunId;

pub const METRIC_TESTS_FAIL: &str = "cis_scan_num_tests_fail";
pub const METRIC_TESTS_TOTAL: &str = "cis_scan_num_tests_total";
pub const METRIC_TESTS_PASS: &str = "cis_scan_num_tests_pass";
pub const METRIC_TESTS_SKIPPED: &str = "cis_scan_num_tests_skipped";
pub const METRIC_TESTS_NA: &str = "cis_scan_num_tests_na";
pub const METRIC_SCANS_COMPLETE: &str = "cis_scan_num_scans_complete";

pub const LABEL_SCAN_NAME: &str = "scan_name";
pub const LABEL_PROFILE_NAME: &str = "scan_profile_name";

/// Completed runs remembered per series for duplicate detection.
const RECENT_RUNS_PER_SERIES: usize = 16;

/// `(scan_name, scan_profile_name)` label pair.
#[derive(
    Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SeriesKey {
    pub scan_name: String,
    pub profile_name: String,
}

impl SeriesKey {
    pub fn new(
        scan_name: impl Into<String>,
        profile_name: impl Into<String>,
    ) -> Self {
        Self {
            scan_name: scan_name.into(),
            profile_name: profile_name.into(),
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scan_name, self.profile_name)
    }
}

/// Gauges reflect the latest completion; `completed` only grows.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct MetricSeries {
    pub failed: u32,
    pub total: u32,
    pub passed: u32,
    pub skipped: u32,
    pub not_applicable: u32,
    pub completed: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct AggregatorState {
    series: BTreeMap<SeriesKey, MetricSeries>,
    /// Newest last; capped at [`RECENT_RUNS_PER_SERIES`].
    recent: HashMap<SeriesKey, VecDeque<RunId>>,
}

impl AggregatorState {
    /// Remembers `run` for `key`, or returns `false` if it already was.
    fn remember(&mut self, key: &SeriesKey, run: RunId) -> bool {
        let recent = self.recent.entry(key.clone()).or_default();
        if recent.contains(&run) {
            return false;
        }
        if recent.len() == RECENT_RUNS_PER_SERIES {
            recent.pop_front();
        }
        recent.push_back(run);
        true
    }

    fn remembered_runs(&self) -> usize {
        self.recent.values().map(VecDeque::len).sum()
    }
}

/// Thread-safe owner of every [`MetricSeries`].
///
/// A single lock covers the whole map; label cardinality is small and this
/// keeps each key's gauge group and counter consistent for readers.
#[derive(Default)]
pub struct MetricsAggregator {
    state: Mutex<AggregatorState>,
}

impl fmt::Debug for MetricsAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MetricsAggregator")
            .field("series", &state.series.len())
            .field("applied_runs", &state.remembered_runs())
            .finish()
    }
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one completed run. Returns `false` when `run` is among the
    /// series' recently applied runs, leaving every series untouched.
    pub fn record(
        &self,
        key: SeriesKey,
        run: RunId,
        summary: &ResultSummary,
    ) -> bool {
        let mut state = self.state.lock();
        if !state.remember(&key, run) {
            tracing::debug!(
                target: "scan::metrics",
                series = %key,
                run = %run,
                "duplicate completion ignored"
            );
            return false;
        }

        let series = state.series.entry(key.clone()).or_default();
        series.failed = summary.failed();
        series.total = summary.total();
        series.passed = summary.passed();
        series.skipped = summary.skipped();
        series.not_applicable = summary.not_applicable();
        series.completed += 1;
        series.updated_at = Some(Utc::now());

        tracing::info!(
            target: "scan::metrics",
            series = %key,
            run = %run,
            failed = series.failed,
            total = series.total,
            completed = series.completed,
            "scan metrics recorded"
        );
        true
    }

    pub fn get(&self, key: &SeriesKey) -> Option<MetricSeries> {
        self.state.lock().series.get(key).cloned()
    }

    /// Consistent copy of every series, ordered by key.
    pub fn snapshot(&self) -> Vec<(SeriesKey, MetricSeries)> {
        self.state
            .lock()
            .series
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn summary(passed: u32, failed: u32, skipped: u32, na: u32) -> ResultSummary {
        ResultSummary::from_counts(passed, failed, skipped, na, Vec::new())
    }

    #[test]
    fn gauges_track_latest_and_counter_accumulates() {
        let metrics = MetricsAggregator::new();
        let key = SeriesKey::new("nightly", "cis-1.6-profile");

        assert!(metrics.record(key.clone(), RunId::new(), &summary(8, 2, 0, 1)));
        assert!(metrics.record(key.clone(), RunId::new(), &summary(10, 0, 1, 0)));

        let series = metrics.get(&key).unwrap();
        assert_eq!(series.completed, 2);
        assert_eq!(series.passed, 10);
        assert_eq!(series.failed, 0);
        assert_eq!(series.skipped, 1);
        assert_eq!(series.not_applicable, 0);
        assert_eq!(series.total, 11);
    }

    #[test]
    fn same_run_is_applied_once() {
        let metrics = MetricsAggregator::new();
        let key = SeriesKey::new("manual", "p");
        let run = RunId::new();

        assert!(metrics.record(key.clone(), run, &summary(1, 1, 0, 0)));
        assert!(!metrics.record(key.clone(), run, &summary(5, 5, 0, 0)));

        let series = metrics.get(&key).unwrap();
        assert_eq!(series.completed, 1);
        assert_eq!(series.failed, 1);
    }

    #[test]
    fn duplicate_memory_stays_bounded() {
        let metrics = MetricsAggregator::new();
        let key = SeriesKey::new("nightly", "p");

        let last = (0..10_000)
            .map(|_| {
                let run = RunId::new();
                assert!(metrics.record(key.clone(), run, &summary(1, 0, 0, 0)));
                run
            })
            .last()
            .unwrap();
        assert_eq!(metrics.state.lock().remembered_runs(), RECENT_RUNS_PER_SERIES);
        assert_eq!(metrics.get(&key).unwrap().completed, 10_000);

        assert!(!metrics.record(key.clone(), last, &summary(0, 9, 0, 0)));
        assert_eq!(metrics.get(&key).unwrap().completed, 10_000);

        // Windows are per series.
        let other = SeriesKey::new("manual", "p");
        assert!(metrics.record(other, RunId::new(), &summary(1, 0, 0, 0)));
        assert_eq!(
            metrics.state.lock().remembered_runs(),
            RECENT_RUNS_PER_SERIES + 1
        );
    }

    #[test]
    fn concurrent_completions_are_all_counted() {
        let metrics = Arc::new(MetricsAggregator::new());
        let key = SeriesKey::new("manual", "p");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                let key = key.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        metrics.record(key.clone(), RunId::new(), &summary(3, 1, 0, 0));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let series = metrics.get(&key).unwrap();
        assert_eq!(series.completed, 400);
        assert_eq!(series.total, 4);
    }

    #[test]
    fn snapshot_is_ordered_by_key() {
        let metrics = MetricsAggregator::new();
        metrics.record(SeriesKey::new("b", "p"), RunId::new(), &summary(1, 0, 0, 0));
        metrics.record(SeriesKey::new("a", "p"), RunId::new(), &summary(1, 0, 0, 0));
        let names: Vec<_> = metrics
            .snapshot()
            .into_iter()
            .map(|(k, _)| k.scan_name)
            .collect();
        assert_eq!(names, ["a", "b"]);
    }
}
