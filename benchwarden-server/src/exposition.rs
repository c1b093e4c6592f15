//! Prometheus text exposition of the aggregator snapshot.

use std::fmt::Write;

use benchwarden_core::metrics::{
    LABEL_PROFILE_NAME, LABEL_SCAN_NAME, METRIC_SCANS_COMPLETE, METRIC_TESTS_FAIL,
    METRIC_TESTS_NA, METRIC_TESTS_PASS, METRIC_TESTS_SKIPPED, METRIC_TESTS_TOTAL,
    MetricSeries, SeriesKey,
};

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

struct Family {
    name: &'static str,
    help: &'static str,
    kind: &'static str,
    value: fn(&MetricSeries) -> u64,
}

const FAMILIES: &[Family] = &[
    Family {
        name: METRIC_TESTS_FAIL,
        help: "Number of failed checks in the latest scan",
        kind: "gauge",
        value: |s| u64::from(s.failed),
    },
    Family {
        name: METRIC_TESTS_TOTAL,
        help: "Number of checks in the latest scan",
        kind: "gauge",
        value: |s| u64::from(s.total),
    },
    Family {
        name: METRIC_TESTS_PASS,
        help: "Number of passed checks in the latest scan",
        kind: "gauge",
        value: |s| u64::from(s.passed),
    },
    Family {
        name: METRIC_TESTS_SKIPPED,
        help: "Number of skipped checks in the latest scan",
        kind: "gauge",
        value: |s| u64::from(s.skipped),
    },
    Family {
        name: METRIC_TESTS_NA,
        help: "Number of not applicable checks in the latest scan",
        kind: "gauge",
        value: |s| u64::from(s.not_applicable),
    },
    Family {
        name: METRIC_SCANS_COMPLETE,
        help: "Number of completed scans",
        kind: "counter",
        value: |s| s.completed,
    },
];

/// Families are always emitted, even before the first completion.
pub fn render(snapshot: &[(SeriesKey, MetricSeries)]) -> String {
    let mut out = String::new();
    for family in FAMILIES {
        let _ = writeln!(out, "# HELP {} {}", family.name, family.help);
        let _ = writeln!(out, "# TYPE {} {}", family.name, family.kind);
        for (key, series) in snapshot {
            let _ = writeln!(
                out,
                "{}{{{}=\"{}\",{}=\"{}\"}} {}",
                family.name,
                LABEL_SCAN_NAME,
                escape_label(&key.scan_name),
                LABEL_PROFILE_NAME,
                escape_label(&key.profile_name),
                (family.value)(series)
            );
        }
    }
    out
}

fn escape_label(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            other => escaped.push(other),
        }
    }
    escaped
}
