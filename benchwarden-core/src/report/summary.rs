use serde::{Deserialize, Serialize};

/// Per-check outcome counts derived from one scan's raw output.
///
/// Built once by the parser and replaced wholesale on the next scan; there
/// are no mutators.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSummary {
    passed: u32,
    failed: u32,
    skipped: u32,
    not_applicable: u32,
    total: u32,
    /// Failing check identifiers in report order.
    failing_checks: Vec<String>,
}

impl ResultSummary {
    /// `total` is the sum of the four buckets.
    pub fn from_counts(
        passed: u32,
        failed: u32,
        skipped: u32,
        not_applicable: u32,
        failing_checks: Vec<String>,
    ) -> Self {
        Self {
            passed,
            failed,
            skipped,
            not_applicable,
            total: passed + failed + skipped + not_applicable,
            failing_checks,
        }
    }

    pub fn passed(&self) -> u32 {
        self.passed
    }

    pub fn failed(&self) -> u32 {
        self.failed
    }

    pub fn skipped(&self) -> u32 {
        self.skipped
    }

    pub fn not_applicable(&self) -> u32 {
        self.not_applicable
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn failing_checks(&self) -> &[String] {
        &self.failing_checks
    }
}

#[derive(Debug, Default)]
pub(super) struct Tally {
    passed: u32,
    failed: u32,
    skipped: u32,
    not_applicable: u32,
    failing_checks: Vec<String>,
}

impl Tally {
    pub(super) fn pass(&mut self) {
        self.passed += 1;
    }

    pub(super) fn fail(&mut self, id: String) {
        self.failed += 1;
        self.failing_checks.push(id);
    }

    pub(super) fn skip(&mut self) {
        self.skipped += 1;
    }

    pub(super) fn not_applicable(&mut self) {
        self.not_applicable += 1;
    }

    pub(super) fn finish(self) -> ResultSummary {
        ResultSummary::from_counts(
            self.passed,
            self.failed,
            self.skipped,
            self.not_applicable,
            self.failing_checks,
        )
    }
}
