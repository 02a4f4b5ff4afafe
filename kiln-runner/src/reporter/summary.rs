// Copyright (c) The kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Aggregation of test results into a testing summary.

use crate::reporter::{BrokenSuite, TestResult};
use kiln_metadata::TestCaseId;

/// All results of a run, partitioned into exactly one bucket per case.
///
/// The partition invariant: every ingested result lands in exactly one of
/// passed/failed/broken/skipped, and every broken suite accounts for all of
/// its member case slots. Whatever remains unaccounted relative to the
/// collector's total was cut off by cancellation.
#[derive(Debug, Default)]
pub struct TestingSummary {
    collected_count: usize,
    passed: Vec<TestResult>,
    failed: Vec<TestResult>,
    broken: Vec<TestResult>,
    skipped: Vec<TestResult>,
    broken_suites: Vec<BrokenSuite>,
}

impl TestingSummary {
    /// Creates a summary for a run that collected `collected_count` cases.
    pub fn new(collected_count: usize) -> Self {
        Self {
            collected_count,
            ..Self::default()
        }
    }

    /// Files a case result into its bucket.
    pub fn ingest_result(&mut self, result: TestResult) {
        match &result {
            TestResult::Passed { .. } => self.passed.push(result),
            TestResult::Failed { .. } => self.failed.push(result),
            TestResult::Broken { .. } => self.broken.push(result),
            TestResult::Skipped { .. } => self.skipped.push(result),
        }
    }

    /// Files a broken suite.
    pub fn ingest_broken_suite(&mut self, broken: BrokenSuite) {
        self.broken_suites.push(broken);
    }

    /// Passed results.
    pub fn passed(&self) -> &[TestResult] {
        &self.passed
    }

    /// Failed results.
    pub fn failed(&self) -> &[TestResult] {
        &self.failed
    }

    /// Broken results.
    pub fn broken(&self) -> &[TestResult] {
        &self.broken
    }

    /// Explicitly skipped results.
    pub fn skipped(&self) -> &[TestResult] {
        &self.skipped
    }

    /// Broken suites.
    pub fn broken_suites(&self) -> &[BrokenSuite] {
        &self.broken_suites
    }

    /// Number of cases the collector discovered for this run.
    pub fn collected_count(&self) -> usize {
        self.collected_count
    }

    /// Number of case slots accounted for by ingested results and broken
    /// suites.
    pub fn accounted(&self) -> usize {
        self.passed.len()
            + self.failed.len()
            + self.broken.len()
            + self.skipped.len()
            + self
                .broken_suites
                .iter()
                .map(BrokenSuite::case_slots)
                .sum::<usize>()
    }

    /// Case slots that never reported, derived by difference from the
    /// collector's total. Non-zero only when the run was cut short.
    pub fn unaccounted(&self) -> usize {
        self.collected_count.saturating_sub(self.accounted())
    }

    /// Returns true if nothing failed and nothing broke.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.broken.is_empty() && self.broken_suites.is_empty()
    }

    /// The identities of every failing case: failed, broken, and members of
    /// broken suites. This is exactly the set the failure cache persists.
    pub fn failing_case_ids(&self) -> Vec<TestCaseId> {
        let mut ids: Vec<TestCaseId> = self
            .failed
            .iter()
            .chain(&self.broken)
            .map(|result| result.id().clone())
            .collect();
        for broken in &self.broken_suites {
            ids.extend(broken.case_ids());
        }
        ids
    }
}
