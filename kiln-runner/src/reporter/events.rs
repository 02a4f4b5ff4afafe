// Copyright (c) The kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Events streamed from the runner to the reporting layer.
//!
//! Events are produced by a [`TestRunner`](crate::runner::TestRunner) and
//! consumed by the (external) reporting layer. Each event carries enough
//! structured data to be rendered as a human-readable line or a JSON record
//! without asking the VM anything.

use crate::reporter::{BrokenSuite, TestResult};
use chrono::{DateTime, Local};
use kiln_metadata::TestCaseId;
use std::time::Duration;

/// A test event.
#[derive(Clone, Debug)]
pub struct TestEvent {
    /// When the event was generated.
    pub timestamp: DateTime<Local>,

    /// Time elapsed since the start of the run.
    pub elapsed: Duration,

    /// The kind of event this is.
    pub kind: TestEventKind,
}

/// The kind of test event.
#[derive(Clone, Debug)]
pub enum TestEventKind {
    /// The run started.
    RunStarted {
        /// Number of test cases that will be run.
        test_count: usize,

        /// Number of suites that will be dispatched.
        suite_count: usize,
    },

    /// A test case started running.
    CaseStarted {
        /// The case's identity.
        id: TestCaseId,
    },

    /// A test case finished running.
    CaseFinished {
        /// The case's result.
        result: TestResult,

        /// Statistics accumulated so far, this result included.
        current_stats: RunStats,
    },

    /// A whole suite broke without running its cases.
    SuiteBroken {
        /// The broken suite.
        broken: BrokenSuite,

        /// Statistics accumulated so far, this suite included.
        current_stats: RunStats,
    },

    /// The run finished or was cancelled.
    RunFinished {
        /// Final statistics.
        stats: RunStats,
    },
}

/// Statistics for a test run, accumulated in stream order.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RunStats {
    /// Number of cases expected at the start of the run.
    ///
    /// If the run is cancelled this stays larger than the number of
    /// accounted cases.
    pub initial_run_count: usize,

    /// Number of cases that finished running.
    pub finished_count: usize,

    /// Number of cases that passed.
    pub passed: usize,

    /// Number of cases that failed.
    pub failed: usize,

    /// Number of cases that broke.
    pub broken: usize,

    /// Number of cases that were explicitly skipped.
    pub skipped: usize,

    /// Number of case slots consumed by broken suites.
    pub broken_suite_cases: usize,

    /// Number of suites that broke.
    pub broken_suites: usize,
}

impl RunStats {
    /// Number of case slots accounted for so far.
    pub fn accounted(&self) -> usize {
        self.finished_count + self.broken_suite_cases
    }

    /// Returns true if any case failed or broke, or any suite broke.
    pub fn any_failed(&self) -> bool {
        self.failed > 0 || self.broken > 0 || self.broken_suites > 0
    }

    /// Returns true if this run is considered a success: nothing failed and
    /// every expected case slot was accounted for.
    pub fn is_success(&self) -> bool {
        if self.accounted() < self.initial_run_count {
            return false;
        }
        !self.any_failed()
    }

    pub(crate) fn on_case_result(&mut self, result: &TestResult) {
        self.finished_count += 1;
        match result {
            TestResult::Passed { .. } => self.passed += 1,
            TestResult::Failed { .. } => self.failed += 1,
            TestResult::Broken { .. } => self.broken += 1,
            TestResult::Skipped { .. } => self.skipped += 1,
        }
    }

    pub(crate) fn on_broken_suite(&mut self, broken: &BrokenSuite) {
        self.broken_suites += 1;
        self.broken_suite_cases += broken.case_slots();
    }
}
