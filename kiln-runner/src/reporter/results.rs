// Copyright (c) The kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed test results.
//!
//! Every executed case ends in exactly one [`TestResult`] variant. Suites
//! that never got to run their cases end in a [`BrokenSuite`] instead, which
//! accounts for all of the suite's case slots at once.

use crate::{
    errors::{BreakingError, CompileError, ReportedError},
    state::OutputRecorder,
};
use camino::Utf8PathBuf;
use kiln_metadata::{ResourceUsageSummary, TestCaseId, TestCaseName};
use std::{fmt, time::Duration};

/// Data every test result carries: identity, timing, and captured output.
///
/// Timing and output are recorded even on failure, since diagnostics are the
/// primary value of a failing result.
#[derive(Clone, Debug)]
pub struct TestResultCommon {
    /// The case's identity.
    pub id: TestCaseId,

    /// Wall-clock duration of the case, setup included.
    pub execution_time: Duration,

    /// Captured stdout, grouped by execution section.
    pub captured_output: OutputRecorder,
}

/// Statistics attached to results of fuzzed cases.
#[derive(Clone, Debug)]
pub struct FuzzStats {
    /// Number of runs executed, examples and shrink iterations included.
    pub runs: u32,

    /// Aggregated resource usage over passing runs, if any run passed.
    pub resources: Option<ResourceUsageSummary>,
}

/// The outcome of one executed test case.
#[derive(Clone, Debug)]
pub enum TestResult {
    /// The case passed.
    Passed {
        /// Identity, timing, and output.
        common: TestResultCommon,
        /// Fuzzing statistics, for parameterized cases.
        fuzz: Option<FuzzStats>,
    },

    /// The case failed on its own terms.
    Failed {
        /// Identity, timing, and output.
        common: TestResultCommon,
        /// The domain failure.
        error: ReportedError,
        /// Fuzzing statistics, for parameterized cases.
        fuzz: Option<FuzzStats>,
    },

    /// The engine faulted underneath the case.
    Broken {
        /// Identity, timing, and output.
        common: TestResultCommon,
        /// The infrastructure failure.
        error: BreakingError,
        /// Fuzzing statistics, for parameterized cases.
        fuzz: Option<FuzzStats>,
    },

    /// The case was skipped by an explicit cheatcode signal.
    Skipped {
        /// Identity, timing, and output.
        common: TestResultCommon,
        /// Optional human-readable reason.
        reason: Option<String>,
    },
}

impl TestResult {
    /// The case's identity.
    pub fn id(&self) -> &TestCaseId {
        &self.common().id
    }

    /// The shared part of the result.
    pub fn common(&self) -> &TestResultCommon {
        match self {
            Self::Passed { common, .. }
            | Self::Failed { common, .. }
            | Self::Broken { common, .. }
            | Self::Skipped { common, .. } => common,
        }
    }

    /// True for results that do not fail the run.
    pub fn is_passing(&self) -> bool {
        matches!(self, Self::Passed { .. } | Self::Skipped { .. })
    }

    /// A short lowercase label for the variant.
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::Passed { .. } => "passed",
            Self::Failed { .. } => "failed",
            Self::Broken { .. } => "broken",
            Self::Skipped { .. } => "skipped",
        }
    }
}

/// Why a whole suite failed before (or instead of) running its cases.
#[derive(Clone, Debug)]
pub enum SuiteFailure {
    /// The source file did not compile or preprocess.
    Compile(CompileError),

    /// The suite-level setup raised a domain failure.
    Setup(ReportedError),

    /// The engine faulted outside any per-case boundary.
    Infra(BreakingError),

    /// Something escaped the worker that was neither a domain nor an
    /// infrastructure failure; carries whatever trace text could be captured.
    Unexpected {
        /// The panic or error message.
        message: String,
        /// Captured backtrace text.
        trace: String,
    },
}

impl SuiteFailure {
    /// True for the unexpected variant.
    pub fn is_unexpected(&self) -> bool {
        matches!(self, Self::Unexpected { .. })
    }
}

impl fmt::Display for SuiteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compile(error) => error.fmt(f),
            Self::Setup(error) => write!(f, "suite setup failed: {error}"),
            Self::Infra(error) => error.fmt(f),
            Self::Unexpected { message, .. } => {
                write!(f, "unexpected worker failure: {message}")
            }
        }
    }
}

/// A suite whose cases never ran.
///
/// Consumes all of its member case slots at once in run accounting.
#[derive(Clone, Debug)]
pub struct BrokenSuite {
    /// The suite's source file.
    pub suite_path: Utf8PathBuf,

    /// Names of the cases that were prevented from running. Empty if the
    /// failure happened before cases were discovered.
    pub test_case_names: Vec<TestCaseName>,

    /// What broke the suite.
    pub failure: SuiteFailure,
}

impl BrokenSuite {
    /// The identities of all member cases.
    pub fn case_ids(&self) -> impl Iterator<Item = TestCaseId> + '_ {
        self.test_case_names
            .iter()
            .map(|name| TestCaseId::new(self.suite_path.clone(), name.clone()))
    }

    /// Number of case slots this suite consumes in run accounting.
    pub fn case_slots(&self) -> usize {
        self.test_case_names.len()
    }
}
