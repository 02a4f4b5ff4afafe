// Copyright (c) The kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test list: suites and cases, as resolved from user targets.

use crate::reporter::BrokenSuite;
use camino::Utf8PathBuf;
use kiln_metadata::{TestCaseId, TestCaseName};
use std::time::Duration;

/// The suite-level setup function's reserved name.
pub const SUITE_SETUP_FN: &str = "__setup__";

/// Prefix of test function names.
pub const TEST_FN_PREFIX: &str = "test_";

/// Prefix pairing a setup function with its test: `setup_<test_fn_name>`.
pub const CASE_SETUP_FN_PREFIX: &str = "setup_";

/// One discovered test case. Immutable after collection.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestCase {
    /// The source file declaring the case, relative to the project root.
    pub suite_path: Utf8PathBuf,

    /// The test function's name.
    pub name: TestCaseName,

    /// The paired setup function, if one is declared.
    pub setup_fn: Option<String>,

    /// Offset of the compiled test function's code, once known.
    pub code_offset: Option<u64>,
}

impl TestCase {
    /// The case's identity.
    pub fn id(&self) -> TestCaseId {
        TestCaseId::new(self.suite_path.clone(), self.name.clone())
    }
}

/// All test cases declared in one source file.
///
/// A suite is both the unit of compilation and the unit of worker dispatch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestSuite {
    /// The suite's source file, relative to the project root.
    pub suite_path: Utf8PathBuf,

    /// The suite-level setup function, if declared.
    pub suite_setup_fn: Option<String>,

    /// Cases in collection order.
    pub cases: Vec<TestCase>,
}

impl TestSuite {
    /// Names of all member cases, in collection order.
    pub fn case_names(&self) -> Vec<TestCaseName> {
        self.cases.iter().map(|case| case.name.clone()).collect()
    }
}

/// The outcome of target resolution: runnable suites, suites broken at
/// discovery time, and collection statistics.
#[derive(Clone, Debug, Default)]
pub struct TestList {
    /// Runnable suites, in discovery order.
    pub suites: Vec<TestSuite>,

    /// Suites whose source files failed to compile or preprocess.
    pub broken_suites: Vec<BrokenSuite>,

    /// Total number of runnable cases across all suites.
    pub test_cases_count: usize,

    /// How long resolution took.
    pub duration: Duration,
}

impl TestList {
    /// Number of cases that will be run.
    pub fn run_count(&self) -> usize {
        self.test_cases_count
    }

    /// Number of runnable suites.
    pub fn suite_count(&self) -> usize {
        self.suites.len()
    }

    /// Returns true if nothing runnable was discovered.
    pub fn is_empty(&self) -> bool {
        self.suites.is_empty() && self.broken_suites.is_empty()
    }
}
