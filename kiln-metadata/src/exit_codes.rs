// Copyright (c) The kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for kiln test runs.
///
/// Runs may fail for a variety of reasons. This structure documents the exit
/// codes that occur in case of expected failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum KilnExitCode {}

impl KilnExitCode {
    /// No errors occurred and kiln exited normally.
    pub const OK: i32 = 0;

    /// No tests were selected to run, but no other errors occurred.
    pub const NO_TESTS_RUN: i32 = 4;

    /// A user issue happened while setting up a kiln invocation.
    pub const SETUP_ERROR: i32 = 96;

    /// One or more test cases failed or broke, or a suite was broken.
    pub const TEST_RUN_FAILED: i32 = 100;

    /// Resolving test targets into a test list produced an error.
    pub const TEST_LIST_CREATION_FAILED: i32 = 104;

    /// The scheduler's result channel deadlock safety net fired.
    pub const SCHEDULER_FAULT: i32 = 107;

    /// Writing data to stdout or stderr produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;
}
