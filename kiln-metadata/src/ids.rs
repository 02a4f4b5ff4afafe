// Copyright (c) The kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt;

/// The name of a test case, e.g. `test_transfer_reverts`.
///
/// Backed by a [`SmolStr`], so cloning is cheap.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestCaseName(SmolStr);

impl TestCaseName {
    /// Creates a new `TestCaseName`.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(SmolStr::new(name))
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for TestCaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for TestCaseName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TestCaseName {
    fn from(s: String) -> Self {
        Self(SmolStr::from(s))
    }
}

impl AsRef<str> for TestCaseName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// The identity of a single test case: the source file that declares it plus
/// the case name.
///
/// Two cases are the same if and only if both components are equal. This is
/// the key used by the failure cache and by result accounting.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct TestCaseId {
    /// Path to the source file declaring the test, relative to the project root.
    pub suite_path: Utf8PathBuf,

    /// The name of the test function.
    pub case_name: TestCaseName,
}

impl TestCaseId {
    /// Creates a new `TestCaseId`.
    pub fn new(suite_path: impl Into<Utf8PathBuf>, case_name: impl Into<TestCaseName>) -> Self {
        Self {
            suite_path: suite_path.into(),
            case_name: case_name.into(),
        }
    }
}

impl fmt::Display for TestCaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.suite_path, self.case_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_id_display_uses_double_colon() {
        let id = TestCaseId::new("tests/a_test.cairo", "test_x");
        assert_eq!(id.to_string(), "tests/a_test.cairo::test_x");
    }

    #[test]
    fn case_name_serializes_transparently() {
        let name = TestCaseName::new("test_x");
        assert_eq!(serde_json::to_string(&name).unwrap(), r#""test_x""#);
    }
}
