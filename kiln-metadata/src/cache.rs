// Copyright (c) The kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{TestCaseId, TestCaseName};
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// The serialized form of the failure cache: the set of test cases that
/// failed or broke during the previous run.
///
/// Persisted as a whole JSON array of `[path, case_name]` pairs; the file is
/// always read and written in one piece, never partially updated.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FailureCacheSummary {
    /// The cached failing cases, in the order they were reported.
    pub entries: Vec<FailureCacheEntry>,
}

impl FailureCacheSummary {
    /// Parses a summary from a JSON string.
    pub fn parse_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serializes this summary to a JSON string.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Returns true if no failures were recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One failure-cache record: a `(path, case_name)` pair.
///
/// Serialized as a two-element JSON array rather than an object, so the cache
/// file stays a plain array of pairs.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct FailureCacheEntry(pub Utf8PathBuf, pub TestCaseName);

impl FailureCacheEntry {
    /// The source file the failing case belongs to.
    pub fn suite_path(&self) -> &Utf8PathBuf {
        &self.0
    }

    /// The name of the failing case.
    pub fn case_name(&self) -> &TestCaseName {
        &self.1
    }
}

impl From<TestCaseId> for FailureCacheEntry {
    fn from(id: TestCaseId) -> Self {
        Self(id.suite_path, id.case_name)
    }
}

impl From<FailureCacheEntry> for TestCaseId {
    fn from(entry: FailureCacheEntry) -> Self {
        Self {
            suite_path: entry.0,
            case_name: entry.1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_round_trips_as_array_of_pairs() {
        let summary = FailureCacheSummary {
            entries: vec![
                FailureCacheEntry("tests/a_test.cairo".into(), "test_x".into()),
                FailureCacheEntry("tests/b_test.cairo".into(), "test_y".into()),
            ],
        };
        let json = summary.to_json_string().unwrap();
        assert_eq!(
            json,
            r#"[["tests/a_test.cairo","test_x"],["tests/b_test.cairo","test_y"]]"#
        );
        assert_eq!(FailureCacheSummary::parse_json(&json).unwrap(), summary);
    }

    #[test]
    fn empty_summary_is_an_empty_array() {
        let summary = FailureCacheSummary::default();
        assert!(summary.is_empty());
        assert_eq!(summary.to_json_string().unwrap(), "[]");
    }
}
