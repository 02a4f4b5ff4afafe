// Copyright (c) The kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The failure cache: which cases failed last run.
//!
//! The cache is a single JSON array of `[path, case_name]` pairs at
//! `<project>/<cache-dir>/test_results`, read and written whole. A "last
//! failed" invocation narrows the requested targets to cached failures that
//! are descendants of the requested paths; an empty or stale cache leaves
//! the targets unchanged.

use crate::{
    config::RunConfig,
    errors::FailureCacheError,
    list::{TARGET_SEPARATOR, TestTarget},
    reporter::TestingSummary,
};
use atomicwrites::{AtomicFile, OverwriteBehavior};
use camino::{Utf8Path, Utf8PathBuf};
use kiln_metadata::{FailureCacheEntry, FailureCacheSummary};
use std::io::Write;
use tracing::debug;

/// File name of the cache record inside the cache directory.
pub const FAILURE_CACHE_FILE_NAME: &str = "test_results";

/// Applies the "last failed" narrowing to the requested targets when the
/// configuration asks for it; otherwise returns them unchanged.
pub fn effective_targets(
    config: &RunConfig,
    requested: &[String],
) -> Result<Vec<String>, FailureCacheError> {
    if !config.last_failed {
        return Ok(requested.to_vec());
    }
    FailureCache::new(config).narrow_targets(requested, config.workspace_root())
}

/// Handle to the on-disk failure cache of one project.
#[derive(Clone, Debug)]
pub struct FailureCache {
    path: Utf8PathBuf,
}

impl FailureCache {
    /// Creates a handle from the run configuration.
    pub fn new(config: &RunConfig) -> Self {
        Self {
            path: config.cache_path().join(FAILURE_CACHE_FILE_NAME),
        }
    }

    /// The cache file's path.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Loads the cached failure set. A missing file is an empty cache, not
    /// an error.
    pub fn load(&self) -> Result<FailureCacheSummary, FailureCacheError> {
        let json = match fs_err::read_to_string(self.path.as_std_path()) {
            Ok(json) => json,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(FailureCacheSummary::default());
            }
            Err(error) => {
                return Err(FailureCacheError::Read {
                    path: self.path.clone(),
                    source: error,
                });
            }
        };
        FailureCacheSummary::parse_json(&json).map_err(|source| FailureCacheError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Replaces the cache with the failures of a finished run. The file is
    /// written atomically and whole, never partially updated.
    pub fn store(&self, summary: &TestingSummary) -> Result<(), FailureCacheError> {
        let record = FailureCacheSummary {
            entries: summary
                .failing_case_ids()
                .into_iter()
                .map(FailureCacheEntry::from)
                .collect(),
        };
        let json = record
            .to_json_string()
            .map_err(|source| FailureCacheError::Parse {
                path: self.path.clone(),
                source,
            })?;

        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent.as_std_path()).map_err(|source| {
                FailureCacheError::Write {
                    path: self.path.clone(),
                    source,
                }
            })?;
        }
        AtomicFile::new(self.path.as_std_path(), OverwriteBehavior::AllowOverwrite)
            .write(|file| file.write_all(json.as_bytes()))
            .map_err(|error| FailureCacheError::Write {
                path: self.path.clone(),
                source: match error {
                    atomicwrites::Error::Internal(source) => source,
                    atomicwrites::Error::User(source) => source,
                },
            })?;
        debug!(path = %self.path, entries = record.entries.len(), "failure cache written");
        Ok(())
    }

    /// Narrows requested targets to the cached failures underneath them.
    ///
    /// Each cached `(path, case)` pair whose path is a descendant of (or
    /// equal to) some requested target's path part, and whose file still
    /// exists under `root`, becomes a `path::case` target. If nothing
    /// survives, the original targets are returned unchanged.
    pub fn narrow_targets(
        &self,
        requested: &[String],
        root: &Utf8Path,
    ) -> Result<Vec<String>, FailureCacheError> {
        let cached = self.load()?;
        if cached.is_empty() {
            debug!("failure cache is empty; keeping requested targets");
            return Ok(requested.to_vec());
        }

        let requested_paths: Vec<TestTarget> =
            requested.iter().map(|raw| TestTarget::parse(raw)).collect();

        let mut narrowed = Vec::new();
        for entry in &cached.entries {
            let in_scope = requested_paths.is_empty()
                || requested_paths.iter().any(|target| {
                    let prefix = Utf8Path::new(&target.path_part);
                    entry.suite_path() == prefix || entry.suite_path().starts_with(prefix)
                });
            if !in_scope {
                continue;
            }
            if !root.join(entry.suite_path()).is_file() {
                debug!(path = %entry.suite_path(), "cached failure is stale; dropping");
                continue;
            }
            narrowed.push(format!(
                "{}{TARGET_SEPARATOR}{}",
                entry.suite_path(),
                entry.case_name()
            ));
        }

        if narrowed.is_empty() {
            debug!("no cached failures under the requested targets; keeping them");
            Ok(requested.to_vec())
        } else {
            Ok(narrowed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        errors::ReportedError,
        reporter::{TestResult, TestResultCommon},
        state::OutputRecorder,
    };
    use camino_tempfile::Utf8TempDir;
    use kiln_metadata::TestCaseId;
    use std::time::Duration;

    fn failed(path: &str, name: &str) -> TestResult {
        TestResult::Failed {
            common: TestResultCommon {
                id: TestCaseId::new(path, name),
                execution_time: Duration::ZERO,
                captured_output: OutputRecorder::default(),
            },
            error: ReportedError::CheatcodeMisuse {
                name: "expect_revert".to_owned(),
                message: "duplicate".to_owned(),
            },
            fuzz: None,
        }
    }

    fn passed(path: &str, name: &str) -> TestResult {
        TestResult::Passed {
            common: TestResultCommon {
                id: TestCaseId::new(path, name),
                execution_time: Duration::ZERO,
                captured_output: OutputRecorder::default(),
            },
            fuzz: None,
        }
    }

    fn project_with_cache() -> (Utf8TempDir, FailureCache) {
        let dir = Utf8TempDir::new().expect("tempdir created");
        std::fs::create_dir_all(dir.path().join("tests")).unwrap();
        std::fs::write(dir.path().join("tests/a_test.cairo"), "// source").unwrap();
        std::fs::write(dir.path().join("tests/b_test.cairo"), "// source").unwrap();
        let config = RunConfig::new(dir.path().to_owned());
        (dir, FailureCache::new(&config))
    }

    #[test]
    fn round_trip_narrows_to_the_failing_case() {
        let (dir, cache) = project_with_cache();

        let mut summary = TestingSummary::new(2);
        summary.ingest_result(passed("tests/b_test.cairo", "test_ok"));
        summary.ingest_result(failed("tests/a_test.cairo", "test_x"));
        cache.store(&summary).expect("cache written");

        let narrowed = cache
            .narrow_targets(&["tests".to_owned()], dir.path())
            .expect("narrowing succeeds");
        assert_eq!(narrowed, vec!["tests/a_test.cairo::test_x".to_owned()]);
    }

    #[test]
    fn empty_cache_keeps_requested_targets() {
        let (dir, cache) = project_with_cache();
        let requested = vec!["tests".to_owned()];
        let narrowed = cache.narrow_targets(&requested, dir.path()).unwrap();
        assert_eq!(narrowed, requested);
    }

    #[test]
    fn stale_entries_fall_back_to_requested_targets() {
        let (dir, cache) = project_with_cache();

        let mut summary = TestingSummary::new(1);
        summary.ingest_result(failed("tests/deleted_test.cairo", "test_gone"));
        cache.store(&summary).expect("cache written");

        let requested = vec!["tests".to_owned()];
        let narrowed = cache.narrow_targets(&requested, dir.path()).unwrap();
        assert_eq!(narrowed, requested);
    }

    #[test]
    fn out_of_scope_failures_are_not_narrowed_to() {
        let (dir, cache) = project_with_cache();

        let mut summary = TestingSummary::new(1);
        summary.ingest_result(failed("tests/a_test.cairo", "test_x"));
        cache.store(&summary).expect("cache written");

        let requested = vec!["integration".to_owned()];
        let narrowed = cache.narrow_targets(&requested, dir.path()).unwrap();
        assert_eq!(narrowed, requested);
    }

    #[test]
    fn effective_targets_only_narrow_when_last_failed_is_set() {
        let (dir, cache) = project_with_cache();
        let mut summary = TestingSummary::new(1);
        summary.ingest_result(failed("tests/a_test.cairo", "test_x"));
        cache.store(&summary).expect("cache written");

        let requested = vec!["tests".to_owned()];
        let mut config = RunConfig::new(dir.path().to_owned());
        assert_eq!(
            effective_targets(&config, &requested).unwrap(),
            requested.clone()
        );

        config.last_failed = true;
        assert_eq!(
            effective_targets(&config, &requested).unwrap(),
            vec!["tests/a_test.cairo::test_x".to_owned()]
        );
    }

    #[test]
    fn store_replaces_the_previous_record_whole() {
        let (dir, cache) = project_with_cache();

        let mut first = TestingSummary::new(1);
        first.ingest_result(failed("tests/a_test.cairo", "test_x"));
        cache.store(&first).unwrap();

        let mut second = TestingSummary::new(1);
        second.ingest_result(failed("tests/b_test.cairo", "test_y"));
        cache.store(&second).unwrap();

        let narrowed = cache
            .narrow_targets(&["tests".to_owned()], dir.path())
            .unwrap();
        assert_eq!(narrowed, vec!["tests/b_test.cairo::test_y".to_owned()]);
    }
}
