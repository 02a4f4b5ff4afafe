// Copyright (c) The kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resolution of user-supplied targets into a [`TestList`].
//!
//! A target is `path-glob[::function-glob]`. The path part expands against
//! the filesystem; the engine is then asked for the declared function names
//! of every candidate file, and the naming rules pick out test cases and
//! their setups. Ignore targets use the same syntax and subtract files or
//! individual cases.

use crate::{
    errors::TargetResolveError,
    helpers::plural,
    list::{
        CASE_SETUP_FN_PREFIX, SUITE_SETUP_FN, TEST_FN_PREFIX, TestCase, TestList, TestSuite,
    },
    reporter::{BrokenSuite, SuiteFailure},
    time::stopwatch,
    vm::ExecutionEngine,
};
use camino::{Utf8Path, Utf8PathBuf};
use globset::{Glob, GlobMatcher};
use indexmap::IndexMap;
use std::collections::HashSet;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// The separator between a target's path part and its function part.
pub const TARGET_SEPARATOR: &str = "::";

/// A parsed user target: a path glob and an optional function glob.
///
/// Resolved, never persisted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestTarget {
    /// The path part: a literal path, a directory, or a glob.
    pub path_part: String,

    /// The function part; defaults to `*`.
    pub fn_glob: String,
}

impl TestTarget {
    /// Parses a raw target string.
    pub fn parse(raw: &str) -> Self {
        match raw.split_once(TARGET_SEPARATOR) {
            Some((path_part, fn_glob)) if !fn_glob.is_empty() => Self {
                path_part: path_part.to_owned(),
                fn_glob: fn_glob.to_owned(),
            },
            Some((path_part, _)) => Self {
                path_part: path_part.to_owned(),
                fn_glob: "*".to_owned(),
            },
            None => Self {
                path_part: raw.to_owned(),
                fn_glob: "*".to_owned(),
            },
        }
    }

    /// True if the function part selects every function.
    pub fn selects_all_functions(&self) -> bool {
        self.fn_glob == "*"
    }
}

impl std::fmt::Display for TestTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.selects_all_functions() {
            write!(f, "{}", self.path_part)
        } else {
            write!(f, "{}{TARGET_SEPARATOR}{}", self.path_part, self.fn_glob)
        }
    }
}

/// How an ignore (or candidate check) matches candidate paths.
enum PathFilter {
    /// A compiled glob, matched against the relative path.
    Glob(GlobMatcher),

    /// A literal path: matches itself and everything underneath it.
    Prefix(Utf8PathBuf),
}

impl PathFilter {
    fn compile(part: &str) -> Result<Self, TargetResolveError> {
        if has_glob_chars(part) {
            Ok(Self::Glob(compile_glob(part)?))
        } else {
            Ok(Self::Prefix(Utf8PathBuf::from(part)))
        }
    }

    fn matches(&self, candidate: &Utf8Path) -> bool {
        match self {
            Self::Glob(matcher) => matcher.is_match(candidate.as_str()),
            Self::Prefix(prefix) => candidate == prefix || candidate.starts_with(prefix),
        }
    }
}

struct CompiledIgnore {
    path: PathFilter,
    // None subtracts the whole file.
    fn_matcher: Option<GlobMatcher>,
}

/// Resolves targets into a test list by expanding globs against the
/// filesystem and querying the engine for declared function names.
pub struct TargetResolver<'a> {
    engine: &'a dyn ExecutionEngine,
    root: &'a Utf8Path,
    source_extension: &'a str,
}

impl<'a> TargetResolver<'a> {
    /// Creates a resolver rooted at the project root.
    pub fn new(engine: &'a dyn ExecutionEngine, root: &'a Utf8Path, source_extension: &'a str) -> Self {
        Self {
            engine,
            root,
            source_extension,
        }
    }

    /// Resolves targets, applying ignores, into a [`TestList`].
    ///
    /// An empty target list falls back to `default_target`. A file that
    /// fails to compile becomes a [`BrokenSuite`] without aborting discovery
    /// of the others.
    pub fn resolve(
        &self,
        targets: &[String],
        ignores: &[String],
        default_target: &str,
    ) -> Result<TestList, TargetResolveError> {
        let sw = stopwatch();

        let targets: Vec<TestTarget> = if targets.is_empty() {
            vec![TestTarget::parse(default_target)]
        } else {
            targets.iter().map(|raw| TestTarget::parse(raw)).collect()
        };
        let ignores: Vec<TestTarget> = ignores.iter().map(|raw| TestTarget::parse(raw)).collect();

        let compiled_ignores = ignores
            .iter()
            .map(|ignore| {
                Ok(CompiledIgnore {
                    path: PathFilter::compile(&ignore.path_part)?,
                    fn_matcher: if ignore.selects_all_functions() {
                        None
                    } else {
                        Some(compile_glob(&ignore.fn_glob)?)
                    },
                })
            })
            .collect::<Result<Vec<_>, TargetResolveError>>()?;

        // Candidate files in first-seen order, each with the function globs
        // of every target that selected it.
        let mut candidates: IndexMap<Utf8PathBuf, Vec<GlobMatcher>> = IndexMap::new();
        for target in &targets {
            let fn_matcher = compile_glob(&target.fn_glob)?;
            for path in self.expand_path_part(&target.path_part)? {
                candidates.entry(path).or_default().push(fn_matcher.clone());
            }
        }

        candidates.retain(|path, _| {
            let ignored = compiled_ignores
                .iter()
                .any(|ignore| ignore.fn_matcher.is_none() && ignore.path.matches(path));
            if ignored {
                debug!(%path, "file subtracted by ignore target");
            }
            !ignored
        });

        let mut list = TestList::default();
        for (path, fn_matchers) in candidates {
            let names = match self.engine.declared_function_names(&path) {
                Ok(names) => names,
                Err(error) => {
                    warn!(%path, %error, "file failed to preprocess; marking suite broken");
                    list.broken_suites.push(BrokenSuite {
                        suite_path: path,
                        test_case_names: vec![],
                        failure: SuiteFailure::Compile(error),
                    });
                    continue;
                }
            };

            let suite_setup_fn = names
                .iter()
                .find(|name| name.as_str() == SUITE_SETUP_FN)
                .cloned();

            let mut seen = HashSet::new();
            let mut cases = Vec::new();
            for name in &names {
                if !name.starts_with(TEST_FN_PREFIX) || !seen.insert(name.as_str()) {
                    continue;
                }
                if !fn_matchers.iter().any(|matcher| matcher.is_match(name)) {
                    continue;
                }
                let case_ignored = compiled_ignores.iter().any(|ignore| {
                    ignore.path.matches(&path)
                        && ignore
                            .fn_matcher
                            .as_ref()
                            .is_some_and(|matcher| matcher.is_match(name))
                });
                if case_ignored {
                    debug!(%path, name = %name, "case subtracted by ignore target");
                    continue;
                }

                let setup_name = format!("{CASE_SETUP_FN_PREFIX}{name}");
                let setup_fn = names.iter().find(|n| **n == setup_name).cloned();
                cases.push(TestCase {
                    suite_path: path.clone(),
                    name: name.as_str().into(),
                    setup_fn,
                    code_offset: None,
                });
            }

            if cases.is_empty() {
                debug!(%path, "no matching test cases; skipping file");
                continue;
            }
            list.test_cases_count += cases.len();
            list.suites.push(TestSuite {
                suite_path: path,
                suite_setup_fn,
                cases,
            });
        }

        list.duration = sw.snapshot().duration;
        debug!(
            "collected {} {} in {} {} ({} broken)",
            list.test_cases_count,
            plural::tests_str(list.test_cases_count),
            list.suite_count(),
            plural::suites_str(list.suite_count()),
            list.broken_suites.len(),
        );
        Ok(list)
    }

    /// Expands a target's path part into candidate files, relative to the
    /// project root.
    ///
    /// A literal file is its own candidate; a directory expands to the test
    /// files underneath it; anything else is treated as a glob over the
    /// whole tree. The test-file naming rule (stem starts with `test_` or
    /// ends with `_test`) applies only to directory expansion, where the
    /// user gave no shape of their own.
    fn expand_path_part(&self, part: &str) -> Result<Vec<Utf8PathBuf>, TargetResolveError> {
        let joined = self.root.join(part);
        if joined.is_file() {
            return Ok(vec![Utf8PathBuf::from(part)]);
        }
        if joined.is_dir() {
            let files = self.walk_files(&joined)?;
            return Ok(files
                .into_iter()
                .filter(|path| self.is_test_file(path))
                .collect());
        }

        let matcher = compile_glob(part)?;
        let files = self.walk_files(self.root)?;
        Ok(files
            .into_iter()
            .filter(|path| matcher.is_match(path.as_str()))
            .collect())
    }

    fn walk_files(&self, dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, TargetResolveError> {
        let mut files = Vec::new();
        for entry in WalkDir::new(dir.as_std_path()).sort_by_file_name() {
            let entry = entry.map_err(|source| TargetResolveError::Walk {
                path: dir.to_owned(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            match Utf8PathBuf::from_path_buf(entry.into_path()) {
                Ok(path) => {
                    let relative = path
                        .strip_prefix(self.root)
                        .map(Utf8Path::to_path_buf)
                        .unwrap_or(path);
                    files.push(relative);
                }
                Err(path) => {
                    warn!(path = %path.display(), "skipping non-UTF-8 path");
                }
            }
        }
        Ok(files)
    }

    fn is_test_file(&self, path: &Utf8Path) -> bool {
        path.extension() == Some(self.source_extension)
            && path
                .file_stem()
                .is_some_and(|stem| stem.starts_with("test_") || stem.ends_with("_test"))
    }
}

fn has_glob_chars(part: &str) -> bool {
    part.contains(['*', '?', '[', '{'])
}

fn compile_glob(pattern: &str) -> Result<GlobMatcher, TargetResolveError> {
    Glob::new(pattern)
        .map(|glob| glob.compile_matcher())
        .map_err(|source| TargetResolveError::InvalidGlob {
            pattern: pattern.to_owned(),
            source,
        })
}
