// Copyright (c) The kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Run configuration for the test engine.
//!
//! These types are filled in by the CLI layer; the core only consumes them.
//! The configuration travels inside every [`ExecutionState`] fork, so it must
//! stay cheap to clone.
//!
//! [`ExecutionState`]: crate::state::ExecutionState

use camino::{Utf8Path, Utf8PathBuf};
use rand::RngExt;
use std::num::NonZeroUsize;

/// Default file extension of test source files.
pub const DEFAULT_SOURCE_EXTENSION: &str = "cairo";

/// Default directory, relative to the project root, where kiln persists its
/// cache records.
pub const DEFAULT_CACHE_DIR: &str = ".kiln-cache";

/// Configuration for a single test run.
#[derive(Clone, Debug)]
pub struct RunConfig {
    /// The project root all suite paths are relative to.
    pub workspace_root: Utf8PathBuf,

    /// File extension of test source files, without the leading dot.
    pub source_extension: String,

    /// Base seed for deterministic fuzzing. Per-case seeds are derived from
    /// this value and the case name.
    pub seed: u64,

    /// Fuzzing knobs.
    pub fuzz: FuzzConfig,

    /// Stop scheduling new work as soon as any case fails or breaks.
    pub exit_first: bool,

    /// Narrow the requested targets to the previous run's failures.
    pub last_failed: bool,

    /// Directory, relative to the workspace root, holding persisted state.
    pub cache_dir: Utf8PathBuf,

    /// Number of concurrent suite workers.
    pub test_workers: TestWorkers,
}

impl RunConfig {
    /// Creates a configuration with default settings and a random seed.
    pub fn new(workspace_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            source_extension: DEFAULT_SOURCE_EXTENSION.to_owned(),
            seed: rand::rng().random(),
            fuzz: FuzzConfig::default(),
            exit_first: false,
            last_failed: false,
            cache_dir: DEFAULT_CACHE_DIR.into(),
            test_workers: TestWorkers::default(),
        }
    }

    /// Sets an explicit fuzzing seed, making the whole run reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Returns the absolute path of the cache directory.
    pub fn cache_path(&self) -> Utf8PathBuf {
        self.workspace_root.join(&self.cache_dir)
    }

    /// Returns the workspace root.
    pub fn workspace_root(&self) -> &Utf8Path {
        &self.workspace_root
    }
}

/// Fuzzing configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FuzzConfig {
    /// Budget of generated runs per fuzzed test case. Explicit examples are
    /// replayed on top of this budget.
    pub runs: u32,

    /// Upper bound on inputs a single `filter` may reject before the search
    /// gives up on that strategy locally.
    pub max_local_rejects: u32,

    /// Upper bound on whole-input rejections before the search is abandoned.
    pub max_global_rejects: u32,

    /// Upper bound on shrink iterations after a failure is found.
    pub max_shrink_iters: u32,
}

impl Default for FuzzConfig {
    fn default() -> Self {
        Self {
            runs: 100,
            max_local_rejects: 65_536,
            max_global_rejects: 1024,
            max_shrink_iters: 1024,
        }
    }
}

/// Number of suite workers to run concurrently.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TestWorkers {
    /// Use the number of available CPU cores.
    NumCpus,

    /// Use this many workers.
    Count(NonZeroUsize),
}

impl TestWorkers {
    /// Computes the concrete worker count.
    pub fn compute(self) -> usize {
        match self {
            Self::NumCpus => std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            Self::Count(count) => count.get(),
        }
    }
}

impl Default for TestWorkers {
    fn default() -> Self {
        Self::NumCpus
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_counts() {
        assert!(TestWorkers::NumCpus.compute() >= 1);
        let two = TestWorkers::Count(NonZeroUsize::new(2).expect("2 is non-zero"));
        assert_eq!(two.compute(), 2);
    }

    #[test]
    fn cache_path_joins_root_and_dir() {
        let config = RunConfig::new("/work/project");
        assert_eq!(
            config.cache_path(),
            Utf8PathBuf::from("/work/project/.kiln-cache")
        );
    }
}
