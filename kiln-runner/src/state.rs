// Copyright (c) The kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Isolated, forkable execution state.
//!
//! One [`ExecutionState`] is created per suite and forked once per test case
//! (and once more per fuzz iteration). Forking is the isolation boundary:
//! every test case must observe state as if it were the only test ever run
//! against a freshly deployed fixture, so no mutable field may be shared by
//! reference across forks. The VM handle is copied through the engine's own
//! copy-on-write primitive; everything else is cloned by value.

use crate::{
    config::RunConfig,
    time::{StopwatchStart, stopwatch},
    vm::{ExecutionEngine, VmStateHandle, VmValue},
};
use debug_ignore::DebugIgnore;
use indexmap::IndexMap;
use std::{fmt, sync::Arc, time::Duration};

/// Free-form per-test context, shared between the setup and test phases of a
/// single case.
///
/// Cheatcodes read and write it through the hint mechanism; forking gives
/// each case an independent copy.
#[derive(Clone, Debug, Default)]
pub struct UserContext {
    values: IndexMap<String, VmValue>,
}

impl UserContext {
    /// Stores a value under a key, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: VmValue) {
        self.values.insert(key.into(), value);
    }

    /// Looks up a value by key.
    pub fn get(&self, key: &str) -> Option<&VmValue> {
        self.values.get(key)
    }

    /// Returns the number of stored values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if no values are stored.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// The execution section a piece of captured output belongs to.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum OutputSection {
    /// Output captured while the suite-level setup ran.
    SuiteSetup,

    /// Output captured while a case's setup ran.
    CaseSetup,

    /// Output captured while the test body ran.
    Test,
}

impl fmt::Display for OutputSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SuiteSetup => "suite setup",
            Self::CaseSetup => "setup",
            Self::Test => "test",
        };
        f.write_str(name)
    }
}

/// Captured stdout, grouped by execution section.
#[derive(Clone, Debug, Default)]
pub struct OutputRecorder {
    sections: IndexMap<OutputSection, String>,
}

impl OutputRecorder {
    /// Appends text to a section. Empty text is dropped so sections only
    /// exist once something was actually printed.
    pub fn append(&mut self, section: OutputSection, text: &str) {
        if text.is_empty() {
            return;
        }
        self.sections.entry(section).or_default().push_str(text);
    }

    /// Returns the captured text for a section, if any.
    pub fn section(&self, section: OutputSection) -> Option<&str> {
        self.sections.get(&section).map(String::as_str)
    }

    /// Iterates over non-empty sections in capture order.
    pub fn sections(&self) -> impl Iterator<Item = (OutputSection, &str)> {
        self.sections
            .iter()
            .map(|(section, text)| (*section, text.as_str()))
    }

    /// Returns true if nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Merges all sections of `other` into this recorder.
    pub fn merge(&mut self, other: &OutputRecorder) {
        for (section, text) in other.sections() {
            self.append(section, text);
        }
    }
}

/// An isolated bundle of everything one test execution needs: a handle to
/// simulated VM state, the run configuration, a user context, an output
/// recorder, and a timer.
#[derive(Debug)]
pub struct ExecutionState {
    engine: DebugIgnore<Arc<dyn ExecutionEngine>>,
    pub(crate) vm_handle: VmStateHandle,
    pub(crate) run_config: RunConfig,
    pub(crate) context: UserContext,
    pub(crate) recorder: OutputRecorder,
    pub(crate) timer: StopwatchStart,
}

impl ExecutionState {
    /// Creates a fresh state backed by an empty VM state from the engine.
    pub fn from_config(engine: Arc<dyn ExecutionEngine>, run_config: RunConfig) -> Self {
        let vm_handle = engine.empty_state(&run_config);
        Self {
            engine: DebugIgnore(engine),
            vm_handle,
            run_config,
            context: UserContext::default(),
            recorder: OutputRecorder::default(),
            timer: stopwatch(),
        }
    }

    /// Forks this state into an independent copy.
    ///
    /// The VM handle goes through the engine's copy primitive; the context,
    /// configuration, recorder, and timer are owned deep copies. Mutating
    /// either side of the fork never affects the other.
    pub fn fork(&self) -> Self {
        Self {
            engine: DebugIgnore(Arc::clone(&self.engine)),
            vm_handle: self.engine.copy_state(&self.vm_handle),
            run_config: self.run_config.clone(),
            context: self.context.clone(),
            recorder: self.recorder.clone(),
            timer: self.timer.clone(),
        }
    }

    /// Restarts the timer. Called when a case takes ownership of a fork, so
    /// reported durations cover only that case.
    pub(crate) fn restart_timer(&mut self) {
        self.timer = stopwatch();
    }

    /// Time elapsed since this state's timer was last (re)started.
    pub fn elapsed(&self) -> Duration {
        self.timer.snapshot().duration
    }

    /// The wall-clock time the timer was last (re)started at.
    pub fn started_at(&self) -> chrono::DateTime<chrono::Local> {
        self.timer.snapshot().start_time
    }

    /// The engine this state is bound to.
    pub fn engine(&self) -> &Arc<dyn ExecutionEngine> {
        &self.engine
    }

    /// The run configuration.
    pub fn run_config(&self) -> &RunConfig {
        &self.run_config
    }

    /// The user context.
    pub fn context(&self) -> &UserContext {
        &self.context
    }

    /// Mutable access to the user context.
    pub fn context_mut(&mut self) -> &mut UserContext {
        &mut self.context
    }

    /// The output recorder.
    pub fn recorder(&self) -> &OutputRecorder {
        &self.recorder
    }
}
