// Copyright (c) The kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by kiln.
//!
//! The taxonomy mirrors how outcomes are reported: [`ReportedError`] values
//! mark a test case as failed, [`BreakingError`] values mark it as broken,
//! and everything else is an infrastructure error surfaced to the caller
//! before or after a run.

use crate::{
    cheatcodes::{EventMatchReport, RevertExpectation},
    fuzz::FuzzInputBindings,
    vm::{VmType, VmValue},
};
use camino::Utf8PathBuf;
use std::{fmt, time::Duration};
use thiserror::Error;
use tokio::task::JoinError;

/// A domain-level failure: the test did not do what it asserted it would.
///
/// Cases that end with one of these are reported as `Failed`.
#[derive(Clone, Debug, Error)]
pub enum ReportedError {
    /// The VM reverted and no revert expectation was registered.
    #[error("call reverted: {0}")]
    UnexpectedRevert(RevertError),

    /// The VM reverted, but the revert did not match the registered
    /// expectation.
    #[error("revert did not match expectation\n  expected: {expected}\n  received: {actual}")]
    RevertMismatch {
        /// What the test expected.
        expected: RevertExpectation,
        /// What the VM actually raised.
        actual: RevertError,
    },

    /// A revert expectation was registered but the call completed cleanly.
    #[error("expected revert was not raised\n  expected: {expected}")]
    ExpectedRevertNotRaised {
        /// The unfulfilled expectation.
        expected: RevertExpectation,
    },

    /// One or more expected events were not emitted.
    #[error("{0}")]
    MissingEvents(EventMatchReport),

    /// An expected contract call never happened.
    #[error("expected call never happened: contract {address}, selector `{selector}`")]
    MissingCall {
        /// The contract address the call was expected on.
        address: VmValue,
        /// The function selector of the expected call.
        selector: String,
    },

    /// A cheatcode was invoked in a way its protocol forbids.
    #[error("cheatcode `{name}`: {message}")]
    CheatcodeMisuse {
        /// Name of the cheatcode.
        name: String,
        /// What went wrong.
        message: String,
    },

    /// The fuzzing configuration for a parameterized test was invalid.
    #[error(transparent)]
    FuzzConfig(#[from] FuzzConfigError),

    /// Property search found a failing input.
    #[error("fuzzing found a failing case after {runs} runs\nfalsifying input:\n{bindings}caused by: {source}")]
    FuzzFailure {
        /// The domain failure raised by the minimal failing input.
        source: Box<ReportedError>,
        /// The parameter bindings that reproduce the failure.
        bindings: FuzzInputBindings,
        /// How many runs were executed before the failure was minimized.
        runs: u32,
    },
}

/// An infrastructure-level failure: the engine faulted in a way that is not
/// attributable to the assertion under test.
///
/// Cases that end with one of these are reported as `Broken`.
#[derive(Clone, Debug, Error)]
#[error("VM internal fault: {message}")]
pub struct BreakingError {
    /// Description of the engine fault.
    pub message: String,
}

impl BreakingError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A failure classified by the boundary it crossed: either a domain failure
/// or an infrastructure failure.
#[derive(Clone, Debug)]
pub enum ExecutionFailure {
    /// The test failed on its own terms.
    Domain(ReportedError),
    /// The engine faulted underneath the test.
    Infra(BreakingError),
}

impl ExecutionFailure {
    /// Classifies a VM error into the domain/infrastructure split.
    pub fn classify(error: VmError) -> Self {
        match error {
            VmError::Revert(revert) => Self::Domain(ReportedError::UnexpectedRevert(revert)),
            VmError::Internal { message } => Self::Infra(BreakingError { message }),
            VmError::Hint(hint) => match *hint {
                CheatcodeError::Misuse { name, message } => {
                    Self::Domain(ReportedError::CheatcodeMisuse { name, message })
                }
                CheatcodeError::Vm(inner) => Self::classify(inner),
            },
        }
    }
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Domain(error) => error.fmt(f),
            Self::Infra(error) => error.fmt(f),
        }
    }
}

/// A revertable failure raised by the VM while executing a call.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RevertError {
    /// The error type reported by the VM, if it reports one.
    pub error_type: Option<String>,

    /// Panic/revert payload messages, in the order the VM reported them.
    pub messages: Vec<String>,
}

impl fmt::Display for RevertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error_type {
            Some(error_type) => write!(f, "{error_type}")?,
            None => write!(f, "(untyped)")?,
        }
        if !self.messages.is_empty() {
            write!(f, " [{}]", self.messages.join("; "))?;
        }
        Ok(())
    }
}

impl std::error::Error for RevertError {}

/// An error raised by the VM while running a function.
#[derive(Clone, Debug, Error)]
pub enum VmError {
    /// A domain-level revert.
    #[error(transparent)]
    Revert(#[from] RevertError),

    /// An engine-internal fault.
    #[error("VM internal error: {message}")]
    Internal {
        /// Description of the fault.
        message: String,
    },

    /// A cheatcode invoked through the hint mechanism failed; the engine
    /// aborts the call and surfaces the hint error.
    #[error(transparent)]
    Hint(Box<CheatcodeError>),
}

impl From<CheatcodeError> for VmError {
    fn from(error: CheatcodeError) -> Self {
        Self::Hint(Box::new(error))
    }
}

/// An error returned by a cheatcode handler to the engine.
#[derive(Clone, Debug, Error)]
pub enum CheatcodeError {
    /// The cheatcode's own protocol was violated (wrong arguments, duplicate
    /// registration, wrong phase).
    #[error("cheatcode `{name}`: {message}")]
    Misuse {
        /// Name of the cheatcode.
        name: String,
        /// What went wrong.
        message: String,
    },

    /// A VM operation performed by the cheatcode failed.
    #[error(transparent)]
    Vm(#[from] VmError),
}

impl CheatcodeError {
    pub(crate) fn misuse(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Misuse {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// The engine failed to compile or preprocess a source file.
#[derive(Clone, Debug, Error)]
#[error("failed to compile `{path}`: {message}")]
pub struct CompileError {
    /// The source file that failed.
    pub path: Utf8PathBuf,

    /// The compiler's diagnostic text.
    pub message: String,
}

/// An invalid fuzzing configuration for a parameterized test function.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum FuzzConfigError {
    /// No strategy was declared for a parameter and none can be inferred from
    /// its type.
    #[error("cannot infer a search strategy for parameter `{param}` of type {ty}")]
    UnsupportedParamType {
        /// The parameter's name.
        param: String,
        /// The parameter's VM type.
        ty: VmType,
    },

    /// A declared strategy cannot produce values of the parameter's type.
    #[error("strategy {strategy} cannot be applied to parameter `{param}` of type {ty}")]
    InvalidStrategy {
        /// The parameter's name.
        param: String,
        /// The parameter's VM type.
        ty: VmType,
        /// A description of the offending strategy.
        strategy: String,
    },

    /// A strategy was declared for a parameter the test function does not
    /// have.
    #[error("strategy declared for unknown parameter `{param}`")]
    UnknownParam {
        /// The declared parameter name.
        param: String,
    },

    /// An explicit example does not bind every declared parameter.
    #[error("example binds {got} values but the test function declares {expected} parameters")]
    ExampleArity {
        /// Number of parameters the function declares.
        expected: usize,
        /// Number of values the example provided.
        got: usize,
    },

    /// Too many inputs were rejected for the search to make progress.
    #[error("input rejection budget exhausted: {reason}")]
    RejectionsExhausted {
        /// The search engine's diagnostic.
        reason: String,
    },
}

/// An error produced while resolving test targets into a test list.
#[derive(Debug, Error)]
pub enum TargetResolveError {
    /// A target contained a glob pattern that failed to compile.
    #[error("invalid target glob `{pattern}`")]
    InvalidGlob {
        /// The offending pattern.
        pattern: String,
        /// The underlying parse error.
        #[source]
        source: globset::Error,
    },

    /// Walking the filesystem under the project root failed.
    #[error("failed to walk project tree under `{path}`")]
    Walk {
        /// The directory being walked.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: walkdir::Error,
    },
}

/// An error produced while reading or writing the failure cache.
#[derive(Debug, Error)]
pub enum FailureCacheError {
    /// Reading the cache file failed.
    #[error("failed to read failure cache at `{path}`")]
    Read {
        /// The cache file path.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The cache file exists but does not parse.
    #[error("failed to parse failure cache at `{path}`")]
    Parse {
        /// The cache file path.
        path: Utf8PathBuf,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// Writing the cache file failed.
    #[error("failed to write failure cache at `{path}`")]
    Write {
        /// The cache file path.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// An error occurred while building a test runner.
#[derive(Debug, Error)]
pub enum TestRunnerBuildError {
    /// An error occurred while creating the Tokio runtime.
    #[error("error creating Tokio runtime")]
    TokioRuntimeCreate(#[source] std::io::Error),
}

/// An unrecoverable fault in the scheduler itself, as opposed to a failure of
/// any test under it.
#[derive(Clone, Debug, Error)]
pub enum SchedulerFault {
    /// The result channel produced no event within the deadlock safety net.
    #[error(
        "result channel produced no event within the {}s deadlock safety net",
        .timeout.as_secs()
    )]
    ResultChannelTimedOut {
        /// The safety-net timeout that elapsed.
        timeout: Duration,
    },
}

/// Errors collected while executing a test run.
///
/// `report_error` is the first error returned by the reporting callback;
/// `fault` is set if the scheduler itself faulted; `join_errors` are tasks
/// that panicked outside the per-suite boundary.
#[derive(Debug)]
pub struct TestRunnerExecuteErrors<E> {
    /// The first error returned by the reporting callback, if any.
    pub report_error: Option<E>,

    /// An unrecoverable scheduler fault, if one occurred.
    pub fault: Option<SchedulerFault>,

    /// Join errors from scheduler-internal tasks.
    pub join_errors: Vec<JoinError>,
}

impl<E: fmt::Debug> fmt::Display for TestRunnerExecuteErrors<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(report_error) = &self.report_error {
            parts.push(format!("error reporting results: {report_error:?}"));
        }
        if let Some(fault) = &self.fault {
            parts.push(fault.to_string());
        }
        if !self.join_errors.is_empty() {
            parts.push(format!(
                "{} scheduler task(s) failed to join",
                self.join_errors.len()
            ));
        }
        write!(f, "{}", parts.join("; "))
    }
}

impl<E: fmt::Debug> std::error::Error for TestRunnerExecuteErrors<E> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_splits_domain_and_infra() {
        let revert = VmError::Revert(RevertError {
            error_type: Some("TRANSACTION_FAILED".to_owned()),
            messages: vec!["not enough balance".to_owned()],
        });
        assert!(matches!(
            ExecutionFailure::classify(revert),
            ExecutionFailure::Domain(ReportedError::UnexpectedRevert(_))
        ));

        let internal = VmError::Internal {
            message: "segment arena corrupted".to_owned(),
        };
        assert!(matches!(
            ExecutionFailure::classify(internal),
            ExecutionFailure::Infra(_)
        ));

        let misuse = VmError::from(CheatcodeError::misuse("expect_revert", "duplicate"));
        assert!(matches!(
            ExecutionFailure::classify(misuse),
            ExecutionFailure::Domain(ReportedError::CheatcodeMisuse { .. })
        ));
    }

    #[test]
    fn nested_hint_vm_errors_classify_recursively() {
        let nested = VmError::from(CheatcodeError::Vm(VmError::Internal {
            message: "oom".to_owned(),
        }));
        assert!(matches!(
            ExecutionFailure::classify(nested),
            ExecutionFailure::Infra(BreakingError { .. })
        ));
    }

    #[test]
    fn revert_error_display() {
        let error = RevertError {
            error_type: Some("ENTRY_POINT_NOT_FOUND".to_owned()),
            messages: vec!["selector 0x1".to_owned(), "class 0x2".to_owned()],
        };
        assert_eq!(
            error.to_string(),
            "ENTRY_POINT_NOT_FOUND [selector 0x1; class 0x2]"
        );
    }
}
