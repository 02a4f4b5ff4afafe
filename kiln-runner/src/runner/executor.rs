// Copyright (c) The kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The worker side of the scheduler: executing one suite and its cases.
//!
//! A worker builds its own [`ExecutionState`] lineage: the suite-level setup
//! runs once against the base state, each case runs against a fork of it,
//! and each fuzz iteration runs against a fork of the case's fork. Outcomes
//! are converted to typed results at the narrowest boundary that preserves
//! diagnostic context; panics are caught at the outermost worker boundary so
//! they can never crash or deadlock the pool.

use crate::{
    cheatcodes::{CheatcodeState, Phase, RevertExpectationState, capability_set_for,
        run_finish_hooks},
    config::RunConfig,
    errors::{BreakingError, ExecutionFailure, ReportedError, VmError},
    fuzz::{FuzzSearchResult, case_rng_seed, run_fuzz_search},
    list::{TestCase, TestSuite},
    reporter::{BrokenSuite, FuzzStats, SuiteFailure, TestResult, TestResultCommon},
    runner::ExecutorEvent,
    state::{ExecutionState, OutputRecorder, OutputSection},
    vm::{ExecutionEngine, FunctionDecl, Program, VmCallOutput, VmResourceUsage, VmValue},
};
use kiln_metadata::ResourceUsageSummary;
use std::{
    backtrace::Backtrace,
    cell::RefCell,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

/// What a single VM invocation resolved to, when it did not fail.
///
/// The skip signal travels back as an explicit outcome value rather than as
/// non-local control flow.
#[derive(Debug)]
pub(crate) enum CallOutcome {
    /// The call completed; deferred assertions have already run.
    Continue(VmCallOutput),

    /// A skip cheatcode fired during the call.
    Skipped(Option<String>),
}

/// Runs one suite's cases against an isolated state lineage.
pub(crate) struct SuiteRunner {
    engine: Arc<dyn ExecutionEngine>,
    config: RunConfig,
    exit_first: bool,
}

impl SuiteRunner {
    pub(crate) fn new(engine: Arc<dyn ExecutionEngine>, config: RunConfig, exit_first: bool) -> Self {
        Self {
            engine,
            config,
            exit_first,
        }
    }

    /// Runs the whole suite, streaming per-case events. This is the
    /// outermost worker boundary: nothing escapes it.
    pub(crate) fn run_suite(
        &self,
        suite: &TestSuite,
        cancelled: &AtomicBool,
        any_failed: &AtomicBool,
        events: &UnboundedSender<ExecutorEvent>,
    ) {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.run_suite_inner(suite, cancelled, any_failed, events)
        }));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(broken)) => {
                self.flag_failure(cancelled, any_failed);
                let _ = events.send(ExecutorEvent::SuiteBroken { broken });
            }
            Err(payload) => {
                let message = panic_message(payload);
                let trace = Backtrace::force_capture().to_string();
                self.flag_failure(cancelled, any_failed);
                let _ = events.send(ExecutorEvent::SuiteBroken {
                    broken: BrokenSuite {
                        suite_path: suite.suite_path.clone(),
                        test_case_names: suite.case_names(),
                        failure: SuiteFailure::Unexpected { message, trace },
                    },
                });
            }
        }
    }

    fn run_suite_inner(
        &self,
        suite: &TestSuite,
        cancelled: &AtomicBool,
        any_failed: &AtomicBool,
        events: &UnboundedSender<ExecutorEvent>,
    ) -> Result<(), BrokenSuite> {
        let broken = |failure| BrokenSuite {
            suite_path: suite.suite_path.clone(),
            test_case_names: suite.case_names(),
            failure,
        };

        let program = self
            .engine
            .compile(&suite.suite_path)
            .map_err(|error| broken(SuiteFailure::Compile(error)))?;

        let mut suite_state =
            ExecutionState::from_config(Arc::clone(&self.engine), self.config.clone());

        if let Some(setup_fn) = &suite.suite_setup_fn {
            let cheat = Arc::new(Mutex::new(CheatcodeState::default()));
            match invoke(&program, &mut suite_state, &cheat, setup_fn, Phase::SuiteSetup, &[]) {
                Ok(CallOutcome::Continue(_)) => {}
                Ok(CallOutcome::Skipped(reason)) => {
                    // A skip raised during suite setup skips every case.
                    debug!(suite = %suite.suite_path, "suite setup skipped the whole suite");
                    for case in &suite.cases {
                        let _ = events.send(ExecutorEvent::CaseStarted { id: case.id() });
                        let _ = events.send(ExecutorEvent::CaseFinished {
                            result: TestResult::Skipped {
                                common: TestResultCommon {
                                    id: case.id(),
                                    execution_time: Duration::ZERO,
                                    captured_output: suite_state.recorder().clone(),
                                },
                                reason: reason.clone(),
                            },
                        });
                    }
                    return Ok(());
                }
                Err(ExecutionFailure::Domain(error)) => {
                    return Err(broken(SuiteFailure::Setup(error)));
                }
                Err(ExecutionFailure::Infra(error)) => {
                    return Err(broken(SuiteFailure::Infra(error)));
                }
            }
        }

        for case in &suite.cases {
            if cancelled.load(Ordering::Acquire) {
                debug!(suite = %suite.suite_path, "cancellation observed; leaving remaining cases unreported");
                break;
            }
            let _ = events.send(ExecutorEvent::CaseStarted { id: case.id() });
            let result = self.run_case(&program, &suite_state, case);
            if !result.is_passing() {
                self.flag_failure(cancelled, any_failed);
            }
            let _ = events.send(ExecutorEvent::CaseFinished { result });
        }
        Ok(())
    }

    /// Runs one case against a fresh fork of the suite state.
    pub(crate) fn run_case(
        &self,
        program: &Program,
        suite_state: &ExecutionState,
        case: &TestCase,
    ) -> TestResult {
        let mut state = suite_state.fork();
        state.restart_timer();
        let cheat = Arc::new(Mutex::new(CheatcodeState::default()));

        if let Some(setup_fn) = &case.setup_fn {
            match invoke(program, &mut state, &cheat, setup_fn, Phase::CaseSetup, &[]) {
                Ok(CallOutcome::Continue(_)) => {}
                Ok(CallOutcome::Skipped(reason)) => {
                    return TestResult::Skipped {
                        common: result_common(case, &state),
                        reason,
                    };
                }
                Err(failure) => return failure_result(result_common(case, &state), failure, None),
            }
        }

        let declarations = cheat
            .lock()
            .expect("cheatcode state lock poisoned")
            .take_fuzz_declarations();

        let Some(function) = program.function(case.name.as_str()) else {
            return TestResult::Broken {
                common: result_common(case, &state),
                error: BreakingError::new(format!(
                    "function `{}` is declared but missing from the compiled program",
                    case.name
                )),
                fuzz: None,
            };
        };

        if function.params.is_empty() {
            match invoke(program, &mut state, &cheat, case.name.as_str(), Phase::Test, &[]) {
                Ok(CallOutcome::Continue(_)) => TestResult::Passed {
                    common: result_common(case, &state),
                    fuzz: None,
                },
                Ok(CallOutcome::Skipped(reason)) => TestResult::Skipped {
                    common: result_common(case, &state),
                    reason,
                },
                Err(failure) => failure_result(result_common(case, &state), failure, None),
            }
        } else {
            self.run_fuzz_case(program, &state, case, function, declarations)
        }
    }

    /// Runs a parameterized case through the property search. Every
    /// iteration forks the post-setup case state, so mutations from one fuzz
    /// run never affect another.
    fn run_fuzz_case(
        &self,
        program: &Program,
        case_state: &ExecutionState,
        case: &TestCase,
        function: &FunctionDecl,
        declarations: crate::cheatcodes::FuzzDeclarations,
    ) -> TestResult {
        let seed = case_rng_seed(self.config.seed, case.name.as_str());
        debug!(case = %case.name, params = function.params.len(), "entering fuzz execution");

        // Keep the last run's recorder so a failing input's output survives
        // into the result.
        let last_recorder: RefCell<Option<OutputRecorder>> = RefCell::new(None);

        let search = run_fuzz_search(
            &function.params,
            &declarations,
            &self.config.fuzz,
            seed,
            |args: &[VmValue]| {
                let mut run_state = case_state.fork();
                let run_cheat = Arc::new(Mutex::new(CheatcodeState::default()));
                let outcome = invoke(
                    program,
                    &mut run_state,
                    &run_cheat,
                    case.name.as_str(),
                    Phase::Test,
                    args,
                );
                *last_recorder.borrow_mut() = Some(run_state.recorder().clone());
                match outcome {
                    Ok(CallOutcome::Continue(output)) => Ok(output.resources),
                    Ok(CallOutcome::Skipped(_)) => Ok(VmResourceUsage::default()),
                    Err(failure) => Err(failure),
                }
            },
        );

        let captured_output = last_recorder
            .into_inner()
            .unwrap_or_else(|| case_state.recorder().clone());
        let common = TestResultCommon {
            id: case.id(),
            execution_time: case_state.elapsed(),
            captured_output,
        };

        match search {
            FuzzSearchResult::Passed { runs, observations } => TestResult::Passed {
                common,
                fuzz: Some(FuzzStats {
                    runs,
                    resources: ResourceUsageSummary::from_observations(&observations),
                }),
            },
            FuzzSearchResult::Failed { runs, error } => TestResult::Failed {
                common,
                error,
                fuzz: Some(FuzzStats {
                    runs,
                    resources: None,
                }),
            },
            FuzzSearchResult::Broken { runs, error } => TestResult::Broken {
                common,
                error,
                fuzz: Some(FuzzStats {
                    runs,
                    resources: None,
                }),
            },
            FuzzSearchResult::Config(error) => TestResult::Failed {
                common,
                error: ReportedError::FuzzConfig(error),
                fuzz: Some(FuzzStats {
                    runs: 0,
                    resources: None,
                }),
            },
        }
    }

    fn flag_failure(&self, cancelled: &AtomicBool, any_failed: &AtomicBool) {
        any_failed.store(true, Ordering::Release);
        if self.exit_first {
            cancelled.store(true, Ordering::Release);
        }
    }
}

/// Runs one function in the VM with phase-appropriate capabilities and
/// resolves the deferred-assertion protocol around it.
///
/// The transient cheatcode state (revert expectation, finish-hooks, skip,
/// printed output) is taken unconditionally after the call, success or
/// failure, so nothing leaks into the next run of a forked state.
pub(crate) fn invoke(
    program: &Program,
    state: &mut ExecutionState,
    cheat: &Arc<Mutex<CheatcodeState>>,
    function: &str,
    phase: Phase,
    args: &[VmValue],
) -> Result<CallOutcome, ExecutionFailure> {
    let capabilities = capability_set_for(phase, cheat);
    debug!(function, %phase, "invoking function in VM");

    let engine = Arc::clone(state.engine());
    let result = engine.run(
        program,
        &mut state.vm_handle,
        function,
        &capabilities,
        &mut state.context,
        args,
    );

    let transient = cheat
        .lock()
        .expect("cheatcode state lock poisoned")
        .take_transient();
    state.recorder.append(section_for(phase), &transient.printed);

    match result {
        Ok(output) => {
            if let Some(skip) = transient.skip {
                return Ok(CallOutcome::Skipped(skip.reason));
            }
            if let RevertExpectationState::Expecting(expected) = transient.revert {
                return Err(ExecutionFailure::Domain(
                    ReportedError::ExpectedRevertNotRaised { expected },
                ));
            }
            run_finish_hooks(transient.hooks, &output).map_err(ExecutionFailure::Domain)?;
            Ok(CallOutcome::Continue(output))
        }
        Err(VmError::Revert(actual)) => match transient.revert {
            RevertExpectationState::Expecting(expected) => {
                if expected.matches(&actual) {
                    Ok(CallOutcome::Continue(VmCallOutput::default()))
                } else {
                    Err(ExecutionFailure::Domain(ReportedError::RevertMismatch {
                        expected,
                        actual,
                    }))
                }
            }
            RevertExpectationState::NoExpectation => Err(ExecutionFailure::Domain(
                ReportedError::UnexpectedRevert(actual),
            )),
        },
        Err(error) => Err(ExecutionFailure::classify(error)),
    }
}

fn section_for(phase: Phase) -> OutputSection {
    match phase {
        Phase::SuiteSetup => OutputSection::SuiteSetup,
        Phase::CaseSetup => OutputSection::CaseSetup,
        Phase::Test => OutputSection::Test,
    }
}

fn result_common(case: &TestCase, state: &ExecutionState) -> TestResultCommon {
    TestResultCommon {
        id: case.id(),
        execution_time: state.elapsed(),
        captured_output: state.recorder().clone(),
    }
}

fn failure_result(
    common: TestResultCommon,
    failure: ExecutionFailure,
    fuzz: Option<FuzzStats>,
) -> TestResult {
    match failure {
        ExecutionFailure::Domain(error) => TestResult::Failed {
            common,
            error,
            fuzz,
        },
        ExecutionFailure::Infra(error) => TestResult::Broken {
            common,
            error,
            fuzz,
        },
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked with a non-string payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        errors::RevertError,
        test_helpers::{MockEngine, MockFunction, MockOutcome, MockStep, simple_event},
        vm::{ParamDecl, VmType},
    };
    use alloy_primitives::U256;
    use camino::Utf8Path;
    use tokio::sync::mpsc::unbounded_channel;

    const SUITE: &str = "tests/a_test.cairo";

    fn felt(value: u64) -> VmValue {
        VmValue::Felt(U256::from(value))
    }

    fn s(value: &str) -> VmValue {
        VmValue::Str(value.to_owned())
    }

    fn case(name: &str, setup_fn: Option<&str>) -> TestCase {
        TestCase {
            suite_path: SUITE.into(),
            name: name.into(),
            setup_fn: setup_fn.map(str::to_owned),
            code_offset: None,
        }
    }

    struct Fixture {
        runner: SuiteRunner,
        program: Program,
        suite_state: ExecutionState,
    }

    fn fixture(engine: MockEngine) -> Fixture {
        fixture_with(engine, |config| config)
    }

    fn fixture_with(
        engine: MockEngine,
        tweak: impl FnOnce(RunConfig) -> RunConfig,
    ) -> Fixture {
        let engine: Arc<dyn ExecutionEngine> = Arc::new(engine);
        let config = tweak(RunConfig::new("/proj").with_seed(7));
        let program = engine
            .compile(Utf8Path::new(SUITE))
            .expect("mock suite compiles");
        let suite_state = ExecutionState::from_config(Arc::clone(&engine), config.clone());
        Fixture {
            runner: SuiteRunner::new(engine, config, false),
            program,
            suite_state,
        }
    }

    fn run_one(fixture: &Fixture, case: &TestCase) -> TestResult {
        fixture
            .runner
            .run_case(&fixture.program, &fixture.suite_state, case)
    }

    #[test]
    fn clean_return_passes() {
        let mut engine = MockEngine::new();
        engine.add_function(SUITE, "test_ok", MockFunction::passing());
        let fixture = fixture(engine);

        let result = run_one(&fixture, &case("test_ok", None));
        assert!(matches!(result, TestResult::Passed { fuzz: None, .. }));
    }

    #[test]
    fn matched_revert_passes() {
        let mut engine = MockEngine::new();
        engine.add_function(
            SUITE,
            "test_reverts",
            MockFunction::with_outcome(MockOutcome::Revert(RevertError {
                error_type: Some("TRANSACTION_FAILED".to_owned()),
                messages: vec!["Assert FAILED in transfer".to_owned()],
            }))
            .with_script(vec![MockStep::cheatcode(
                "expect_revert",
                vec![s("TRANSACTION_FAILED"), s("assert failed")],
            )]),
        );
        let fixture = fixture(engine);

        let result = run_one(&fixture, &case("test_reverts", None));
        assert!(matches!(result, TestResult::Passed { .. }), "got {result:?}");
    }

    #[test]
    fn mismatched_revert_fails() {
        let mut engine = MockEngine::new();
        engine.add_function(
            SUITE,
            "test_reverts",
            MockFunction::with_outcome(MockOutcome::Revert(RevertError {
                error_type: Some("ENTRY_POINT_NOT_FOUND".to_owned()),
                messages: vec![],
            }))
            .with_script(vec![MockStep::cheatcode(
                "expect_revert",
                vec![s("TRANSACTION_FAILED")],
            )]),
        );
        let fixture = fixture(engine);

        let result = run_one(&fixture, &case("test_reverts", None));
        match result {
            TestResult::Failed { error, .. } => {
                assert!(matches!(error, ReportedError::RevertMismatch { .. }));
            }
            other => panic!("expected a failure, got {other:?}"),
        }
    }

    #[test]
    fn unfulfilled_revert_expectation_fails() {
        let mut engine = MockEngine::new();
        engine.add_function(
            SUITE,
            "test_no_revert",
            MockFunction::passing().with_script(vec![MockStep::cheatcode(
                "expect_revert",
                vec![s("TRANSACTION_FAILED")],
            )]),
        );
        let fixture = fixture(engine);

        let result = run_one(&fixture, &case("test_no_revert", None));
        match result {
            TestResult::Failed { error, .. } => {
                assert!(matches!(error, ReportedError::ExpectedRevertNotRaised { .. }));
            }
            other => panic!("expected a failure, got {other:?}"),
        }
    }

    #[test]
    fn unexpected_revert_fails() {
        let mut engine = MockEngine::new();
        engine.add_function(
            SUITE,
            "test_reverts",
            MockFunction::with_outcome(MockOutcome::Revert(RevertError::default())),
        );
        let fixture = fixture(engine);

        let result = run_one(&fixture, &case("test_reverts", None));
        match result {
            TestResult::Failed { error, .. } => {
                assert!(matches!(error, ReportedError::UnexpectedRevert(_)));
            }
            other => panic!("expected a failure, got {other:?}"),
        }
    }

    #[test]
    fn engine_fault_breaks_the_case() {
        let mut engine = MockEngine::new();
        engine.add_function(
            SUITE,
            "test_faults",
            MockFunction::with_outcome(MockOutcome::Internal("segment overflow".to_owned())),
        );
        let fixture = fixture(engine);

        let result = run_one(&fixture, &case("test_faults", None));
        assert!(matches!(result, TestResult::Broken { .. }));
    }

    #[test]
    fn expected_events_resolve_through_finish_hooks() {
        let expected_arg = VmValue::List(vec![s("Transfer")]);

        let mut passing_output = VmCallOutput::default();
        passing_output.events.push(simple_event("Transfer"));
        let mut engine = MockEngine::new();
        engine.add_function(
            SUITE,
            "test_emits",
            MockFunction::with_outcome(MockOutcome::Pass(passing_output))
                .with_script(vec![MockStep::cheatcode(
                    "expect_events",
                    vec![expected_arg.clone()],
                )]),
        );
        engine.add_function(
            SUITE,
            "test_silent",
            MockFunction::passing().with_script(vec![MockStep::cheatcode(
                "expect_events",
                vec![expected_arg],
            )]),
        );
        let fixture = fixture(engine);

        let emitted = run_one(&fixture, &case("test_emits", None));
        assert!(matches!(emitted, TestResult::Passed { .. }), "got {emitted:?}");

        let silent = run_one(&fixture, &case("test_silent", None));
        match silent {
            TestResult::Failed { error, .. } => {
                assert!(matches!(error, ReportedError::MissingEvents(_)));
            }
            other => panic!("expected a failure, got {other:?}"),
        }
    }

    #[test]
    fn expected_call_is_checked_against_the_recorded_log() {
        let address = VmValue::Address(U256::from(0x200u64));
        let mut engine = MockEngine::new();
        engine.add_function(
            SUITE,
            "test_calls",
            MockFunction::passing().with_script(vec![
                MockStep::cheatcode(
                    "invoke",
                    vec![address.clone(), s("transfer"), VmValue::List(vec![felt(1)])],
                ),
                MockStep::cheatcode(
                    "expect_call",
                    vec![address.clone(), s("transfer"), VmValue::List(vec![felt(1)])],
                ),
            ]),
        );
        engine.add_function(
            SUITE,
            "test_never_calls",
            MockFunction::passing().with_script(vec![MockStep::cheatcode(
                "expect_call",
                vec![address, s("transfer"), VmValue::List(vec![felt(1)])],
            )]),
        );
        let fixture = fixture(engine);

        let called = run_one(&fixture, &case("test_calls", None));
        assert!(matches!(called, TestResult::Passed { .. }), "got {called:?}");

        let missing = run_one(&fixture, &case("test_never_calls", None));
        match missing {
            TestResult::Failed { error, .. } => {
                assert!(matches!(error, ReportedError::MissingCall { .. }));
            }
            other => panic!("expected a failure, got {other:?}"),
        }
    }

    #[test]
    fn skip_in_case_setup_skips_the_case() {
        let mut engine = MockEngine::new();
        engine.add_function(
            SUITE,
            "setup_test_wip",
            MockFunction::passing()
                .with_script(vec![MockStep::cheatcode("skip", vec![s("not ready")])]),
        );
        engine.add_function(SUITE, "test_wip", MockFunction::passing());
        let fixture = fixture(engine);

        let result = run_one(&fixture, &case("test_wip", Some("setup_test_wip")));
        match result {
            TestResult::Skipped { reason, .. } => {
                assert_eq!(reason.as_deref(), Some("not ready"));
            }
            other => panic!("expected a skip, got {other:?}"),
        }
    }

    #[test]
    fn printed_output_lands_in_the_right_sections() {
        let mut engine = MockEngine::new();
        engine.add_function(
            SUITE,
            "setup_test_loud",
            MockFunction::passing()
                .with_script(vec![MockStep::cheatcode("print", vec![s("from setup")])]),
        );
        engine.add_function(
            SUITE,
            "test_loud",
            MockFunction::passing()
                .with_script(vec![MockStep::cheatcode("print", vec![s("from test")])]),
        );
        let fixture = fixture(engine);

        let result = run_one(&fixture, &case("test_loud", Some("setup_test_loud")));
        let output = &result.common().captured_output;
        assert_eq!(
            output.section(OutputSection::CaseSetup),
            Some("\"from setup\"\n")
        );
        assert_eq!(output.section(OutputSection::Test), Some("\"from test\"\n"));
    }

    #[test]
    fn context_flows_from_setup_into_the_test() {
        let mut engine = MockEngine::new();
        engine.add_function(
            SUITE,
            "setup_test_ctx",
            MockFunction::passing().with_script(vec![MockStep::cheatcode(
                "context_set",
                vec![s("token"), felt(5)],
            )]),
        );
        engine.add_function(
            SUITE,
            "test_ctx",
            MockFunction::passing()
                .with_script(vec![MockStep::cheatcode("context_get", vec![s("token")])]),
        );
        let fixture = fixture(engine);

        let result = run_one(&fixture, &case("test_ctx", Some("setup_test_ctx")));
        assert!(matches!(result, TestResult::Passed { .. }), "got {result:?}");
    }

    #[test]
    fn fuzzed_case_aggregates_resource_statistics() {
        let mut engine = MockEngine::new();
        engine.add_function(
            SUITE,
            "test_fuzzed",
            MockFunction::passing()
                .with_params(vec![ParamDecl {
                    name: "x".to_owned(),
                    ty: VmType::Felt,
                }])
                .with_args_fn(|_args| {
                    let mut output = VmCallOutput::default();
                    output.resources.steps = 20;
                    Ok(output)
                }),
        );
        let fixture = fixture_with(engine, |mut config| {
            config.fuzz.runs = 10;
            config
        });

        let result = run_one(&fixture, &case("test_fuzzed", None));
        match result {
            TestResult::Passed { fuzz: Some(stats), .. } => {
                assert_eq!(stats.runs, 10);
                let resources = stats.resources.expect("observations were recorded");
                assert_eq!(resources.steps.min, 20);
                assert_eq!(resources.steps.max, 20);
                assert_eq!(resources.steps.median, 20.0);
            }
            other => panic!("expected a passing fuzz result, got {other:?}"),
        }
    }

    #[test]
    fn fuzzed_failure_carries_bindings() {
        let mut engine = MockEngine::new();
        engine.add_function(
            SUITE,
            "test_fuzzed",
            MockFunction::passing()
                .with_params(vec![ParamDecl {
                    name: "x".to_owned(),
                    ty: VmType::Felt,
                }])
                .with_args_fn(|_args| Err(VmError::Revert(RevertError::default()))),
        );
        let fixture = fixture_with(engine, |mut config| {
            config.fuzz.runs = 4;
            config
        });

        let result = run_one(&fixture, &case("test_fuzzed", None));
        match result {
            TestResult::Failed { error, fuzz, .. } => {
                match error {
                    ReportedError::FuzzFailure { bindings, .. } => {
                        assert_eq!(bindings.entries.len(), 1);
                        assert_eq!(bindings.entries[0].0, "x");
                    }
                    other => panic!("expected a fuzz failure, got {other}"),
                }
                assert!(fuzz.is_some());
            }
            other => panic!("expected a failure, got {other:?}"),
        }
    }

    #[test]
    fn unsupported_fuzz_param_fails_with_a_config_error() {
        let mut engine = MockEngine::new();
        engine.add_function(
            SUITE,
            "test_fuzzed",
            MockFunction::passing().with_params(vec![ParamDecl {
                name: "segment".to_owned(),
                ty: VmType::Pointer,
            }]),
        );
        let fixture = fixture(engine);

        let result = run_one(&fixture, &case("test_fuzzed", None));
        match result {
            TestResult::Failed { error, .. } => {
                assert!(matches!(error, ReportedError::FuzzConfig(_)));
            }
            other => panic!("expected a failure, got {other:?}"),
        }
    }

    fn suite_with(cases: &[&str], setup: Option<&str>) -> TestSuite {
        TestSuite {
            suite_path: SUITE.into(),
            suite_setup_fn: setup.map(str::to_owned),
            cases: cases.iter().map(|name| case(name, None)).collect(),
        }
    }

    fn drain(
        mut rx: tokio::sync::mpsc::UnboundedReceiver<ExecutorEvent>,
    ) -> Vec<ExecutorEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn suite_setup_skip_skips_every_case() {
        let mut engine = MockEngine::new();
        engine.add_function(
            SUITE,
            "__setup__",
            MockFunction::passing()
                .with_script(vec![MockStep::cheatcode("skip", vec![s("fixture offline")])]),
        );
        engine.declare_functions(SUITE, &["test_a", "test_b"]);
        let fixture = fixture(engine);

        let (tx, rx) = unbounded_channel();
        let cancelled = AtomicBool::new(false);
        let any_failed = AtomicBool::new(false);
        fixture.runner.run_suite(
            &suite_with(&["test_a", "test_b"], Some("__setup__")),
            &cancelled,
            &any_failed,
            &tx,
        );
        drop(tx);

        let skipped: Vec<_> = drain(rx)
            .into_iter()
            .filter_map(|event| match event {
                ExecutorEvent::CaseFinished {
                    result: TestResult::Skipped { common, reason },
                } => Some((common.id.case_name.to_string(), reason)),
                _ => None,
            })
            .collect();
        assert_eq!(skipped.len(), 2);
        assert!(
            skipped
                .iter()
                .all(|(_, reason)| reason.as_deref() == Some("fixture offline"))
        );
        assert!(!any_failed.load(Ordering::Acquire));
    }

    #[test]
    fn broken_suite_setup_reports_all_member_cases() {
        let mut engine = MockEngine::new();
        engine.add_function(
            SUITE,
            "__setup__",
            MockFunction::with_outcome(MockOutcome::Internal("state init failed".to_owned())),
        );
        engine.declare_functions(SUITE, &["test_a", "test_b"]);
        let fixture = fixture(engine);

        let (tx, rx) = unbounded_channel();
        let cancelled = AtomicBool::new(false);
        let any_failed = AtomicBool::new(false);
        fixture.runner.run_suite(
            &suite_with(&["test_a", "test_b"], Some("__setup__")),
            &cancelled,
            &any_failed,
            &tx,
        );
        drop(tx);

        let events = drain(rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            ExecutorEvent::SuiteBroken { broken } => {
                assert_eq!(broken.case_slots(), 2);
                assert!(matches!(broken.failure, SuiteFailure::Infra(_)));
            }
            other => panic!("expected a broken suite, got {other:?}"),
        }
        assert!(any_failed.load(Ordering::Acquire));
    }

    #[test]
    fn worker_panic_is_caught_as_an_unexpected_breakage() {
        let mut engine = MockEngine::new();
        engine.add_function(
            SUITE,
            "test_panics",
            MockFunction::with_outcome(MockOutcome::Panic("mock exploded".to_owned())),
        );
        let fixture = fixture(engine);

        let (tx, rx) = unbounded_channel();
        let cancelled = AtomicBool::new(false);
        let any_failed = AtomicBool::new(false);
        fixture.runner.run_suite(
            &suite_with(&["test_panics"], None),
            &cancelled,
            &any_failed,
            &tx,
        );
        drop(tx);

        let events = drain(rx);
        let broken = events
            .iter()
            .find_map(|event| match event {
                ExecutorEvent::SuiteBroken { broken } => Some(broken),
                _ => None,
            })
            .expect("the panic is reported as a broken suite");
        match &broken.failure {
            SuiteFailure::Unexpected { message, trace } => {
                assert!(message.contains("mock exploded"));
                assert!(!trace.is_empty());
            }
            other => panic!("expected an unexpected breakage, got {other:?}"),
        }
    }

    #[test]
    fn exit_first_stops_after_the_first_failure() {
        let mut engine = MockEngine::new();
        engine.add_function(SUITE, "test_ok", MockFunction::passing());
        engine.add_function(
            SUITE,
            "test_fail",
            MockFunction::with_outcome(MockOutcome::Revert(RevertError::default())),
        );
        engine.add_function(SUITE, "test_late", MockFunction::passing());
        let engine: Arc<dyn ExecutionEngine> = Arc::new(engine);
        let config = RunConfig::new("/proj").with_seed(7);
        let runner = SuiteRunner::new(Arc::clone(&engine), config, true);

        let (tx, rx) = unbounded_channel();
        let cancelled = AtomicBool::new(false);
        let any_failed = AtomicBool::new(false);
        runner.run_suite(
            &suite_with(&["test_ok", "test_fail", "test_late"], None),
            &cancelled,
            &any_failed,
            &tx,
        );
        drop(tx);

        let finished: Vec<String> = drain(rx)
            .into_iter()
            .filter_map(|event| match event {
                ExecutorEvent::CaseFinished { result } => {
                    Some(result.id().case_name.to_string())
                }
                _ => None,
            })
            .collect();
        assert_eq!(finished, vec!["test_ok", "test_fail"]);
        assert!(cancelled.load(Ordering::Acquire));
        assert!(any_failed.load(Ordering::Acquire));
    }
}
