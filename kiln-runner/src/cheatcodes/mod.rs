// Copyright (c) The kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The cheatcode registry.
//!
//! A cheatcode is a named capability injected into the VM's hint namespace.
//! Each execution phase gets its own capability set, assembled by explicit
//! composition: a common base (state mutation and deployment) plus
//! phase-specific additions. Cheatcode-side bookkeeping lives in a
//! [`CheatcodeState`] threaded through the handlers; there is no global
//! mutable hook state anywhere.

mod expectations;

pub use expectations::*;

use crate::{
    errors::{CheatcodeError, ReportedError},
    fuzz::StrategyDescriptor,
    vm::{HintContext, PreparedContract, VmValue},
};
use indexmap::IndexMap;
use std::{
    fmt,
    mem,
    sync::{Arc, Mutex, MutexGuard},
};

/// The execution phase a capability set is built for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    /// Running a suite's `__setup__` function.
    SuiteSetup,

    /// Running a case's `setup_*` function.
    CaseSetup,

    /// Running the test body itself.
    Test,
}

impl Phase {
    /// Returns true for the two setup phases.
    pub fn is_setup(self) -> bool {
        matches!(self, Self::SuiteSetup | Self::CaseSetup)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SuiteSetup => "suite setup",
            Self::CaseSetup => "case setup",
            Self::Test => "test",
        };
        f.write_str(name)
    }
}

/// What a capability does, at the granularity reporting cares about.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CapabilityKind {
    /// Mutates simulated chain state (time, block number).
    StateMutation,

    /// Declares, prepares, deploys, or calls contracts.
    Deployment,

    /// Reads or writes the per-test user context, or prints.
    Io,

    /// Declares fuzzing strategies or examples.
    Fuzzing,

    /// Registers a deferred assertion.
    Assertion,

    /// Controls the flow of the test itself (skip).
    Control,
}

/// The callable injected under a cheatcode's name.
pub type CapabilityHandler =
    Arc<dyn Fn(&mut HintContext<'_>, &[VmValue]) -> Result<Vec<VmValue>, CheatcodeError> + Send + Sync>;

/// A named capability: the unit the registry is composed of.
#[derive(Clone)]
pub struct Cheatcode {
    name: &'static str,
    kind: CapabilityKind,
    handler: CapabilityHandler,
}

impl Cheatcode {
    fn new(name: &'static str, kind: CapabilityKind, handler: CapabilityHandler) -> Self {
        Self {
            name,
            kind,
            handler,
        }
    }

    /// The name this capability is injected under.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The capability's kind.
    pub fn kind(&self) -> CapabilityKind {
        self.kind
    }

    /// Invokes the capability.
    pub fn invoke(
        &self,
        cx: &mut HintContext<'_>,
        args: &[VmValue],
    ) -> Result<Vec<VmValue>, CheatcodeError> {
        (self.handler)(cx, args)
    }
}

impl fmt::Debug for Cheatcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cheatcode")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// The set of capabilities injected into one VM call.
#[derive(Clone, Debug, Default)]
pub struct CapabilitySet {
    capabilities: IndexMap<&'static str, Cheatcode>,
}

impl CapabilitySet {
    fn insert(&mut self, cheatcode: Cheatcode) {
        self.capabilities.insert(cheatcode.name, cheatcode);
    }

    /// Looks up a capability by name.
    pub fn get(&self, name: &str) -> Option<&Cheatcode> {
        self.capabilities.get(name)
    }

    /// Iterates over capability names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.capabilities.keys().copied()
    }

    /// Invokes a capability by name, as the engine does when servicing a
    /// hint. An unknown name is a misuse error.
    pub fn invoke(
        &self,
        name: &str,
        cx: &mut HintContext<'_>,
        args: &[VmValue],
    ) -> Result<Vec<VmValue>, CheatcodeError> {
        match self.get(name) {
            Some(cheatcode) => cheatcode.invoke(cx, args),
            None => Err(CheatcodeError::misuse(
                name,
                "unknown cheatcode in this phase",
            )),
        }
    }
}

/// An explicit skip raised by the `skip` cheatcode.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SkipSignal {
    /// Optional human-readable reason.
    pub reason: Option<String>,
}

/// Fuzzing inputs declared during the setup phases.
#[derive(Clone, Debug, Default)]
pub struct FuzzDeclarations {
    /// Declared strategies, keyed by parameter name.
    pub strategies: IndexMap<String, StrategyDescriptor>,

    /// Explicit example inputs, in declaration order. Each entry binds every
    /// parameter positionally.
    pub examples: Vec<Vec<VmValue>>,
}

/// Cheatcode-side bookkeeping for one test case.
///
/// Shared between the capability handlers of one case's setup and test
/// phases. The expectation and hook parts are transient: they are taken (and
/// thereby cleared) after every VM call, success or failure, so they never
/// leak into the next run of a forked state.
#[derive(Default)]
pub struct CheatcodeState {
    revert: RevertExpectationState,
    finish_hooks: Vec<FinishHook>,
    skip: Option<SkipSignal>,
    printed: String,
    fuzz: FuzzDeclarations,
}

impl CheatcodeState {
    /// Registers a deferred assertion.
    ///
    /// Revert expectations go into the single-slot state machine; at most one
    /// may be outstanding, enforced here at registration time. Event and call
    /// expectations become finish-hooks.
    pub fn register_expectation(&mut self, expectation: Expectation) -> Result<(), CheatcodeError> {
        match expectation {
            Expectation::Revert(expected) => match &self.revert {
                RevertExpectationState::Expecting(_) => Err(CheatcodeError::misuse(
                    "expect_revert",
                    "a revert expectation is already outstanding",
                )),
                RevertExpectationState::NoExpectation => {
                    self.revert = RevertExpectationState::Expecting(expected);
                    Ok(())
                }
            },
            Expectation::Events(events) => {
                self.finish_hooks.push(Box::new(move |output| {
                    let report = match_events(&events, &output.events);
                    if report.is_complete() {
                        Ok(())
                    } else {
                        Err(ReportedError::MissingEvents(report))
                    }
                }));
                Ok(())
            }
            Expectation::Call(call) => {
                self.finish_hooks.push(Box::new(move |output| {
                    check_expected_call(&call, &output.calls)
                }));
                Ok(())
            }
        }
    }

    /// Takes the per-call transient parts, clearing them unconditionally.
    pub(crate) fn take_transient(&mut self) -> TransientAssertions {
        TransientAssertions {
            revert: mem::take(&mut self.revert),
            hooks: mem::take(&mut self.finish_hooks),
            skip: self.skip.take(),
            printed: mem::take(&mut self.printed),
        }
    }

    /// Takes the fuzz declarations collected during setup.
    pub(crate) fn take_fuzz_declarations(&mut self) -> FuzzDeclarations {
        mem::take(&mut self.fuzz)
    }
}

impl fmt::Debug for CheatcodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheatcodeState")
            .field("revert", &self.revert)
            .field("finish_hooks", &self.finish_hooks.len())
            .field("skip", &self.skip)
            .field("fuzz", &self.fuzz)
            .finish_non_exhaustive()
    }
}

/// The per-call transient parts of a [`CheatcodeState`].
pub(crate) struct TransientAssertions {
    pub(crate) revert: RevertExpectationState,
    pub(crate) hooks: Vec<FinishHook>,
    pub(crate) skip: Option<SkipSignal>,
    pub(crate) printed: String,
}

/// Builds the capability set for a phase.
///
/// All phases share the state-mutation and deployment base. The setup phases
/// add `given`, `example`, and `skip`; the test phase adds the deferred
/// assertions. Both setup phases expose the same set.
pub fn capability_set_for(phase: Phase, state: &Arc<Mutex<CheatcodeState>>) -> CapabilitySet {
    let mut set = CapabilitySet::default();
    base_capabilities(&mut set, state);
    if phase.is_setup() {
        setup_capabilities(&mut set, state);
    } else {
        assertion_capabilities(&mut set, state);
    }
    set
}

fn lock_state(state: &Mutex<CheatcodeState>) -> MutexGuard<'_, CheatcodeState> {
    state.lock().expect("cheatcode state lock poisoned")
}

fn base_capabilities(set: &mut CapabilitySet, state: &Arc<Mutex<CheatcodeState>>) {
    set.insert(Cheatcode::new(
        "warp",
        CapabilityKind::StateMutation,
        Arc::new(|cx, args| {
            let timestamp = u64_arg("warp", args, 0)?;
            cx.vm.warp(timestamp);
            Ok(vec![])
        }),
    ));
    set.insert(Cheatcode::new(
        "roll",
        CapabilityKind::StateMutation,
        Arc::new(|cx, args| {
            let block_number = u64_arg("roll", args, 0)?;
            cx.vm.roll(block_number);
            Ok(vec![])
        }),
    ));
    set.insert(Cheatcode::new(
        "declare",
        CapabilityKind::Deployment,
        Arc::new(|cx, args| {
            let contract = str_arg("declare", args, 0)?;
            let class = cx.vm.declare(contract)?;
            Ok(vec![class])
        }),
    ));
    set.insert(Cheatcode::new(
        "prepare",
        CapabilityKind::Deployment,
        Arc::new(|cx, args| {
            let class = arg("prepare", args, 0)?.clone();
            let calldata = list_arg("prepare", args, 1)?.to_vec();
            let prepared = cx.vm.prepare(&class, &calldata)?;
            Ok(vec![
                prepared.class,
                prepared.address,
                VmValue::List(prepared.calldata),
            ])
        }),
    ));
    set.insert(Cheatcode::new(
        "deploy",
        CapabilityKind::Deployment,
        Arc::new(|cx, args| {
            let prepared = PreparedContract {
                class: arg("deploy", args, 0)?.clone(),
                address: arg("deploy", args, 1)?.clone(),
                calldata: list_arg("deploy", args, 2)?.to_vec(),
            };
            let address = cx.vm.deploy(&prepared)?;
            Ok(vec![address])
        }),
    ));
    set.insert(Cheatcode::new(
        "invoke",
        CapabilityKind::Deployment,
        Arc::new(|cx, args| {
            let address = arg("invoke", args, 0)?.clone();
            let selector = str_arg("invoke", args, 1)?.to_owned();
            let calldata = list_arg("invoke", args, 2)?.to_vec();
            cx.vm.invoke(&address, &selector, &calldata)?;
            Ok(vec![])
        }),
    ));
    set.insert(Cheatcode::new(
        "call",
        CapabilityKind::Deployment,
        Arc::new(|cx, args| {
            let address = arg("call", args, 0)?.clone();
            let selector = str_arg("call", args, 1)?.to_owned();
            let calldata = list_arg("call", args, 2)?.to_vec();
            let result = cx.vm.call(&address, &selector, &calldata)?;
            Ok(result)
        }),
    ));

    let print_state = Arc::clone(state);
    set.insert(Cheatcode::new(
        "print",
        CapabilityKind::Io,
        Arc::new(move |_cx, args| {
            let mut guard = lock_state(&print_state);
            for value in args {
                guard.printed.push_str(&value.to_string());
                guard.printed.push('\n');
            }
            Ok(vec![])
        }),
    ));
    set.insert(Cheatcode::new(
        "context_set",
        CapabilityKind::Io,
        Arc::new(|cx, args| {
            let key = str_arg("context_set", args, 0)?.to_owned();
            let value = arg("context_set", args, 1)?.clone();
            cx.user.set(key, value);
            Ok(vec![])
        }),
    ));
    set.insert(Cheatcode::new(
        "context_get",
        CapabilityKind::Io,
        Arc::new(|cx, args| {
            let key = str_arg("context_get", args, 0)?;
            match cx.user.get(key) {
                Some(value) => Ok(vec![value.clone()]),
                None => Err(CheatcodeError::misuse(
                    "context_get",
                    format!("no value stored under key `{key}`"),
                )),
            }
        }),
    ));
}

fn setup_capabilities(set: &mut CapabilitySet, state: &Arc<Mutex<CheatcodeState>>) {
    let given_state = Arc::clone(state);
    set.insert(Cheatcode::new(
        "given",
        CapabilityKind::Fuzzing,
        Arc::new(move |_cx, args| {
            let param = str_arg("given", args, 0)?.to_owned();
            let descriptor = parse_strategy("given", args)?;
            let mut guard = lock_state(&given_state);
            if guard.fuzz.strategies.contains_key(&param) {
                return Err(CheatcodeError::misuse(
                    "given",
                    format!("a strategy is already declared for parameter `{param}`"),
                ));
            }
            guard.fuzz.strategies.insert(param, descriptor);
            Ok(vec![])
        }),
    ));

    let example_state = Arc::clone(state);
    set.insert(Cheatcode::new(
        "example",
        CapabilityKind::Fuzzing,
        Arc::new(move |_cx, args| {
            if args.is_empty() {
                return Err(CheatcodeError::misuse("example", "no values given"));
            }
            lock_state(&example_state).fuzz.examples.push(args.to_vec());
            Ok(vec![])
        }),
    ));

    let skip_state = Arc::clone(state);
    set.insert(Cheatcode::new(
        "skip",
        CapabilityKind::Control,
        Arc::new(move |_cx, args| {
            let reason = match args.first() {
                Some(value) => Some(
                    value
                        .as_str()
                        .ok_or_else(|| {
                            CheatcodeError::misuse("skip", "reason must be a short string")
                        })?
                        .to_owned(),
                ),
                None => None,
            };
            lock_state(&skip_state).skip = Some(SkipSignal { reason });
            Ok(vec![])
        }),
    ));
}

fn assertion_capabilities(set: &mut CapabilitySet, state: &Arc<Mutex<CheatcodeState>>) {
    let revert_state = Arc::clone(state);
    set.insert(Cheatcode::new(
        "expect_revert",
        CapabilityKind::Assertion,
        Arc::new(move |_cx, args| {
            let expectation = parse_revert_expectation(args)?;
            lock_state(&revert_state).register_expectation(Expectation::Revert(expectation))?;
            Ok(vec![])
        }),
    ));

    let events_state = Arc::clone(state);
    set.insert(Cheatcode::new(
        "expect_events",
        CapabilityKind::Assertion,
        Arc::new(move |_cx, args| {
            if args.is_empty() {
                return Err(CheatcodeError::misuse("expect_events", "no events given"));
            }
            let events = args
                .iter()
                .map(parse_expected_event)
                .collect::<Result<Vec<_>, _>>()?;
            lock_state(&events_state).register_expectation(Expectation::Events(events))?;
            Ok(vec![])
        }),
    ));

    let call_state = Arc::clone(state);
    set.insert(Cheatcode::new(
        "expect_call",
        CapabilityKind::Assertion,
        Arc::new(move |_cx, args| {
            let expected = ExpectedCall {
                contract_address: arg("expect_call", args, 0)?.clone(),
                selector: str_arg("expect_call", args, 1)?.to_owned(),
                calldata: list_arg("expect_call", args, 2)?.to_vec(),
            };
            lock_state(&call_state).register_expectation(Expectation::Call(expected))?;
            Ok(vec![])
        }),
    ));
}

/// Parses `expect_revert` arguments: an optional error type (empty string
/// accepts any type) followed by expected messages.
fn parse_revert_expectation(args: &[VmValue]) -> Result<RevertExpectation, CheatcodeError> {
    let mut expectation = RevertExpectation::default();
    if let Some(first) = args.first() {
        let error_type = first.as_str().ok_or_else(|| {
            CheatcodeError::misuse("expect_revert", "error type must be a short string")
        })?;
        if !error_type.is_empty() {
            expectation.error_type = Some(error_type.to_owned());
        }
    }
    for value in args.iter().skip(1) {
        let message = value.as_str().ok_or_else(|| {
            CheatcodeError::misuse("expect_revert", "messages must be short strings")
        })?;
        expectation.messages.push(message.to_owned());
    }
    Ok(expectation)
}

/// Parses one `expect_events` argument: `[name]`, `[name, data]`, or
/// `[name, data, emitter]`, where `data` is a list.
fn parse_expected_event(value: &VmValue) -> Result<ExpectedEvent, CheatcodeError> {
    let VmValue::List(parts) = value else {
        return Err(CheatcodeError::misuse(
            "expect_events",
            "each event must be a list of [name, data?, emitter?]",
        ));
    };
    let name = parts
        .first()
        .and_then(VmValue::as_str)
        .ok_or_else(|| {
            CheatcodeError::misuse("expect_events", "event name must be a short string")
        })?
        .to_owned();
    let data = match parts.get(1) {
        Some(VmValue::List(data)) => Some(data.clone()),
        Some(_) => {
            return Err(CheatcodeError::misuse(
                "expect_events",
                "event data must be a list",
            ));
        }
        None => None,
    };
    let from_address = parts.get(2).cloned();
    Ok(ExpectedEvent {
        name,
        data,
        from_address,
    })
}

/// Parses the strategy part of a `given` call. The wire form covers the
/// inferable families plus bounded integers; richer combinators are composed
/// through [`StrategyDescriptor`] directly.
fn parse_strategy(name: &str, args: &[VmValue]) -> Result<StrategyDescriptor, CheatcodeError> {
    let kind = str_arg(name, args, 1)?;
    match kind {
        "felts" => Ok(StrategyDescriptor::Felts),
        "bools" => Ok(StrategyDescriptor::Bools),
        "addresses" => Ok(StrategyDescriptor::Addresses),
        "integers" => {
            let min = u64_arg(name, args, 2)?;
            let max = u64_arg(name, args, 3)?;
            Ok(StrategyDescriptor::Integers {
                min: i128::from(min),
                max: i128::from(max),
            })
        }
        other => Err(CheatcodeError::misuse(
            name,
            format!("unknown strategy family `{other}`"),
        )),
    }
}

fn arg<'a>(
    name: &str,
    args: &'a [VmValue],
    index: usize,
) -> Result<&'a VmValue, CheatcodeError> {
    args.get(index).ok_or_else(|| {
        CheatcodeError::misuse(name, format!("missing argument at position {index}"))
    })
}

fn str_arg<'a>(name: &str, args: &'a [VmValue], index: usize) -> Result<&'a str, CheatcodeError> {
    arg(name, args, index)?.as_str().ok_or_else(|| {
        CheatcodeError::misuse(
            name,
            format!("argument at position {index} must be a short string"),
        )
    })
}

fn u64_arg(name: &str, args: &[VmValue], index: usize) -> Result<u64, CheatcodeError> {
    arg(name, args, index)?.as_u64().ok_or_else(|| {
        CheatcodeError::misuse(
            name,
            format!("argument at position {index} must be a felt in u64 range"),
        )
    })
}

fn list_arg<'a>(
    name: &str,
    args: &'a [VmValue],
    index: usize,
) -> Result<&'a [VmValue], CheatcodeError> {
    match arg(name, args, index)? {
        VmValue::List(values) => Ok(values),
        _ => Err(CheatcodeError::misuse(
            name,
            format!("argument at position {index} must be a list"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        state::UserContext,
        test_helpers::RecordingController,
        vm::HintContext,
    };
    use alloy_primitives::U256;

    fn shared_state() -> Arc<Mutex<CheatcodeState>> {
        Arc::new(Mutex::new(CheatcodeState::default()))
    }

    fn felt(value: u64) -> VmValue {
        VmValue::Felt(U256::from(value))
    }

    #[test]
    fn phase_sets_contain_the_documented_names() {
        let state = shared_state();
        let base = [
            "warp",
            "roll",
            "declare",
            "prepare",
            "deploy",
            "invoke",
            "call",
            "print",
            "context_set",
            "context_get",
        ];

        for phase in [Phase::SuiteSetup, Phase::CaseSetup] {
            let set = capability_set_for(phase, &state);
            let names: Vec<_> = set.names().collect();
            for name in base {
                assert!(names.contains(&name), "{phase}: missing {name}");
            }
            for name in ["given", "example", "skip"] {
                assert!(names.contains(&name), "{phase}: missing {name}");
            }
            for name in ["expect_revert", "expect_events", "expect_call"] {
                assert!(!names.contains(&name), "{phase}: unexpected {name}");
            }
        }

        let set = capability_set_for(Phase::Test, &state);
        let names: Vec<_> = set.names().collect();
        for name in base {
            assert!(names.contains(&name), "test phase: missing {name}");
        }
        for name in ["expect_revert", "expect_events", "expect_call"] {
            assert!(names.contains(&name), "test phase: missing {name}");
        }
        for name in ["given", "example", "skip"] {
            assert!(!names.contains(&name), "test phase: unexpected {name}");
        }
    }

    #[test]
    fn warp_and_roll_reach_the_controller() {
        let state = shared_state();
        let set = capability_set_for(Phase::Test, &state);
        let mut controller = RecordingController::default();
        let mut user = UserContext::default();
        let mut cx = HintContext {
            vm: &mut controller,
            user: &mut user,
        };

        set.invoke("warp", &mut cx, &[felt(1000)]).unwrap();
        set.invoke("roll", &mut cx, &[felt(7)]).unwrap();

        assert_eq!(controller.state.block_timestamp, 1000);
        assert_eq!(controller.state.block_number, 7);
    }

    #[test]
    fn duplicate_revert_expectation_is_a_registration_conflict() {
        let state = shared_state();
        let set = capability_set_for(Phase::Test, &state);
        let mut controller = RecordingController::default();
        let mut user = UserContext::default();
        let mut cx = HintContext {
            vm: &mut controller,
            user: &mut user,
        };

        set.invoke("expect_revert", &mut cx, &[VmValue::Str("foo".to_owned())])
            .unwrap();
        let error = set
            .invoke("expect_revert", &mut cx, &[VmValue::Str("bar".to_owned())])
            .unwrap_err();
        assert!(matches!(error, CheatcodeError::Misuse { .. }));
    }

    #[test]
    fn given_and_example_populate_fuzz_declarations() {
        let state = shared_state();
        let set = capability_set_for(Phase::CaseSetup, &state);
        let mut controller = RecordingController::default();
        let mut user = UserContext::default();
        let mut cx = HintContext {
            vm: &mut controller,
            user: &mut user,
        };

        set.invoke(
            "given",
            &mut cx,
            &[
                VmValue::Str("x".to_owned()),
                VmValue::Str("integers".to_owned()),
                felt(0),
                felt(100),
            ],
        )
        .unwrap();
        set.invoke("example", &mut cx, &[felt(3)]).unwrap();

        let decls = lock_state(&state).take_fuzz_declarations();
        assert!(matches!(
            decls.strategies.get("x"),
            Some(StrategyDescriptor::Integers { min: 0, max: 100 })
        ));
        assert_eq!(decls.examples, vec![vec![felt(3)]]);
    }

    #[test]
    fn duplicate_given_for_one_param_is_rejected() {
        let state = shared_state();
        let set = capability_set_for(Phase::CaseSetup, &state);
        let mut controller = RecordingController::default();
        let mut user = UserContext::default();
        let mut cx = HintContext {
            vm: &mut controller,
            user: &mut user,
        };

        let args = [VmValue::Str("x".to_owned()), VmValue::Str("felts".to_owned())];
        set.invoke("given", &mut cx, &args).unwrap();
        assert!(set.invoke("given", &mut cx, &args).is_err());
    }

    #[test]
    fn skip_records_the_signal_with_reason() {
        let state = shared_state();
        let set = capability_set_for(Phase::CaseSetup, &state);
        let mut controller = RecordingController::default();
        let mut user = UserContext::default();
        let mut cx = HintContext {
            vm: &mut controller,
            user: &mut user,
        };

        set.invoke("skip", &mut cx, &[VmValue::Str("not on CI".to_owned())])
            .unwrap();
        let transient = lock_state(&state).take_transient();
        assert_eq!(
            transient.skip,
            Some(SkipSignal {
                reason: Some("not on CI".to_owned())
            })
        );
    }

    #[test]
    fn transient_state_clears_on_take() {
        let state = shared_state();
        {
            let mut guard = lock_state(&state);
            guard
                .register_expectation(Expectation::Revert(RevertExpectation::default()))
                .unwrap();
            guard
                .register_expectation(Expectation::Events(vec![ExpectedEvent {
                    name: "A".to_owned(),
                    data: None,
                    from_address: None,
                }]))
                .unwrap();
        }

        let transient = lock_state(&state).take_transient();
        assert!(matches!(
            transient.revert,
            RevertExpectationState::Expecting(_)
        ));
        assert_eq!(transient.hooks.len(), 1);

        let emptied = lock_state(&state).take_transient();
        assert!(matches!(
            emptied.revert,
            RevertExpectationState::NoExpectation
        ));
        assert!(emptied.hooks.is_empty());
    }

    #[test]
    fn context_round_trip_through_cheatcodes() {
        let state = shared_state();
        let set = capability_set_for(Phase::CaseSetup, &state);
        let mut controller = RecordingController::default();
        let mut user = UserContext::default();
        let mut cx = HintContext {
            vm: &mut controller,
            user: &mut user,
        };

        set.invoke(
            "context_set",
            &mut cx,
            &[VmValue::Str("owner".to_owned()), felt(5)],
        )
        .unwrap();
        let values = set
            .invoke("context_get", &mut cx, &[VmValue::Str("owner".to_owned())])
            .unwrap();
        assert_eq!(values, vec![felt(5)]);

        let error = set
            .invoke("context_get", &mut cx, &[VmValue::Str("other".to_owned())])
            .unwrap_err();
        assert!(matches!(error, CheatcodeError::Misuse { .. }));
    }

    #[test]
    fn unknown_cheatcode_is_a_misuse_error() {
        let state = shared_state();
        let set = capability_set_for(Phase::Test, &state);
        let mut controller = RecordingController::default();
        let mut user = UserContext::default();
        let mut cx = HintContext {
            vm: &mut controller,
            user: &mut user,
        };

        let error = set.invoke("does_not_exist", &mut cx, &[]).unwrap_err();
        assert!(matches!(error, CheatcodeError::Misuse { .. }));
    }
}
