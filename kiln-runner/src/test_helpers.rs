// Copyright (c) The kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared test fixtures: a scriptable mock execution engine.

use crate::{
    cheatcodes::CapabilitySet,
    config::RunConfig,
    errors::{CompileError, RevertError, VmError},
    state::UserContext,
    vm::{
        EmittedEvent, ExecutionEngine, FunctionDecl, HintContext, ParamDecl, PreparedContract,
        Program, RecordedCall, VmCallOutput, VmStateHandle, VmStateController, VmValue,
    },
};
use alloy_primitives::U256;
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::{collections::BTreeMap, mem, sync::Arc};

/// Simulated VM state for the mock engine.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct MockVmState {
    pub(crate) block_timestamp: u64,
    pub(crate) block_number: u64,
    pub(crate) deployed: Vec<VmValue>,
}

/// Borrows the mock state out of an opaque handle.
pub(crate) fn mock_state_mut(handle: &mut VmStateHandle) -> &mut MockVmState {
    handle
        .downcast_mut::<MockVmState>()
        .expect("handle holds a MockVmState")
}

/// A controller over mock VM state that records every contract call.
#[derive(Debug, Default)]
pub(crate) struct RecordingController {
    pub(crate) state: MockVmState,
    pub(crate) calls: Vec<RecordedCall>,
}

impl VmStateController for RecordingController {
    fn warp(&mut self, timestamp: u64) {
        self.state.block_timestamp = timestamp;
    }

    fn roll(&mut self, block_number: u64) {
        self.state.block_number = block_number;
    }

    fn declare(&mut self, _contract: &str) -> Result<VmValue, VmError> {
        Ok(VmValue::Felt(U256::from(1u8)))
    }

    fn prepare(
        &mut self,
        class: &VmValue,
        calldata: &[VmValue],
    ) -> Result<PreparedContract, VmError> {
        Ok(PreparedContract {
            class: class.clone(),
            address: VmValue::Address(U256::from(0x100u64 + self.state.deployed.len() as u64)),
            calldata: calldata.to_vec(),
        })
    }

    fn deploy(&mut self, prepared: &PreparedContract) -> Result<VmValue, VmError> {
        self.state.deployed.push(prepared.address.clone());
        Ok(prepared.address.clone())
    }

    fn invoke(
        &mut self,
        address: &VmValue,
        selector: &str,
        calldata: &[VmValue],
    ) -> Result<(), VmError> {
        self.calls.push(RecordedCall {
            contract_address: address.clone(),
            selector: selector.to_owned(),
            calldata: calldata.to_vec(),
        });
        Ok(())
    }

    fn call(
        &mut self,
        address: &VmValue,
        selector: &str,
        calldata: &[VmValue],
    ) -> Result<Vec<VmValue>, VmError> {
        self.calls.push(RecordedCall {
            contract_address: address.clone(),
            selector: selector.to_owned(),
            calldata: calldata.to_vec(),
        });
        Ok(vec![])
    }
}

/// One scripted cheatcode invocation the mock performs while "running" a
/// function body.
#[derive(Clone, Debug)]
pub(crate) struct MockStep {
    pub(crate) name: String,
    pub(crate) args: Vec<VmValue>,
}

impl MockStep {
    pub(crate) fn cheatcode(name: &str, args: Vec<VmValue>) -> Self {
        Self {
            name: name.to_owned(),
            args,
        }
    }
}

/// How a mock function resolves after its script ran.
#[derive(Clone, Debug)]
pub(crate) enum MockOutcome {
    Pass(VmCallOutput),
    Revert(RevertError),
    Internal(String),
    Panic(String),
}

type ArgsFn = Arc<dyn Fn(&[VmValue]) -> Result<VmCallOutput, VmError> + Send + Sync>;

/// A function the mock engine knows how to "run".
#[derive(Clone)]
pub(crate) struct MockFunction {
    pub(crate) params: Vec<ParamDecl>,
    pub(crate) script: Vec<MockStep>,
    pub(crate) outcome: MockOutcome,
    pub(crate) args_fn: Option<ArgsFn>,
}

impl MockFunction {
    pub(crate) fn passing() -> Self {
        Self {
            params: vec![],
            script: vec![],
            outcome: MockOutcome::Pass(VmCallOutput::default()),
            args_fn: None,
        }
    }

    pub(crate) fn with_outcome(outcome: MockOutcome) -> Self {
        Self {
            outcome,
            ..Self::passing()
        }
    }

    pub(crate) fn with_params(mut self, params: Vec<ParamDecl>) -> Self {
        self.params = params;
        self
    }

    pub(crate) fn with_script(mut self, script: Vec<MockStep>) -> Self {
        self.script = script;
        self
    }

    pub(crate) fn with_args_fn(
        mut self,
        args_fn: impl Fn(&[VmValue]) -> Result<VmCallOutput, VmError> + Send + Sync + 'static,
    ) -> Self {
        self.args_fn = Some(Arc::new(args_fn));
        self
    }
}

/// A scriptable engine: declared functions per file, each with an optional
/// cheatcode script and a fixed (or argument-driven) outcome.
#[derive(Default)]
pub(crate) struct MockEngine {
    functions: BTreeMap<Utf8PathBuf, IndexMap<String, MockFunction>>,
    broken: BTreeMap<Utf8PathBuf, String>,
}

impl MockEngine {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Declares functions with default passing bodies.
    pub(crate) fn declare_functions(&mut self, path: &str, names: &[&str]) {
        let entry = self.functions.entry(path.into()).or_default();
        for name in names {
            entry.insert((*name).to_owned(), MockFunction::passing());
        }
    }

    /// Declares (or replaces) one function.
    pub(crate) fn add_function(&mut self, path: &str, name: &str, function: MockFunction) {
        self.functions
            .entry(path.into())
            .or_default()
            .insert(name.to_owned(), function);
    }

    /// Marks a file as failing to compile/preprocess.
    pub(crate) fn break_file(&mut self, path: &str, message: &str) {
        self.broken.insert(path.into(), message.to_owned());
    }

    fn compile_error(&self, path: &Utf8Path) -> Option<CompileError> {
        self.broken.get(path).map(|message| CompileError {
            path: path.to_owned(),
            message: message.clone(),
        })
    }
}

impl ExecutionEngine for MockEngine {
    fn compile(&self, source_path: &Utf8Path) -> Result<Program, CompileError> {
        if let Some(error) = self.compile_error(source_path) {
            return Err(error);
        }
        let functions = self.functions.get(source_path).ok_or_else(|| CompileError {
            path: source_path.to_owned(),
            message: "unknown source file".to_owned(),
        })?;
        Ok(Program {
            source_path: source_path.to_owned(),
            functions: functions
                .iter()
                .enumerate()
                .map(|(index, (name, function))| {
                    (
                        name.clone(),
                        FunctionDecl {
                            name: name.clone(),
                            params: function.params.clone(),
                            code_offset: index as u64 * 32,
                        },
                    )
                })
                .collect(),
        })
    }

    fn declared_function_names(
        &self,
        source_path: &Utf8Path,
    ) -> Result<Vec<String>, CompileError> {
        if let Some(error) = self.compile_error(source_path) {
            return Err(error);
        }
        Ok(self
            .functions
            .get(source_path)
            .map(|functions| functions.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn empty_state(&self, _config: &RunConfig) -> VmStateHandle {
        VmStateHandle::new(MockVmState::default())
    }

    fn copy_state(&self, handle: &VmStateHandle) -> VmStateHandle {
        let state = handle
            .downcast_ref::<MockVmState>()
            .expect("handle holds a MockVmState")
            .clone();
        VmStateHandle::new(state)
    }

    fn run(
        &self,
        program: &Program,
        state: &mut VmStateHandle,
        function: &str,
        capabilities: &CapabilitySet,
        context: &mut UserContext,
        args: &[VmValue],
    ) -> Result<VmCallOutput, VmError> {
        let mock_fn = self
            .functions
            .get(&program.source_path)
            .and_then(|functions| functions.get(function))
            .ok_or_else(|| VmError::Internal {
                message: format!("unknown function `{function}`"),
            })?;

        let slot = state
            .downcast_mut::<MockVmState>()
            .expect("handle holds a MockVmState");
        let mut controller = RecordingController {
            state: mem::take(slot),
            calls: Vec::new(),
        };

        let script_result: Result<(), VmError> = (|| {
            let mut cx = HintContext {
                vm: &mut controller,
                user: context,
            };
            for step in &mock_fn.script {
                capabilities
                    .invoke(&step.name, &mut cx, &step.args)
                    .map_err(VmError::from)?;
            }
            Ok(())
        })();

        let recorded_calls = mem::take(&mut controller.calls);
        *slot = controller.state;
        script_result?;

        if let Some(args_fn) = &mock_fn.args_fn {
            let mut output = args_fn(args)?;
            output.calls.extend(recorded_calls);
            return Ok(output);
        }

        match &mock_fn.outcome {
            MockOutcome::Pass(output) => {
                let mut output = output.clone();
                output.calls.extend(recorded_calls);
                Ok(output)
            }
            MockOutcome::Revert(error) => Err(VmError::Revert(error.clone())),
            MockOutcome::Internal(message) => Err(VmError::Internal {
                message: message.clone(),
            }),
            MockOutcome::Panic(message) => panic!("{message}"),
        }
    }
}

/// An emitted event with no payload, for expectation tests.
pub(crate) fn simple_event(name: &str) -> EmittedEvent {
    EmittedEvent {
        name: name.to_owned(),
        data: vec![],
        from_address: VmValue::Address(U256::from(0x42u64)),
    }
}
