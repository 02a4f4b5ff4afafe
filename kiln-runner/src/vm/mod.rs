// Copyright (c) The kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The contract kiln requires from the execution engine.
//!
//! The engine itself (compiler plus deterministic VM) is an external
//! collaborator. This module pins down exactly what the orchestration core
//! needs from it: compiling a source file into a [`Program`], creating and
//! cheaply copying VM state, listing declared function names, and running a
//! function with a set of injected capabilities.

use crate::{
    cheatcodes::CapabilitySet,
    config::RunConfig,
    errors::{CompileError, VmError},
    state::UserContext,
};
use alloy_primitives::U256;
use camino::{Utf8Path, Utf8PathBuf};
use debug_ignore::DebugIgnore;
use indexmap::IndexMap;
use std::{any::Any, fmt};

pub use kiln_metadata::VmResourceUsage;

/// The field modulus: 2^251 + 17 * 2^192 + 1.
///
/// Field-element values drawn by the fuzzer are reduced into this domain.
pub const FELT_MODULUS: U256 = U256::from_limbs([1, 0, 0, 0x0800_0000_0000_0011]);

/// A value passed across the VM boundary.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum VmValue {
    /// A field element.
    Felt(U256),

    /// A boolean.
    Bool(bool),

    /// A contract address.
    Address(U256),

    /// A relocatable pointer. Opaque to the test engine.
    Pointer(u64),

    /// A short string, as cheatcode arguments encode them.
    Str(String),

    /// An ordered list of values.
    List(Vec<VmValue>),
}

impl VmValue {
    /// Returns the value as a `u64` if it is a felt within range.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Felt(value) => u64::try_from(*value).ok(),
            _ => None,
        }
    }

    /// Returns the value as a string slice if it is a short string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Returns the value's VM type.
    pub fn vm_type(&self) -> VmType {
        match self {
            Self::Felt(_) => VmType::Felt,
            Self::Bool(_) => VmType::Bool,
            Self::Address(_) => VmType::Address,
            Self::Pointer(_) => VmType::Pointer,
            Self::Str(_) => VmType::ShortString,
            Self::List(_) => VmType::List,
        }
    }
}

impl fmt::Display for VmValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Felt(value) => write!(f, "{value}"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Address(value) => write!(f, "{value:#x}"),
            Self::Pointer(segment) => write!(f, "ptr@{segment}"),
            Self::Str(value) => write!(f, "{value:?}"),
            Self::List(values) => {
                f.write_str("[")?;
                for (index, value) in values.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// The type of a VM value, as declared by a function signature.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum VmType {
    /// A field element.
    Felt,

    /// A boolean.
    Bool,

    /// A contract address.
    Address,

    /// A relocatable pointer.
    Pointer,

    /// A short string.
    ShortString,

    /// A list of values.
    List,
}

impl fmt::Display for VmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Felt => "felt",
            Self::Bool => "bool",
            Self::Address => "address",
            Self::Pointer => "pointer",
            Self::ShortString => "short string",
            Self::List => "list",
        };
        f.write_str(name)
    }
}

/// A single declared parameter of a test function.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParamDecl {
    /// The parameter's name.
    pub name: String,

    /// The parameter's type.
    pub ty: VmType,
}

/// A function declared by a compiled program.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FunctionDecl {
    /// The function's name.
    pub name: String,

    /// Declared parameters, in declaration order.
    pub params: Vec<ParamDecl>,

    /// Offset of the function's code inside the compiled program.
    pub code_offset: u64,
}

/// A compiled program, as produced by [`ExecutionEngine::compile`].
#[derive(Clone, Debug)]
pub struct Program {
    /// The source file this program was compiled from, relative to the
    /// project root.
    pub source_path: Utf8PathBuf,

    /// Declared functions, keyed by name, in declaration order.
    pub functions: IndexMap<String, FunctionDecl>,
}

impl Program {
    /// Looks up a declared function by name.
    pub fn function(&self, name: &str) -> Option<&FunctionDecl> {
        self.functions.get(name)
    }
}

/// An opaque handle to simulated VM state.
///
/// The engine decides what lives behind the handle; the core only moves it
/// around and asks the engine to copy it. The concrete state is reachable via
/// downcasting, which keeps the orchestration core independent of any one
/// engine.
pub struct VmStateHandle {
    inner: DebugIgnore<Box<dyn Any + Send>>,
}

impl VmStateHandle {
    /// Wraps an engine-specific state object.
    pub fn new(state: impl Any + Send) -> Self {
        Self {
            inner: DebugIgnore(Box::new(state)),
        }
    }

    /// Borrows the engine-specific state.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.0.downcast_ref()
    }

    /// Mutably borrows the engine-specific state.
    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.inner.0.downcast_mut()
    }
}

impl fmt::Debug for VmStateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VmStateHandle").finish_non_exhaustive()
    }
}

/// An event emitted by contract code during a VM call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EmittedEvent {
    /// The event's name.
    pub name: String,

    /// The event's payload.
    pub data: Vec<VmValue>,

    /// The address of the emitting contract.
    pub from_address: VmValue,
}

impl fmt::Display for EmittedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {}", self.name, self.from_address)
    }
}

/// One entry of the VM's recorded call log.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RecordedCall {
    /// The called contract.
    pub contract_address: VmValue,

    /// The called function's selector.
    pub selector: String,

    /// The call's arguments.
    pub calldata: Vec<VmValue>,
}

/// Everything the VM reports back from one successful call.
#[derive(Clone, Debug, Default)]
pub struct VmCallOutput {
    /// Events emitted during the call, in emission order.
    pub events: Vec<EmittedEvent>,

    /// Contract calls recorded during the call, in call order.
    pub calls: Vec<RecordedCall>,

    /// Resource usage of the call.
    pub resources: VmResourceUsage,
}

/// A contract deployment prepared by the `prepare` cheatcode, ready to be
/// passed to `deploy`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PreparedContract {
    /// The declared class the deployment instantiates.
    pub class: VmValue,

    /// The address the contract will be deployed at.
    pub address: VmValue,

    /// Constructor calldata.
    pub calldata: Vec<VmValue>,
}

/// Scoped access to VM-state mutation, handed to cheatcodes by the engine
/// while a hint is being serviced.
pub trait VmStateController {
    /// Sets the simulated block timestamp.
    fn warp(&mut self, timestamp: u64);

    /// Sets the simulated block number.
    fn roll(&mut self, block_number: u64);

    /// Declares a contract class from a source path, returning its class
    /// handle.
    fn declare(&mut self, contract: &str) -> Result<VmValue, VmError>;

    /// Prepares a deployment of a declared class.
    fn prepare(
        &mut self,
        class: &VmValue,
        calldata: &[VmValue],
    ) -> Result<PreparedContract, VmError>;

    /// Deploys a prepared contract, returning its address.
    fn deploy(&mut self, prepared: &PreparedContract) -> Result<VmValue, VmError>;

    /// Invokes a (state-mutating) external function on a deployed contract.
    fn invoke(
        &mut self,
        address: &VmValue,
        selector: &str,
        calldata: &[VmValue],
    ) -> Result<(), VmError>;

    /// Calls a view function on a deployed contract.
    fn call(
        &mut self,
        address: &VmValue,
        selector: &str,
        calldata: &[VmValue],
    ) -> Result<Vec<VmValue>, VmError>;
}

/// The context the engine hands to a capability while servicing a hint.
pub struct HintContext<'a> {
    /// VM-state mutation operations.
    pub vm: &'a mut dyn VmStateController,

    /// The per-test user context, shared between setup and test phases.
    pub user: &'a mut UserContext,
}

/// The execution engine: compiles source files and runs functions against
/// simulated VM state.
///
/// All paths handed to the engine are relative to the configured workspace
/// root; the engine resolves them itself.
pub trait ExecutionEngine: Send + Sync {
    /// Compiles a source file into a program.
    fn compile(&self, source_path: &Utf8Path) -> Result<Program, CompileError>;

    /// Lists the names of functions declared in a source file, without fully
    /// compiling it.
    fn declared_function_names(&self, source_path: &Utf8Path)
    -> Result<Vec<String>, CompileError>;

    /// Creates an empty VM state.
    fn empty_state(&self, config: &RunConfig) -> VmStateHandle;

    /// Copies a VM state. Expected to be O(1) or copy-on-write; forking
    /// relies on this being cheap.
    fn copy_state(&self, handle: &VmStateHandle) -> VmStateHandle;

    /// Runs a declared function. Capabilities are injected into the VM's
    /// hint namespace for the duration of the call; `context` rides along
    /// so capabilities can read and write the per-test user context.
    fn run(
        &self,
        program: &Program,
        state: &mut VmStateHandle,
        function: &str,
        capabilities: &CapabilitySet,
        context: &mut UserContext,
        args: &[VmValue],
    ) -> Result<VmCallOutput, VmError>;
}
