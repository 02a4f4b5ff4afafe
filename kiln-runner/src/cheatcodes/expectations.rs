// Copyright (c) The kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The deferred-assertion protocol: revert expectations, event expectations,
//! and call expectations.
//!
//! Revert expectations are resolved against the outcome of the VM call
//! itself. Event and call expectations are resolved by finish-hooks, which
//! run in registration order immediately after a call completes cleanly.

use crate::{
    errors::{ReportedError, RevertError},
    vm::{EmittedEvent, RecordedCall, VmCallOutput, VmValue},
};
use std::fmt;

/// A deferred assertion registered by a cheatcode during the test phase.
#[derive(Clone, Debug)]
pub enum Expectation {
    /// The call is expected to revert.
    Revert(RevertExpectation),

    /// The call is expected to emit these events, in order.
    Events(Vec<ExpectedEvent>),

    /// The call is expected to make this contract call.
    Call(ExpectedCall),
}

/// What a registered revert expectation requires of the incoming revert.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RevertExpectation {
    /// Expected error type; `None` accepts any type.
    pub error_type: Option<String>,

    /// Expected messages. Each entry must appear as a case-insensitive
    /// substring of at least one actual message; order does not matter.
    pub messages: Vec<String>,
}

impl RevertExpectation {
    /// Checks the expectation against a received revert.
    pub fn matches(&self, actual: &RevertError) -> bool {
        if let Some(expected_type) = &self.error_type
            && actual.error_type.as_deref() != Some(expected_type.as_str())
        {
            return false;
        }
        self.messages.iter().all(|expected| {
            let expected = expected.to_lowercase();
            actual
                .messages
                .iter()
                .any(|actual| actual.to_lowercase().contains(&expected))
        })
    }
}

impl fmt::Display for RevertExpectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error_type {
            Some(error_type) => write!(f, "{error_type}")?,
            None => write!(f, "(any type)")?,
        }
        if !self.messages.is_empty() {
            write!(f, " [{}]", self.messages.join("; "))?;
        }
        Ok(())
    }
}

/// The revert-expectation state machine.
///
/// `expect_revert` transitions `NoExpectation -> Expecting`; registering a
/// second expectation while one is outstanding is a registration-conflict
/// error, enforced at registration time.
#[derive(Clone, Debug, Default)]
pub enum RevertExpectationState {
    /// No expectation is outstanding; a revert propagates as the failure.
    #[default]
    NoExpectation,

    /// A revert is expected and will be matched when the call resolves.
    Expecting(RevertExpectation),
}

/// An event the test expects the call to emit.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExpectedEvent {
    /// The event's name.
    pub name: String,

    /// Expected payload; `None` accepts any payload.
    pub data: Option<Vec<VmValue>>,

    /// Expected emitting address; `None` accepts any emitter.
    pub from_address: Option<VmValue>,
}

impl ExpectedEvent {
    /// Checks whether an emitted event satisfies this expectation.
    pub fn matches(&self, actual: &EmittedEvent) -> bool {
        if self.name != actual.name {
            return false;
        }
        if let Some(data) = &self.data
            && data != &actual.data
        {
            return false;
        }
        if let Some(from_address) = &self.from_address
            && from_address != &actual.from_address
        {
            return false;
        }
        true
    }
}

impl fmt::Display for ExpectedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(from_address) = &self.from_address {
            write!(f, " from {from_address}")?;
        }
        Ok(())
    }
}

/// A contract call the test expects to observe in the VM's call log.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExpectedCall {
    /// The contract expected to be called.
    pub contract_address: VmValue,

    /// The expected function selector.
    pub selector: String,

    /// The expected calldata.
    pub calldata: Vec<VmValue>,
}

/// Diagnostics from matching expected events against emitted events.
#[derive(Clone, Debug, Default)]
pub struct EventMatchReport {
    /// Expected events that found a match, in order.
    pub matched: Vec<ExpectedEvent>,

    /// Emitted events that were scanned past while searching for a match.
    pub skipped: Vec<EmittedEvent>,

    /// Expected events with no remaining match.
    pub missing: Vec<ExpectedEvent>,
}

impl EventMatchReport {
    /// Returns true if every expected event was matched.
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

impl fmt::Display for EventMatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "expected events were not emitted")?;
        for event in &self.missing {
            writeln!(f, "  missing: {event}")?;
        }
        for event in &self.matched {
            writeln!(f, "  matched: {event}")?;
        }
        for event in &self.skipped {
            writeln!(f, "  skipped: {event}")?;
        }
        Ok(())
    }
}

/// Matches an ordered list of expected events against the VM's ordered list
/// of emitted events.
///
/// The scan is order-preserving: actual events are consumed left to right,
/// and for each expected event (in order) actual events are skipped until one
/// matches. An expected event with no remaining match is reported missing.
pub fn match_events(expected: &[ExpectedEvent], actual: &[EmittedEvent]) -> EventMatchReport {
    let mut report = EventMatchReport::default();
    let mut cursor = actual.iter();

    for expectation in expected {
        let mut found = false;
        for event in cursor.by_ref() {
            if expectation.matches(event) {
                found = true;
                break;
            }
            report.skipped.push(event.clone());
        }
        if found {
            report.matched.push(expectation.clone());
        } else {
            report.missing.push(expectation.clone());
        }
    }

    report
}

/// Checks an expected call against the recorded call log. Absence is a
/// domain failure with the call's identity in the message.
pub fn check_expected_call(expected: &ExpectedCall, calls: &[RecordedCall]) -> Result<(), ReportedError> {
    let found = calls.iter().any(|call| {
        call.contract_address == expected.contract_address
            && call.selector == expected.selector
            && call.calldata == expected.calldata
    });
    if found {
        Ok(())
    } else {
        Err(ReportedError::MissingCall {
            address: expected.contract_address.clone(),
            selector: expected.selector.clone(),
        })
    }
}

/// A deferred assertion callback, run after a VM call completes cleanly.
pub type FinishHook = Box<dyn FnOnce(&VmCallOutput) -> Result<(), ReportedError> + Send>;

/// Runs finish-hooks in registration order. The first failure wins; hooks
/// are consumed either way, so they never leak into a later run.
pub fn run_finish_hooks(
    hooks: Vec<FinishHook>,
    output: &VmCallOutput,
) -> Result<(), ReportedError> {
    for hook in hooks {
        hook(output)?;
    }
    Ok(())
}
