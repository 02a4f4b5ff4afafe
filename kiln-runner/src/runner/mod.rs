// Copyright (c) The kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test runner: per-case execution and the concurrent scheduler.

mod dispatcher;
mod executor;
mod imp;

pub use imp::*;

pub(crate) use dispatcher::{DispatcherContext, ExecutorEvent};
pub(crate) use executor::SuiteRunner;
