// Copyright (c) The kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Time-keeping for test runs.

mod stopwatch;

pub(crate) use stopwatch::*;
