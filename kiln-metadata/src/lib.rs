// Copyright (c) The kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Structured, serializable types shared between the kiln test engine and
//! consumers of its machine-readable output.
//!
//! This crate is kept deliberately small: suite/case identity, the on-disk
//! failure-cache format, resource-usage distribution summaries, and exit
//! codes. The orchestration engine itself lives in `kiln-runner`.

mod cache;
mod exit_codes;
mod ids;
mod stats;

pub use self::{cache::*, exit_codes::*, ids::*, stats::*};
