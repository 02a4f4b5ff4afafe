// Copyright (c) The kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persisted run state: the failure cache.

mod failure_cache;

pub use failure_cache::*;
