// Copyright (c) The kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// VM resource usage observed for a single execution of a test body.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct VmResourceUsage {
    /// Number of VM steps executed.
    pub steps: u64,

    /// Number of memory holes left by the execution.
    pub memory_holes: u64,

    /// Per-builtin application counts.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub builtins: BTreeMap<String, u64>,
}

/// Summary statistics over a set of per-run observations of one resource.
///
/// A fuzz test produces one observation per run, so a scalar would lose
/// information; a single observation degenerates to reporting that one value
/// for all four statistics.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DistributionSummary {
    /// Arithmetic mean of the observations.
    pub mean: f64,

    /// Median of the observations.
    pub median: f64,

    /// Smallest observation.
    pub min: u64,

    /// Largest observation.
    pub max: u64,
}

impl DistributionSummary {
    /// Computes a summary from raw observations. Returns `None` for an empty
    /// slice.
    pub fn from_observations(observations: &[u64]) -> Option<Self> {
        if observations.is_empty() {
            return None;
        }

        let mut sorted = observations.to_vec();
        sorted.sort_unstable();

        let sum: u128 = sorted.iter().map(|&v| u128::from(v)).sum();
        let mean = sum as f64 / sorted.len() as f64;

        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 1 {
            sorted[mid] as f64
        } else {
            (sorted[mid - 1] as f64 + sorted[mid] as f64) / 2.0
        };

        Some(Self {
            mean,
            median,
            min: sorted[0],
            max: *sorted.last().expect("observations is non-empty"),
        })
    }
}

/// Aggregated resource statistics for a (possibly fuzzed) test case.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsageSummary {
    /// Distribution of VM steps over all runs.
    pub steps: DistributionSummary,

    /// Distribution of memory holes over all runs.
    pub memory_holes: DistributionSummary,

    /// Per-builtin distributions. A builtin absent from some runs counts as
    /// zero for those runs.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub builtins: BTreeMap<String, DistributionSummary>,
}

impl ResourceUsageSummary {
    /// Aggregates per-run observations. Returns `None` if no runs were
    /// observed.
    pub fn from_observations(observations: &[VmResourceUsage]) -> Option<Self> {
        if observations.is_empty() {
            return None;
        }

        let steps: Vec<u64> = observations.iter().map(|o| o.steps).collect();
        let memory_holes: Vec<u64> = observations.iter().map(|o| o.memory_holes).collect();

        let mut builtin_names: Vec<&String> = observations
            .iter()
            .flat_map(|o| o.builtins.keys())
            .collect();
        builtin_names.sort();
        builtin_names.dedup();

        let builtins = builtin_names
            .into_iter()
            .map(|name| {
                let values: Vec<u64> = observations
                    .iter()
                    .map(|o| o.builtins.get(name).copied().unwrap_or(0))
                    .collect();
                let summary = DistributionSummary::from_observations(&values)
                    .expect("observations is non-empty");
                (name.clone(), summary)
            })
            .collect();

        Some(Self {
            steps: DistributionSummary::from_observations(&steps)
                .expect("observations is non-empty"),
            memory_holes: DistributionSummary::from_observations(&memory_holes)
                .expect("observations is non-empty"),
            builtins,
        })
    }
}
