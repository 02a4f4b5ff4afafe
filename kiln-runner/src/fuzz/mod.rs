// Copyright (c) The kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The fuzzing engine.
//!
//! Applies to test functions with declared parameters. Explicit examples are
//! replayed first and always, regardless of the remaining run budget; the
//! random search then runs on the budget with a deterministic ChaCha RNG, and
//! a failure is shrunk to a minimal input whose parameter bindings travel
//! with the reported error.

mod counter;
mod strategy;

pub use counter::RunsCounter;
pub use strategy::{StrategyDescriptor, ValueMapper, ValuePredicate};

pub(crate) use strategy::param_strategy;

use crate::{
    cheatcodes::FuzzDeclarations,
    config::FuzzConfig,
    errors::{BreakingError, ExecutionFailure, FuzzConfigError, ReportedError},
    vm::{ParamDecl, VmResourceUsage, VmValue},
};
use proptest::{
    strategy::{BoxedStrategy, Just, Strategy},
    test_runner::{
        Config as ProptestConfig, RngAlgorithm, TestCaseError, TestError, TestRng,
        TestRunner as PropertyRunner,
    },
};
use std::{cell::RefCell, fmt};
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

/// The parameter bindings of one fuzz input, in declaration order.
///
/// Displayed as `name = value` lines so a failing input can be reproduced by
/// hand.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FuzzInputBindings {
    /// `(parameter, value)` pairs in declaration order.
    pub entries: Vec<(String, VmValue)>,
}

impl FuzzInputBindings {
    /// Binds drawn values to parameters positionally.
    pub fn bind(params: &[ParamDecl], values: &[VmValue]) -> Self {
        Self {
            entries: params
                .iter()
                .zip(values)
                .map(|(param, value)| (param.name.clone(), value.clone()))
                .collect(),
        }
    }
}

impl fmt::Display for FuzzInputBindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.entries {
            writeln!(f, "{name} = {value}")?;
        }
        Ok(())
    }
}

/// Derives the RNG seed for one test case from the run seed and the case
/// name, so cases are independent but the whole run replays from one seed.
pub(crate) fn case_rng_seed(base_seed: u64, case_name: &str) -> [u8; 32] {
    let case_hash = xxh3_64(case_name.as_bytes());
    let mut seed = [0u8; 32];
    seed[..8].copy_from_slice(&base_seed.to_le_bytes());
    seed[8..16].copy_from_slice(&case_hash.to_le_bytes());
    seed[16..24].copy_from_slice(&base_seed.to_be_bytes());
    seed[24..].copy_from_slice(&case_hash.to_be_bytes());
    seed
}

/// Outcome of one fuzz search over a test body.
#[derive(Debug)]
pub(crate) enum FuzzSearchResult {
    /// Every executed input passed.
    Passed {
        /// Runs executed, examples included.
        runs: u32,
        /// Per-run resource observations.
        observations: Vec<VmResourceUsage>,
    },

    /// A failing input was found (and minimized, for generated inputs).
    Failed {
        /// Runs executed up to and including the failure.
        runs: u32,
        /// The failure, wrapped with its input bindings.
        error: ReportedError,
    },

    /// The engine faulted underneath the search.
    Broken {
        /// Runs executed up to and including the fault.
        runs: u32,
        /// The fault.
        error: BreakingError,
    },

    /// The search could not be configured for this function.
    Config(FuzzConfigError),
}

/// Drives the property search for one test body.
///
/// `execute` runs the test once with the given inputs against a fresh fork;
/// it reports resource usage on success and a classified failure otherwise.
pub(crate) fn run_fuzz_search<F>(
    params: &[ParamDecl],
    declarations: &FuzzDeclarations,
    config: &FuzzConfig,
    seed: [u8; 32],
    mut execute: F,
) -> FuzzSearchResult
where
    F: FnMut(&[VmValue]) -> Result<VmResourceUsage, ExecutionFailure>,
{
    // Declarations for parameters the function does not have are
    // configuration errors, not silently ignored state.
    for declared in declarations.strategies.keys() {
        if !params.iter().any(|param| &param.name == declared) {
            return FuzzSearchResult::Config(FuzzConfigError::UnknownParam {
                param: declared.clone(),
            });
        }
    }

    let mut strategies = Vec::with_capacity(params.len());
    for param in params {
        match param_strategy(param, declarations.strategies.get(&param.name)) {
            Ok(strategy) => strategies.push(strategy),
            Err(error) => return FuzzSearchResult::Config(error),
        }
    }

    let mut counter = RunsCounter::new(config.runs);
    let mut observations = Vec::new();

    // Explicit examples are a correctness floor: they replay verbatim before
    // any random input and regardless of the remaining budget.
    for example in &declarations.examples {
        if example.len() != params.len() {
            return FuzzSearchResult::Config(FuzzConfigError::ExampleArity {
                expected: params.len(),
                got: example.len(),
            });
        }
        counter.advance();
        match execute(example) {
            Ok(resources) => observations.push(resources),
            Err(ExecutionFailure::Domain(source)) => {
                return FuzzSearchResult::Failed {
                    runs: counter.used(),
                    error: ReportedError::FuzzFailure {
                        source: Box::new(source),
                        bindings: FuzzInputBindings::bind(params, example),
                        runs: counter.used(),
                    },
                };
            }
            Err(ExecutionFailure::Infra(error)) => {
                return FuzzSearchResult::Broken {
                    runs: counter.used(),
                    error,
                };
            }
        }
    }

    let remaining = counter.available_runs();
    if remaining == 0 {
        return FuzzSearchResult::Passed {
            runs: counter.used(),
            observations,
        };
    }

    let combined = combine_strategies(strategies);
    let mut runner = PropertyRunner::new_with_rng(
        ProptestConfig {
            cases: remaining,
            max_local_rejects: config.max_local_rejects,
            max_global_rejects: config.max_global_rejects,
            max_shrink_iters: config.max_shrink_iters,
            failure_persistence: None,
            ..ProptestConfig::default()
        },
        TestRng::from_seed(RngAlgorithm::ChaCha, &seed),
    );

    let execute = RefCell::new(&mut execute);
    let counter = RefCell::new(counter);
    let observations = RefCell::new(observations);
    let last_domain: RefCell<Option<ReportedError>> = RefCell::new(None);
    let infra: RefCell<Option<BreakingError>> = RefCell::new(None);

    let search = runner.run(&combined, |values| {
        counter.borrow_mut().advance();
        let mut execute = execute.borrow_mut();
        match (*execute)(&values) {
            Ok(resources) => {
                observations.borrow_mut().push(resources);
                Ok(())
            }
            Err(ExecutionFailure::Domain(error)) => {
                let message = error.to_string();
                *last_domain.borrow_mut() = Some(error);
                Err(TestCaseError::fail(message))
            }
            Err(ExecutionFailure::Infra(error)) => {
                let message = error.to_string();
                *infra.borrow_mut() = Some(error);
                Err(TestCaseError::fail(message))
            }
        }
    });

    let counter = counter.into_inner();
    let observations = observations.into_inner();
    debug!(runs = counter.used(), balance = counter.balance(), "fuzz search finished");

    match search {
        Ok(()) => FuzzSearchResult::Passed {
            runs: counter.used(),
            observations,
        },
        Err(TestError::Fail(_, minimal)) => {
            if let Some(error) = infra.into_inner() {
                return FuzzSearchResult::Broken {
                    runs: counter.used(),
                    error,
                };
            }
            match last_domain.into_inner() {
                Some(source) => FuzzSearchResult::Failed {
                    runs: counter.used(),
                    error: ReportedError::FuzzFailure {
                        source: Box::new(source),
                        bindings: FuzzInputBindings::bind(params, &minimal),
                        runs: counter.used(),
                    },
                },
                None => FuzzSearchResult::Broken {
                    runs: counter.used(),
                    error: BreakingError::new("property search failed without a recorded failure"),
                },
            }
        }
        Err(TestError::Abort(reason)) => {
            FuzzSearchResult::Config(FuzzConfigError::RejectionsExhausted {
                reason: reason.to_string(),
            })
        }
    }
}

/// Folds per-parameter strategies into one strategy over the whole argument
/// vector, preserving declaration order.
fn combine_strategies(strategies: Vec<BoxedStrategy<VmValue>>) -> BoxedStrategy<Vec<VmValue>> {
    strategies
        .into_iter()
        .fold(Just(Vec::<VmValue>::new()).boxed(), |acc, strategy| {
            (acc, strategy)
                .prop_map(|(mut values, value)| {
                    values.push(value);
                    values
                })
                .boxed()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::{FELT_MODULUS, VmType};
    use alloy_primitives::U256;
    use indexmap::IndexMap;
    use std::sync::Arc;

    fn felt_param(name: &str) -> ParamDecl {
        ParamDecl {
            name: name.to_owned(),
            ty: VmType::Felt,
        }
    }

    fn no_declarations() -> FuzzDeclarations {
        FuzzDeclarations::default()
    }

    fn passing(_: &[VmValue]) -> Result<VmResourceUsage, ExecutionFailure> {
        Ok(VmResourceUsage::default())
    }

    #[test]
    fn examples_run_even_with_a_zero_budget() {
        let params = [felt_param("x")];
        let huge = VmValue::Felt(U256::from(1u8) << 251);
        let declarations = FuzzDeclarations {
            strategies: IndexMap::new(),
            examples: vec![vec![huge.clone()]],
        };
        let config = FuzzConfig {
            runs: 0,
            ..FuzzConfig::default()
        };

        let mut seen = Vec::new();
        let result = run_fuzz_search(&params, &declarations, &config, [0; 32], |values| {
            seen.push(values.to_vec());
            passing(values)
        });

        assert!(matches!(result, FuzzSearchResult::Passed { runs: 1, .. }));
        assert_eq!(seen, vec![vec![huge]]);
    }

    #[test]
    fn search_is_deterministic_for_a_fixed_seed() {
        let params = [felt_param("x")];
        let config = FuzzConfig {
            runs: 16,
            ..FuzzConfig::default()
        };
        let seed = case_rng_seed(42, "test_determinism");

        let mut collect = |acc: &mut Vec<Vec<VmValue>>| {
            let declarations = no_declarations();
            let result = run_fuzz_search(&params, &declarations, &config, seed, |values| {
                acc.push(values.to_vec());
                passing(values)
            });
            assert!(matches!(result, FuzzSearchResult::Passed { runs: 16, .. }));
        };

        let mut first = Vec::new();
        let mut second = Vec::new();
        collect(&mut first);
        collect(&mut second);
        assert_eq!(first, second);
    }

    #[test]
    fn drawn_felts_stay_inside_the_field() {
        let params = [felt_param("x")];
        let config = FuzzConfig {
            runs: 64,
            ..FuzzConfig::default()
        };

        let result = run_fuzz_search(
            &params,
            &no_declarations(),
            &config,
            [7; 32],
            |values| {
                match &values[0] {
                    VmValue::Felt(value) => assert!(*value < FELT_MODULUS),
                    other => panic!("expected a felt, got {other}"),
                }
                passing(values)
            },
        );
        assert!(matches!(result, FuzzSearchResult::Passed { .. }));
    }

    #[test]
    fn failure_shrinks_to_the_minimal_input() {
        let params = [felt_param("x")];
        let mut strategies = IndexMap::new();
        strategies.insert(
            "x".to_owned(),
            StrategyDescriptor::Integers { min: 0, max: 1000 },
        );
        let declarations = FuzzDeclarations {
            strategies,
            examples: vec![],
        };
        let config = FuzzConfig {
            runs: 256,
            ..FuzzConfig::default()
        };

        let threshold = U256::from(10u8);
        let result = run_fuzz_search(&params, &declarations, &config, [1; 32], |values| {
            match &values[0] {
                VmValue::Felt(value) if *value >= threshold => {
                    Err(ExecutionFailure::Domain(ReportedError::CheatcodeMisuse {
                        name: "assert".to_owned(),
                        message: "too big".to_owned(),
                    }))
                }
                _ => passing(values),
            }
        });

        match result {
            FuzzSearchResult::Failed { error, .. } => match error {
                ReportedError::FuzzFailure {
                    bindings, source, ..
                } => {
                    assert_eq!(
                        bindings.entries,
                        vec![("x".to_owned(), VmValue::Felt(threshold))]
                    );
                    assert!(matches!(*source, ReportedError::CheatcodeMisuse { .. }));
                }
                other => panic!("expected a fuzz failure, got {other}"),
            },
            other => panic!("expected a failure, got {other:?}"),
        }
    }

    #[test]
    fn failing_example_reports_its_own_bindings() {
        let params = [felt_param("x")];
        let declarations = FuzzDeclarations {
            strategies: IndexMap::new(),
            examples: vec![vec![VmValue::Felt(U256::from(99u8))]],
        };
        let config = FuzzConfig::default();

        let result = run_fuzz_search(&params, &declarations, &config, [0; 32], |_| {
            Err(ExecutionFailure::Domain(ReportedError::CheatcodeMisuse {
                name: "assert".to_owned(),
                message: "always fails".to_owned(),
            }))
        });

        match result {
            FuzzSearchResult::Failed { runs, error } => {
                assert_eq!(runs, 1);
                match error {
                    ReportedError::FuzzFailure { bindings, .. } => {
                        assert_eq!(bindings.to_string(), "x = 99\n");
                    }
                    other => panic!("expected a fuzz failure, got {other}"),
                }
            }
            other => panic!("expected a failure, got {other:?}"),
        }
    }

    #[test]
    fn infra_failure_breaks_instead_of_failing() {
        let params = [felt_param("x")];
        let config = FuzzConfig {
            runs: 8,
            ..FuzzConfig::default()
        };

        let result = run_fuzz_search(&params, &no_declarations(), &config, [3; 32], |_| {
            Err(ExecutionFailure::Infra(BreakingError::new("vm fault")))
        });
        assert!(matches!(result, FuzzSearchResult::Broken { .. }));
    }

    #[test]
    fn exhausted_rejections_surface_as_a_config_error() {
        let params = [felt_param("x")];
        let mut strategies = IndexMap::new();
        strategies.insert(
            "x".to_owned(),
            StrategyDescriptor::Felts.filter("never", Arc::new(|_| false)),
        );
        let declarations = FuzzDeclarations {
            strategies,
            examples: vec![],
        };
        let config = FuzzConfig {
            runs: 8,
            max_global_rejects: 16,
            max_local_rejects: 16,
            ..FuzzConfig::default()
        };

        let result = run_fuzz_search(&params, &declarations, &config, [9; 32], passing);
        assert!(matches!(
            result,
            FuzzSearchResult::Config(FuzzConfigError::RejectionsExhausted { .. })
        ));
    }

    #[test]
    fn unknown_declared_param_is_a_config_error() {
        let params = [felt_param("x")];
        let mut strategies = IndexMap::new();
        strategies.insert("y".to_owned(), StrategyDescriptor::Felts);
        let declarations = FuzzDeclarations {
            strategies,
            examples: vec![],
        };

        let result = run_fuzz_search(
            &params,
            &declarations,
            &FuzzConfig::default(),
            [0; 32],
            passing,
        );
        assert!(matches!(
            result,
            FuzzSearchResult::Config(FuzzConfigError::UnknownParam { .. })
        ));
    }

    #[test]
    fn example_arity_mismatch_is_a_config_error() {
        let params = [felt_param("x"), felt_param("y")];
        let declarations = FuzzDeclarations {
            strategies: IndexMap::new(),
            examples: vec![vec![VmValue::Felt(U256::from(1u8))]],
        };

        let result = run_fuzz_search(
            &params,
            &declarations,
            &FuzzConfig::default(),
            [0; 32],
            passing,
        );
        assert!(matches!(
            result,
            FuzzSearchResult::Config(FuzzConfigError::ExampleArity {
                expected: 2,
                got: 1
            })
        ));
    }

    #[test]
    fn multi_param_inputs_bind_in_declaration_order() {
        let params = [felt_param("a"), felt_param("b")];
        let config = FuzzConfig {
            runs: 4,
            ..FuzzConfig::default()
        };

        let result = run_fuzz_search(&params, &no_declarations(), &config, [5; 32], |values| {
            assert_eq!(values.len(), 2);
            Err(ExecutionFailure::Domain(ReportedError::CheatcodeMisuse {
                name: "assert".to_owned(),
                message: "fail fast".to_owned(),
            }))
        });

        match result {
            FuzzSearchResult::Failed { error, .. } => match error {
                ReportedError::FuzzFailure { bindings, .. } => {
                    let names: Vec<_> =
                        bindings.entries.iter().map(|(name, _)| name.as_str()).collect();
                    assert_eq!(names, vec!["a", "b"]);
                }
                other => panic!("expected a fuzz failure, got {other}"),
            },
            other => panic!("expected a failure, got {other:?}"),
        }
    }
}
