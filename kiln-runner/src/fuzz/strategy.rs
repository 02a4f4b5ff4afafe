// Copyright (c) The kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Search strategies for fuzzed test parameters.
//!
//! A [`StrategyDescriptor`] is declarative: it is validated eagerly against
//! the bound parameter's VM type before any value is drawn, so a mistyped
//! strategy is a configuration error with a name in it, never a silently
//! wrong-typed value.

use crate::{
    errors::FuzzConfigError,
    vm::{FELT_MODULUS, ParamDecl, VmType, VmValue},
};
use alloy_primitives::U256;
use proptest::{
    prelude::*,
    strategy::{BoxedStrategy, Union},
};
use std::{fmt, sync::Arc};

/// Maps a drawn value to another value of the same VM type.
pub type ValueMapper = Arc<dyn Fn(VmValue) -> VmValue + Send + Sync>;

/// Decides whether a drawn value is acceptable.
pub type ValuePredicate = Arc<dyn Fn(&VmValue) -> bool + Send + Sync>;

/// A declarative description of a search strategy for one parameter.
#[derive(Clone)]
pub enum StrategyDescriptor {
    /// Uniform field elements in `[0, FELT_MODULUS)`.
    Felts,

    /// Integers in an inclusive range, encoded as field elements (negative
    /// values wrap into the upper half of the field).
    Integers {
        /// Lower bound, inclusive.
        min: i128,
        /// Upper bound, inclusive.
        max: i128,
    },

    /// Booleans.
    Bools,

    /// Contract addresses.
    Addresses,

    /// Draws from one of the given strategies, chosen uniformly.
    OneOf(Vec<StrategyDescriptor>),

    /// Applies a mapping to every drawn value. The mapper must stay within
    /// the bound VM type.
    Mapped {
        /// The strategy being mapped over.
        base: Box<StrategyDescriptor>,
        /// The mapping function.
        mapper: ValueMapper,
    },

    /// Discards drawn values failing a predicate. Rejections are retried by
    /// the search engine within a bounded budget.
    Filtered {
        /// The strategy being filtered.
        base: Box<StrategyDescriptor>,
        /// The predicate a value must satisfy.
        predicate: ValuePredicate,
        /// A label describing the filter, used in rejection diagnostics.
        whence: String,
    },
}

impl StrategyDescriptor {
    /// Wraps this strategy with a mapping function.
    pub fn map(self, mapper: ValueMapper) -> Self {
        Self::Mapped {
            base: Box::new(self),
            mapper,
        }
    }

    /// Wraps this strategy with a filter predicate.
    pub fn filter(self, whence: impl Into<String>, predicate: ValuePredicate) -> Self {
        Self::Filtered {
            base: Box::new(self),
            predicate,
            whence: whence.into(),
        }
    }

    /// Combines strategies into a uniform choice.
    pub fn one_of(options: Vec<StrategyDescriptor>) -> Self {
        Self::OneOf(options)
    }

    /// Infers a strategy from a parameter's VM type. Only a subset of types
    /// supports inference.
    pub fn infer(ty: VmType) -> Option<Self> {
        match ty {
            VmType::Felt => Some(Self::Felts),
            VmType::Bool => Some(Self::Bools),
            VmType::Address => Some(Self::Addresses),
            VmType::Pointer | VmType::ShortString | VmType::List => None,
        }
    }

    /// Validates this strategy against the type of the parameter it is bound
    /// to. Combinators validate their bases recursively.
    pub fn validate(&self, param: &str, ty: VmType) -> Result<(), FuzzConfigError> {
        let invalid = || FuzzConfigError::InvalidStrategy {
            param: param.to_owned(),
            ty,
            strategy: self.describe(),
        };
        match self {
            Self::Felts => (ty == VmType::Felt).then_some(()).ok_or_else(invalid),
            Self::Integers { min, max } => {
                if ty != VmType::Felt || min > max {
                    return Err(invalid());
                }
                Ok(())
            }
            Self::Bools => (ty == VmType::Bool).then_some(()).ok_or_else(invalid),
            Self::Addresses => (ty == VmType::Address).then_some(()).ok_or_else(invalid),
            Self::OneOf(options) => {
                if options.is_empty() {
                    return Err(invalid());
                }
                options.iter().try_for_each(|option| option.validate(param, ty))
            }
            Self::Mapped { base, .. } => base.validate(param, ty),
            Self::Filtered { base, .. } => base.validate(param, ty),
        }
    }

    /// Builds the proptest strategy. Callers must have validated first;
    /// building is infallible afterwards.
    pub(crate) fn build(&self) -> BoxedStrategy<VmValue> {
        match self {
            Self::Felts => any::<[u64; 4]>()
                .prop_map(|limbs| VmValue::Felt(U256::from_limbs(limbs) % FELT_MODULUS))
                .boxed(),
            Self::Integers { min, max } => (*min..=*max)
                .prop_map(|value| VmValue::Felt(felt_from_i128(value)))
                .boxed(),
            Self::Bools => any::<bool>().prop_map(VmValue::Bool).boxed(),
            Self::Addresses => any::<[u64; 4]>()
                .prop_map(|limbs| VmValue::Address(U256::from_limbs(limbs) % FELT_MODULUS))
                .boxed(),
            Self::OneOf(options) => {
                Union::new(options.iter().map(StrategyDescriptor::build)).boxed()
            }
            Self::Mapped { base, mapper } => {
                let mapper = Arc::clone(mapper);
                base.build().prop_map(move |value| mapper(value)).boxed()
            }
            Self::Filtered {
                base,
                predicate,
                whence,
            } => {
                let predicate = Arc::clone(predicate);
                base.build()
                    .prop_filter(whence.clone(), move |value| predicate(value))
                    .boxed()
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Felts => "felts".to_owned(),
            Self::Integers { min, max } => format!("integers({min}..={max})"),
            Self::Bools => "bools".to_owned(),
            Self::Addresses => "addresses".to_owned(),
            Self::OneOf(options) => {
                let inner: Vec<_> = options.iter().map(Self::describe).collect();
                format!("one_of({})", inner.join(", "))
            }
            Self::Mapped { base, .. } => format!("map({})", base.describe()),
            Self::Filtered { base, whence, .. } => {
                format!("filter({}, {whence})", base.describe())
            }
        }
    }
}

impl fmt::Debug for StrategyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Resolves the strategy for one parameter: a declared strategy is validated
/// against the parameter's type, otherwise inference is attempted.
pub(crate) fn param_strategy(
    param: &ParamDecl,
    declared: Option<&StrategyDescriptor>,
) -> Result<BoxedStrategy<VmValue>, FuzzConfigError> {
    match declared {
        Some(descriptor) => {
            descriptor.validate(&param.name, param.ty)?;
            Ok(descriptor.build())
        }
        None => match StrategyDescriptor::infer(param.ty) {
            Some(descriptor) => Ok(descriptor.build()),
            None => Err(FuzzConfigError::UnsupportedParamType {
                param: param.name.clone(),
                ty: param.ty,
            }),
        },
    }
}

/// Encodes a signed integer as a field element; negative values wrap into the
/// upper half of the field.
pub(crate) fn felt_from_i128(value: i128) -> U256 {
    if value >= 0 {
        U256::from(value.unsigned_abs())
    } else {
        FELT_MODULUS - U256::from(value.unsigned_abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_strategy_rejects_pointer_params() {
        let descriptor = StrategyDescriptor::Integers { min: 0, max: 10 };
        let error = descriptor.validate("p", VmType::Pointer).unwrap_err();
        assert_eq!(
            error,
            FuzzConfigError::InvalidStrategy {
                param: "p".to_owned(),
                ty: VmType::Pointer,
                strategy: "integers(0..=10)".to_owned(),
            }
        );
    }

    #[test]
    fn inverted_integer_bounds_are_invalid() {
        let descriptor = StrategyDescriptor::Integers { min: 10, max: 0 };
        assert!(descriptor.validate("x", VmType::Felt).is_err());
    }

    #[test]
    fn combinators_validate_their_bases() {
        let mapped = StrategyDescriptor::Bools.map(Arc::new(|value| value));
        assert!(mapped.validate("flag", VmType::Bool).is_ok());
        assert!(mapped.validate("flag", VmType::Felt).is_err());

        let filtered = StrategyDescriptor::Felts.filter("nonzero", Arc::new(|_| true));
        assert!(filtered.validate("x", VmType::Felt).is_ok());
        assert!(filtered.validate("x", VmType::Address).is_err());

        let empty = StrategyDescriptor::one_of(vec![]);
        assert!(empty.validate("x", VmType::Felt).is_err());

        let mixed = StrategyDescriptor::one_of(vec![
            StrategyDescriptor::Felts,
            StrategyDescriptor::Bools,
        ]);
        assert!(mixed.validate("x", VmType::Felt).is_err());
    }

    #[test]
    fn inference_covers_only_value_types() {
        assert!(StrategyDescriptor::infer(VmType::Felt).is_some());
        assert!(StrategyDescriptor::infer(VmType::Bool).is_some());
        assert!(StrategyDescriptor::infer(VmType::Address).is_some());
        assert!(StrategyDescriptor::infer(VmType::Pointer).is_none());
        assert!(StrategyDescriptor::infer(VmType::List).is_none());
    }

    #[test]
    fn negative_integers_wrap_into_the_field() {
        assert_eq!(felt_from_i128(5), U256::from(5u8));
        assert_eq!(felt_from_i128(-1), FELT_MODULUS - U256::from(1u8));
        assert_eq!(felt_from_i128(0), U256::ZERO);
    }

    #[test]
    fn unsupported_param_without_declaration_names_the_param() {
        let param = ParamDecl {
            name: "segment".to_owned(),
            ty: VmType::Pointer,
        };
        let error = param_strategy(&param, None).unwrap_err();
        assert_eq!(
            error,
            FuzzConfigError::UnsupportedParamType {
                param: "segment".to_owned(),
                ty: VmType::Pointer,
            }
        );
    }
}
