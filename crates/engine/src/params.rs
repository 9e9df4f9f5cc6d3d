//! Parameter space: typed ranges for every tunable strategy parameter
//!
//! Values are exact decimals and are always computed as `min + step * i`,
//! so a 0.1 step never drifts the way repeated float addition would.

use std::collections::HashSet;
use std::fmt;

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::enumerator::CombinationEnumerator;
use crate::error::ConfigError;

/// Number of combinations in a space.
///
/// Saturates at `u128::MAX` instead of wrapping, so comparisons against an
/// iteration ceiling stay correct for absurdly large ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CombinationCount(u128);

impl CombinationCount {
    pub const ONE: CombinationCount = CombinationCount(1);

    pub fn new(value: u128) -> Self {
        Self(value)
    }

    pub fn get(&self) -> u128 {
        self.0
    }

    pub fn saturating_mul(self, other: CombinationCount) -> Self {
        Self(self.0.saturating_mul(other.0))
    }

    /// True if this many combinations would exceed `ceiling`.
    pub fn exceeds(&self, ceiling: u64) -> bool {
        self.0 > u128::from(ceiling)
    }

    pub fn is_saturated(&self) -> bool {
        self.0 == u128::MAX
    }

    /// The count as `u64`, if it fits.
    pub fn to_u64(&self) -> Option<u64> {
        u64::try_from(self.0).ok()
    }
}

impl fmt::Display for CombinationCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_saturated() {
            write!(f, "more than {}", u128::MAX)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// One tunable parameter: an inclusive decimal range walked in `step` increments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub min: Decimal,
    pub max: Decimal,
    pub step: Decimal,
}

impl Parameter {
    pub fn new(
        name: impl Into<String>,
        min: Decimal,
        max: Decimal,
        step: Decimal,
    ) -> Result<Self, ConfigError> {
        let param = Self {
            name: name.into(),
            min,
            max,
            step,
        };
        param.validate()?;
        Ok(param)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.step <= Decimal::ZERO {
            return Err(ConfigError::NonPositiveStep {
                name: self.name.clone(),
                step: self.step,
            });
        }
        if self.min > self.max {
            return Err(ConfigError::InvalidRange {
                name: self.name.clone(),
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }

    /// `floor((max - min) / step) + 1`, saturating.
    pub fn value_count(&self) -> u128 {
        let span = match self.max.checked_sub(self.min) {
            Some(span) => span,
            None => return u128::MAX,
        };
        match span.checked_div(self.step) {
            Some(steps) => steps
                .floor()
                .to_u128()
                .map(|n| n.saturating_add(1))
                .unwrap_or(u128::MAX),
            None => u128::MAX,
        }
    }

    /// Value at position `index` of the progression. `index` must be below
    /// `value_count()`; out-of-range indices clamp to `max`.
    pub fn value_at(&self, index: u128) -> Decimal {
        Decimal::from_u128(index)
            .and_then(|i| self.step.checked_mul(i))
            .and_then(|offset| self.min.checked_add(offset))
            .filter(|v| *v <= self.max)
            .unwrap_or(self.max)
    }

    /// Lazily yields min, min+step, ... up to and including max.
    pub fn values(&self) -> impl Iterator<Item = Decimal> + '_ {
        (0..self.value_count()).map(move |i| self.value_at(i))
    }
}

/// Ordered collection of parameters. Declaration order drives enumeration
/// order: the last parameter varies fastest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Parameter>", into = "Vec<Parameter>")]
pub struct ParameterSpace {
    parameters: Vec<Parameter>,
}

impl ParameterSpace {
    pub fn new(parameters: Vec<Parameter>) -> Result<Self, ConfigError> {
        if parameters.is_empty() {
            return Err(ConfigError::EmptySpace);
        }
        let mut seen = HashSet::with_capacity(parameters.len());
        for param in &parameters {
            param.validate()?;
            if !seen.insert(param.name.as_str()) {
                return Err(ConfigError::DuplicateParameter(param.name.clone()));
            }
        }
        Ok(Self { parameters })
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Product of every parameter's value count.
    pub fn combination_count(&self) -> CombinationCount {
        self.parameters
            .iter()
            .map(|p| CombinationCount::new(p.value_count()))
            .fold(CombinationCount::ONE, CombinationCount::saturating_mul)
    }

    /// Replace the range of an existing parameter, keeping its position.
    pub fn with_override(mut self, param: Parameter) -> Result<Self, ConfigError> {
        param.validate()?;
        match self.parameters.iter_mut().find(|p| p.name == param.name) {
            Some(slot) => {
                *slot = param;
                Ok(self)
            }
            None => Err(ConfigError::UnknownParameter(param.name)),
        }
    }

    /// Fresh enumerator over every assignment in this space.
    pub fn enumerate(&self) -> CombinationEnumerator {
        CombinationEnumerator::new(self)
    }
}

impl TryFrom<Vec<Parameter>> for ParameterSpace {
    type Error = ConfigError;

    fn try_from(parameters: Vec<Parameter>) -> Result<Self, Self::Error> {
        Self::new(parameters)
    }
}

impl From<ParameterSpace> for Vec<Parameter> {
    fn from(space: ParameterSpace) -> Self {
        space.parameters
    }
}

/// Parse `name=min:max:step`, as accepted on the command line.
pub fn parse_param_spec(spec: &str) -> Result<Parameter, ConfigError> {
    let invalid = || ConfigError::InvalidParamSpec(spec.to_string());

    let (name, range) = spec.split_once('=').ok_or_else(invalid)?;
    let parts: Vec<&str> = range.split(':').collect();
    if parts.len() != 3 {
        return Err(invalid());
    }

    let parse = |s: &str| s.trim().parse::<Decimal>().map_err(|_| invalid());
    Parameter::new(name.trim(), parse(parts[0])?, parse(parts[1])?, parse(parts[2])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn param(name: &str, min: Decimal, max: Decimal, step: Decimal) -> Parameter {
        Parameter::new(name, min, max, step).unwrap()
    }

    #[test]
    fn test_value_count_floors_partial_steps() {
        assert_eq!(param("a", dec!(1), dec!(10), dec!(1)).value_count(), 10);
        assert_eq!(param("a", dec!(1), dec!(10), dec!(4)).value_count(), 3);
        assert_eq!(param("a", dec!(5), dec!(5), dec!(1)).value_count(), 1);
        assert_eq!(param("a", dec!(0), dec!(1), dec!(0.1)).value_count(), 11);
    }

    #[test]
    fn test_values_are_exact_with_decimal_steps() {
        let p = param("mult", dec!(1.5), dec!(3.0), dec!(0.5));
        let values: Vec<Decimal> = p.values().collect();
        assert_eq!(values, vec![dec!(1.5), dec!(2.0), dec!(2.5), dec!(3.0)]);

        let p = param("x", dec!(0), dec!(1), dec!(0.1));
        let last = p.values().last().unwrap();
        assert_eq!(last, dec!(1.0));
    }

    #[test]
    fn test_values_never_exceed_max() {
        let p = param("a", dec!(1), dec!(10), dec!(4));
        let values: Vec<Decimal> = p.values().collect();
        assert_eq!(values, vec![dec!(1), dec!(5), dec!(9)]);
    }

    #[test]
    fn test_combination_count_is_product() {
        let space = ParameterSpace::new(vec![
            param("a", dec!(1), dec!(10), dec!(1)),
            param("b", dec!(0), dec!(1), dec!(0.25)),
            param("c", dec!(2), dec!(2), dec!(1)),
        ])
        .unwrap();
        assert_eq!(space.combination_count().get(), 10 * 5);
    }

    #[test]
    fn test_combination_count_large_products_do_not_wrap() {
        // 10^8 values each: 10^32 overflows u64 and saturates u128 cleanly.
        let wide = |name: &str| param(name, dec!(0), dec!(99999999), dec!(1));
        let space =
            ParameterSpace::new(vec![wide("a"), wide("b"), wide("c"), wide("d")]).unwrap();
        let count = space.combination_count();
        assert_eq!(count.get(), 10u128.pow(32));
        assert!(count.exceeds(u64::MAX));
        assert_eq!(count.to_u64(), None);

        let space = ParameterSpace::new(vec![
            wide("a"),
            wide("b"),
            wide("c"),
            wide("d"),
            wide("e"),
        ])
        .unwrap();
        let count = space.combination_count();
        assert!(count.is_saturated());
        assert!(count.exceeds(u64::MAX));
    }

    #[test]
    fn test_tiny_step_saturates_instead_of_panicking() {
        let p = param("a", Decimal::MIN, Decimal::MAX, dec!(0.0000000001));
        assert_eq!(p.value_count(), u128::MAX);
    }

    #[test]
    fn test_parameter_validation() {
        assert_eq!(
            Parameter::new("a", dec!(1), dec!(2), dec!(0)),
            Err(ConfigError::NonPositiveStep {
                name: "a".to_string(),
                step: dec!(0)
            })
        );
        assert!(matches!(
            Parameter::new("a", dec!(3), dec!(2), dec!(1)),
            Err(ConfigError::InvalidRange { .. })
        ));
        assert_eq!(
            Parameter::new(" ", dec!(1), dec!(2), dec!(1)),
            Err(ConfigError::EmptyName)
        );
    }

    #[test]
    fn test_space_rejects_empty_and_duplicates() {
        assert_eq!(ParameterSpace::new(vec![]), Err(ConfigError::EmptySpace));
        let dup = ParameterSpace::new(vec![
            param("a", dec!(1), dec!(2), dec!(1)),
            param("a", dec!(1), dec!(3), dec!(1)),
        ]);
        assert_eq!(dup, Err(ConfigError::DuplicateParameter("a".to_string())));
    }

    #[test]
    fn test_with_override_keeps_position() {
        let space = ParameterSpace::new(vec![
            param("a", dec!(1), dec!(2), dec!(1)),
            param("b", dec!(1), dec!(2), dec!(1)),
        ])
        .unwrap();
        let space = space
            .with_override(param("a", dec!(10), dec!(20), dec!(5)))
            .unwrap();
        assert_eq!(space.parameters()[0].min, dec!(10));
        assert_eq!(space.parameters()[1].name, "b");
        assert_eq!(space.combination_count().get(), 3 * 2);

        let err = space.with_override(param("zzz", dec!(1), dec!(2), dec!(1)));
        assert_eq!(err, Err(ConfigError::UnknownParameter("zzz".to_string())));
    }

    #[test]
    fn test_parse_param_spec() {
        let p = parse_param_spec("period=5:30:5").unwrap();
        assert_eq!(p.name, "period");
        assert_eq!(p.min, dec!(5));
        assert_eq!(p.max, dec!(30));
        assert_eq!(p.step, dec!(5));

        assert!(parse_param_spec("period=5:30").is_err());
        assert!(parse_param_spec("period").is_err());
        assert!(parse_param_spec("period=a:b:c").is_err());
        assert!(parse_param_spec("period=5:30:0").is_err());
    }

    #[test]
    fn test_space_serde_validates() {
        let json = r#"[{"name":"a","min":"1","max":"3","step":"1"}]"#;
        let space: ParameterSpace = serde_json::from_str(json).unwrap();
        assert_eq!(space.combination_count().get(), 3);

        let bad = r#"[{"name":"a","min":"3","max":"1","step":"1"}]"#;
        assert!(serde_json::from_str::<ParameterSpace>(bad).is_err());
    }
}
