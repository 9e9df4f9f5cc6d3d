//! Combination enumerator: walks the Cartesian product of a parameter space
//!
//! Mixed-radix counter semantics. The last-declared parameter is the lowest
//! digit, so it cycles fastest, exactly like nested `for` loops written in
//! declaration order.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::StrategyError;
use crate::params::{Parameter, ParameterSpace};

/// One concrete value per parameter: a single point in the sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    /// Zero-based position in enumeration order
    pub index: u64,
    pub values: Vec<(String, Decimal)>,
}

impl Assignment {
    pub fn new(index: u64, values: Vec<(String, Decimal)>) -> Self {
        Self { index, values }
    }

    pub fn get(&self, name: &str) -> Option<Decimal> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    pub fn value(&self, name: &str) -> Result<Decimal, StrategyError> {
        self.get(name)
            .ok_or_else(|| StrategyError::MissingParameter(name.to_string()))
    }

    /// Parameter as a positive whole number (periods, lookbacks).
    pub fn usize_value(&self, name: &str) -> Result<usize, StrategyError> {
        let value = self.value(name)?;
        if value <= Decimal::ZERO || value.fract() != Decimal::ZERO {
            return Err(StrategyError::InvalidParameter {
                name: name.to_string(),
                value,
            });
        }
        value.to_usize().ok_or(StrategyError::InvalidParameter {
            name: name.to_string(),
            value,
        })
    }

    pub fn f64_value(&self, name: &str) -> Result<f64, StrategyError> {
        let value = self.value(name)?;
        value.to_f64().ok_or(StrategyError::InvalidParameter {
            name: name.to_string(),
            value,
        })
    }

    /// `name=value` pairs joined by spaces, for logs and tables.
    pub fn label(&self) -> String {
        self.values
            .iter()
            .map(|(n, v)| format!("{}={}", n, v.normalize()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Lazy, finite iterator over every assignment of a space, each exactly once.
#[derive(Debug, Clone)]
pub struct CombinationEnumerator {
    parameters: Vec<Parameter>,
    radices: Vec<u128>,
    digits: Vec<u128>,
    next_index: u64,
    exhausted: bool,
}

impl CombinationEnumerator {
    pub fn new(space: &ParameterSpace) -> Self {
        let parameters = space.parameters().to_vec();
        let radices: Vec<u128> = parameters.iter().map(Parameter::value_count).collect();
        let exhausted = parameters.is_empty() || radices.iter().any(|&r| r == 0);
        Self {
            digits: vec![0; parameters.len()],
            parameters,
            radices,
            next_index: 0,
            exhausted,
        }
    }

    /// Number of assignments already produced.
    pub fn position(&self) -> u64 {
        self.next_index
    }

    fn current(&self) -> Assignment {
        let values = self
            .parameters
            .iter()
            .zip(&self.digits)
            .map(|(param, &digit)| (param.name.clone(), param.value_at(digit)))
            .collect();
        Assignment::new(self.next_index, values)
    }

    /// Increment the counter. Returns false once every digit has wrapped.
    fn advance(&mut self) -> bool {
        for pos in (0..self.digits.len()).rev() {
            self.digits[pos] += 1;
            if self.digits[pos] < self.radices[pos] {
                return true;
            }
            self.digits[pos] = 0;
        }
        false
    }

    fn remaining(&self) -> u128 {
        if self.exhausted {
            return 0;
        }
        // Remaining = total - consumed, where consumed is the counter value.
        let mut consumed: u128 = 0;
        let mut total: u128 = 1;
        for (&digit, &radix) in self.digits.iter().zip(&self.radices).rev() {
            consumed = consumed.saturating_add(digit.saturating_mul(total));
            total = total.saturating_mul(radix);
        }
        total.saturating_sub(consumed)
    }
}

impl Iterator for CombinationEnumerator {
    type Item = Assignment;

    fn next(&mut self) -> Option<Assignment> {
        if self.exhausted {
            return None;
        }
        let assignment = self.current();
        self.next_index = self.next_index.saturating_add(1);
        if !self.advance() {
            self.exhausted = true;
        }
        Some(assignment)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match usize::try_from(self.remaining()) {
            Ok(n) => (n, Some(n)),
            Err(_) => (usize::MAX, None),
        }
    }
}
