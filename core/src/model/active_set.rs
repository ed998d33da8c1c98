// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The `ActiveSet` data type (spec §3): per-function request bits plus
//! the derivative-variable selection.

use serde::{Deserialize, Serialize};

/// Bit 0: the function value is requested.
pub const VALUE: u8 = 0b001;
/// Bit 1: the function gradient is requested.
pub const GRADIENT: u8 = 0b010;
/// Bit 2: the function Hessian is requested.
pub const HESSIAN: u8 = 0b100;

/// A pair (request-vector, derivative-variable-vector) controlling which
/// of value/gradient/Hessian a request demands per response function,
/// and which continuous variables differentiation is with respect to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSet {
    /// One small bitmask per response function (bits: [`VALUE`],
    /// [`GRADIENT`], [`HESSIAN`]).
    pub request_vector: Vec<u8>,
    /// Indices into the continuous variables selecting which ones
    /// derivatives are taken with respect to.
    pub derivative_variables: Vec<usize>,
}

impl ActiveSet {
    /// Builds an active set requesting only function values for
    /// `num_functions` functions.
    #[must_use]
    pub fn values_only(num_functions: usize) -> Self {
        Self {
            request_vector: vec![VALUE; num_functions],
            derivative_variables: Vec::new(),
        }
    }

    /// Whether this active set is a bitwise superset of `other`: every
    /// bit `other` sets for a function is also set by `self` for that
    /// function. This is the cache hit-containment rule (spec §4.B):
    /// a cached response may satisfy a lighter query.
    #[must_use]
    pub fn is_superset_of(&self, other: &Self) -> bool {
        if self.request_vector.len() != other.request_vector.len() {
            return false;
        }
        self.request_vector
            .iter()
            .zip(other.request_vector.iter())
            .all(|(mine, theirs)| (mine & theirs) == *theirs)
    }

    /// Bitwise-or of `self` and `other`, used when merging a lighter
    /// active set into a heavier one.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let request_vector = self
            .request_vector
            .iter()
            .zip(other.request_vector.iter())
            .map(|(a, b)| a | b)
            .collect();
        let mut derivative_variables = self.derivative_variables.clone();
        for v in &other.derivative_variables {
            if !derivative_variables.contains(v) {
                derivative_variables.push(*v);
            }
        }
        derivative_variables.sort_unstable();
        Self {
            request_vector,
            derivative_variables,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn superset_detects_missing_bits() {
        let full = ActiveSet {
            request_vector: vec![VALUE | GRADIENT],
            derivative_variables: vec![0],
        };
        let value_only = ActiveSet::values_only(1);
        assert!(full.is_superset_of(&value_only));
        assert!(!value_only.is_superset_of(&full));
    }

    #[test]
    fn union_combines_bits() {
        let a = ActiveSet {
            request_vector: vec![VALUE],
            derivative_variables: vec![0],
        };
        let b = ActiveSet {
            request_vector: vec![GRADIENT],
            derivative_variables: vec![1],
        };
        let merged = a.union(&b);
        assert_eq!(merged.request_vector, vec![VALUE | GRADIENT]);
        assert_eq!(merged.derivative_variables, vec![0, 1]);
    }
}
