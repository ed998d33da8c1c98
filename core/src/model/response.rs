// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The `Response` data type (spec §3): function values/gradients/
//! Hessians populated only where the active set requests them.

use super::active_set::{ActiveSet, GRADIENT, HESSIAN, VALUE};
use serde::{Deserialize, Serialize};

/// A function evaluation response: values, gradients and Hessians,
/// populated only where `active_set` requests them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Function labels, one per function.
    pub labels: Vec<String>,
    /// Function values, `F` long; entries are meaningless unless bit
    /// [`VALUE`] is set for that function in `active_set`.
    pub function_values: Vec<f64>,
    /// Function gradients, `F` rows of `D` columns; a row is
    /// meaningless unless bit [`GRADIENT`] is set for that function.
    pub function_gradients: Vec<Vec<f64>>,
    /// Function Hessians, `F` matrices of `D x D`; a matrix is
    /// meaningless unless bit [`HESSIAN`] is set for that function.
    pub function_hessians: Vec<Vec<Vec<f64>>>,
    /// The active set this response was populated against.
    pub active_set: ActiveSet,
}

impl Response {
    /// Builds an empty response shaped for `num_functions` functions and
    /// `num_deriv_vars` derivative variables, with every slot requested.
    #[must_use]
    pub fn new_shaped(labels: Vec<String>, num_deriv_vars: usize, active_set: ActiveSet) -> Self {
        let num_functions = labels.len();
        Self {
            labels,
            function_values: vec![0.0; num_functions],
            function_gradients: vec![vec![0.0; num_deriv_vars]; num_functions],
            function_hessians: vec![vec![vec![0.0; num_deriv_vars]; num_deriv_vars]; num_functions],
            active_set,
        }
    }

    /// Merges `lighter` into `self`, overlaying only the slots
    /// `lighter.active_set` actually requested, per function. `self`
    /// ends up with the union of both active sets.
    pub fn update(&mut self, lighter: &Response) {
        for (fn_idx, bits) in lighter.active_set.request_vector.iter().enumerate() {
            if fn_idx >= self.function_values.len() {
                break;
            }
            if bits & VALUE != 0 {
                self.function_values[fn_idx] = lighter.function_values[fn_idx];
            }
            if bits & GRADIENT != 0 {
                self.function_gradients[fn_idx] = lighter.function_gradients[fn_idx].clone();
            }
            if bits & HESSIAN != 0 {
                self.function_hessians[fn_idx] = lighter.function_hessians[fn_idx].clone();
            }
        }
        self.active_set = self.active_set.union(&lighter.active_set);
    }

    /// Resets value/gradient/Hessian contents to zero, keeping shape and
    /// active set. Used by failure recovery's `recover` mode before
    /// writing the recovery vector into the values slot.
    pub fn reset_values(&mut self) {
        for v in &mut self.function_values {
            *v = 0.0;
        }
    }
}
