// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! `ParamResponsePair` (spec §3): the queue element and cache element.

use super::active_set::ActiveSet;
use super::response::Response;
use super::variables::Variables;
use serde::{Deserialize, Serialize};

/// Evaluation id. Strictly positive for in-run evaluations, non-positive
/// for entries loaded from a prior-run restart journal (spec §3).
pub type EvalId = i64;

/// Interface id distinguishing which analysis driver/interface produced
/// (or should produce) a pair; part of the cache's hashed key.
pub type InterfaceId = String;

/// (evaluation-id, interface-id, variables, active-set, response):
/// the unit exchanged between the scheduler, the cache and the
/// restart journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamResponsePair {
    /// Evaluation id tagging this request/response within a run.
    pub eval_id: EvalId,
    /// Which analysis interface this pair belongs to.
    pub interface_id: InterfaceId,
    /// The request's variables.
    pub variables: Variables,
    /// The request's active set.
    pub active_set: ActiveSet,
    /// The (possibly not-yet-populated) response.
    pub response: Response,
}

impl ParamResponsePair {
    /// Builds a pair for a pending request, with an empty response
    /// shaped to match `active_set`.
    #[must_use]
    pub fn new_request(
        eval_id: EvalId,
        interface_id: impl Into<InterfaceId>,
        variables: Variables,
        active_set: ActiveSet,
    ) -> Self {
        let num_functions = active_set.request_vector.len();
        let labels = (0..num_functions).map(|i| format!("response_fn_{i}")).collect();
        let num_deriv_vars = active_set.derivative_variables.len();
        let response = Response::new_shaped(labels, num_deriv_vars, active_set.clone());
        Self {
            eval_id,
            interface_id: interface_id.into(),
            variables,
            active_set,
            response,
        }
    }

    /// Whether this pair's response is a valid cache hit for a query
    /// against the same interface, variables and active set (spec
    /// §4.B `lookup_exact`): structural variable equality plus bitwise
    /// active-set containment.
    #[must_use]
    pub fn satisfies(&self, interface_id: &str, variables: &Variables, set: &ActiveSet) -> bool {
        self.interface_id == interface_id
            && self.variables == *variables
            && self.response.active_set.is_superset_of(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::active_set::ActiveSet;

    #[test]
    fn satisfies_requires_superset_active_set() {
        let vars = Variables::from_continuous(vec![1.0]);
        let pair = ParamResponsePair::new_request(1, "sim", vars.clone(), ActiveSet::values_only(1));
        assert!(pair.satisfies("sim", &vars, &ActiveSet::values_only(1)));
        assert!(!pair.satisfies("other", &vars, &ActiveSet::values_only(1)));
    }
}
