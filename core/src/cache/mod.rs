// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Evaluation Cache (component B, spec §4.B): content-addressed store of
//! completed [`ParamResponsePair`]s with exact and tolerance-based
//! duplicate detection, plus the restart journal ([`journal`]).

pub mod journal;

use crate::error::{CoreError, CoreResult};
use crate::model::{ActiveSet, EvalId, InterfaceId, ParamResponsePair, Variables};
use std::collections::HashMap;

/// A hash bucket key: `(interface-id, variables)`. Bucketing omits the
/// active set because containment, not equality, governs matches (spec
/// §4.B: "the stored response's active-set is a bitwise superset of the
/// query set").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    interface_id: InterfaceId,
    continuous_bits: Vec<u64>,
    discrete_int: Vec<i64>,
    discrete_real_bits: Vec<u64>,
    discrete_string: Vec<String>,
}

impl CacheKey {
    fn new(interface_id: &str, vars: &Variables) -> Self {
        Self {
            interface_id: interface_id.to_string(),
            continuous_bits: vars.continuous.values.iter().map(|v| v.to_bits()).collect(),
            discrete_int: vars.discrete_int.values.clone(),
            discrete_real_bits: vars.discrete_real.values.iter().map(|v| v.to_bits()).collect(),
            discrete_string: vars.discrete_string.values.clone(),
        }
    }

    fn from_pair(pair: &ParamResponsePair) -> Self {
        Self::new(&pair.interface_id, &pair.variables)
    }
}

/// Content-addressed collection of completed pairs (spec §4.B).
///
/// Two indices are kept mutually consistent (invariant 2 in spec §8):
/// a hashed index for `lookup_exact`, and an insertion-ordered sequence
/// of evaluation ids for `lookup_nearby`'s ordered traversal.
#[derive(Debug, Default)]
pub struct EvaluationCache {
    by_eval_id: HashMap<EvalId, ParamResponsePair>,
    insertion_order: Vec<EvalId>,
    hashed_index: HashMap<CacheKey, Vec<EvalId>>,
}

impl EvaluationCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_eval_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_eval_id.is_empty()
    }

    /// Adds `pair` by value (the caller's copy is untouched). O(1)
    /// expected by hashed key; also appended to the insertion-ordered
    /// index (spec §4.B insert contract).
    pub fn insert(&mut self, pair: ParamResponsePair) {
        let key = CacheKey::from_pair(&pair);
        self.hashed_index.entry(key).or_default().push(pair.eval_id);
        self.insertion_order.push(pair.eval_id);
        self.by_eval_id.insert(pair.eval_id, pair);
    }

    /// Exact lookup: hit requires structural equality of variables and
    /// that the stored response's active-set is a bitwise superset of
    /// `set` (spec §4.B `lookup_exact`).
    #[must_use]
    pub fn lookup_exact(&self, interface_id: &str, vars: &Variables, set: &ActiveSet) -> Option<&ParamResponsePair> {
        let key = CacheKey::new(interface_id, vars);
        self.hashed_index.get(&key)?.iter().find_map(|id| {
            let pair = self.by_eval_id.get(id)?;
            (pair.variables == *vars && pair.response.active_set.is_superset_of(set)).then_some(pair)
        })
    }

    /// Tolerance-based lookup: the *first* ordered entry (by insertion
    /// order) whose continuous variables are within an L-infinity
    /// per-axis relative radius `tol` of `vars`, with identical discrete
    /// slots and active-set containment (spec §4.B `lookup_nearby`).
    #[must_use]
    pub fn lookup_nearby(
        &self,
        interface_id: &str,
        vars: &Variables,
        set: &ActiveSet,
        tol: f64,
    ) -> Option<&ParamResponsePair> {
        self.insertion_order.iter().find_map(|id| {
            let pair = self.by_eval_id.get(id)?;
            (pair.interface_id == interface_id
                && pair.variables.nearby(vars, tol)
                && pair.response.active_set.is_superset_of(set))
            .then_some(pair)
        })
    }

    /// Erases the entry at `old_eval_id` and re-inserts it under
    /// `new_id`, moving it to the end of the insertion-ordered index
    /// (spec §4.B `promote`: "used when an in-run request duplicates a
    /// journal entry and the caller needs downstream identification").
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InterfaceError`] if `old_eval_id` is not
    /// present.
    pub fn promote(&mut self, old_eval_id: EvalId, new_id: EvalId) -> CoreResult<()> {
        let mut pair = self.by_eval_id.remove(&old_eval_id).ok_or_else(|| {
            CoreError::InterfaceError(format!("no cache entry for evaluation {old_eval_id} to promote"))
        })?;

        let key = CacheKey::from_pair(&pair);
        if let Some(bucket) = self.hashed_index.get_mut(&key) {
            bucket.retain(|id| *id != old_eval_id);
            bucket.push(new_id);
        }
        self.insertion_order.retain(|id| *id != old_eval_id);
        self.insertion_order.push(new_id);

        pair.eval_id = new_id;
        self.by_eval_id.insert(new_id, pair);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, eval_id: EvalId) -> Option<&ParamResponsePair> {
        self.by_eval_id.get(&eval_id)
    }

    /// Every entry, ordered by evaluation id ascending. Convenience for
    /// inspection tooling (e.g. a journal-dump CLI command); not on the
    /// scheduler's hot path.
    pub fn entries_by_eval_id(&self) -> impl Iterator<Item = &ParamResponsePair> {
        let mut ids: Vec<&EvalId> = self.by_eval_id.keys().collect();
        ids.sort_unstable();
        ids.into_iter().map(|id| &self.by_eval_id[id])
    }

    /// The cached entry for `interface_id` nearest `target` by
    /// Euclidean distance in continuous variables, ties broken by the
    /// smaller evaluation id (spec §4.C continuation recovery; resolves
    /// spec.md's tie-break open question in favor of the earliest
    /// inserted candidate).
    #[must_use]
    pub fn nearest(&self, interface_id: &str, target: &Variables) -> Option<&ParamResponsePair> {
        self.by_eval_id
            .values()
            .filter(|p| p.interface_id == interface_id)
            .min_by(|a, b| {
                let da = a.variables.continuous_l2_distance(target);
                let db = b.variables.continuous_l2_distance(target);
                da.partial_cmp(&db)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.eval_id.cmp(&b.eval_id))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ActiveSet;

    fn pair(id: EvalId, x: f64, value: f64) -> ParamResponsePair {
        let mut p = ParamResponsePair::new_request(id, "sim", Variables::from_continuous(vec![x]), ActiveSet::values_only(1));
        p.response.function_values[0] = value;
        p
    }

    #[test]
    fn exact_lookup_requires_superset_active_set() {
        let mut cache = EvaluationCache::new();
        cache.insert(pair(1, 2.0, 4.0));
        let vars = Variables::from_continuous(vec![2.0]);
        let hit = cache.lookup_exact("sim", &vars, &ActiveSet::values_only(1)).unwrap();
        assert_eq!(hit.response.function_values[0], 4.0);
        assert!(cache.lookup_exact("other", &vars, &ActiveSet::values_only(1)).is_none());
    }

    #[test]
    fn nearby_lookup_returns_first_within_tolerance() {
        let mut cache = EvaluationCache::new();
        cache.insert(pair(1, 10.0, 100.0));
        cache.insert(pair(2, 10.02, 200.0));
        let query = Variables::from_continuous(vec![10.01]);
        let hit = cache
            .lookup_nearby("sim", &query, &ActiveSet::values_only(1), 0.01)
            .unwrap();
        assert_eq!(hit.eval_id, 1);
    }

    #[test]
    fn promote_reassigns_id_and_preserves_lookup() {
        let mut cache = EvaluationCache::new();
        cache.insert(pair(-1, 3.0, 9.0));
        cache.promote(-1, 7).unwrap();
        assert!(cache.get(-1).is_none());
        let hit = cache
            .lookup_exact("sim", &Variables::from_continuous(vec![3.0]), &ActiveSet::values_only(1))
            .unwrap();
        assert_eq!(hit.eval_id, 7);
    }

    #[test]
    fn promote_missing_id_is_an_error() {
        let mut cache = EvaluationCache::new();
        assert!(cache.promote(-5, 1).is_err());
    }

    #[test]
    fn nearest_breaks_ties_by_smaller_eval_id() {
        let mut cache = EvaluationCache::new();
        cache.insert(pair(5, 0.0, 0.0));
        cache.insert(pair(2, 2.0, 0.0));
        let target = Variables::from_continuous(vec![1.0]);
        let nearest = cache.nearest("sim", &target).unwrap();
        assert_eq!(nearest.eval_id, 2);
    }
}
