// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The pending-request queue (spec §3): an insertion-ordered sequence of
//! [`ParamResponsePair`]s, indexable by evaluation id, with the two
//! shadow maps that `map()` consults at enqueue time so a duplicate
//! request never actually reaches the transport driver.

use crate::cache::EvaluationCache;
use crate::model::{ActiveSet, EvalId, InterfaceId, ParamResponsePair, Response, Variables};
use std::collections::HashMap;

/// What enqueueing a request resolved to.
pub enum Disposition {
    /// A duplicate of a cache entry (spec §3 "history-duplicate map"):
    /// the response is already known and no evaluation is needed.
    HistoryDuplicate(Response),
    /// A duplicate of another pair still in the queue or in flight
    /// (spec §3 "queue-duplicate map"): `original` will be evaluated
    /// once, and this id's response copies out of it on completion.
    QueueDuplicate { original: EvalId },
    /// A genuinely new request; needs to be dispatched for evaluation.
    Fresh,
}

/// The insertion-ordered queue plus its duplicate-detection shadow maps
/// (spec §3 "Pending-request queue").
#[derive(Default)]
pub struct PendingQueue {
    /// Insertion order of evaluation ids still awaiting dispatch or
    /// completion (fresh entries only; duplicates never occupy a slot
    /// here, matching the source's "no redundant evaluation" behavior).
    order: Vec<EvalId>,
    entries: HashMap<EvalId, ParamResponsePair>,
    /// new-evaluation-id -> response copied out of the cache.
    history_duplicates: HashMap<EvalId, Response>,
    /// new-evaluation-id -> the still-pending id it shadows.
    queue_duplicates: HashMap<EvalId, EvalId>,
    /// Reverse index: original id -> every duplicate id shadowing it,
    /// so completion can fan out to every duplicate in one pass.
    shadowed_by: HashMap<EvalId, Vec<EvalId>>,
}

impl PendingQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Enqueues one request, consulting the cache (if `cache_enabled`)
    /// and any still-pending entry for a duplicate match first (spec
    /// §4.D: the scheduler must not re-evaluate what it already knows).
    #[allow(clippy::too_many_arguments)]
    pub fn enqueue(
        &mut self,
        eval_id: EvalId,
        interface_id: InterfaceId,
        variables: Variables,
        active_set: ActiveSet,
        cache: &EvaluationCache,
        cache_enabled: bool,
        nearby_tolerance: Option<f64>,
    ) -> Disposition {
        if cache_enabled {
            let hit = cache.lookup_exact(&interface_id, &variables, &active_set).or_else(|| {
                nearby_tolerance.and_then(|tol| cache.lookup_nearby(&interface_id, &variables, &active_set, tol))
            });
            if let Some(pair) = hit {
                let response = pair.response.clone();
                self.history_duplicates.insert(eval_id, response.clone());
                return Disposition::HistoryDuplicate(response);
            }
        }

        if let Some(original) = self.find_pending_match(&interface_id, &variables, &active_set) {
            self.queue_duplicates.insert(eval_id, original);
            self.shadowed_by.entry(original).or_default().push(eval_id);
            return Disposition::QueueDuplicate { original };
        }

        let pair = ParamResponsePair::new_request(eval_id, interface_id, variables, active_set);
        self.order.push(eval_id);
        self.entries.insert(eval_id, pair);
        Disposition::Fresh
    }

    fn find_pending_match(&self, interface_id: &str, variables: &Variables, set: &ActiveSet) -> Option<EvalId> {
        self.order.iter().find_map(|id| {
            let pair = self.entries.get(id)?;
            (pair.interface_id == interface_id
                && pair.variables == *variables
                && pair.response.active_set.is_superset_of(set)
                || (pair.interface_id == interface_id && pair.variables == *variables && pair.active_set == *set))
            .then_some(*id)
        })
    }

    /// The next `n` fresh entries in FIFO order that are not already
    /// dispatched, without removing them from the queue.
    #[must_use]
    pub fn peek_order(&self) -> &[EvalId] {
        &self.order
    }

    #[must_use]
    pub fn get(&self, eval_id: EvalId) -> Option<&ParamResponsePair> {
        self.entries.get(&eval_id)
    }

    /// Removes a fresh entry from the queue (it has been dispatched or
    /// completed) and returns every duplicate id that shadows it, so
    /// callers can fold the same response into each.
    pub fn complete(&mut self, eval_id: EvalId, response: Response) -> (ParamResponsePair, Vec<EvalId>) {
        let idx = self.order.iter().position(|id| *id == eval_id);
        if let Some(idx) = idx {
            self.order.remove(idx);
        }
        let mut pair = self.entries.remove(&eval_id).expect("complete() called on an unknown evaluation id");
        pair.response = response;
        let duplicates = self.shadowed_by.remove(&eval_id).unwrap_or_default();
        (pair, duplicates)
    }
}
