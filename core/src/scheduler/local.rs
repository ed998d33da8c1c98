// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Local-async scheduling (spec §4.D "Local-async scheduling"): a
//! single-process pool of size `K` (0 = unlimited), launched through the
//! [`Driver`]'s async primitives and backfilled as jobs complete.
//!
//! Two sub-modes (spec §4.D): *dynamic*, where any pending job is
//! eligible to backfill a freed slot, and *static-limited*, where job id
//! `i` is pinned to slot `i mod (K * servers)` and a slot may only be
//! backfilled by a job that maps to it (spec §4.D step 4).

use crate::error::CoreResult;
use crate::model::{EvalId, ParamResponsePair, Response};
use crate::transport::{Driver, TransportOutcome};
use std::collections::VecDeque;
use tracing::debug;

/// Whether a freed local slot may be backfilled by any pending job, or
/// only by the job pinned to it (spec §4.D sub-modes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalMode {
    Dynamic,
    StaticLimited { modulus: usize },
}

/// One outcome the caller must route to the cache/output map, or to
/// failure recovery if `outcome` is not `Ok`.
pub struct LocalCompletion {
    pub pair: ParamResponsePair,
    pub outcome: TransportOutcome,
}

/// Drives a bounded pool of locally async evaluations against one
/// [`Driver`] (spec §4.D "Local-async scheduling").
pub struct LocalAsyncPool {
    concurrency: usize,
    mode: LocalMode,
    /// Slot each active evaluation id currently occupies, under
    /// static-limited mode; unused under dynamic mode.
    slot_of: std::collections::HashMap<EvalId, usize>,
    active: VecDeque<EvalId>,
}

impl LocalAsyncPool {
    #[must_use]
    pub fn new(concurrency: usize, mode: LocalMode) -> Self {
        Self {
            concurrency,
            mode,
            slot_of: std::collections::HashMap::new(),
            active: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    #[must_use]
    pub fn is_active(&self, eval_id: EvalId) -> bool {
        self.active.contains(&eval_id)
    }

    fn capacity(&self) -> usize {
        if self.concurrency == 0 {
            usize::MAX
        } else {
            self.concurrency
        }
    }

    fn eligible(&self, eval_id: EvalId, slot: usize) -> bool {
        match self.mode {
            LocalMode::Dynamic => true,
            LocalMode::StaticLimited { modulus } => modulus == 0 || (eval_id as usize) % modulus == slot,
        }
    }

    /// Launches jobs in FIFO order from `pending` until capacity is
    /// reached (spec §4.D step 1: "launch min(K, |queue|) jobs in order
    /// of insertion").
    pub fn fill(&mut self, driver: &mut Driver, pending: &mut VecDeque<ParamResponsePair>) -> CoreResult<()> {
        while self.active.len() < self.capacity() {
            let Some(slot) = self.next_free_slot() else { break };
            let Some(idx) = pending.iter().position(|p| self.eligible(p.eval_id, slot)) else {
                break;
            };
            let pair = pending.remove(idx).expect("index just located");
            let eval_id = pair.eval_id;
            debug!(eval_id, slot, "launching local-async evaluation");
            driver.derived_map_async(pair)?;
            self.slot_of.insert(eval_id, slot);
            self.active.push_back(eval_id);
        }
        Ok(())
    }

    fn next_free_slot(&self) -> Option<usize> {
        match self.mode {
            LocalMode::Dynamic => Some(0),
            LocalMode::StaticLimited { modulus } => {
                if modulus == 0 {
                    return Some(0);
                }
                (0..modulus).find(|slot| !self.slot_of.values().any(|s| s == slot))
            }
        }
    }

    /// Processes whatever has completed (blocking if `blocking`, a
    /// single non-blocking pass otherwise), then backfills one pending
    /// job per freed slot (spec §4.D steps 2-3).
    ///
    /// Used by the blocking `synchronize` path, where a freed slot is
    /// refilled in the same pass.
    pub fn drain_once(
        &mut self,
        driver: &mut Driver,
        pending: &mut VecDeque<ParamResponsePair>,
        blocking: bool,
    ) -> CoreResult<Vec<LocalCompletion>> {
        let completions = self.test_once(driver, blocking)?;
        self.fill(driver, pending)?;
        Ok(completions)
    }

    /// Processes whatever has completed without backfilling the slots it
    /// frees (`synchronize_nowait`'s deferred-backfill rule: a slot freed
    /// during one non-blocking call is only eligible for a new job on
    /// the *next* call, once the caller has had a chance to enqueue
    /// further requests).
    pub fn test_once(&mut self, driver: &mut Driver, blocking: bool) -> CoreResult<Vec<LocalCompletion>> {
        let finished = if blocking { driver.wait_local()? } else { driver.test_local()? };
        let mut completions = Vec::with_capacity(finished.len());
        for (pair, outcome) in finished {
            self.active.retain(|id| *id != pair.eval_id);
            self.slot_of.remove(&pair.eval_id);
            completions.push(LocalCompletion { pair, outcome });
        }
        Ok(completions)
    }
}

/// Runs a local-async pool to exhaustion against every pair in
/// `pending`, folding each outcome through `on_complete` (used by the
/// blocking `synchronize` path; `synchronize_nowait` drives a
/// [`LocalAsyncPool`] directly instead so state persists across calls).
pub fn drain_to_completion(
    driver: &mut Driver,
    mode: LocalMode,
    concurrency: usize,
    mut pending: VecDeque<ParamResponsePair>,
    mut on_complete: impl FnMut(ParamResponsePair, TransportOutcome) -> CoreResult<Response>,
) -> CoreResult<()> {
    let mut pool = LocalAsyncPool::new(concurrency, mode);
    pool.fill(driver, &mut pending)?;
    while pool.active_count() > 0 {
        let completions = pool.drain_once(driver, &mut pending, true)?;
        for completion in completions {
            on_complete(completion.pair, completion.outcome)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActiveSet, Variables};
    use crate::transport::{Filing, FilingPolicy};
    use std::sync::Arc;

    fn driver_with_concurrency() -> Driver {
        let transport = crate::transport::Transport::InProcess(Arc::new(|vars: &Variables, set: &ActiveSet| {
            let mut response = crate::model::Response::new_shaped(vec!["f".into()], 0, set.clone());
            response.function_values[0] = vars.continuous.values[0];
            Ok(response)
        }));
        Driver::new(
            "sim",
            vec![transport],
            FilingPolicy { mode: Filing::InMemory, ..FilingPolicy::default() },
            crate::transport::WorkDirectoryPolicy::default(),
        )
    }

    #[test]
    fn fifo_launch_order_respected_under_dynamic_mode() {
        let mut driver = driver_with_concurrency();
        let mut pool = LocalAsyncPool::new(2, LocalMode::Dynamic);
        let mut pending: VecDeque<ParamResponsePair> = (1..=3)
            .map(|i| ParamResponsePair::new_request(i, "sim", Variables::from_continuous(vec![i as f64]), ActiveSet::values_only(1)))
            .collect();
        pool.fill(&mut driver, &mut pending).unwrap();
        assert_eq!(pool.active_count(), 2);
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn drain_to_completion_processes_every_job() {
        let mut driver = driver_with_concurrency();
        let pending: VecDeque<ParamResponsePair> = (1..=5)
            .map(|i| ParamResponsePair::new_request(i, "sim", Variables::from_continuous(vec![i as f64]), ActiveSet::values_only(1)))
            .collect();
        let mut seen = Vec::new();
        drain_to_completion(&mut driver, LocalMode::Dynamic, 2, pending, |pair, outcome| {
            if let TransportOutcome::Ok(response) = outcome {
                seen.push(pair.eval_id);
                Ok(response)
            } else {
                panic!("expected success")
            }
        })
        .unwrap();
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }
}
