// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Evaluation Scheduler (component D, spec §4.D — the dominant
//! component of the core): accepts requests through [`Scheduler::map`],
//! drains them through whichever [`dispatch::Strategy`] the current
//! partition topology calls for, and folds completions back through
//! failure recovery and the evaluation cache.

pub mod dispatch;
pub mod local;
pub mod queue;
pub mod remote;

pub use dispatch::{choose, DispatchInputs, Strategy};
pub use local::{LocalAsyncPool, LocalCompletion, LocalMode};
pub use queue::{Disposition, PendingQueue};
pub use remote::RemoteDispatcher;

use crate::cache::journal::JournalWriter;
use crate::cache::EvaluationCache;
use crate::comm::CompletionStatus;
use crate::error::{CoreError, CoreResult};
use crate::model::{ActiveSet, EvalId, InterfaceId, ParamResponsePair, Response, Variables};
use crate::recovery::{recover, FailureMode};
use crate::topology::PartitionLevel;
use crate::transport::{Driver, TransportOutcome};
use std::collections::{BTreeMap, VecDeque};
use std::io::Write;
use tracing::{debug, info, warn};

/// Everything [`Scheduler::new`] needs that does not change between
/// `synchronize` calls (spec §6 configuration options feeding component
/// D).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub cache_enabled: bool,
    pub nearby_tolerance: Option<f64>,
    pub local_concurrency: usize,
    pub local_mode: LocalMode,
    pub user_requested_master: bool,
    pub local_evaluation_precluded: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            nearby_tolerance: None,
            local_concurrency: 1,
            local_mode: LocalMode::Dynamic,
            user_requested_master: false,
            local_evaluation_precluded: false,
        }
    }
}

/// The scheduler: owns the pending-request queue and whatever
/// persisted dispatch state a non-blocking run needs across calls
/// (spec §3 "Evaluation scheduler" record; spec §9 notes this state —
/// the active local/remote job tables, the output map, and the
/// header-printed flag — belongs to the scheduler, not module globals).
pub struct Scheduler {
    driver: Driver,
    config: SchedulerConfig,
    failure_mode: FailureMode,
    queue: PendingQueue,
    local_pool: LocalAsyncPool,
    remote_dispatcher: Option<RemoteDispatcher>,
    /// Completed responses not yet drained out by the caller, ordered by
    /// ascending evaluation id (spec §4.D: "the output map is ordered by
    /// evaluation id, not completion order").
    results: BTreeMap<EvalId, Response>,
    header_printed: bool,
}

impl Scheduler {
    #[must_use]
    pub fn new(driver: Driver, failure_mode: FailureMode, config: SchedulerConfig) -> Self {
        let local_pool = LocalAsyncPool::new(config.local_concurrency, config.local_mode);
        Self {
            driver,
            config,
            failure_mode,
            queue: PendingQueue::new(),
            local_pool,
            remote_dispatcher: None,
            results: BTreeMap::new(),
            header_printed: false,
        }
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    /// Enqueues one request (spec §4.D `map`). Cache/queue duplicates
    /// resolve immediately and never reach the transport driver.
    pub fn map(
        &mut self,
        eval_id: EvalId,
        interface_id: InterfaceId,
        variables: Variables,
        active_set: ActiveSet,
        cache: &EvaluationCache,
    ) -> Disposition {
        if !self.header_printed {
            info!(interface_id = %interface_id, "scheduler dispatching first evaluation");
            self.header_printed = true;
        }
        let disposition = self.queue.enqueue(
            eval_id,
            interface_id,
            variables,
            active_set,
            cache,
            self.config.cache_enabled,
            self.config.nearby_tolerance,
        );
        if let Disposition::HistoryDuplicate(response) = &disposition {
            self.results.insert(eval_id, response.clone());
        }
        disposition
    }

    /// Blocking drain of every pending fresh request (spec §4.D
    /// `synchronize`): picks a dispatch strategy from the current
    /// partition level and runs it to exhaustion, folding every
    /// completion through failure recovery and into `cache` (and
    /// `journal`, when a restart journal is configured).
    pub fn synchronize<W: Write>(
        &mut self,
        cache: &mut EvaluationCache,
        level: Option<&PartitionLevel>,
        mut journal: Option<&mut JournalWriter<W>>,
    ) -> CoreResult<BTreeMap<EvalId, Response>> {
        let inputs = DispatchInputs {
            local_concurrency: self.config.local_concurrency,
            user_requested_master: self.config.user_requested_master,
            local_evaluation_precluded: self.config.local_evaluation_precluded,
            nonblocking: false,
        };
        let strategy = dispatch::choose(level, inputs);
        debug!(?strategy, pending = self.queue.len(), "synchronize: dispatch strategy chosen");

        let fresh: VecDeque<ParamResponsePair> = self
            .queue
            .peek_order()
            .iter()
            .filter_map(|id| self.queue.get(*id).cloned())
            .collect();

        match strategy {
            Strategy::Synchronous => {
                for mut pair in fresh {
                    let outcome = self.driver.derived_map(&mut pair)?;
                    self.complete_one(pair, outcome, cache, journal.as_deref_mut())?;
                }
            }
            Strategy::LocalAsync => {
                let mut pending_local = fresh;
                let mut pool = LocalAsyncPool::new(self.config.local_concurrency, self.config.local_mode);
                pool.fill(&mut self.driver, &mut pending_local)?;
                while pool.active_count() > 0 {
                    let completions = pool.drain_once(&mut self.driver, &mut pending_local, true)?;
                    for LocalCompletion { pair, outcome } in completions {
                        self.complete_one(pair, outcome, cache, journal.as_deref_mut())?;
                    }
                }
            }
            Strategy::DedicatedMaster | Strategy::PeerStatic | Strategy::PeerDynamic => {
                let Some(comm) = level.and_then(|l| l.hub_server_inter_communicators()) else {
                    return Err(CoreError::InterfaceError(
                        "remote dispatch strategy chosen without a partition-level communicator".into(),
                    ));
                };
                let dispatcher = self.remote_dispatcher.get_or_insert_with(|| RemoteDispatcher::new(comm.num_servers()));
                let mut completed = Vec::new();
                match strategy {
                    Strategy::DedicatedMaster => {
                        remote::dedicated_master_blocking(comm, dispatcher, fresh, |pair, status| {
                            completed.push((pair, status));
                            Ok(())
                        })?;
                    }
                    Strategy::PeerDynamic => {
                        remote::peer_dynamic_blocking(
                            comm,
                            dispatcher,
                            fresh,
                            &mut self.driver,
                            self.config.local_concurrency,
                            |pair, status| {
                                completed.push((pair, status));
                                Ok(())
                            },
                        )?;
                    }
                    Strategy::PeerStatic => {
                        let servers_total = dispatcher.num_servers() + 1;
                        let mut remote_share = VecDeque::new();
                        let mut peer1_share = VecDeque::new();
                        for (i, pair) in fresh.into_iter().enumerate() {
                            if i % servers_total == 0 {
                                peer1_share.push_back(pair);
                            } else {
                                remote_share.push_back(pair);
                            }
                        }
                        remote::peer_static_blocking(
                            comm,
                            dispatcher,
                            remote_share,
                            peer1_share,
                            &mut self.driver,
                            self.config.local_concurrency,
                            |pair, status| {
                                completed.push((pair, status));
                                Ok(())
                            },
                        )?;
                    }
                    _ => unreachable!(),
                }
                for (pair, status) in completed {
                    let outcome = match status {
                        CompletionStatus::Ok => TransportOutcome::Ok(pair.response.clone()),
                        CompletionStatus::EvalFailure(m) => TransportOutcome::EvalFailure(m),
                        CompletionStatus::InvalidResponse(m) => TransportOutcome::InvalidResponse(m),
                    };
                    self.complete_one(pair, outcome, cache, journal.as_deref_mut())?;
                }
            }
        }

        Ok(std::mem::take(&mut self.results))
    }

    /// Non-blocking drain of whatever has completed so far (spec §4.D
    /// "Non-blocking variants" / `synchronize_nowait`): launches into any
    /// slot freed by a *previous* call, tests once without blocking, and
    /// defers backfilling the slots this call frees to the next call
    /// (spec §4.D deferred-backfill rule).
    pub fn synchronize_nowait<W: Write>(
        &mut self,
        cache: &mut EvaluationCache,
        level: Option<&PartitionLevel>,
        mut journal: Option<&mut JournalWriter<W>>,
    ) -> CoreResult<BTreeMap<EvalId, Response>> {
        let inputs = DispatchInputs {
            local_concurrency: self.config.local_concurrency,
            user_requested_master: self.config.user_requested_master,
            local_evaluation_precluded: self.config.local_evaluation_precluded,
            nonblocking: true,
        };
        let strategy = dispatch::choose(level, inputs);

        let mut pending: VecDeque<ParamResponsePair> = self
            .queue
            .peek_order()
            .iter()
            .filter(|id| !self.is_already_dispatched(**id))
            .filter_map(|id| self.queue.get(*id).cloned())
            .collect();

        match strategy {
            Strategy::Synchronous | Strategy::LocalAsync => {
                self.local_pool.fill(&mut self.driver, &mut pending)?;
                let completions = self.local_pool.test_once(&mut self.driver, false)?;
                for LocalCompletion { pair, outcome } in completions {
                    self.complete_one(pair, outcome, cache, journal.as_deref_mut())?;
                }
            }
            Strategy::DedicatedMaster | Strategy::PeerDynamic | Strategy::PeerStatic => {
                let Some(comm) = level.and_then(|l| l.hub_server_inter_communicators()) else {
                    return Err(CoreError::InterfaceError(
                        "remote dispatch strategy chosen without a partition-level communicator".into(),
                    ));
                };
                let dispatcher = self.remote_dispatcher.get_or_insert_with(|| RemoteDispatcher::new(comm.num_servers()));
                while let Some(pair) = pending.pop_front() {
                    if !dispatcher.assign_next(comm, pair.clone())? {
                        pending.push_front(pair);
                        break;
                    }
                }
                if let Some((_server_index, pair, status)) = dispatcher.try_collect_one(comm)? {
                    let outcome = match status {
                        CompletionStatus::Ok => TransportOutcome::Ok(pair.response.clone()),
                        CompletionStatus::EvalFailure(m) => TransportOutcome::EvalFailure(m),
                        CompletionStatus::InvalidResponse(m) => TransportOutcome::InvalidResponse(m),
                    };
                    self.complete_one(pair, outcome, cache, journal.as_deref_mut())?;
                }
            }
        }

        Ok(std::mem::take(&mut self.results))
    }

    fn is_already_dispatched(&self, eval_id: EvalId) -> bool {
        self.local_pool.is_active(eval_id)
            || self
                .remote_dispatcher
                .as_ref()
                .is_some_and(|d| d.is_running(eval_id))
    }

    fn complete_one<W: Write>(
        &mut self,
        pair: ParamResponsePair,
        outcome: TransportOutcome,
        cache: &mut EvaluationCache,
        journal: Option<&mut JournalWriter<W>>,
    ) -> CoreResult<()> {
        let response = match outcome {
            TransportOutcome::Ok(response) => response,
            TransportOutcome::EvalFailure(_) | TransportOutcome::InvalidResponse(_) => {
                warn!(eval_id = pair.eval_id, "evaluation failed; entering recovery");
                let driver = &mut self.driver;
                let mut evaluate = |vars: &Variables| -> CoreResult<TransportOutcome> {
                    let mut retry_pair = pair.clone();
                    retry_pair.variables = vars.clone();
                    driver.derived_map(&mut retry_pair)
                };
                recover(&self.failure_mode, &pair, cache, &mut evaluate)?
            }
        };

        let (mut completed_pair, duplicates) = self.queue.complete(pair.eval_id, response.clone());
        completed_pair.response = response.clone();
        if let Some(journal) = journal {
            journal.append(&completed_pair)?;
        }
        cache.insert(completed_pair);
        self.results.insert(pair.eval_id, response.clone());
        for dup_id in duplicates {
            self.results.insert(dup_id, response.clone());
        }
        Ok(())
    }

    /// Broadcasts the stop token across every server of `level`'s
    /// communicator, including idle partitions (spec §6 "Process-group
    /// retirement").
    pub fn stop_evaluation_servers(&self, level: &PartitionLevel) {
        if let Some(comm) = level.hub_server_inter_communicators() {
            let dispatcher = RemoteDispatcher::new(comm.num_servers());
            dispatcher.retire(comm);
        }
    }
}
