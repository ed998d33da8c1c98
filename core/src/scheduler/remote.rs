// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Remote partition dispatch (spec §4.D): dedicated-master, peer-static
//! and peer-dynamic, all built on top of [`RemoteDispatcher`], which
//! owns the "active remote job table" (spec §3: "a map from
//! evaluation-id to (server-index, buffer-index) for jobs currently
//! running on remote partitions") and the send/recv buffer ownership
//! spec §5 assigns to the scheduler.
//!
//! Server ranks run [`serve_evaluations`] (spec §6 algorithm-facing
//! surface): receive an assignment, evaluate it through a [`Driver`],
//! send the completion back, until a stop token arrives.

use crate::comm::{CompletionStatus, LocalCommunicator, Message};
use crate::error::{CoreError, CoreResult};
use crate::model::{EvalId, ParamResponsePair};
use crate::transport::{Driver, TransportOutcome};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, warn};

/// The server-rank loop (spec §6: "compute servers treat evaluation-id
/// zero as a request to return from their serve loop").
pub fn serve_evaluations(endpoint: crate::comm::ServerEndpoint, mut driver: Driver) {
    loop {
        match endpoint.from_hub.recv() {
            Ok(Message::Assign(mut pair)) => {
                let status = match driver.derived_map(&mut pair) {
                    Ok(TransportOutcome::Ok(response)) => {
                        pair.response = response;
                        CompletionStatus::Ok
                    }
                    Ok(TransportOutcome::EvalFailure(message)) => CompletionStatus::EvalFailure(message),
                    Ok(TransportOutcome::InvalidResponse(message)) => CompletionStatus::InvalidResponse(message),
                    Err(e) => CompletionStatus::EvalFailure(e.to_string()),
                };
                if endpoint.to_hub.send(Message::Completed(pair, status)).is_err() {
                    break;
                }
            }
            Ok(Message::Stop) | Err(_) => break,
            Ok(Message::Completed(..)) => {
                warn!(server = endpoint.server_index, "server rank received a completion message; ignoring");
            }
        }
    }
}

/// Spawns one OS thread per server endpoint running [`serve_evaluations`]
/// against a fresh [`Driver`] built by `driver_factory` (spec §5: "There
/// are no user-visible threads in the core"; these model separate MPI
/// ranks, not within-process concurrency visible to the algorithm).
pub fn spawn_servers(
    endpoints: Vec<crate::comm::ServerEndpoint>,
    driver_factory: Arc<dyn Fn() -> Driver + Send + Sync>,
) -> Vec<JoinHandle<()>> {
    endpoints
        .into_iter()
        .map(|endpoint| {
            let factory = Arc::clone(&driver_factory);
            std::thread::spawn(move || serve_evaluations(endpoint, factory()))
        })
        .collect()
}

/// Owns the active remote job table (spec §3) and round-robin
/// assignment cursor; persists across `synchronize_nowait` calls (spec
/// §4.D "Non-blocking variants").
pub struct RemoteDispatcher {
    /// server-index -> evaluation id currently running there.
    running: DashMap<usize, EvalId>,
    num_servers: usize,
    next_server: usize,
}

impl RemoteDispatcher {
    #[must_use]
    pub fn new(num_servers: usize) -> Self {
        Self {
            running: DashMap::new(),
            num_servers,
            next_server: 0,
        }
    }

    #[must_use]
    pub fn num_servers(&self) -> usize {
        self.num_servers
    }

    #[must_use]
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    #[must_use]
    pub fn is_running(&self, eval_id: EvalId) -> bool {
        self.running.iter().any(|entry| *entry.value() == eval_id)
    }

    fn free_server(&self) -> Option<usize> {
        (0..self.num_servers).find(|idx| !self.running.contains_key(idx))
    }

    /// Sends `pair` to the next free server, round-robin (spec §4.D
    /// "one per server round-robin").
    pub fn assign_next(&mut self, comm: &LocalCommunicator, pair: ParamResponsePair) -> CoreResult<bool> {
        let Some(server_index) = self.free_server() else { return Ok(false) };
        self.assign_to(comm, server_index, pair)?;
        Ok(true)
    }

    pub fn assign_to(&mut self, comm: &LocalCommunicator, server_index: usize, pair: ParamResponsePair) -> CoreResult<()> {
        debug!(server_index, eval_id = pair.eval_id, "assigning evaluation to remote server");
        self.running.insert(server_index, pair.eval_id);
        self.next_server = (server_index + 1) % self.num_servers.max(1);
        comm.send_to(server_index, Message::Assign(pair))
    }

    /// Blocking: waits for any server to report a completion (spec §4.D
    /// dynamic master-slave step 3: "wait for *any* completions").
    pub fn collect_one_blocking(&mut self, comm: &LocalCommunicator) -> CoreResult<(usize, ParamResponsePair, CompletionStatus)> {
        let (server_index, message) = comm.recv_any()?;
        self.on_completion(server_index, message)
    }

    /// Non-blocking: returns immediately if nothing has completed (spec
    /// §4.D "test ... non-blockingly").
    pub fn try_collect_one(&mut self, comm: &LocalCommunicator) -> CoreResult<Option<(usize, ParamResponsePair, CompletionStatus)>> {
        match comm.try_recv_any() {
            Some((server_index, message)) => Ok(Some(self.on_completion(server_index, message)?)),
            None => Ok(None),
        }
    }

    fn on_completion(&mut self, server_index: usize, message: Message) -> CoreResult<(usize, ParamResponsePair, CompletionStatus)> {
        self.running.remove(&server_index);
        match message {
            Message::Completed(pair, status) => Ok((server_index, pair, status)),
            other => Err(CoreError::InterfaceError(format!(
                "expected a completion message from server {server_index}, got {other:?}"
            ))),
        }
    }

    /// Broadcasts the stop token on every server's inter-communicator
    /// (spec §6 "Process-group retirement", including idle partitions).
    pub fn retire(&self, comm: &LocalCommunicator) {
        if comm.broadcast(&Message::Stop).is_err() {
            warn!("stop-token retirement failed; some server ranks may not exit cleanly");
        }
    }
}

/// Runs the dedicated-master pattern to completion (spec §4.D "Dynamic
/// master-slave (blocking)").
pub fn dedicated_master_blocking(
    comm: &LocalCommunicator,
    dispatcher: &mut RemoteDispatcher,
    mut pending: VecDeque<ParamResponsePair>,
    mut on_complete: impl FnMut(ParamResponsePair, CompletionStatus) -> CoreResult<()>,
) -> CoreResult<()> {
    let capacity = dispatcher.num_servers();
    for _ in 0..capacity {
        let Some(pair) = pending.pop_front() else { break };
        dispatcher.assign_next(comm, pair)?;
    }

    while dispatcher.running_count() > 0 {
        let (server_index, pair, status) = dispatcher.collect_one_blocking(comm)?;
        on_complete(pair, status)?;
        if let Some(next) = pending.pop_front() {
            dispatcher.assign_to(comm, server_index, next)?;
        }
    }
    Ok(())
}

/// Runs the peer-static pattern to completion (spec §4.D "Peer-static
/// (blocking)"). `peer1_share` is peer 1's own pre-assigned jobs, driven
/// through `local_pool`; remote peers get one distribution wave.
///
/// Spec §4.D step 4 brackets the local share with barriers so peer-1
/// never reads a remote result before the peer that produced it has
/// written it. Here every remote result crosses back over its own
/// `Message::Completed` send, which already establishes that
/// happens-before relationship, so no separate barrier is needed (and,
/// since server ranks never join one, calling `comm.barrier()` here
/// would hang waiting for parties that never arrive).
pub fn peer_static_blocking(
    comm: &LocalCommunicator,
    dispatcher: &mut RemoteDispatcher,
    mut remote_share: VecDeque<ParamResponsePair>,
    peer1_share: VecDeque<ParamResponsePair>,
    driver: &mut Driver,
    local_concurrency: usize,
    mut on_complete: impl FnMut(ParamResponsePair, CompletionStatus) -> CoreResult<()>,
) -> CoreResult<()> {
    for server_index in 0..dispatcher.num_servers() {
        if let Some(pair) = remote_share.pop_front() {
            dispatcher.assign_to(comm, server_index, pair)?;
        }
    }

    super::local::drain_to_completion(
        driver,
        super::local::LocalMode::Dynamic,
        local_concurrency,
        peer1_share,
        |pair, outcome| {
            let response = match &outcome {
                TransportOutcome::Ok(r) => r.clone(),
                _ => pair.response.clone(),
            };
            on_complete(
                pair.clone(),
                match outcome {
                    TransportOutcome::Ok(_) => CompletionStatus::Ok,
                    TransportOutcome::EvalFailure(m) => CompletionStatus::EvalFailure(m),
                    TransportOutcome::InvalidResponse(m) => CompletionStatus::InvalidResponse(m),
                },
            )?;
            Ok(response)
        },
    )?;

    while dispatcher.running_count() > 0 {
        let (server_index, pair, status) = dispatcher.collect_one_blocking(comm)?;
        on_complete(pair, status)?;
        if let Some(next) = remote_share.pop_front() {
            dispatcher.assign_to(comm, server_index, next)?;
        }
    }
    Ok(())
}

/// Runs the peer-dynamic pattern to completion (spec §4.D "Peer-dynamic
/// (blocking)"): an initial capacity-sized wave, then backfill from
/// whichever of remote or local completes first.
pub fn peer_dynamic_blocking(
    comm: &LocalCommunicator,
    dispatcher: &mut RemoteDispatcher,
    mut pending: VecDeque<ParamResponsePair>,
    driver: &mut Driver,
    local_concurrency: usize,
    mut on_complete: impl FnMut(ParamResponsePair, CompletionStatus) -> CoreResult<()>,
) -> CoreResult<()> {
    let mut local_pool = super::local::LocalAsyncPool::new(local_concurrency, super::local::LocalMode::Dynamic);

    for _ in 0..dispatcher.num_servers() {
        let Some(pair) = pending.pop_front() else { break };
        dispatcher.assign_next(comm, pair)?;
    }
    local_pool.fill(driver, &mut pending)?;

    while dispatcher.running_count() > 0 || local_pool.active_count() > 0 {
        if let Some((server_index, pair, status)) = dispatcher.try_collect_one(comm)? {
            on_complete(pair, status)?;
            if let Some(next) = pending.pop_front() {
                dispatcher.assign_to(comm, server_index, next)?;
            }
        }
        let local_completions = local_pool.drain_once(driver, &mut pending, false)?;
        for completion in local_completions {
            let status = match &completion.outcome {
                TransportOutcome::Ok(_) => CompletionStatus::Ok,
                TransportOutcome::EvalFailure(m) => CompletionStatus::EvalFailure(m.clone()),
                TransportOutcome::InvalidResponse(m) => CompletionStatus::InvalidResponse(m.clone()),
            };
            on_complete(completion.pair, status)?;
        }
        if dispatcher.running_count() > 0 && local_pool.active_count() == 0 && pending.is_empty() {
            // Nothing local to do; block on the remaining remote work.
            let (server_index, pair, status) = dispatcher.collect_one_blocking(comm)?;
            on_complete(pair, status)?;
            if let Some(next) = pending.pop_front() {
                dispatcher.assign_to(comm, server_index, next)?;
            }
        }
    }
    Ok(())
}
