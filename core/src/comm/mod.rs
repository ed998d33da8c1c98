// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Messaging primitives: typed point-to-point send/recv, collective
//! broadcast and barrier, and non-blocking test/wait over a process
//! group.
//!
//! The orchestration core treats these as an external collaborator
//! behind a narrow surface — the scheduler never reaches past it into
//! channel internals. [`LocalCommunicator`] is a single-process
//! implementation over `crossbeam` channels, standing in for ranks with
//! OS threads — enough to exercise every dispatch strategy without an
//! MPI installation. A networked implementation is a drop-in
//! replacement over the same shape.

use crate::error::{CoreError, CoreResult};
use crate::model::ParamResponsePair;
use crossbeam::channel::{self, Receiver, Select, Sender};
use std::sync::Arc;

/// How a server's evaluation of an assigned pair came out — the
/// driver's result type, carried back to the hub across the
/// communicator instead of raised as an exception.
#[derive(Debug, Clone)]
pub enum CompletionStatus {
    Ok,
    EvalFailure(String),
    InvalidResponse(String),
}

/// A message passed between a hub rank and one evaluation server.
#[derive(Debug, Clone)]
pub enum Message {
    /// Hub → server: evaluate this pair.
    Assign(ParamResponsePair),
    /// Server → hub: here is the completed pair (response populated iff
    /// `status` is `Ok`).
    Completed(ParamResponsePair, CompletionStatus),
    /// Hub → server: retire (a stop token, evaluation-id zero).
    Stop,
}

/// One end of a hub↔server channel pair, held by the hub.
struct ServerLink {
    to_server: Sender<Message>,
    from_server: Receiver<Message>,
}

/// One end of a hub↔server channel pair, held by a server rank.
pub struct ServerEndpoint {
    /// Server-local index (0-based; the externally-visible server id is this + 1).
    pub server_index: usize,
    /// Inbound assignments / stop tokens from the hub.
    pub from_hub: Receiver<Message>,
    /// Outbound completions to the hub.
    pub to_hub: Sender<Message>,
}

/// Hub-side communicator over `N` evaluation servers: the master/peer-1
/// side talking to each other server partition.
///
/// Non-blocking test and blocking wait are both expressed in terms of
/// `crossbeam::channel::Select` over the completion receivers — a
/// collective non-blocking test over the set of outstanding receives.
pub struct LocalCommunicator {
    links: Vec<ServerLink>,
    barrier: Arc<std::sync::Barrier>,
}

impl LocalCommunicator {
    /// Builds a hub communicator plus the per-server endpoints that
    /// should be handed to `num_servers` server-rank threads.
    #[must_use]
    pub fn build(num_servers: usize) -> (Self, Vec<ServerEndpoint>) {
        let mut links = Vec::with_capacity(num_servers);
        let mut endpoints = Vec::with_capacity(num_servers);
        // Barrier covers the hub plus every server rank.
        let barrier = Arc::new(std::sync::Barrier::new(num_servers + 1));

        for server_index in 0..num_servers {
            let (to_server_tx, to_server_rx) = channel::unbounded();
            let (to_hub_tx, to_hub_rx) = channel::unbounded();
            links.push(ServerLink {
                to_server: to_server_tx,
                from_server: to_hub_rx,
            });
            endpoints.push(ServerEndpoint {
                server_index,
                from_hub: to_server_rx,
                to_hub: to_hub_tx,
            });
        }

        (Self { links, barrier }, endpoints)
    }

    /// Number of evaluation servers reachable from this communicator.
    #[must_use]
    pub fn num_servers(&self) -> usize {
        self.links.len()
    }

    /// Point-to-point send to one server.
    pub fn send_to(&self, server_index: usize, message: Message) -> CoreResult<()> {
        self.links
            .get(server_index)
            .ok_or_else(|| CoreError::TransportError {
                site: "LocalCommunicator::send_to",
                message: format!("no such server index {server_index}"),
            })?
            .to_server
            .send(message)
            .map_err(|e| CoreError::TransportError {
                site: "LocalCommunicator::send_to",
                message: e.to_string(),
            })
    }

    /// Collective broadcast to every server.
    pub fn broadcast(&self, message: &Message) -> CoreResult<()> {
        for idx in 0..self.links.len() {
            self.send_to(idx, message.clone())?;
        }
        Ok(())
    }

    /// Non-blocking test across all outstanding server receives; returns
    /// immediately with `None` if nothing has completed.
    #[must_use]
    pub fn try_recv_any(&self) -> Option<(usize, Message)> {
        for (idx, link) in self.links.iter().enumerate() {
            if let Ok(msg) = link.from_server.try_recv() {
                return Some((idx, msg));
            }
        }
        None
    }

    /// Blocking wait for at least one server to complete.
    pub fn recv_any(&self) -> CoreResult<(usize, Message)> {
        if self.links.is_empty() {
            return Err(CoreError::TransportError {
                site: "LocalCommunicator::recv_any",
                message: "no servers to receive from".into(),
            });
        }
        let mut select = Select::new();
        for link in &self.links {
            select.recv(&link.from_server);
        }
        let op = select.select();
        let idx = op.index();
        let msg = op
            .recv(&self.links[idx].from_server)
            .map_err(|e| CoreError::TransportError {
                site: "LocalCommunicator::recv_any",
                message: e.to_string(),
            })?;
        Ok((idx, msg))
    }

    /// Blocking wait for every one of `server_indices` to have a message
    /// ready (the peer-static "wait_all" step).
    pub fn recv_all(&self, server_indices: &[usize]) -> CoreResult<Vec<(usize, Message)>> {
        server_indices
            .iter()
            .map(|&idx| {
                let link = self.links.get(idx).ok_or_else(|| CoreError::TransportError {
                    site: "LocalCommunicator::recv_all",
                    message: format!("no such server index {idx}"),
                })?;
                let msg = link.from_server.recv().map_err(|e| CoreError::TransportError {
                    site: "LocalCommunicator::recv_all",
                    message: e.to_string(),
                })?;
                Ok((idx, msg))
            })
            .collect()
    }

    /// Collective barrier (spec §1 "collective ... barrier"; spec §4.D
    /// peer-static: "Barriers bracket the local share").
    pub fn barrier(&self) {
        self.barrier.wait();
    }

    /// A cloneable handle a server thread can use to join the same
    /// barrier as the hub.
    #[must_use]
    pub fn barrier_handle(&self) -> Arc<std::sync::Barrier> {
        Arc::clone(&self.barrier)
    }
}
