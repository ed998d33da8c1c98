// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Partition Topology (component E, spec §4.E): one level of the nested
//! partition tree (world → iterator → evaluation → analysis), plus the
//! ordered-iterator [`ParallelConfiguration`] that selects a path
//! through the level list.
//!
//! Cyclic level/communicator graphs are avoided the way spec §9 asks:
//! levels live in one owned `Vec` and configurations hold indices into
//! it rather than owning or pointing at levels directly.

pub mod resolve;

pub use resolve::{DefaultConfigHint, ResolveRequest, Resolution, SchedulingOverride, Topology};

use crate::comm::LocalCommunicator;
use std::sync::Arc;

/// Nesting depth a level sits at (spec §3: "world → iterator →
/// evaluation → analysis").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LevelKind {
    World,
    Iterator,
    Evaluation,
    Analysis,
}

/// One level of the partition tree (spec §3 "Partition level" record).
///
/// The level's communicator, when present, is a hub-side
/// [`LocalCommunicator`] over its `num_servers` servers: it *is* the
/// "hub server inter-communicator" this level owns, per spec §4.E's
/// "constructed from the master/peer-1 side to each other server
/// partition". A level built with `owns_communicator = false` aliases
/// another level's communicator rather than owning one.
pub struct PartitionLevel {
    pub kind: LevelKind,
    pub num_servers: usize,
    pub processors_per_server: usize,
    pub processor_remainder: usize,
    pub server_id: usize,
    pub topology: Topology,
    pub idle_partition: bool,
    owns_communicator: bool,
    communicator: Option<Arc<LocalCommunicator>>,
}

impl PartitionLevel {
    /// Builds an owning level from a [`Resolution`], constructing a
    /// fresh hub communicator over its servers (spec §4.E: "duplication
    /// uses the collective 'duplicate communicator' primitive to
    /// guarantee a fresh context").
    #[must_use]
    pub fn from_resolution(kind: LevelKind, server_id: usize, resolution: Resolution) -> (Self, Vec<crate::comm::ServerEndpoint>) {
        let (comm, endpoints) = LocalCommunicator::build(resolution.num_servers);
        let level = Self {
            kind,
            num_servers: resolution.num_servers,
            processors_per_server: resolution.processors_per_server,
            processor_remainder: resolution.processor_remainder,
            server_id,
            topology: resolution.topology,
            idle_partition: resolution.idle_partition,
            owns_communicator: true,
            communicator: Some(Arc::new(comm)),
        };
        (level, endpoints)
    }

    /// Builds a level that aliases another level's communicator rather
    /// than owning a fresh one (spec §3: "aliased vs. deep-duplicated
    /// copies are distinguished").
    #[must_use]
    pub fn alias(kind: LevelKind, server_id: usize, resolution: Resolution, shared: &Arc<LocalCommunicator>) -> Self {
        Self {
            kind,
            num_servers: resolution.num_servers,
            processors_per_server: resolution.processors_per_server,
            processor_remainder: resolution.processor_remainder,
            server_id,
            topology: resolution.topology,
            idle_partition: resolution.idle_partition,
            owns_communicator: false,
            communicator: Some(Arc::clone(shared)),
        }
    }

    /// Whether this level owns its communicator (and so is responsible
    /// for releasing it) rather than aliasing another level's.
    #[must_use]
    pub fn owns_communicator(&self) -> bool {
        self.owns_communicator
    }

    #[must_use]
    pub fn dedicated_master(&self) -> bool {
        self.topology.is_dedicated_master()
    }

    #[must_use]
    pub fn message_pass(&self) -> bool {
        self.topology.message_pass()
    }

    #[must_use]
    pub fn num_servers(&self) -> usize {
        self.num_servers
    }

    #[must_use]
    pub fn processors_per_server(&self) -> usize {
        self.processors_per_server
    }

    #[must_use]
    pub fn server_id(&self) -> usize {
        self.server_id
    }

    /// The level's own intra-communicator. Since this crate models
    /// ranks as threads within one process, the intra- and hub-inter
    /// communicator coincide; a networked `Communicator` implementation
    /// would distinguish the two.
    #[must_use]
    pub fn server_intra_communicator(&self) -> Option<&Arc<LocalCommunicator>> {
        self.communicator.as_ref()
    }

    /// The sole surface the scheduler is permitted to reach into (spec
    /// §4.E "public predicates ... the sole surface for the scheduler").
    #[must_use]
    pub fn hub_server_inter_communicators(&self) -> Option<&Arc<LocalCommunicator>> {
        self.communicator.as_ref()
    }
}

/// An ordered set of iterators into the level list selecting one path
/// from world down to the analysis level (spec §3 "Parallel
/// configuration"). Configurations reference levels by index; they do
/// not own them.
#[derive(Debug, Clone, Default)]
pub struct ParallelConfiguration {
    level_indices: Vec<usize>,
}

impl ParallelConfiguration {
    #[must_use]
    pub fn new(level_indices: Vec<usize>) -> Self {
        Self { level_indices }
    }

    /// The level this configuration selects at nesting `depth`, if any.
    #[must_use]
    pub fn level<'a>(&self, levels: &'a [PartitionLevel], depth: usize) -> Option<&'a PartitionLevel> {
        self.level_indices.get(depth).and_then(|&i| levels.get(i))
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.level_indices.len()
    }
}
