// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Dispatch decision (spec §4.D): picks one of the five strategies given
//! a partition level (or its absence) and the configured local
//! asynchronous concurrency.
//!
//! Modeled as a tagged variant rather than trait objects (spec §9:
//! "Dynamic dispatch among scheduler strategies ... is modeled as a
//! tagged variant over strategy objects sharing a common capability set
//! {assign, test, wait, drain}"); [`Strategy`] is that tag, and
//! [`Scheduler`](super::Scheduler) matches on it once per `synchronize`
//! call.

use crate::topology::{PartitionLevel, Topology};

/// One of the five dispatch strategies spec §4.D names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    DedicatedMaster,
    PeerStatic,
    PeerDynamic,
    LocalAsync,
    Synchronous,
}

/// Inputs the dispatch decision needs beyond the partition level itself.
#[derive(Debug, Clone, Copy)]
pub struct DispatchInputs {
    /// `asynch-local-evaluation-concurrency` (0 = unlimited).
    pub local_concurrency: usize,
    /// User requested a dedicated master outright.
    pub user_requested_master: bool,
    /// Local evaluations are precluded: multiprocessor evaluation
    /// partitions, in-process driver type, or explicit static
    /// scheduling (spec §4.D preclusion rules).
    pub local_evaluation_precluded: bool,
    /// Whether this `synchronize` call is non-blocking
    /// (`synchronize_nowait`), which prefers peer-dynamic over
    /// peer-static when both are viable (spec §4.D).
    pub nonblocking: bool,
}

/// Chooses a dispatch strategy (spec §4.D "Dispatch decision" +
/// "Preclusion rules").
#[must_use]
pub fn choose(level: Option<&PartitionLevel>, inputs: DispatchInputs) -> Strategy {
    let Some(level) = level else {
        return if inputs.local_concurrency == 1 && !inputs.local_evaluation_precluded {
            Strategy::Synchronous
        } else {
            Strategy::LocalAsync
        };
    };

    if !level.message_pass() {
        return if inputs.local_concurrency == 1 {
            Strategy::Synchronous
        } else {
            Strategy::LocalAsync
        };
    }

    if inputs.user_requested_master || inputs.local_evaluation_precluded || level.dedicated_master() {
        return Strategy::DedicatedMaster;
    }

    match level.server_intra_communicator() {
        Some(_) => match level.topology {
            Topology::DedicatedMaster => Strategy::DedicatedMaster,
            Topology::PeerDynamic => Strategy::PeerDynamic,
            Topology::PeerStatic => Strategy::PeerStatic,
        },
        None => Strategy::LocalAsync,
    }
}
