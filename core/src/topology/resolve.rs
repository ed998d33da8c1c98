// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The partition resolution algorithm (spec §4.E): turns a user's
//! server-count / processors-per-server / scheduling request into a
//! concrete [`Resolution`] for one level of the nested partition tree.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

/// An explicit user scheduling choice, or `Default` to let the resolver
/// pick (spec §4.E step 6: "an explicit user scheduling choice ... is
/// honored unless it is impossible"). Serializes to the spec §6
/// `evaluation-scheduling`/`analysis-scheduling` option's own spelling
/// (`default`, `master`, `peer-static`, `peer-dynamic`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulingOverride {
    Default,
    Master,
    PeerStatic,
    PeerDynamic,
}

impl Default for SchedulingOverride {
    fn default() -> Self {
        Self::Default
    }
}

/// Which topology the resolver prefers when the user left scheduling at
/// `Default` (spec §4.E step 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultConfigHint {
    PeerPreferred,
    MasterPreferred,
}

/// The resolved topology for a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    DedicatedMaster,
    PeerStatic,
    PeerDynamic,
}

impl Topology {
    #[must_use]
    pub fn is_dedicated_master(self) -> bool {
        matches!(self, Self::DedicatedMaster)
    }

    #[must_use]
    pub fn message_pass(self) -> bool {
        // Every resolved topology here is a message-passing one; a
        // single-server / no-override level never reaches resolve() at
        // all (the scheduler picks local-async or synchronous directly,
        // spec §4.D dispatch decision).
        true
    }
}

/// Inputs to one level's resolution (spec §4.E: "parent size P,
/// user-requested server count S_u, processors-per-server Q_u, max
/// concurrency M, per-server capacity multiplier K, and a
/// default-config hint").
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub parent_size: usize,
    pub requested_servers: Option<usize>,
    pub requested_processors_per_server: Option<usize>,
    pub max_concurrency: usize,
    pub capacity_multiplier: usize,
    pub default_hint: DefaultConfigHint,
    pub scheduling_override: SchedulingOverride,
    /// Whether at least one server is capable of non-blocking local
    /// scheduling: not a multiprocessor evaluation partition, and not
    /// an in-process driver (spec §4.E step 5).
    pub peer_dynamic_capable: bool,
}

/// The resolved shape and topology of one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub num_servers: usize,
    pub processors_per_server: usize,
    pub processor_remainder: usize,
    pub idle_partition: bool,
    pub topology: Topology,
}

/// Runs the six-step resolution algorithm for one level.
///
/// # Errors
///
/// Returns [`CoreError::ResolveError`] when the user's constraints
/// cannot be satisfied, or when an explicit scheduling override is
/// impossible (spec §4.E step 6: "impossibility produces a resolve-time
/// error, not a silent fallback").
pub fn resolve(req: &ResolveRequest) -> CoreResult<Resolution> {
    let parent = req.parent_size;
    if parent == 0 {
        return Err(CoreError::ResolveError("parent partition has zero processors".into()));
    }

    // Steps 1-3: derive (num_servers, processors_per_server, remainder).
    let (num_servers, processors_per_server, processor_remainder) =
        match (req.requested_servers, req.requested_processors_per_server) {
            (Some(s), Some(q)) => {
                if s == 0 || q == 0 {
                    return Err(CoreError::ResolveError(
                        "requested server count and processors-per-server must both be positive".into(),
                    ));
                }
                if s * q > parent {
                    return Err(CoreError::ResolveError(format!(
                        "requested {s} servers x {q} processors-per-server exceeds parent size {parent}"
                    )));
                }
                (s, q, parent - s * q)
            }
            (Some(s), None) => {
                if s == 0 || s > parent {
                    return Err(CoreError::ResolveError(format!(
                        "requested server count {s} is invalid for parent size {parent}"
                    )));
                }
                let q = parent / s;
                (s, q, parent - q * s)
            }
            (None, Some(q)) => {
                if q == 0 || q > parent {
                    return Err(CoreError::ResolveError(format!(
                        "requested processors-per-server {q} is invalid for parent size {parent}"
                    )));
                }
                let s = parent / q;
                (s, q, parent - q * s)
            }
            (None, None) => {
                let k = req.capacity_multiplier.max(1);
                let m = req.max_concurrency.max(1);
                let s = ((m + k - 1) / k).clamp(1, parent);
                let q = parent / s;
                (s, q, parent - q * s)
            }
        };

    let idle_partition = processor_remainder != 0;

    // Steps 4-6: choose topology.
    let topology = match req.scheduling_override {
        SchedulingOverride::Master => {
            if num_servers < 2 {
                return Err(CoreError::ResolveError(
                    "dedicated master requires at least two servers".into(),
                ));
            }
            Topology::DedicatedMaster
        }
        SchedulingOverride::PeerStatic => Topology::PeerStatic,
        SchedulingOverride::PeerDynamic => {
            if !req.peer_dynamic_capable {
                return Err(CoreError::ResolveError(
                    "peer-dynamic requires at least one server capable of non-blocking local scheduling".into(),
                ));
            }
            Topology::PeerDynamic
        }
        SchedulingOverride::Default => {
            if req.default_hint == DefaultConfigHint::MasterPreferred && num_servers >= 2 {
                Topology::DedicatedMaster
            } else if req.peer_dynamic_capable {
                Topology::PeerDynamic
            } else {
                Topology::PeerStatic
            }
        }
    };

    Ok(Resolution {
        num_servers,
        processors_per_server,
        processor_remainder,
        idle_partition,
        topology,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request(parent_size: usize) -> ResolveRequest {
        ResolveRequest {
            parent_size,
            requested_servers: None,
            requested_processors_per_server: None,
            max_concurrency: 1,
            capacity_multiplier: 1,
            default_hint: DefaultConfigHint::PeerPreferred,
            scheduling_override: SchedulingOverride::Default,
            peer_dynamic_capable: true,
        }
    }

    #[test]
    fn explicit_servers_and_processors_respected() {
        let mut req = base_request(10);
        req.requested_servers = Some(3);
        req.requested_processors_per_server = Some(3);
        let r = resolve(&req).unwrap();
        assert_eq!(r.num_servers, 3);
        assert_eq!(r.processors_per_server, 3);
        assert_eq!(r.processor_remainder, 1);
        assert!(r.idle_partition);
    }

    #[test]
    fn over_request_is_a_resolve_error() {
        let mut req = base_request(4);
        req.requested_servers = Some(3);
        req.requested_processors_per_server = Some(2);
        assert!(resolve(&req).is_err());
    }

    #[test]
    fn remainder_invariant_holds_across_derivation_paths() {
        for parent in [1usize, 2, 7, 16, 100] {
            let mut req = base_request(parent);
            req.requested_servers = Some((parent / 3).max(1));
            let r = resolve(&req).unwrap();
            assert_eq!(r.processors_per_server * r.num_servers + r.processor_remainder, parent);
        }
    }

    #[test]
    fn inference_from_concurrency_picks_minimum_servers() {
        let mut req = base_request(16);
        req.max_concurrency = 5;
        req.capacity_multiplier = 2;
        let r = resolve(&req).unwrap();
        // ceil(5 / 2) = 3 servers.
        assert_eq!(r.num_servers, 3);
    }

    #[test]
    fn master_override_requires_two_servers() {
        let mut req = base_request(4);
        req.requested_servers = Some(1);
        req.scheduling_override = SchedulingOverride::Master;
        assert!(resolve(&req).is_err());
    }

    #[test]
    fn peer_dynamic_override_requires_capability() {
        let mut req = base_request(8);
        req.scheduling_override = SchedulingOverride::PeerDynamic;
        req.peer_dynamic_capable = false;
        assert!(resolve(&req).is_err());
    }

    #[test]
    fn master_preferred_default_picks_dedicated_master() {
        let mut req = base_request(8);
        req.requested_servers = Some(4);
        req.default_hint = DefaultConfigHint::MasterPreferred;
        let r = resolve(&req).unwrap();
        assert_eq!(r.topology, Topology::DedicatedMaster);
    }
}
