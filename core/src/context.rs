// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! `CoreContext` (spec §9 design notes): the process-wide owner of the
//! evaluation cache, the restart journal and the scheduler, replacing
//! the module-level globals the original implementation keeps for its
//! singleton cache, journal and "current scheduler instance".
//!
//! Everything downstream (the CLI front end, a future in-process
//! embedding) gets a `&mut CoreContext` rather than reaching for
//! statics; construction is explicit (`CoreContext::new`) and so is
//! teardown (`CoreContext::shutdown`), matching the algorithm-facing
//! surface in spec §6 (`init_communicators`/`set_communicators` map onto
//! construction here; `stop_evaluation_servers` maps onto `shutdown`).

use crate::cache::journal::{JournalReader, JournalWriter};
use crate::cache::EvaluationCache;
use crate::config::Configuration;
use crate::error::CoreResult;
use crate::model::{ActiveSet, EvalId, InterfaceId, Response, Variables};
use crate::recovery::FailureMode;
use crate::scheduler::{remote, Scheduler, SchedulerConfig};
use crate::topology::resolve::{self, SchedulingOverride};
use crate::topology::{LevelKind, PartitionLevel, Resolution};
use crate::transport::{Driver, Transport};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::info;

/// The process-wide owner of the cache, the restart journal and the
/// scheduler for one run (spec §9: "a process-wide Core Context that
/// owns all of them with explicit init/teardown").
pub struct CoreContext {
    cache: EvaluationCache,
    journal: Option<JournalWriter<File>>,
    journal_path: Option<PathBuf>,
    scheduler: Scheduler,
    level: Option<PartitionLevel>,
    config: Configuration,
    next_eval_id: EvalId,
    /// Server-rank threads spawned for a level this context resolved
    /// for itself (empty when the caller hand-built `level`, since then
    /// the caller owns those threads).
    server_handles: Vec<JoinHandle<()>>,
}

impl CoreContext {
    /// Builds a fresh context: replays the restart journal up-front (spec
    /// §4.B design note: the hashed index must be populated before the
    /// first `map` call can consult it), opens the journal for further
    /// appends if `config.restart_file` is set, and constructs the
    /// scheduler from `driver`, `config` and an optional partition
    /// `level`.
    ///
    /// `level` lets a caller hand-build its own evaluation partition
    /// (as the scenario tests do); passing `None` does not automatically
    /// fall back to synchronous/local-async dispatch the way it used to
    /// — if `config` names an explicit `evaluation-scheduling` override
    /// or an `evaluation-servers` count, this resolves and spins up that
    /// partition itself (spec §4.E), so the configuration object alone
    /// is enough to pick master/peer-static/peer-dynamic without a
    /// library caller hand-building a `PartitionLevel`. Only when
    /// neither is set does `None` mean the synchronous/local-async
    /// fallback (spec §4.D strategy 5).
    ///
    /// # Errors
    ///
    /// Returns an error if the restart file exists but cannot be read or
    /// reopened for appending, or if an auto-resolved partition's
    /// constraints cannot be satisfied (spec §4.E).
    pub fn new(config: Configuration, mut driver: Driver, level: Option<PartitionLevel>) -> CoreResult<Self> {
        driver.resolve_tagging(config.asynch_local_evaluation_concurrency);

        let mut cache = EvaluationCache::new();
        let mut journal = None;
        let mut journal_path = None;

        if let Some(path) = &config.restart_file {
            if path.exists() {
                let file = File::open(path)?;
                let loaded = JournalReader::replay_into(BufReader::new(file), &mut cache)?;
                info!(path = %path.display(), loaded, "replayed restart journal");
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            journal = Some(JournalWriter::new(file));
            journal_path = Some(path.clone());
        }

        let (level, server_handles) = match level {
            Some(level) => (Some(level), Vec::new()),
            None if config.evaluation_servers.is_some() || config.evaluation_scheduling != SchedulingOverride::Default => {
                let (level, handles) = Self::resolve_and_spawn_evaluation_level(&config, &driver)?;
                (Some(level), handles)
            }
            None => (None, Vec::new()),
        };

        let failure_mode = config.failure_capture.to_failure_mode();
        let servers = level.as_ref().map_or(1, PartitionLevel::num_servers);
        let scheduler_config = SchedulerConfig {
            cache_enabled: config.evaluation_cache,
            nearby_tolerance: config.nearby_evaluation_cache.then_some(config.nearby_tolerance),
            local_concurrency: config.asynch_local_evaluation_concurrency,
            local_mode: config.local_mode(servers),
            user_requested_master: level.as_ref().is_some_and(PartitionLevel::dedicated_master),
            local_evaluation_precluded: false,
        };
        let scheduler = Scheduler::new(driver, failure_mode, scheduler_config);

        Ok(Self {
            cache,
            journal,
            journal_path,
            scheduler,
            level,
            config,
            next_eval_id: 1,
            server_handles,
        })
    }

    /// Resolves the evaluation partition's shape from `config`
    /// (`evaluation-servers`, `processors-per-evaluation`,
    /// `evaluation-scheduling` — spec §6) and spawns one server-rank
    /// thread per resolved server, each driving its own
    /// [`Driver::spawn_clone`] (spec §5: server ranks run independently,
    /// no shared in-flight state).
    fn resolve_and_spawn_evaluation_level(config: &Configuration, driver: &Driver) -> CoreResult<(PartitionLevel, Vec<JoinHandle<()>>)> {
        let parent_size = config
            .evaluation_servers
            .map(|servers| servers * config.processors_per_evaluation.unwrap_or(1))
            .unwrap_or_else(num_cpus::get);
        let peer_dynamic_capable = !matches!(
            driver.transports.first(),
            Some(Transport::InProcess(_) | Transport::Plugin(_))
        );
        let request = config.evaluation_resolve_request(parent_size, peer_dynamic_capable);
        let resolution: Resolution = resolve::resolve(&request)?;
        let (level, endpoints) = PartitionLevel::from_resolution(LevelKind::Evaluation, 0, resolution);

        // Captures the cloneable configuration rather than `driver`
        // itself, so each server thread builds its own `Driver` from
        // scratch instead of sharing one across threads (mirrors
        // `Driver::spawn_clone`'s body without requiring `Driver: Sync`).
        let interface_id = driver.interface_id.clone();
        let transports = driver.transports.clone();
        let filing = driver.filing.clone();
        let work_dir = driver.work_dir.clone();
        let factory: Arc<dyn Fn() -> Driver + Send + Sync> =
            Arc::new(move || Driver::new(interface_id.clone(), transports.clone(), filing.clone(), work_dir.clone()));
        let handles = remote::spawn_servers(endpoints, factory);
        Ok((level, handles))
    }

    /// Submits one evaluation request, allocating the next monotonically
    /// increasing evaluation id (spec §6 algorithm-facing `map`). The
    /// `_async` parameter is accepted for surface fidelity with spec §6;
    /// both synchronous and asynchronous submissions enqueue identically
    /// here — the distinction is made at `synchronize` vs.
    /// `synchronize_nowait` time, not at `map` time.
    pub fn map(&mut self, interface_id: InterfaceId, variables: Variables, active_set: ActiveSet, _async: bool) -> EvalId {
        // spec §6 `active-set-vector = off`: pin every submission to a
        // constant values-only default instead of the caller's request.
        let active_set = if self.config.active_set_vector {
            active_set
        } else {
            ActiveSet::values_only(active_set.request_vector.len())
        };
        let eval_id = self.next_eval_id;
        self.next_eval_id += 1;
        self.scheduler.map(eval_id, interface_id, variables, active_set, &self.cache);
        eval_id
    }

    /// Blocking drain of every pending request (spec §6 `synchronize`).
    ///
    /// # Errors
    ///
    /// Propagates any fatal [`crate::error::CoreError`] the scheduler or
    /// transport driver surfaces.
    pub fn synchronize(&mut self) -> CoreResult<BTreeMap<EvalId, Response>> {
        self.scheduler.synchronize(&mut self.cache, self.level.as_ref(), self.journal.as_mut())
    }

    /// Non-blocking drain of whatever has completed so far (spec §6
    /// `synchronize_nowait`).
    ///
    /// # Errors
    ///
    /// Propagates any fatal [`crate::error::CoreError`] the scheduler or
    /// transport driver surfaces.
    pub fn synchronize_nowait(&mut self) -> CoreResult<BTreeMap<EvalId, Response>> {
        self.scheduler.synchronize_nowait(&mut self.cache, self.level.as_ref(), self.journal.as_mut())
    }

    /// Number of requests still awaiting dispatch or completion.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.scheduler.pending_len()
    }

    /// `asynch-local-evaluation-concurrency` (spec §6 introspection
    /// predicate `asynch_local_concurrency`); `0` means unlimited.
    #[must_use]
    pub fn asynch_local_concurrency(&self) -> usize {
        self.config.asynch_local_evaluation_concurrency
    }

    /// Whether the evaluation cache is enabled (spec §6 introspection
    /// predicate `evaluation_cache_enabled`).
    #[must_use]
    pub fn evaluation_cache_enabled(&self) -> bool {
        self.config.evaluation_cache
    }

    /// Whether a restart journal is configured (spec §6 introspection
    /// predicate `restart_enabled`).
    #[must_use]
    pub fn restart_enabled(&self) -> bool {
        self.journal_path.is_some()
    }

    /// The number of entries currently held in the evaluation cache.
    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// The partition level this context drives evaluations across, if
    /// any (`None` under the synchronous/local-async fallback).
    #[must_use]
    pub fn level(&self) -> Option<&PartitionLevel> {
        self.level.as_ref()
    }

    /// Retires any remote evaluation servers this context's partition
    /// level owns (spec §6 "Process-group retirement", spec §6
    /// algorithm-facing surface `stop_evaluation_servers`). Idempotent:
    /// a context with no message-passing level is a no-op.
    pub fn stop_evaluation_servers(&self) {
        if let Some(level) = &self.level {
            if level.message_pass() {
                self.scheduler.stop_evaluation_servers(level);
            }
        }
    }

    /// Resolves the spec §4.E shape of the analysis partition from
    /// `analysis-servers`/`processors-per-analysis`/`analysis-scheduling`
    /// (spec §6) without spawning any server threads for it: this crate
    /// has no analysis-server dispatch loop (component A's
    /// multi-processor analysis combination is out of scope), so this
    /// is reachable for introspection and validation of the requested
    /// shape, not for driving an actual analysis run.
    ///
    /// # Errors
    ///
    /// Returns an error under the same conditions as
    /// [`crate::topology::resolve::resolve`].
    pub fn resolve_analysis_partition(&self, parent_size: usize, peer_dynamic_capable: bool) -> CoreResult<Resolution> {
        resolve::resolve(&self.config.analysis_resolve_request(parent_size, peer_dynamic_capable))
    }

    /// Explicit teardown: retires evaluation servers and joins any
    /// server-rank threads this context spawned for itself, matching
    /// spec §9's "explicit init/teardown" for the globals this context
    /// replaces. Dropping a `CoreContext` without calling this still
    /// releases its owned resources (the journal file handle, the
    /// communicator), but skips the best-effort stop-token broadcast and
    /// the thread joins.
    pub fn shutdown(mut self) {
        self.stop_evaluation_servers();
        for handle in self.server_handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::model::ActiveSet;
    use crate::transport::{Filing, FilingPolicy, Transport, WorkDirectoryPolicy};
    use std::sync::Arc;

    fn echo_driver() -> Driver {
        let transport = Transport::InProcess(Arc::new(|vars: &Variables, set: &ActiveSet| {
            let mut response = Response::new_shaped(vec!["f".into()], 0, set.clone());
            response.function_values[0] = vars.continuous.values[0];
            Ok(response)
        }));
        Driver::new(
            "sim",
            vec![transport],
            FilingPolicy { mode: Filing::InMemory, ..FilingPolicy::default() },
            WorkDirectoryPolicy::default(),
        )
    }

    #[test]
    fn map_then_synchronize_resolves_every_request() {
        let config = Configuration::default();
        let mut ctx = CoreContext::new(config, echo_driver(), None).unwrap();
        let ids: Vec<EvalId> = (1..=3)
            .map(|i| ctx.map("sim".into(), Variables::from_continuous(vec![i as f64]), ActiveSet::values_only(1), false))
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);

        let results = ctx.synchronize().unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[&2].function_values[0], 2.0);
        assert_eq!(ctx.cache_len(), 3);
    }

    #[test]
    fn introspection_predicates_reflect_configuration() {
        let mut config = Configuration::default();
        config.asynch_local_evaluation_concurrency = 4;
        config.evaluation_cache = false;
        let ctx = CoreContext::new(config, echo_driver(), None).unwrap();
        assert_eq!(ctx.asynch_local_concurrency(), 4);
        assert!(!ctx.evaluation_cache_enabled());
        assert!(!ctx.restart_enabled());
    }

    #[test]
    fn restart_journal_round_trips_across_contexts() {
        let dir = tempfile::tempdir().unwrap();
        let journal_path = dir.path().join("run.journal");

        let mut config = Configuration::default();
        config.restart_file = Some(journal_path.clone());
        let mut ctx = CoreContext::new(config.clone(), echo_driver(), None).unwrap();
        ctx.map("sim".into(), Variables::from_continuous(vec![9.0]), ActiveSet::values_only(1), false);
        ctx.synchronize().unwrap();
        ctx.shutdown();

        let ctx2 = CoreContext::new(config, echo_driver(), None).unwrap();
        assert_eq!(ctx2.cache_len(), 1);
    }

    #[test]
    fn active_set_vector_off_pins_submissions_to_values_only() {
        let mut config = Configuration::default();
        config.active_set_vector = false;
        let mut ctx = CoreContext::new(config, echo_driver(), None).unwrap();

        let heavy = crate::model::ActiveSet {
            request_vector: vec![crate::model::active_set::GRADIENT],
            derivative_variables: vec![0],
        };
        ctx.map("sim".into(), Variables::from_continuous(vec![5.0]), heavy, false);
        let results = ctx.synchronize().unwrap();
        let response = &results[&1];
        assert_eq!(response.active_set.request_vector, vec![crate::model::active_set::VALUE]);
        assert!(response.active_set.derivative_variables.is_empty());
    }

    #[test]
    fn evaluation_scheduling_override_resolves_a_level_without_an_explicit_one() {
        let mut config = Configuration::default();
        config.evaluation_servers = Some(2);
        config.evaluation_scheduling = crate::topology::SchedulingOverride::PeerStatic;
        let ctx = CoreContext::new(config, echo_driver(), None).unwrap();
        let level = ctx.level().expect("evaluation-scheduling should auto-resolve a level");
        assert_eq!(level.num_servers(), 2);
        ctx.shutdown();
    }
}
