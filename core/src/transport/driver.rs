// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The `Driver`: the product of a [`Transport`] and a [`FilingPolicy`]
//! (spec §9), exposing the four public operations from spec §4.A.

use super::filing::{Filing, FilingPolicy};
use super::format::{parse_results, split_batch_blocks, write_parameters};
use super::workdir::WorkDirectoryPolicy;
use super::{Transport, TransportOutcome, PARAMETERS_FILE_ENV, RESULTS_FILE_ENV};
use crate::error::{CoreError, CoreResult};
use crate::model::{EvalId, ParamResponsePair, Response};
use std::collections::HashMap;
use std::process::Child;
use tracing::{debug, warn};

/// Given a ParamResponsePair and one or more named drivers, produces a
/// populated [`Response`] (spec §4.A).
pub struct Driver {
    pub interface_id: String,
    /// One transport per analysis driver; more than one means
    /// multi-driver composition (spec §4.A).
    pub transports: Vec<Transport>,
    pub filing: FilingPolicy,
    pub work_dir: WorkDirectoryPolicy,
    /// Whether a single writer/driver/reader handles a whole queue at
    /// once (spec §4.A "Batch variant").
    pub batch: bool,
    async_jobs: HashMap<EvalId, AsyncJob>,
}

struct AsyncJob {
    kind: AsyncJobKind,
    results_path: std::path::PathBuf,
    work_dir: std::path::PathBuf,
    pair: ParamResponsePair,
}

/// An outstanding async job is either a live child process, or an
/// in-process call whose result is already known (evaluated eagerly at
/// `derived_map_async` time — there is no real asynchrony to simulate
/// for an in-process callable).
enum AsyncJobKind {
    Process(Child),
    Immediate(CoreResult<TransportOutcome>),
}

impl Driver {
    #[must_use]
    pub fn new(interface_id: impl Into<String>, transports: Vec<Transport>, filing: FilingPolicy, work_dir: WorkDirectoryPolicy) -> Self {
        Self {
            interface_id: interface_id.into(),
            transports,
            filing,
            work_dir,
            batch: false,
            async_jobs: HashMap::new(),
        }
    }

    /// Builds a fresh `Driver` with the same configuration but an empty
    /// async job table. `Driver` itself cannot derive `Clone` (its
    /// `async_jobs` map holds live [`Child`] handles); this is what a
    /// server-rank thread needs instead — its own driver, configured the
    /// same way, with no inherited in-flight state (spec §5: "no
    /// user-visible threads in the core", each rank drives independently).
    #[must_use]
    pub fn spawn_clone(&self) -> Self {
        Self::new(self.interface_id.clone(), self.transports.clone(), self.filing.clone(), self.work_dir.clone())
    }

    /// Applies the *must-be-unique* filename tagging rule (spec §4.A):
    /// if multiple evaluations may run concurrently locally and
    /// batching is off, file or directory tagging must be enabled; the
    /// minimum required is enabled automatically, with a warning.
    pub fn resolve_tagging(&mut self, asynch_local_concurrency: usize) {
        let concurrent_locally = asynch_local_concurrency != 1 && !self.batch;
        if concurrent_locally && !self.filing.file_tag && !self.work_dir.tag {
            self.filing.file_tag = true;
            warn!("asynchronous local concurrency > 1 without tagging; forcing file tagging to keep filenames unique");
        }
        let absolute_paths = self
            .filing
            .parameters_path
            .as_ref()
            .is_some_and(|p| p.is_absolute())
            || self.filing.results_path.as_ref().is_some_and(|p| p.is_absolute());
        if absolute_paths && concurrent_locally && !self.filing.file_tag {
            self.filing.file_tag = true;
            warn!("absolute parameter/results paths under concurrent local evaluation; forcing file tagging");
        }
    }

    fn tagged(base: &std::path::Path, eval_id: EvalId, tag: bool) -> std::path::PathBuf {
        if tag {
            let mut s = base.as_os_str().to_os_string();
            s.push(format!(".{eval_id}"));
            std::path::PathBuf::from(s)
        } else {
            base.to_path_buf()
        }
    }

    fn paths(&self, eval_id: EvalId) -> (std::path::PathBuf, std::path::PathBuf, std::path::PathBuf) {
        let params_base = self.filing.parameters_path.clone().unwrap_or_else(|| std::path::PathBuf::from("params.in"));
        let results_base = self.filing.results_path.clone().unwrap_or_else(|| std::path::PathBuf::from("results.out"));
        let params = Self::tagged(&params_base, eval_id, self.filing.file_tag);
        let results = Self::tagged(&results_base, eval_id, self.filing.file_tag);
        let workdir = self.work_dir.path_for(eval_id);
        (params, results, workdir)
    }

    /// Blocking: builds filenames, writes the parameter file(s), spawns
    /// the driver(s), waits, and reads results (spec §4.A
    /// `derived_map`).
    pub fn derived_map(&mut self, pair: &mut ParamResponsePair) -> CoreResult<TransportOutcome> {
        if self.batch {
            return Err(CoreError::InterfaceError(
                "derived_map called on a batch-configured driver; use derived_map_batch".into(),
            ));
        }
        let (params_path, results_path, workdir) = self.paths(pair.eval_id);
        self.work_dir.prepare(&workdir)?;

        let mut combined: Option<Response> = None;
        for (driver_index, transport) in self.transports.clone().into_iter().enumerate() {
            match self.run_one(&transport, pair, driver_index, &params_path, &results_path, &workdir)? {
                TransportOutcome::Ok(response) => {
                    combined = Some(match combined.take() {
                        Some(mut acc) => {
                            acc.update(&response);
                            acc
                        }
                        None => response,
                    });
                }
                other => {
                    self.work_dir.cleanup(&workdir);
                    return Ok(other);
                }
            }
        }
        self.work_dir.cleanup(&workdir);
        Ok(TransportOutcome::Ok(combined.unwrap_or_else(|| pair.response.clone())))
    }

    fn run_one(
        &self,
        transport: &Transport,
        pair: &ParamResponsePair,
        driver_index: usize,
        params_path: &std::path::Path,
        results_path: &std::path::Path,
        workdir: &std::path::Path,
    ) -> CoreResult<TransportOutcome> {
        match transport {
            Transport::InProcess(f) | Transport::Plugin(f) => {
                match f(&pair.variables, &pair.active_set) {
                    Ok(response) => Ok(TransportOutcome::Ok(response)),
                    Err(CoreError::EvaluationFailure { message, .. }) => Ok(TransportOutcome::EvalFailure(message)),
                    Err(CoreError::InvalidResponse { message, .. }) => Ok(TransportOutcome::InvalidResponse(message)),
                    Err(other) => Err(other),
                }
            }
            external => {
                if self.filing.mode != Filing::File {
                    return Err(CoreError::InterfaceError(
                        "external transport requires file-based filing".into(),
                    ));
                }
                self.write_parameters_file(pair, driver_index, params_path)?;
                let mut child = self.spawn(external, params_path, results_path, workdir)?;
                let status = child.wait()?;
                if !status.success() {
                    return Ok(TransportOutcome::EvalFailure(format!(
                        "driver exited with status {status}"
                    )));
                }
                self.read_results_file(pair, results_path)
            }
        }
    }

    fn write_parameters_file(&self, pair: &ParamResponsePair, driver_index: usize, path: &std::path::Path) -> CoreResult<()> {
        let file = std::fs::File::create(path)?;
        write_parameters(file, pair, driver_index, self.filing.verbatim)
    }

    fn read_results_file(&self, pair: &ParamResponsePair, path: &std::path::Path) -> CoreResult<TransportOutcome> {
        if !path.exists() {
            return Ok(TransportOutcome::EvalFailure(format!(
                "expected results file {} is missing",
                path.display()
            )));
        }
        let text = std::fs::read_to_string(path)?;
        match parse_results(
            &text,
            pair.eval_id,
            &pair.active_set,
            pair.active_set.derivative_variables.len(),
            self.filing.verbatim,
        ) {
            Ok(response) => Ok(TransportOutcome::Ok(response)),
            Err(CoreError::EvaluationFailure { message, .. }) => Ok(TransportOutcome::EvalFailure(message)),
            Err(CoreError::InvalidResponse { message, .. }) => Ok(TransportOutcome::InvalidResponse(message)),
            Err(other) => Err(other),
        }
    }

    fn spawn(
        &self,
        transport: &Transport,
        params_path: &std::path::Path,
        results_path: &std::path::Path,
        workdir: &std::path::Path,
    ) -> CoreResult<Child> {
        let mut command = match transport {
            Transport::SystemShell { command } => {
                let mut c = std::process::Command::new("sh");
                c.arg("-c").arg(command);
                c
            }
            Transport::PosixSpawn { program, args } => {
                let mut c = std::process::Command::new(program);
                c.args(args);
                c
            }
            Transport::InProcess(_) | Transport::Plugin(_) => {
                return Err(CoreError::InterfaceError("spawn called on an in-process transport".into()))
            }
        };
        command
            .current_dir(workdir)
            .env(PARAMETERS_FILE_ENV, params_path)
            .env(RESULTS_FILE_ENV, results_path);
        debug!(?params_path, ?results_path, "spawning driver");
        command.spawn().map_err(CoreError::Io)
    }

    /// Non-blocking: spawns the driver(s) and registers the job,
    /// returning immediately (spec §4.A `derived_map_async`). Only the
    /// first transport is tracked — multi-driver async composition runs
    /// the remaining drivers synchronously once the first completes. An
    /// in-process transport has no real asynchrony to offer, so it is
    /// invoked eagerly and its result is handed back at the next poll.
    pub fn derived_map_async(&mut self, pair: ParamResponsePair) -> CoreResult<()> {
        let transport = self.transports.first().cloned().ok_or_else(|| {
            CoreError::InterfaceError("no transport configured for async evaluation".into())
        })?;
        match &transport {
            Transport::InProcess(_) | Transport::Plugin(_) => {
                let outcome = self.run_one(&transport, &pair, 0, std::path::Path::new(""), std::path::Path::new(""), std::path::Path::new(""));
                self.async_jobs.insert(
                    pair.eval_id,
                    AsyncJob {
                        kind: AsyncJobKind::Immediate(outcome),
                        results_path: std::path::PathBuf::new(),
                        work_dir: std::path::PathBuf::new(),
                        pair,
                    },
                );
            }
            external => {
                let (params_path, results_path, workdir) = self.paths(pair.eval_id);
                self.work_dir.prepare(&workdir)?;
                self.write_parameters_file(&pair, 0, &params_path)?;
                let child = self.spawn(external, &params_path, &results_path, &workdir)?;
                self.async_jobs.insert(
                    pair.eval_id,
                    AsyncJob {
                        kind: AsyncJobKind::Process(child),
                        results_path,
                        work_dir: workdir,
                        pair,
                    },
                );
            }
        }
        Ok(())
    }

    /// Returns the completed pair (response populated iff the outcome is
    /// `Ok`) alongside the outcome, so callers can fold a completion
    /// into a result set without a separate lookup by id.
    fn poll_completed(&mut self, blocking: bool) -> CoreResult<Vec<(ParamResponsePair, TransportOutcome)>> {
        let mut completed = Vec::new();
        loop {
            let mut finished: Vec<(EvalId, CoreResult<bool>)> = Vec::new();
            for (id, job) in &mut self.async_jobs {
                match &mut job.kind {
                    AsyncJobKind::Immediate(_) => finished.push((*id, Ok(true))),
                    AsyncJobKind::Process(child) => {
                        let status = if blocking { child.wait().map(Some) } else { child.try_wait() };
                        match status {
                            Ok(Some(status)) => finished.push((*id, Ok(status.success()))),
                            Ok(None) => {}
                            Err(e) => finished.push((*id, Err(e.into()))),
                        }
                    }
                }
            }
            for (id, result) in finished {
                let job = self.async_jobs.remove(&id).expect("just observed in table");
                self.work_dir.cleanup(&job.work_dir);
                let AsyncJob { kind, results_path, mut pair, .. } = job;
                let outcome = match kind {
                    AsyncJobKind::Immediate(outcome) => outcome?,
                    AsyncJobKind::Process(_) => match result {
                        Err(e) => TransportOutcome::EvalFailure(format!("waiting on driver for evaluation {id} failed: {e}")),
                        Ok(false) => TransportOutcome::EvalFailure(format!("driver for evaluation {id} exited unsuccessfully")),
                        Ok(true) => self.read_results_file(&pair, &results_path)?,
                    },
                };
                if let TransportOutcome::Ok(response) = &outcome {
                    pair.response = response.clone();
                }
                completed.push((pair, outcome));
            }
            if !completed.is_empty() || !blocking {
                break;
            }
            if self.async_jobs.is_empty() {
                break;
            }
        }
        Ok(completed)
    }

    /// Blocking: completes at least one registered async job and
    /// processes all that have returned since (spec §4.A `wait_local`).
    pub fn wait_local(&mut self) -> CoreResult<Vec<(ParamResponsePair, TransportOutcome)>> {
        self.poll_completed(true)
    }

    /// Non-blocking: processes any async jobs that have returned,
    /// returning immediately otherwise (spec §4.A `test_local`).
    pub fn test_local(&mut self) -> CoreResult<Vec<(ParamResponsePair, TransportOutcome)>> {
        self.poll_completed(false)
    }

    #[must_use]
    pub fn num_pending_async(&self) -> usize {
        self.async_jobs.len()
    }

    /// Batch variant (spec §4.A): one writer produces a concatenated
    /// parameter file for the whole queue, the driver runs once, and a
    /// concatenated results file is parsed back per evaluation.
    pub fn derived_map_batch(&mut self, pairs: &mut [ParamResponsePair]) -> CoreResult<Vec<TransportOutcome>> {
        if !self.batch {
            return Err(CoreError::InterfaceError(
                "derived_map_batch called on a non-batch driver".into(),
            ));
        }
        let (params_path, results_path, workdir) = self.paths(0);
        self.work_dir.prepare(&workdir)?;

        {
            let mut file = std::fs::File::create(&params_path)?;
            for (i, pair) in pairs.iter().enumerate() {
                use std::io::Write;
                writeln!(file, "#{i}")?;
                write_parameters(&mut file, pair, 0, self.filing.verbatim)?;
            }
        }

        let transport = self.transports.first().cloned().ok_or_else(|| {
            CoreError::InterfaceError("no transport configured for batch evaluation".into())
        })?;
        let mut child = self.spawn(&transport, &params_path, &results_path, &workdir)?;
        let status = child.wait()?;
        self.work_dir.cleanup(&workdir);

        if !status.success() {
            return Ok(pairs
                .iter()
                .map(|p| TransportOutcome::EvalFailure(format!("batch driver exited unsuccessfully for evaluation {}", p.eval_id)))
                .collect());
        }

        let text = std::fs::read_to_string(&results_path)?;
        let blocks = split_batch_blocks(&text);
        let mut outcomes = Vec::with_capacity(pairs.len());
        for (i, pair) in pairs.iter().enumerate() {
            let outcome = match blocks.get(i) {
                Some(block) => match parse_results(block, pair.eval_id, &pair.active_set, pair.active_set.derivative_variables.len(), self.filing.verbatim) {
                    Ok(response) => TransportOutcome::Ok(response),
                    Err(CoreError::EvaluationFailure { message, .. }) => TransportOutcome::EvalFailure(message),
                    Err(CoreError::InvalidResponse { message, .. }) => TransportOutcome::InvalidResponse(message),
                    Err(other) => return Err(other),
                },
                None => TransportOutcome::InvalidResponse(format!("batch results file has no block for evaluation {}", pair.eval_id)),
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}

impl Clone for Transport {
    fn clone(&self) -> Self {
        match self {
            Self::SystemShell { command } => Self::SystemShell { command: command.clone() },
            Self::PosixSpawn { program, args } => Self::PosixSpawn {
                program: program.clone(),
                args: args.clone(),
            },
            Self::InProcess(f) => Self::InProcess(std::sync::Arc::clone(f)),
            Self::Plugin(f) => Self::Plugin(std::sync::Arc::clone(f)),
        }
    }
}
