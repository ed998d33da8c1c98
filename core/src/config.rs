// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Layered configuration (spec §6): defaults, then an optional TOML
//! file, then `PARASWEEP_`-prefixed environment variables, each layer
//! overriding the last.
//!
//! # Examples
//!
//! ```no_run
//! use parasweep_core::config::ConfigLoader;
//!
//! # fn example() -> anyhow::Result<()> {
//! let configuration = ConfigLoader::new().load()?;
//! println!("evaluation servers: {:?}", configuration.evaluation_servers);
//! # Ok(())
//! # }
//! ```

use crate::recovery::FailureMode;
use crate::scheduler::LocalMode;
use crate::topology::resolve::{DefaultConfigHint, ResolveRequest, SchedulingOverride};
use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "config.toml";
const CONFIG_DIR_NAME: &str = "parasweep";

/// Environment variable prefix for configuration overrides (spec §6).
pub const ENV_PREFIX: &str = "PARASWEEP";
/// Separator between nested keys in an environment variable name, e.g.
/// `PARASWEEP_WORK_DIRECTORY__TAG`.
const ENV_SEPARATOR: &str = "__";

/// How local asynchronous scheduling assigns jobs to slots (spec §4.D,
/// spec §6 `asynch-local-evaluation-scheduling`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LocalScheduling {
    Dynamic,
    Static,
}

/// The `fail-action` option (spec §6 `failure-capture`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "mode")]
pub enum FailureCapture {
    Abort,
    Retry { retry_limit: usize },
    Recover { recovery_values: Vec<f64> },
    Continuation { step_halving_limit: usize },
}

impl Default for FailureCapture {
    fn default() -> Self {
        Self::Abort
    }
}

impl FailureCapture {
    /// Converts the configuration-facing option into the recovery
    /// module's runtime type.
    #[must_use]
    pub fn to_failure_mode(&self) -> FailureMode {
        match self {
            Self::Abort => FailureMode::Abort,
            Self::Retry { retry_limit } => FailureMode::Retry { limit: *retry_limit },
            Self::Recover { recovery_values } => FailureMode::Recover { values: recovery_values.clone() },
            Self::Continuation { step_halving_limit } => FailureMode::Continuation { step_halving_limit: *step_halving_limit },
        }
    }
}

/// Work-directory and file marshalling options (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct WorkDirectoryOptions {
    pub directory: Option<PathBuf>,
    pub directory_tag: bool,
    pub directory_save: bool,
    pub file_tag: bool,
    pub file_save: bool,
    pub allow_existing_results: bool,
    pub verbatim: bool,
}

impl Default for WorkDirectoryOptions {
    fn default() -> Self {
        Self {
            directory: None,
            directory_tag: false,
            directory_save: false,
            file_tag: false,
            file_save: false,
            allow_existing_results: false,
            verbatim: false,
        }
    }
}

/// Top-level evaluation orchestration configuration (spec §6): the full
/// option set the CLI front end and [`crate::context::CoreContext`]
/// construct a run from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Configuration {
    /// `true` for blocking `synchronize`, `false` for non-blocking
    /// `synchronize_nowait` (spec §6 `synchronization`).
    pub synchronization_blocking: bool,
    /// 0 = unlimited (spec §6 `asynch-local-evaluation-concurrency`).
    pub asynch_local_evaluation_concurrency: usize,
    /// 0 = unlimited (spec §6 `asynch-local-analysis-concurrency`).
    pub asynch_local_analysis_concurrency: usize,
    pub asynch_local_evaluation_scheduling: LocalScheduling,
    pub evaluation_servers: Option<usize>,
    pub processors_per_evaluation: Option<usize>,
    /// spec §6 `evaluation-scheduling ∈ {default, master, peer-dynamic,
    /// peer-static}`: the user's explicit topology choice for the
    /// evaluation partition, honored by [`crate::context::CoreContext`]
    /// when it resolves a level itself (see
    /// `Configuration::evaluation_resolve_request`).
    pub evaluation_scheduling: SchedulingOverride,
    pub analysis_servers: Option<usize>,
    pub processors_per_analysis: Option<usize>,
    /// spec §6 `analysis-scheduling`: the analogous topology choice for
    /// the analysis partition (see
    /// `Configuration::analysis_resolve_request`).
    pub analysis_scheduling: SchedulingOverride,
    pub evaluation_cache: bool,
    pub nearby_evaluation_cache: bool,
    pub nearby_tolerance: f64,
    pub restart_file: Option<PathBuf>,
    pub failure_capture: FailureCapture,
    pub work_directory: WorkDirectoryOptions,
    /// spec §6 `active-set-vector ∈ {on, off}`: `false` pins every
    /// submitted active set to a constant values-only default instead
    /// of honoring what the caller requested.
    pub active_set_vector: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            synchronization_blocking: true,
            asynch_local_evaluation_concurrency: 1,
            asynch_local_analysis_concurrency: 1,
            asynch_local_evaluation_scheduling: LocalScheduling::Dynamic,
            evaluation_servers: None,
            processors_per_evaluation: None,
            evaluation_scheduling: SchedulingOverride::default(),
            analysis_servers: None,
            processors_per_analysis: None,
            analysis_scheduling: SchedulingOverride::default(),
            evaluation_cache: true,
            nearby_evaluation_cache: false,
            nearby_tolerance: 1.0e-6,
            restart_file: None,
            failure_capture: FailureCapture::default(),
            work_directory: WorkDirectoryOptions::default(),
            active_set_vector: true,
        }
    }
}

impl Configuration {
    /// Manual validation in place of the `serde_valid` derive the
    /// teacher's config loader uses (not a dependency of this
    /// workspace): checks the handful of range/consistency invariants
    /// spec §6 and §8 call out.
    ///
    /// # Errors
    ///
    /// Returns a message naming the first invariant violated.
    pub fn validate(&self) -> Result<(), String> {
        if self.nearby_evaluation_cache && !self.evaluation_cache {
            return Err("nearby-evaluation-cache requires evaluation-cache to be enabled".into());
        }
        if self.nearby_tolerance < 0.0 {
            return Err("nearby-tolerance must be non-negative".into());
        }
        if let FailureCapture::Recover { recovery_values } = &self.failure_capture {
            if recovery_values.is_empty() {
                return Err("recovery-values must not be empty when fail-action is recover".into());
            }
        }
        if let Some(servers) = self.evaluation_servers {
            if servers == 0 {
                return Err("evaluation-servers, if set, must be at least 1".into());
            }
        }
        Ok(())
    }

    /// The local-async dispatch mode the scheduler should use, derived
    /// from `asynch_local_evaluation_scheduling` (spec §4.D sub-modes).
    /// Static mode's modulus is `concurrency * servers`.
    #[must_use]
    pub fn local_mode(&self, servers: usize) -> LocalMode {
        match self.asynch_local_evaluation_scheduling {
            LocalScheduling::Dynamic => LocalMode::Dynamic,
            LocalScheduling::Static => LocalMode::StaticLimited {
                modulus: self.asynch_local_evaluation_concurrency.max(1) * servers.max(1),
            },
        }
    }

    /// Builds the spec §4.E resolution request for the evaluation
    /// partition from `evaluation-servers`, `processors-per-evaluation`
    /// and `evaluation-scheduling` (spec §6), given the parent size and
    /// whether the driver in play can back peer-dynamic's non-blocking
    /// local scheduling. [`crate::context::CoreContext`] feeds this to
    /// [`crate::topology::resolve::resolve`] when it has no
    /// caller-supplied partition level of its own.
    #[must_use]
    pub fn evaluation_resolve_request(&self, parent_size: usize, peer_dynamic_capable: bool) -> ResolveRequest {
        ResolveRequest {
            parent_size,
            requested_servers: self.evaluation_servers,
            requested_processors_per_server: self.processors_per_evaluation,
            max_concurrency: self.asynch_local_evaluation_concurrency.max(1),
            capacity_multiplier: 1,
            default_hint: DefaultConfigHint::PeerPreferred,
            scheduling_override: self.evaluation_scheduling,
            peer_dynamic_capable,
        }
    }

    /// The analogous resolution request for the analysis partition
    /// (`analysis-servers`, `processors-per-analysis`,
    /// `analysis-scheduling`).
    #[must_use]
    pub fn analysis_resolve_request(&self, parent_size: usize, peer_dynamic_capable: bool) -> ResolveRequest {
        ResolveRequest {
            parent_size,
            requested_servers: self.analysis_servers,
            requested_processors_per_server: self.processors_per_analysis,
            max_concurrency: self.asynch_local_analysis_concurrency.max(1),
            capacity_multiplier: 1,
            default_hint: DefaultConfigHint::PeerPreferred,
            scheduling_override: self.analysis_scheduling,
            peer_dynamic_capable,
        }
    }
}

/// Builder for loading a [`Configuration`] from defaults, an optional
/// file, and environment variables, in that precedence order (spec §6,
/// mirroring the teacher's `ConfigLoader`).
#[derive(Debug, Default)]
pub struct ConfigLoader {
    custom_file: Option<PathBuf>,
    skip_default_file: bool,
    skip_env: bool,
}

impl ConfigLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.custom_file = Some(path.as_ref().to_path_buf());
        self
    }

    #[must_use]
    pub fn skip_default_file(mut self) -> Self {
        self.skip_default_file = true;
        self
    }

    #[must_use]
    pub fn skip_env(mut self) -> Self {
        self.skip_env = true;
        self
    }

    /// Loads and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed, an environment
    /// variable has the wrong shape, or [`Configuration::validate`]
    /// rejects the result.
    pub fn load(&self) -> Result<Configuration> {
        let mut builder = ConfigBuilder::builder();

        let defaults = Configuration::default();
        let defaults_value = serde_json::to_value(&defaults).context("serializing built-in defaults")?;
        builder = builder.add_source(config::Config::try_from(&defaults_value)?);

        if !self.skip_default_file {
            if let Some(path) = self.find_config_file() {
                tracing::debug!(path = %path.display(), "loading configuration file");
                builder = builder.add_source(File::from(path).required(false).format(config::FileFormat::Toml));
            }
        }

        if let Some(custom_path) = &self.custom_file {
            tracing::info!(path = %custom_path.display(), "loading custom configuration file");
            builder = builder.add_source(File::from(custom_path.as_path()).required(true).format(config::FileFormat::Toml));
        }

        if !self.skip_env {
            builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator(ENV_SEPARATOR).try_parsing(true));
        }

        let built = builder.build().context("building layered configuration")?;
        let configuration: Configuration = built.try_deserialize().context("deserializing configuration")?;
        configuration.validate().map_err(|e| anyhow::anyhow!("configuration validation failed: {e}"))?;

        Ok(configuration)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(config_dir) = dirs::config_dir() {
            let candidate = config_dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME);
            if candidate.exists() {
                return Some(candidate);
            }
        }
        let local = PathBuf::from(CONFIG_FILE_NAME);
        local.exists().then_some(local)
    }

    #[must_use]
    pub fn default_config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_cleanly() {
        assert!(Configuration::default().validate().is_ok());
    }

    #[test]
    fn nearby_cache_without_base_cache_is_rejected() {
        let mut configuration = Configuration::default();
        configuration.evaluation_cache = false;
        configuration.nearby_evaluation_cache = true;
        assert!(configuration.validate().is_err());
    }

    #[test]
    fn empty_recovery_values_is_rejected() {
        let mut configuration = Configuration::default();
        configuration.failure_capture = FailureCapture::Recover { recovery_values: vec![] };
        assert!(configuration.validate().is_err());
    }

    #[test]
    fn static_local_mode_modulus_accounts_for_servers() {
        let mut configuration = Configuration::default();
        configuration.asynch_local_evaluation_scheduling = LocalScheduling::Static;
        configuration.asynch_local_evaluation_concurrency = 2;
        match configuration.local_mode(3) {
            LocalMode::StaticLimited { modulus } => assert_eq!(modulus, 6),
            LocalMode::Dynamic => panic!("expected static-limited mode"),
        }
    }

    #[test]
    fn loader_skipping_file_and_env_yields_defaults() {
        let configuration = ConfigLoader::new().skip_default_file().skip_env().load().unwrap();
        assert_eq!(configuration.asynch_local_evaluation_concurrency, 1);
        assert!(configuration.evaluation_cache);
    }

    #[test]
    fn defaults_leave_scheduling_and_active_set_vector_unoverridden() {
        let configuration = Configuration::default();
        assert_eq!(configuration.evaluation_scheduling, SchedulingOverride::Default);
        assert_eq!(configuration.analysis_scheduling, SchedulingOverride::Default);
        assert!(configuration.active_set_vector);
    }

    #[test]
    fn evaluation_resolve_request_honors_explicit_scheduling() {
        let mut configuration = Configuration::default();
        configuration.evaluation_scheduling = SchedulingOverride::Master;
        configuration.evaluation_servers = Some(4);
        let request = configuration.evaluation_resolve_request(16, true);
        assert_eq!(request.scheduling_override, SchedulingOverride::Master);
        assert_eq!(request.requested_servers, Some(4));
    }

    #[test]
    fn analysis_resolve_request_mirrors_analysis_options() {
        let mut configuration = Configuration::default();
        configuration.analysis_servers = Some(2);
        configuration.processors_per_analysis = Some(3);
        configuration.analysis_scheduling = SchedulingOverride::PeerStatic;
        let request = configuration.analysis_resolve_request(6, false);
        assert_eq!(request.requested_servers, Some(2));
        assert_eq!(request.requested_processors_per_server, Some(3));
        assert_eq!(request.scheduling_override, SchedulingOverride::PeerStatic);
    }
}
