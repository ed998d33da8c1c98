//! The `run` command's input format: a fixed batch of evaluations plus
//! the driver that answers them (spec §6 CLI surface: "submits a fixed
//! batch of evaluations read from the manifest's variables list").
//!
//! Kept deliberately small — this is a demo/ad hoc harness around the
//! scheduler, not the input-deck parser spec.md section 1 calls out of
//! scope for the core itself.

use anyhow::{bail, Context, Result};
use parasweep_core::model::{ActiveSet, Response, Variables};
use parasweep_core::transport::{InProcessFn, Transport};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One requested evaluation point (spec §3 `Variables`, simplified to
/// plain arrays for a manifest file written by hand).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ManifestPoint {
    pub continuous: Vec<f64>,
    pub discrete_int: Vec<i64>,
    pub discrete_real: Vec<f64>,
    pub discrete_string: Vec<String>,
}

impl ManifestPoint {
    fn into_variables(self) -> Variables {
        let mut vars = Variables::from_continuous(self.continuous);
        if !self.discrete_int.is_empty() {
            vars.discrete_int = parasweep_core::model::variables::VariableSlot::new(
                self.discrete_int.clone(),
                (0..self.discrete_int.len()).map(|i| format!("di{i}")).collect(),
            );
        }
        if !self.discrete_real.is_empty() {
            vars.discrete_real = parasweep_core::model::variables::VariableSlot::new(
                self.discrete_real.clone(),
                (0..self.discrete_real.len()).map(|i| format!("dr{i}")).collect(),
            );
        }
        if !self.discrete_string.is_empty() {
            vars.discrete_string = parasweep_core::model::variables::VariableSlot::new(
                self.discrete_string.clone(),
                (0..self.discrete_string.len()).map(|i| format!("ds{i}")).collect(),
            );
        }
        vars
    }
}

/// A manifest's requested active set, before the function count is
/// known (defaults to values-only for `num_functions` functions).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ManifestActiveSet {
    pub request_vector: Vec<u8>,
    pub derivative_variables: Vec<usize>,
}

/// The `run` command's manifest file (TOML): an interface id, a driver
/// selector, the number of response functions it produces, an optional
/// active-set override, and the batch of points to evaluate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Manifest {
    pub interface_id: String,
    pub driver: String,
    #[serde(default = "default_num_functions")]
    pub num_functions: usize,
    #[serde(default)]
    pub active_set: Option<ManifestActiveSet>,
    pub variables: Vec<ManifestPoint>,
}

fn default_num_functions() -> usize {
    1
}

impl Manifest {
    /// Loads and parses a manifest from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not parse as
    /// the manifest schema.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading manifest file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing manifest file {}", path.display()))
    }

    /// The active set every request in the batch is evaluated against.
    #[must_use]
    pub fn resolved_active_set(&self) -> ActiveSet {
        match &self.active_set {
            Some(set) => ActiveSet {
                request_vector: set.request_vector.clone(),
                derivative_variables: set.derivative_variables.clone(),
            },
            None => ActiveSet::values_only(self.num_functions),
        }
    }

    /// The batch of requests as [`Variables`], in manifest order.
    #[must_use]
    pub fn variables(&self) -> Vec<Variables> {
        self.variables.iter().cloned().map(ManifestPoint::into_variables).collect()
    }

    /// Resolves `self.driver` into a [`Transport`]: `builtin:<name>` for
    /// one of the analytic test functions in [`builtin`], `shell:<cmd>`
    /// for an external driver invoked through the system shell,
    /// anything else treated as a direct (posix-spawn-style) program
    /// name with no arguments.
    ///
    /// # Errors
    ///
    /// Returns an error if `builtin:<name>` names an unknown function.
    pub fn resolve_transport(&self) -> Result<Transport> {
        if let Some(name) = self.driver.strip_prefix("builtin:") {
            return builtin::lookup(name).map(Transport::InProcess);
        }
        if let Some(command) = self.driver.strip_prefix("shell:") {
            return Ok(Transport::SystemShell { command: command.to_string() });
        }
        if self.driver.is_empty() {
            bail!("manifest `driver` must not be empty");
        }
        Ok(Transport::PosixSpawn { program: self.driver.clone(), args: Vec::new() })
    }
}

/// Analytic test functions available as `builtin:<name>` drivers — a
/// convenience for manifests that want to exercise the scheduler
/// without standing up an external process (spec §1 lists analytic
/// test functions as an out-of-scope collaborator; these are a CLI-only
/// convenience, not part of the orchestration core itself).
pub mod builtin {
    use super::{InProcessFn, Response};
    use anyhow::{bail, Result};
    use parasweep_core::model::{ActiveSet, Variables};
    use std::sync::Arc;

    /// Sum of squares: `f(x) = sum(x_i^2)`.
    #[must_use]
    pub fn sum_of_squares() -> InProcessFn {
        Arc::new(|vars: &Variables, set: &ActiveSet| {
            let value: f64 = vars.continuous.values.iter().map(|v| v * v).sum();
            let mut response = Response::new_shaped(vec!["f".into()], set.derivative_variables.len(), set.clone());
            response.function_values[0] = value;
            Ok(response)
        })
    }

    /// The 2-D Rosenbrock banana function.
    #[must_use]
    pub fn rosenbrock() -> InProcessFn {
        Arc::new(|vars: &Variables, set: &ActiveSet| {
            let x = &vars.continuous.values;
            let value = if x.len() >= 2 {
                100.0 * (x[1] - x[0] * x[0]).powi(2) + (1.0 - x[0]).powi(2)
            } else {
                0.0
            };
            let mut response = Response::new_shaped(vec!["f".into()], set.derivative_variables.len(), set.clone());
            response.function_values[0] = value;
            Ok(response)
        })
    }

    /// Resolves a builtin function name to its callable.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` names no known builtin.
    pub fn lookup(name: &str) -> Result<InProcessFn> {
        match name {
            "sum-of-squares" | "sum_of_squares" | "sphere" => Ok(sum_of_squares()),
            "rosenbrock" => Ok(rosenbrock()),
            other => bail!("unknown builtin driver '{other}' (known: sum-of-squares, rosenbrock)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_manifest() {
        let toml = r#"
            interface-id = "demo"
            driver = "builtin:rosenbrock"

            [[variables]]
            continuous = [1.0, 1.0]

            [[variables]]
            continuous = [0.0, 0.0]
        "#;
        let manifest: Manifest = toml::from_str(toml).unwrap();
        assert_eq!(manifest.interface_id, "demo");
        assert_eq!(manifest.variables().len(), 2);
        assert_eq!(manifest.resolved_active_set().request_vector, vec![1]);
    }

    #[test]
    fn unknown_builtin_driver_is_rejected() {
        let manifest = Manifest {
            interface_id: "demo".into(),
            driver: "builtin:nonexistent".into(),
            num_functions: 1,
            active_set: None,
            variables: vec![],
        };
        assert!(manifest.resolve_transport().is_err());
    }
}
