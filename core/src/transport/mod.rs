// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Process/Transport Driver (component A, spec §4.A): launches an
//! external driver or an in-process callable, manages parameter and
//! results files and work directories, and waits on completion.
//!
//! Deep inheritance in the original (application-interface base,
//! process-handle interface, fork/spawn/system specializations, plugin
//! and in-process specializations) is flattened to two compositional
//! pieces (spec §9): [`Transport`] ("launch and wait") and
//! [`filing::Filing`] (parameter/results marshalling). [`driver::Driver`]
//! is their product.

pub mod driver;
pub mod filing;
pub mod format;
pub mod workdir;

pub use driver::Driver;
pub use filing::{Filing, FilingPolicy};
pub use workdir::WorkDirectoryPolicy;

use crate::error::CoreError;
use crate::model::{ActiveSet, Response, Variables};
use std::sync::Arc;

/// Well-known environment variable names carrying the current
/// evaluation's parameter and results file paths to the child process
/// (spec §6). The parent scopes these to the child process via
/// [`std::process::Command::env`] rather than mutating its own
/// environment, so there is nothing to restore afterward.
pub const PARAMETERS_FILE_ENV: &str = "PARASWEEP_PARAMETERS_FILE";
pub const RESULTS_FILE_ENV: &str = "PARASWEEP_RESULTS_FILE";

/// The explicit result type a driver call resolves to (spec §9:
/// exceptions in the source become this type; the scheduler inspects it
/// and routes to failure-recovery or propagates).
#[derive(Debug)]
pub enum TransportOutcome {
    Ok(Response),
    EvalFailure(String),
    InvalidResponse(String),
}

/// An in-process evaluation callable (spec §9 `InProcess`/`Plugin`
/// variants).
pub type InProcessFn = Arc<dyn Fn(&Variables, &ActiveSet) -> Result<Response, CoreError> + Send + Sync>;

/// Strategy for "launch and wait" (spec §9).
pub enum Transport {
    /// External process via the system shell (`sh -c <command>`).
    SystemShell { command: String },
    /// External process via direct exec, no intervening shell.
    PosixSpawn { program: String, args: Vec<String> },
    /// In-process callable; receives variables/active-set directly,
    /// bypassing file marshalling entirely.
    InProcess(InProcessFn),
    /// A dynamically registered callable, distinguished from
    /// `InProcess` only by provenance (spec §9's fifth transport
    /// variant — this crate does not implement dynamic library loading,
    /// so a `Plugin` is, mechanically, another in-process callable).
    Plugin(InProcessFn),
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SystemShell { command } => f.debug_struct("SystemShell").field("command", command).finish(),
            Self::PosixSpawn { program, args } => f
                .debug_struct("PosixSpawn")
                .field("program", program)
                .field("args", args)
                .finish(),
            Self::InProcess(_) => f.write_str("InProcess(..)"),
            Self::Plugin(_) => f.write_str("Plugin(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActiveSet, ParamResponsePair, Variables};

    #[test]
    fn in_process_transport_round_trips_through_driver() {
        let transport = Transport::InProcess(Arc::new(|vars: &Variables, set: &ActiveSet| {
            let mut response = Response::new_shaped(vec!["f".into()], 0, set.clone());
            response.function_values[0] = vars.continuous.values[0] * 2.0;
            Ok(response)
        }));
        let mut driver = Driver::new(
            "sim",
            vec![transport],
            FilingPolicy { mode: Filing::InMemory, ..FilingPolicy::default() },
            WorkDirectoryPolicy::default(),
        );
        let mut pair = ParamResponsePair::new_request(1, "sim", Variables::from_continuous(vec![3.0]), ActiveSet::values_only(1));
        match driver.derived_map(&mut pair).unwrap() {
            TransportOutcome::Ok(response) => assert_eq!(response.function_values[0], 6.0),
            other => panic!("expected Ok, got {other:?}"),
        }
    }
}
