// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Crate-wide error kinds.
//!
//! Mirrors the error taxonomy of the orchestration core: evaluation
//! failure is recoverable and handled by [`crate::recovery`] before it
//! ever reaches a caller; the remaining kinds are fatal and propagate
//! straight out of [`crate::scheduler::Scheduler::synchronize`].

use thiserror::Error;

/// Evaluation id a fatal error occurred on, when known.
pub type EvalId = i64;

/// Crate-wide result alias.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors surfaced by the evaluation orchestration core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The driver reported failure or the results file carried the
    /// `fail` sentinel. Recoverable by [`crate::recovery`]; surfaces
    /// only if recovery exhausts its retries or is configured to abort.
    #[error("evaluation {eval_id} failed: {message}")]
    EvaluationFailure {
        /// Evaluation id the failure occurred on.
        eval_id: EvalId,
        /// Diagnostic detail from the driver.
        message: String,
    },

    /// The results file was missing or structurally malformed.
    /// Non-recoverable.
    #[error("invalid response for evaluation {eval_id}: {message}")]
    InvalidResponse {
        /// Evaluation id the malformed response belongs to.
        eval_id: EvalId,
        /// Diagnostic detail.
        message: String,
    },

    /// Partition resolution could not satisfy the user's constraints.
    /// Fatal at configuration time.
    #[error("partition resolve error: {0}")]
    ResolveError(String),

    /// A send/recv/broadcast/barrier over a communicator failed.
    #[error("transport error at {site}: {message}")]
    TransportError {
        /// Source call site, for diagnostics.
        site: &'static str,
        /// Underlying detail.
        message: String,
    },

    /// A protocol contract was violated (recovery vector length
    /// mismatch, stop token received out of turn, and similar).
    #[error("interface error: {0}")]
    InterfaceError(String),

    /// An I/O failure while reading or writing parameter/results/journal
    /// files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A (de)serialization failure on the data model.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// The evaluation id this error concerns, if it carries one.
    #[must_use]
    pub fn eval_id(&self) -> Option<EvalId> {
        match self {
            Self::EvaluationFailure { eval_id, .. } | Self::InvalidResponse { eval_id, .. } => {
                Some(*eval_id)
            }
            _ => None,
        }
    }
}
