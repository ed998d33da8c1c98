//! CLI-specific errors with contextual messages and suggestions,
//! following the core crate's split between typed library errors and a
//! binary's `anyhow`-wrapped diagnostics (spec §7).

use colored::Colorize;
use thiserror::Error;

/// CLI-specific errors with contextual messages and suggestions.
#[derive(Debug, Error)]
pub enum CliError {
    /// The manifest file could not be found, read, or parsed.
    #[error("manifest error: {message}")]
    ManifestError {
        message: String,
        suggestion: String,
    },

    /// The configuration file or environment overrides were rejected.
    #[error("configuration error: {message}")]
    ConfigurationError {
        message: String,
        suggestion: String,
    },

    /// The restart journal could not be read.
    #[error("journal error: {message}")]
    JournalError {
        message: String,
        suggestion: String,
    },

    /// An evaluation failed and was not recovered (spec §7
    /// evaluation-failure surfacing to the caller).
    #[error("evaluation failed: {reason}")]
    EvaluationFailed {
        reason: String,
        suggestion: String,
    },

    /// A file the CLI was asked to read does not exist.
    #[error("file not found: {path}")]
    FileNotFound { path: String, suggestion: String },
}

impl CliError {
    #[must_use]
    pub fn manifest_error(message: impl Into<String>) -> Self {
        Self::ManifestError {
            message: message.into(),
            suggestion: "check the manifest's `driver` and `variables` fields against the documented schema".into(),
        }
    }

    #[must_use]
    pub fn configuration_error(message: impl Into<String>) -> Self {
        Self::ConfigurationError {
            message: message.into(),
            suggestion: "check the --config file and PARASWEEP_* environment overrides".into(),
        }
    }

    #[must_use]
    pub fn journal_error(message: impl Into<String>) -> Self {
        Self::JournalError {
            message: message.into(),
            suggestion: "the journal file must contain one JSON-encoded ParamResponsePair per line".into(),
        }
    }

    #[must_use]
    pub fn evaluation_failed(reason: impl Into<String>) -> Self {
        Self::EvaluationFailed {
            reason: reason.into(),
            suggestion: "set `failure-capture` to retry, recover, or continuation to tolerate this".into(),
        }
    }

    #[must_use]
    pub fn file_not_found(path: impl Into<String>) -> Self {
        let path = path.into();
        let suggestion = format!("check that {path} exists and the path is correct");
        Self::FileNotFound { path, suggestion }
    }

    /// Prints the error with its suggestion, colored the way the
    /// teacher's CLI error formatting does.
    pub fn print_error(&self) {
        eprintln!("\n{} {}", "Error:".red().bold(), self);
        let suggestion = match self {
            Self::ManifestError { suggestion, .. }
            | Self::ConfigurationError { suggestion, .. }
            | Self::JournalError { suggestion, .. }
            | Self::EvaluationFailed { suggestion, .. }
            | Self::FileNotFound { suggestion, .. } => suggestion,
        };
        if !suggestion.is_empty() {
            eprintln!("{} {}", "Suggestion:".yellow().bold(), suggestion);
        }
    }

    /// The process exit code this error scenario should produce.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConfigurationError { .. } => exit_codes::CONFIG_ERROR,
            Self::EvaluationFailed { .. } => exit_codes::EVALUATION_FAILED,
            Self::ManifestError { .. } | Self::JournalError { .. } | Self::FileNotFound { .. } => exit_codes::ERROR,
        }
    }
}

/// Exit codes for different error scenarios.
pub mod exit_codes {
    /// Successful execution.
    pub const SUCCESS: i32 = 0;
    /// General error.
    pub const ERROR: i32 = 1;
    /// Configuration error.
    pub const CONFIG_ERROR: i32 = 3;
    /// An evaluation failed and was not recovered.
    pub const EVALUATION_FAILED: i32 = 5;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_error_carries_a_suggestion() {
        let err = CliError::manifest_error("missing `variables` field");
        match err {
            CliError::ManifestError { message, suggestion } => {
                assert_eq!(message, "missing `variables` field");
                assert!(!suggestion.is_empty());
            }
            _ => panic!("wrong error variant"),
        }
    }

    #[test]
    fn file_not_found_includes_path_in_suggestion() {
        let err = CliError::file_not_found("manifest.toml");
        match err {
            CliError::FileNotFound { path, suggestion } => {
                assert_eq!(path, "manifest.toml");
                assert!(suggestion.contains("manifest.toml"));
            }
            _ => panic!("wrong error variant"),
        }
    }

    #[test]
    fn exit_codes_distinguish_configuration_and_evaluation_failures() {
        assert_eq!(CliError::configuration_error("bad config").exit_code(), exit_codes::CONFIG_ERROR);
        assert_eq!(CliError::evaluation_failed("deterministic failure").exit_code(), exit_codes::EVALUATION_FAILED);
        assert_eq!(CliError::manifest_error("bad manifest").exit_code(), exit_codes::ERROR);
    }
}
