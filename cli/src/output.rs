//! Output formatting for the `run` and `inspect-journal` commands.
//!
//! Mirrors the teacher's `OutputFormat` split (pretty/JSON/plain) for
//! displaying a completion, but over [`ParamResponsePair`]s instead of
//! LLM completions.

use colored::Colorize;
use parasweep_core::model::{EvalId, ParamResponsePair, Response};
use std::collections::BTreeMap;

/// Output format options (spec has no opinion on CLI rendering; this
/// mirrors the teacher's three-way split).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable pretty output with colors.
    #[default]
    Pretty,
    /// Compact JSON output.
    Json,
    /// Pretty-printed JSON output.
    JsonPretty,
}

/// Displays a completed evaluation batch (spec §6 `run` command
/// surface): one line per evaluation id, ascending (spec §8 invariant
/// 1: "the output map's keys are strictly ascending").
pub fn display_results(results: &BTreeMap<EvalId, Response>, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Pretty => display_pretty(results),
        OutputFormat::Json => {
            println!("{}", serde_json::to_string(results)?);
            Ok(())
        }
        OutputFormat::JsonPretty => {
            println!("{}", serde_json::to_string_pretty(results)?);
            Ok(())
        }
    }
}

fn display_pretty(results: &BTreeMap<EvalId, Response>) -> anyhow::Result<()> {
    println!();
    println!("{}", "─".repeat(72).bright_blue());
    println!("{}", "Evaluation Results".bright_blue().bold());
    println!("{}", "─".repeat(72).bright_blue());
    for (eval_id, response) in results {
        let values = response
            .function_values
            .iter()
            .zip(response.labels.iter())
            .map(|(v, label)| format!("{label}={v:.6}"))
            .collect::<Vec<_>>()
            .join(", ");
        println!("{} {}  {}", "#".dimmed(), eval_id.to_string().cyan().bold(), values);
    }
    println!("{}", "─".repeat(72).bright_blue());
    println!(
        "{} {}",
        "Total:".bright_cyan(),
        format!("{} evaluations", results.len()).yellow()
    );
    println!();
    Ok(())
}

/// Displays one journal-replayed pair (`inspect-journal` command).
pub fn display_journal_entry(pair: &ParamResponsePair, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string(pair)?);
        }
        OutputFormat::JsonPretty => {
            println!("{}", serde_json::to_string_pretty(pair)?);
        }
        OutputFormat::Pretty => {
            let vars = pair
                .variables
                .continuous
                .values
                .iter()
                .map(|v| format!("{v:.6}"))
                .collect::<Vec<_>>()
                .join(", ");
            let values = pair
                .response
                .function_values
                .iter()
                .map(|v| format!("{v:.6}"))
                .collect::<Vec<_>>()
                .join(", ");
            println!(
                "{} {}  {} [{}]  {} [{}]",
                "#".dimmed(),
                pair.eval_id.to_string().cyan().bold(),
                "vars".bright_cyan(),
                vars,
                "values".bright_cyan(),
                values,
            );
        }
    }
    Ok(())
}

/// Displays an error in a user-friendly way.
pub fn display_error(error: &str, suggestion: Option<&str>) {
    eprintln!();
    eprintln!("{} {}", "Error:".red().bold(), error.red());
    if let Some(hint) = suggestion {
        eprintln!("{} {}", "Hint:".yellow().bold(), hint.yellow());
    }
    eprintln!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use parasweep_core::model::{ActiveSet, Variables};

    fn sample_results() -> BTreeMap<EvalId, Response> {
        let mut map = BTreeMap::new();
        let mut response = Response::new_shaped(vec!["f".into()], 0, ActiveSet::values_only(1));
        response.function_values[0] = 4.0;
        map.insert(1, response);
        map
    }

    #[test]
    fn pretty_display_does_not_error() {
        assert!(display_results(&sample_results(), OutputFormat::Pretty).is_ok());
    }

    #[test]
    fn json_display_does_not_error() {
        assert!(display_results(&sample_results(), OutputFormat::Json).is_ok());
    }

    #[test]
    fn journal_entry_display_does_not_error() {
        let pair = ParamResponsePair::new_request(1, "sim", Variables::from_continuous(vec![1.0]), ActiveSet::values_only(1));
        assert!(display_journal_entry(&pair, OutputFormat::Pretty).is_ok());
        assert!(display_journal_entry(&pair, OutputFormat::JsonPretty).is_ok());
    }
}
