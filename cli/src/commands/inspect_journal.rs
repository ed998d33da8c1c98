//! `parasweep inspect-journal <path>`: replays a restart journal and
//! prints every surviving entry.

use crate::error::CliError;
use crate::output::{self, OutputFormat};
use anyhow::Result;
use parasweep_core::cache::journal::JournalReader;
use parasweep_core::cache::EvaluationCache;
use std::io::BufReader;
use std::path::PathBuf;

/// Arguments for `parasweep inspect-journal`.
pub struct InspectJournalArgs {
    pub journal: PathBuf,
    pub format: OutputFormat,
}

/// Runs the `inspect-journal` subcommand, returning the process exit code.
pub fn execute(args: InspectJournalArgs) -> Result<i32> {
    if !args.journal.exists() {
        CliError::file_not_found(args.journal.display().to_string()).print_error();
        return Ok(crate::error::exit_codes::ERROR);
    }

    let file = std::fs::File::open(&args.journal)
        .map_err(|e| CliError::journal_error(e.to_string()))?;
    let mut cache = EvaluationCache::new();
    let loaded = JournalReader::replay_into(BufReader::new(file), &mut cache)
        .map_err(|e| CliError::journal_error(e.to_string()))?;

    for pair in cache.entries_by_eval_id() {
        output::display_journal_entry(pair, args.format)?;
    }

    if matches!(args.format, OutputFormat::Pretty) {
        println!("\n{loaded} entries replayed from {}", args.journal.display());
    }
    Ok(crate::error::exit_codes::SUCCESS)
}
