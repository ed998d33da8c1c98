//! `parasweep run <manifest>`: submits the manifest's batch of
//! evaluations against its resolved driver and prints the results.

use crate::error::CliError;
use crate::manifest::Manifest;
use crate::output::{self, OutputFormat};
use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use parasweep_core::config::ConfigLoader;
use parasweep_core::context::CoreContext;
use parasweep_core::transport::{Filing, FilingPolicy, Transport, WorkDirectoryPolicy};
use std::path::PathBuf;

/// Arguments for `parasweep run`.
pub struct RunArgs {
    pub manifest: PathBuf,
    pub config_file: Option<PathBuf>,
    pub format: OutputFormat,
    pub quiet: bool,
}

/// Runs the `run` subcommand, returning the process exit code.
pub fn execute(args: RunArgs) -> Result<i32> {
    let manifest = Manifest::load(&args.manifest)
        .map_err(|e| CliError::manifest_error(e.to_string()))?;

    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config_file {
        loader = loader.with_file(path);
    }
    let config = loader
        .load()
        .map_err(|e| CliError::configuration_error(e.to_string()))?;

    let transport = manifest
        .resolve_transport()
        .map_err(|e| CliError::manifest_error(e.to_string()))?;
    let filing_mode = match &transport {
        Transport::InProcess(_) | Transport::Plugin(_) => Filing::InMemory,
        _ => Filing::File,
    };
    let driver = parasweep_core::transport::Driver::new(
        manifest.interface_id.clone(),
        vec![transport],
        FilingPolicy { mode: filing_mode, ..FilingPolicy::default() },
        WorkDirectoryPolicy::default(),
    );

    let mut ctx = CoreContext::new(config, driver, None)?;

    let active_set = manifest.resolved_active_set();
    let total = manifest.variables().len();
    for variables in manifest.variables() {
        ctx.map(manifest.interface_id.clone(), variables, active_set.clone(), false);
    }

    let progress = (!args.quiet).then(|| build_progress_bar(total as u64));
    let mut results = std::collections::BTreeMap::new();
    while results.len() < total {
        let batch = ctx
            .synchronize_nowait()
            .map_err(|e| CliError::evaluation_failed(e.to_string()))?;
        if let Some(bar) = &progress {
            bar.inc(batch.len() as u64);
        }
        results.extend(batch);
        if results.len() < total {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
    }
    if let Some(bar) = progress {
        bar.finish_and_clear();
    }
    ctx.shutdown();

    output::display_results(&results, args.format)?;
    Ok(crate::error::exit_codes::SUCCESS)
}

fn build_progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} evaluations")
    {
        bar.set_style(style.progress_chars("#>-"));
    }
    bar
}

