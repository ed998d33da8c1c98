//! `parasweep`: a manifest-driven front end to `parasweep-core`, for
//! driving a batch of evaluations and inspecting restart journals
//! without embedding the library.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;

mod commands;
mod error;
mod manifest;
mod output;

use commands::{inspect_journal, run};
use error::{exit_codes, CliError};
use output::OutputFormat;

#[derive(Parser)]
#[command(name = "parasweep")]
#[command(author = "parasweep contributors")]
#[command(version)]
#[command(about = "Evaluation orchestration core for optimization and parameter-study drivers", long_about = None)]
#[command(propagate_version = true)]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose error output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a manifest's batch of evaluations and print the results.
    #[command(visible_alias = "r")]
    Run {
        /// Path to the TOML manifest describing the evaluation batch.
        manifest: PathBuf,

        /// Path to a configuration file overriding the default lookup.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
        format: OutputFormat,

        /// Suppress the progress bar.
        #[arg(long)]
        quiet: bool,
    },

    /// Replay a restart journal and print every surviving entry.
    #[command(visible_alias = "i")]
    InspectJournal {
        /// Path to the restart journal file.
        journal: PathBuf,

        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
        format: OutputFormat,
    },

    /// Generate shell completions.
    Completions {
        /// The shell to generate completions for.
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let result = match cli.command {
        Commands::Run { manifest, config, format, quiet } => {
            run::execute(run::RunArgs { manifest, config_file: config, format, quiet })
        }
        Commands::InspectJournal { journal, format } => {
            inspect_journal::execute(inspect_journal::InspectJournalArgs { journal, format })
        }
        Commands::Completions { shell } => {
            generate_completions(shell);
            Ok(exit_codes::SUCCESS)
        }
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            let code = if let Some(cli_error) = e.downcast_ref::<CliError>() {
                cli_error.print_error();
                cli_error.exit_code()
            } else {
                eprintln!("\nError: {e}");
                exit_codes::ERROR
            };
            if cli.verbose {
                eprintln!("\nCaused by:");
                for cause in e.chain().skip(1) {
                    eprintln!("  {cause}");
                }
            }
            process::exit(code);
        }
    }
}

fn generate_completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();
    generate(shell, &mut cmd, bin_name, &mut io::stdout());
}
