//! Binary entry point for the sqlport CLI.
//!
//! ## Usage
//!
//! ```bash
//! # Rewrite every file named by a job (or a directory of jobs)
//! sqlport rewrite jobs/ --output-dir out
//!
//! # Show the iteration plan without writing anything
//! sqlport plan jobs/batch1.json
//! ```

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

use sqlport::cli::{batch_options, load_config, run_plan, run_rewrite, RewriteOverrides};
use sqlport_core::error::{OutputErrorCode, SqlportError};
use sqlport_core::output::{emit_response, ErrorResponse};

// ============================================================================
// CLI Structure
// ============================================================================

/// Rewrite SQL scripts from analyzer-supplied directives.
///
/// All output is JSON on stdout; logs go to stderr.
#[derive(Parser, Debug)]
#[command(name = "sqlport", version, about = "Rewrite SQL scripts from rewrite directives")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

/// Global arguments shared by all subcommands.
#[derive(Parser, Debug)]
struct GlobalArgs {
    /// Config file (default: ./sqlport.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level for tracing output.
    #[arg(long, global = true, value_enum, default_value = "warn")]
    log_level: LogLevel,
}

/// Log level for tracing output.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn to_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rewrite every file of the given jobs.
    Rewrite {
        /// Job files or directories of job files.
        #[arg(required = true)]
        jobs: Vec<PathBuf>,

        /// Output directory (overrides the config file).
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Worker threads; 0 uses one per core.
        #[arg(long)]
        threads: Option<usize>,

        /// Do not write the hyperlinked HTML rendering.
        #[arg(long)]
        no_html: bool,
    },
    /// Show each file's iteration plan without rewriting.
    Plan {
        /// Job files or directories of job files.
        #[arg(required = true)]
        jobs: Vec<PathBuf>,
    },
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing(cli.global.log_level);

    match execute(cli) {
        Ok(code) => code,
        Err(err) => {
            let error_code = OutputErrorCode::from(&err);
            let response = ErrorResponse::from_error(&err);

            // Errors go to stdout as JSON too
            let _ = emit_response(&response, &mut io::stdout());
            let _ = io::stdout().flush();

            ExitCode::from(error_code.code())
        }
    }
}

/// Initialize tracing subscriber.
fn init_tracing(level: LogLevel) {
    use tracing_subscriber::fmt::format::FmtSpan;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_tracing_level().to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

/// Execute the CLI command.
fn execute(cli: Cli) -> Result<ExitCode, SqlportError> {
    match cli.command {
        Command::Rewrite {
            jobs,
            output_dir,
            threads,
            no_html,
        } => {
            let config = load_config(cli.global.config.as_deref())?;
            let overrides = RewriteOverrides {
                output_dir,
                threads,
                no_html,
            };
            let response = run_rewrite(&jobs, &batch_options(&config, &overrides))?;
            emit(&response)?;
            if response.has_failures() {
                Ok(ExitCode::from(OutputErrorCode::RewriteFailed.code()))
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
        Command::Plan { jobs } => {
            let response = run_plan(&jobs)?;
            emit(&response)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn emit<T: serde::Serialize>(response: &T) -> Result<(), SqlportError> {
    emit_response(response, &mut io::stdout())
        .map_err(|e| SqlportError::internal(format!("failed to write output: {}", e)))
}
