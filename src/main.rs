//! # Key Coverage CLI (`kcov`)
//!
//! Runs the reconciliation pipeline and a handful of inspection commands.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kcov run` | Load inputs, reconcile, write the coverage artifact |
//! | `kcov inputs` | List configured inputs and whether they are present |
//! | `kcov classify "<text>"` | Show limitation categories and cables for a snippet |
//! | `kcov normalize` | Show canonical make/model/tool and expanded years |
//! | `kcov stats [path]` | Summarize an existing artifact |
//! | `kcov completions <shell>` | Print a shell completion script |
//!
//! Diagnostics go to stderr through `tracing`; set `RUST_LOG=debug` to see
//! every skipped record.

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use key_coverage::config::{self, Config};
use key_coverage::pipeline::{self, RunOptions};
use key_coverage::progress::ProgressMode;
use key_coverage::{inspect, sources, stats};

/// Key Coverage CLI: reconcile key-programming tool coverage from mined
/// evidence into one artifact.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/kcov.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "kcov",
    about = "Reconcile automotive key-programming tool coverage",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kcov.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile all configured inputs and write the coverage artifact.
    ///
    /// Exits non-zero only when a required input is missing or the artifact
    /// cannot be written. Files that fail to parse are reported in the
    /// summary, which then ends in `completed with errors`.
    Run {
        /// Override `output.path`. Use `-` for stdout.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Attach limitation and cable evidence only to the vehicles it
        /// names (make, model and year). Model-less evidence is left
        /// unattached.
        #[arg(long)]
        strict: bool,

        /// Print counts without writing the artifact.
        #[arg(long)]
        dry_run: bool,

        /// Progress reporting on stderr. Defaults to `human` on a terminal.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// List configured inputs and their status.
    Inputs,

    /// Classify a limitation snippet.
    Classify {
        /// Free text, typically a caveat or document excerpt.
        text: String,
    },

    /// Show how raw identity strings normalize.
    Normalize {
        #[arg(long)]
        make: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        tool: Option<String>,
        /// Year span such as `2018-2022` or `2020+`.
        #[arg(long)]
        years: Option<String>,
    },

    /// Summarize an existing coverage artifact.
    Stats {
        /// Artifact path. Defaults to `output.path` from the config.
        path: Option<PathBuf>,
    },

    /// Print a shell completion script.
    Completions {
        shell: clap_complete::Shell,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    // Commands that don't require config
    match &cli.command {
        Commands::Classify { text } => {
            print!("{}", inspect::classify_report(text));
            return Ok(());
        }
        Commands::Normalize {
            make,
            model,
            tool,
            years,
        } => {
            let cfg = config::load_config(&cli.config).unwrap_or_else(|_| Config::minimal());
            print!(
                "{}",
                inspect::normalize_report(
                    make.as_deref(),
                    model.as_deref(),
                    tool.as_deref(),
                    years.as_deref(),
                    cfg.normalize.year_horizon,
                )
            );
            return Ok(());
        }
        Commands::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "kcov", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Stats { path: Some(path) } => {
            stats::run_stats(path)?;
            return Ok(());
        }
        _ => {}
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Run {
            output,
            strict,
            dry_run,
            progress,
        } => {
            let reporter = progress.unwrap_or_else(ProgressMode::default_for_tty).reporter();
            let options = RunOptions {
                output,
                strict,
                dry_run,
            };
            pipeline::run(&cfg, &options, reporter.as_ref())?;
        }
        Commands::Inputs => {
            sources::list_sources(&cfg)?;
        }
        Commands::Stats { path } => {
            let path = path.unwrap_or_else(|| cfg.output.path.clone());
            stats::run_stats(&path)?;
        }
        Commands::Classify { .. } | Commands::Normalize { .. } | Commands::Completions { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
