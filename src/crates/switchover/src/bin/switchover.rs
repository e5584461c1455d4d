//! Switchover CLI - blue-green Postgres cutover behind PgBouncer
//!
//! Main entry point for the switchover command-line tool.

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use switchover::config::{load_config, LoggingConfig, CONFIG_ENV_VAR};
use switchover::diagnostics::run_check;
use switchover::prompt::{AutoConfirm, Confirm, TerminalPrompt};
use switchover::{run_cutover, CutoverOutcome};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "switchover")]
#[command(about = "Switchover - blue-green Postgres cutover behind PgBouncer", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Log and simulate every mutation instead of executing it
    #[arg(long, overrides_with = "no_dry_run")]
    dry_run: bool,

    /// Execute the cutover for real
    #[arg(long, overrides_with = "dry_run")]
    no_dry_run: bool,

    /// Configuration file; replaces the user and project config lookup
    #[arg(short, long, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Answer the confirmation prompt with yes (dry-run only)
    #[arg(short = 'y', long)]
    assume_yes: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run prechecks, confirm, and cut traffic over to green (default)
    Cutover,

    /// Read-only diagnostics: connectivity, pooler state, slots, sequences, audit rows
    Check,
}

impl Cli {
    /// Dry-run unless `--no-dry-run` was the last of the pair given
    fn is_dry_run(&self) -> bool {
        self.dry_run || !self.no_dry_run
    }
}

fn init_logging(config: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { config.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.colored)
        .with_writer(std::io::stderr);

    match (config.format.as_str(), config.timestamps) {
        ("pretty", true) => builder.pretty().init(),
        ("pretty", false) => builder.pretty().without_time().init(),
        (_, true) => builder.compact().init(),
        (_, false) => builder.compact().without_time().init(),
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let dry_run = cli.is_dry_run();
    let config = load_config(cli.config).await?;
    init_logging(&config.logging, cli.verbose);

    match cli.command.unwrap_or(Commands::Cutover) {
        Commands::Check => {
            let diagnostics = run_check(&config).await?;
            diagnostics.print();
            Ok(diagnostics.is_clean())
        }
        Commands::Cutover => {
            if cli.assume_yes && !dry_run {
                anyhow::bail!("--assume-yes is only allowed together with --dry-run");
            }

            let terminal = TerminalPrompt::new();
            let auto = AutoConfirm(true);
            let prompt: &dyn Confirm = if cli.assume_yes { &auto } else { &terminal };

            match run_cutover(&config, dry_run, prompt, true).await? {
                CutoverOutcome::Completed => {
                    println!("{}", "✓ Cutover complete".green().bold());
                    Ok(true)
                }
                CutoverOutcome::Declined => {
                    println!("Cutover declined, nothing was changed");
                    Ok(true)
                }
                CutoverOutcome::RolledBack { phase, error } => {
                    eprintln!(
                        "{} Cutover rolled back during {}: {}",
                        "✗".red(),
                        phase,
                        error
                    );
                    Ok(false)
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let dry_run = cli.is_dry_run();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{} {:#} (dryRun={})", "Error:".red().bold(), e, dry_run);
            ExitCode::FAILURE
        }
    }
}
