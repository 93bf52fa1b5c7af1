mod cli;
mod commands;
mod types;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::types::FuzzMode;

fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let global = &cli.global;

    match &cli.command {
        Commands::Fuzz(args) => {
            commands::campaign::run_fuzz_command(global, args, FuzzMode::Fuzz)?;
        }
        Commands::FuzzDeflake(args) => {
            commands::campaign::run_fuzz_command(global, args, FuzzMode::FuzzDeflake)?;
        }
        Commands::Deflake { scope, iterations } => {
            commands::campaign::run_deflake_command(global, scope.as_deref(), *iterations)?;
        }
        Commands::Reproduce {
            scope,
            grid_max,
            repeats,
            format,
        } => {
            commands::campaign::run_reproduce_command(global, scope, *grid_max, *repeats, format)?;
        }
        Commands::QuickTests => {
            commands::campaign::run_quick_tests_command(global)?;
        }
        Commands::TagFinal {
            grid_max,
            per_shape,
        } => {
            commands::campaign::run_tag_final_command(global, *grid_max, *per_shape)?;
        }
        Commands::Status { format } => {
            commands::status::run_status_command(global, format)?;
        }
        Commands::Show {
            id,
            fingerprint,
            format,
        } => {
            commands::status::run_show_command(global, *id, fingerprint.as_deref(), format)?;
        }
        Commands::Analyze {
            trace,
            adapter,
            faults,
            votes_only,
            format,
        } => {
            commands::analyze::run_analyze_command(trace, adapter, *faults, *votes_only, format)?;
        }
    }
    Ok(())
}
