//! # lumen CLI
//!
//! Replays render scenarios against the lumen runtime.

mod commands;
mod components;
mod scenario;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "lumen")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (defaults apply when omitted)
    #[arg(long, global = true, env = "LUMEN_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a scenario and print one frame per step
    Run {
        /// Scenario file (YAML)
        scenario: PathBuf,

        /// Return JSON for machine consumption
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so frames on stdout stay machine-readable
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(if cli.verbose {
                tracing::Level::DEBUG.into()
            } else {
                tracing::Level::WARN.into()
            }),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run { scenario, json } => {
            commands::run_scenario(cli.config.as_deref(), &scenario, json)
        }
        Commands::Config => commands::show_config(cli.config.as_deref()),
    }
}
