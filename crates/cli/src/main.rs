//! Selfheal CLI - Main Entry Point
//!
//! Folds selector fallbacks learned during E2E runs back into the test
//! sources and proposes the change on a git branch.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod output;

use commands::{apply, learnings};

/// Selfheal CLI - learned selector remediation for E2E suites
#[derive(Parser)]
#[command(name = "selfheal")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// TOML configuration file
    #[arg(long, env = "SELFHEAL_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rewrite spec files with learned fallbacks and propose the change
    Apply(apply::ApplyArgs),

    /// List aggregated learnings without touching spec files
    Learnings(learnings::LearningsArgs),

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Apply(args) => apply::execute(args, cli.config.as_deref(), cli.format).await,
        Commands::Learnings(args) => learnings::execute(args, cli.config.as_deref(), cli.format),
        Commands::Version => {
            println!("Selfheal CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Learned selector remediation for browser E2E suites");
            Ok(())
        }
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
