//! Mnemo - conversation and memory store
//!
//! Main entry point for the mnemo CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{migrate, stats, status, verify};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Mnemo - conversation and memory store
#[derive(Parser)]
#[command(name = "mnemo")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Database file (default: ~/.mnemo/mnemo.db)
    #[arg(long, global = true, env = "MNEMO_DATABASE")]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Apply pending schema migrations
    Migrate(migrate::MigrateArgs),

    /// Show applied and pending migrations
    Status(status::StatusArgs),

    /// Show database statistics
    Stats(stats::StatsArgs),

    /// Verify ledger checksums against the embedded migration SQL
    Verify(verify::VerifyArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing — console (human-readable) + rotating JSON file
    let filter = if cli.verbose {
        "mnemo=debug,mnemo_store=debug,info"
    } else {
        "mnemo=info,mnemo_store=info,warn"
    };

    let log_dir = data_dir()
        .map(|d| d.join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"));
    let file_appender = tracing_appender::rolling::daily(&log_dir, "mnemo.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "mnemo=trace,mnemo_store=trace,info",
                )),
        )
        .init();

    let database = cli
        .database
        .or_else(|| data_dir().map(|d| d.join("mnemo.db")))
        .unwrap_or_else(|| PathBuf::from("mnemo.db"));

    // Create context for commands
    let ctx = commands::Context {
        database,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    // Dispatch to command handlers
    match cli.command {
        Commands::Migrate(args) => migrate::run(args, &ctx),
        Commands::Status(args) => status::run(args, &ctx),
        Commands::Stats(args) => stats::run(args, &ctx),
        Commands::Verify(args) => verify::run(args, &ctx),
    }
}

/// Per-user data directory (`~/.mnemo`).
fn data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".mnemo"))
}
