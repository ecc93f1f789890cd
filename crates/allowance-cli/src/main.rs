//! Allowance CLI - quota metering and daily check-in
//!
//! A command-line interface for opening accounts, running metered calls
//! through the reservation gate, inspecting usage windows and claiming the
//! daily check-in bonus.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "allowance")]
#[command(author, version, about = "Quota metering and daily check-in CLI", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format: table (default) or json
    #[arg(long, global = true, default_value = "table")]
    format: output::OutputFormat,

    /// Suppress progress messages
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Log metering decisions (-v for debug, -vv for trace)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Override database path (or set ALLOWANCE_DB_PATH env var)
    #[arg(long, env = "ALLOWANCE_DB_PATH", global = true)]
    db: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open accounts and inspect balances
    Account {
        #[command(subcommand)]
        action: commands::account::AccountAction,
    },

    /// Run a metered call through reservation and settlement
    Call {
        #[command(subcommand)]
        action: commands::call::CallAction,
    },

    /// Usage totals over reference-timezone windows
    Usage {
        #[command(subcommand)]
        action: commands::usage::UsageAction,
    },

    /// Daily check-in bonus
    Checkin {
        #[command(subcommand)]
        action: commands::checkin::CheckinAction,
    },

    /// Show effective configuration
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    // RUST_LOG still wins when set
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Set up database path if provided
    if let Some(db_path) = &cli.db {
        std::env::set_var("ALLOWANCE_DB_PATH", db_path);
    }

    let config = allowance_core::MeteringConfig::from_env()?;
    log::debug!("[cli] Effective config: {:?}", config);
    let db = allowance_core::Database::new().await?;
    let metering = allowance_core::Metering::new(&db, config)?;

    // Create context for commands
    let ctx = commands::Context {
        metering,
        format: cli.format,
        quiet: cli.quiet,
    };

    let result = match cli.command {
        Commands::Account { action } => commands::account::execute(&ctx, action).await,
        Commands::Call { action } => commands::call::execute(&ctx, action).await,
        Commands::Usage { action } => commands::usage::execute(&ctx, action).await,
        Commands::Checkin { action } => commands::checkin::execute(&ctx, action).await,
        Commands::Config { action } => commands::config::execute(&ctx, action).await,
    };

    // Refunds are scheduled in the background; don't exit before they land.
    ctx.metering.shutdown().await;
    result
}
