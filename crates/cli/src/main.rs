//! KCT pipeline CLI - database migrations and management tools.
//!
//! # Usage
//!
//! ```bash
//! # Run canonical-store migrations
//! kct-cli migrate canonical
//!
//! # Run fast-path-store migrations
//! kct-cli migrate fast-path
//!
//! # Run all migrations
//! kct-cli migrate all
//!
//! # Run one reconciliation sweep and exit
//! kct-cli sweep
//!
//! # Retry persisted failed notification deliveries
//! kct-cli flush-failed
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `sweep` - One-off fast-path reconciliation sweep
//! - `flush-failed` - Drain the persisted failed-delivery queue

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "kct-cli")]
#[command(author, version, about = "KCT order pipeline CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate {
        #[command(subcommand)]
        target: MigrateTarget,
    },
    /// Run one fast-path reconciliation sweep and exit
    Sweep,
    /// Retry persisted failed notification deliveries
    FlushFailed,
}

#[derive(Subcommand)]
enum MigrateTarget {
    /// Run canonical-store migrations
    Canonical,
    /// Run fast-path-store migrations
    FastPath,
    /// Run all migrations
    All,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate { target } => match target {
            MigrateTarget::Canonical => commands::migrate::canonical().await?,
            MigrateTarget::FastPath => commands::migrate::fast_path().await?,
            MigrateTarget::All => {
                commands::migrate::canonical().await?;
                commands::migrate::fast_path().await?;
            }
        },
        Commands::Sweep => commands::sweep::run().await?,
        Commands::FlushFailed => commands::flush::run().await?,
    }
    Ok(())
}
