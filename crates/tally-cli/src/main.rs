//! Tally CLI - Command-line front end for the Tally finance tracker
//!
//! Records books, entries and categories in a local database and keeps them
//! in sync with the account's cloud document.

mod cli;
mod commands;
mod config_profiles;
mod error;


use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::book::run_book;
use crate::commands::category::run_category;
use crate::commands::common::AppContext;
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::conflicts::run_conflicts;
use crate::commands::entry::run_entry;
use crate::commands::sync::{run_signout, run_sync};
use crate::commands::watch::run_watch;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tally=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell, output } = &cli.command {
        return run_completions(*shell, output.as_deref());
    }

    let ctx = AppContext::load(cli.db_path, cli.profile.as_deref())?;
    match cli.command {
        Commands::Book { command } => run_book(command, &ctx),
        Commands::Entry { command } => run_entry(command, &ctx),
        Commands::Category { command } => run_category(command, &ctx),
        Commands::Sync { command } => run_sync(command, &ctx).await,
        Commands::Conflicts { command } => run_conflicts(command, &ctx).await,
        Commands::Watch => run_watch(&ctx).await,
        Commands::Signout { wipe } => run_signout(wipe, &ctx).await,
        Commands::Config { command } => run_config(command, cli.profile.as_deref(), &ctx),
        Commands::Completions { .. } => Ok(()),
    }
}
