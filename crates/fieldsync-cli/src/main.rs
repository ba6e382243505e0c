//! fieldsync CLI - drive and inspect offline-first sync from the terminal
//!
//! Local edits are queued in the engine database and pushed to the configured
//! remote by `fieldsync sync` or `fieldsync watch`.

mod cli;
mod cli_config;
mod commands;
mod error;
mod remote;
#[cfg(test)]
mod tests;

use clap::{CommandFactory, Parser};

use crate::cli::{Cli, Commands};
use crate::commands::common::Context;
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::conflicts::run_conflicts;
use crate::commands::entity::{run_delete, run_put, run_show};
use crate::commands::queue::run_queue;
use crate::commands::sync::{run_reset_failed, run_status, run_sync, run_watch};
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

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "fieldsync=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let context = Context::resolve(cli.db_path, cli.config);

    match cli.command {
        Some(Commands::Put {
            entity_type,
            entity_id,
            payload,
            priority,
        }) => run_put(&context, &entity_type, &entity_id, &payload, priority).await?,
        Some(Commands::Delete {
            entity_type,
            entity_id,
        }) => run_delete(&context, &entity_type, &entity_id).await?,
        Some(Commands::Show {
            entity_type,
            entity_id,
            json,
        }) => run_show(&context, &entity_type, &entity_id, json).await?,
        Some(Commands::Sync { entity_type, json }) => {
            run_sync(&context, entity_type.as_deref(), json).await?;
        }
        Some(Commands::Status { json }) => run_status(&context, json).await?,
        Some(Commands::Queue { command }) => run_queue(&context, command).await?,
        Some(Commands::Conflicts { command }) => run_conflicts(&context, command).await?,
        Some(Commands::ResetFailed { entity_type }) => {
            run_reset_failed(&context, entity_type.as_deref()).await?;
        }
        Some(Commands::Watch { interval_secs }) => run_watch(&context, interval_secs).await?,
        Some(Commands::Config { command }) => run_config(&context, command)?,
        Some(Commands::Completions { shell, output }) => {
            run_completions(shell, output.as_deref())?;
        }
        None => {
            Cli::command().print_help().map_err(CliError::Io)?;
            println!();
        }
    }

    Ok(())
}
