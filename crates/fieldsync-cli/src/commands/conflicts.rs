use fieldsync_core::ResolutionStrategy;

use crate::cli::ConflictCommands;
use crate::commands::common::{
    format_conflict_lines, format_history_lines, open_coordinator, parse_entity_id,
    resolve_entity_type, Context, RemoteMode,
};
use crate::error::CliError;

/// Strategies that read the remote copy need a configured remote
pub const fn remote_mode_for(strategy: ResolutionStrategy) -> RemoteMode {
    match strategy {
        ResolutionStrategy::ServerWins | ResolutionStrategy::Merge => RemoteMode::Required,
        ResolutionStrategy::ClientWins | ResolutionStrategy::LocalWins => RemoteMode::Optional,
    }
}

pub async fn run_conflicts(context: &Context, command: ConflictCommands) -> Result<(), CliError> {
    match command {
        ConflictCommands::List { json } => {
            let coordinator = open_coordinator(context, RemoteMode::Optional).await?;
            let conflicts = coordinator.detect_conflicts().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&conflicts)?);
            } else if conflicts.is_empty() {
                println!("No unresolved conflicts.");
            } else {
                for line in format_conflict_lines(&conflicts) {
                    println!("{line}");
                }
            }
        }
        ConflictCommands::History { limit, json } => {
            let coordinator = open_coordinator(context, RemoteMode::Optional).await?;
            let history = coordinator.resolver().resolution_history(limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&history)?);
            } else if history.is_empty() {
                println!("No sync conflicts recorded.");
            } else {
                for line in format_history_lines(&history) {
                    println!("{line}");
                }
            }
        }
        ConflictCommands::Resolve {
            entity_type,
            entity_id,
            strategy,
        } => run_resolve(context, &entity_type, &entity_id, &strategy).await?,
    }

    Ok(())
}

async fn run_resolve(
    context: &Context,
    entity_type: &str,
    entity_id: &str,
    strategy: &str,
) -> Result<(), CliError> {
    let strategy = strategy.parse::<ResolutionStrategy>()?;
    let coordinator = open_coordinator(context, remote_mode_for(strategy)).await?;
    let entity_type = resolve_entity_type(&coordinator, entity_type)?;
    let entity_id = parse_entity_id(entity_id)?;

    let cancel = tokio_util::sync::CancellationToken::new();
    match coordinator
        .resolve_conflict(&entity_type, &entity_id, strategy, &cancel)
        .await?
    {
        Some(info) => {
            println!(
                "Resolved {entity_type}/{entity_id} with {} (remote version {})",
                info.strategy, info.remote_version
            );
            if info.push_enqueued {
                println!("Resolved payload queued for upload; run `fieldsync sync` to push it");
            }
        }
        None => println!("{entity_type}/{entity_id} has no unresolved conflict"),
    }
    Ok(())
}
