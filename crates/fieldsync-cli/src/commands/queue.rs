use chrono::Utc;

use crate::cli::QueueCommands;
use crate::commands::common::{
    format_queue_lines, open_coordinator, parse_entry_id, resolve_entity_type, Context,
    RemoteMode,
};
use crate::error::CliError;

pub async fn run_queue(context: &Context, command: QueueCommands) -> Result<(), CliError> {
    let coordinator = open_coordinator(context, RemoteMode::Optional).await?;
    let queue = coordinator.queue();

    match command {
        QueueCommands::List {
            entity_type,
            limit,
            json,
        } => {
            let entity_type = entity_type
                .as_deref()
                .map(|name| resolve_entity_type(&coordinator, name))
                .transpose()?;
            let entries = queue.get_queue_items(entity_type.as_ref(), limit).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("Sync queue is empty.");
            } else {
                for line in format_queue_lines(&entries, Utc::now().timestamp_millis()) {
                    println!("{line}");
                }
            }
        }
        QueueCommands::Remove { id } => {
            let entry_id = parse_entry_id(&id)?;
            if !queue.remove_from_queue(&entry_id).await? {
                return Err(CliError::EntryNotFound(entry_id.to_string()));
            }
            println!("Removed {entry_id}");
        }
        QueueCommands::Retry { id } => {
            let entry_id = parse_entry_id(&id)?;
            if queue.get_entry(&entry_id).await?.is_none() {
                return Err(CliError::EntryNotFound(entry_id.to_string()));
            }
            if queue.retry_entry(&entry_id).await? {
                println!("Re-armed {entry_id}");
            } else {
                println!("{entry_id} is not failed; nothing to retry");
            }
        }
        QueueCommands::Clear { yes } => {
            if !yes {
                return Err(CliError::ClearNotConfirmed);
            }
            let removed = queue.clear_queue().await?;
            println!("Cleared {removed} queue entries");
        }
        QueueCommands::Purge => {
            let purged = queue.purge_synced().await?;
            println!("Purged {purged} synced entries");
        }
    }

    Ok(())
}
