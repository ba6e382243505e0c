use chrono::Utc;
use fieldsync_core::{EntityKey, EntitySnapshot, OperationType};
use serde::Serialize;

use crate::commands::common::{
    format_sync_timestamp, open_coordinator, parse_entity_id, parse_payload, resolve_entity_type,
    Context, RemoteMode,
};
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct ShowItem {
    snapshot: Option<EntitySnapshot>,
    metadata: Option<fieldsync_core::SyncMetadata>,
}

pub async fn run_put(
    context: &Context,
    entity_type: &str,
    entity_id: &str,
    payload: &str,
    priority: i32,
) -> Result<(), CliError> {
    let payload = parse_payload(payload)?;
    let coordinator = open_coordinator(context, RemoteMode::Optional).await?;
    let key = EntityKey::new(
        resolve_entity_type(&coordinator, entity_type)?,
        parse_entity_id(entity_id)?,
    );

    let known_remotely = coordinator
        .metadata()
        .get(&key)
        .await?
        .is_some_and(|record| !record.is_new_remotely());
    let exists_locally = coordinator.local_store().load(&key).await?.is_some();
    let operation_type = if known_remotely || exists_locally {
        OperationType::Update
    } else {
        OperationType::Create
    };

    let entry = coordinator
        .queue()
        .enqueue_with_priority(
            operation_type,
            key.entity_type.clone(),
            key.entity_id.clone(),
            payload.clone(),
            priority,
        )
        .await?;
    let record = coordinator.metadata().get_or_create(&key).await?;
    coordinator
        .local_store()
        .save(&EntitySnapshot {
            key: key.clone(),
            payload,
            version: record.local_version,
            updated_at: Utc::now().timestamp_millis(),
        })
        .await?;

    println!("Queued {operation_type} of {key} ({})", entry.id);
    Ok(())
}

pub async fn run_delete(
    context: &Context,
    entity_type: &str,
    entity_id: &str,
) -> Result<(), CliError> {
    let coordinator = open_coordinator(context, RemoteMode::Optional).await?;
    let key = EntityKey::new(
        resolve_entity_type(&coordinator, entity_type)?,
        parse_entity_id(entity_id)?,
    );

    let removed = coordinator.local_store().remove(&key).await?;
    let tracked = coordinator.metadata().get(&key).await?.is_some();
    if !removed && !tracked {
        println!("{key} is not tracked locally");
        return Ok(());
    }

    let entry = coordinator
        .queue()
        .enqueue(
            OperationType::Delete,
            key.entity_type.clone(),
            key.entity_id.clone(),
            serde_json::Value::Null,
        )
        .await?;
    println!("Queued delete of {key} ({})", entry.id);
    Ok(())
}

pub async fn run_show(
    context: &Context,
    entity_type: &str,
    entity_id: &str,
    as_json: bool,
) -> Result<(), CliError> {
    let coordinator = open_coordinator(context, RemoteMode::Optional).await?;
    let key = EntityKey::new(
        resolve_entity_type(&coordinator, entity_type)?,
        parse_entity_id(entity_id)?,
    );
    let item = ShowItem {
        snapshot: coordinator.local_store().load(&key).await?,
        metadata: coordinator.metadata().get(&key).await?,
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&item)?);
        return Ok(());
    }

    match &item.snapshot {
        Some(snapshot) => {
            println!("{key} (local version {})", snapshot.version);
            println!("{}", serde_json::to_string_pretty(&snapshot.payload)?);
        }
        None => println!("{key} has no local copy"),
    }
    if let Some(record) = &item.metadata {
        println!(
            "Sync: {}  local={} remote={}  attempts {}/{}{}",
            record.sync_status,
            record.local_version,
            record.remote_version,
            record.sync_attempts,
            record.max_sync_attempts,
            if record.has_conflict { "  CONFLICT" } else { "" }
        );
        if let Some(success) = record.last_sync_success {
            println!("Last synced: {}", format_sync_timestamp(success));
        }
        if let Some(error) = &record.sync_error {
            println!("Last error: {error}");
        }
    }
    Ok(())
}
