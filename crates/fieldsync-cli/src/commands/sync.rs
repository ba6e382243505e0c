use std::time::Duration;

use chrono::Utc;
use fieldsync_core::SyncStatusSnapshot;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::commands::common::{
    format_status_lines, format_sync_result, load_config, open_coordinator, resolve_entity_type,
    Context, RemoteMode,
};
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct StatusItem {
    #[serde(flatten)]
    status: SyncStatusSnapshot,
    conflicts: usize,
}

/// Cancel `cancel` on Ctrl-C
fn cancel_on_interrupt(cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, cancelling sync");
            cancel.cancel();
        }
    })
}

pub async fn run_sync(
    context: &Context,
    entity_type: Option<&str>,
    as_json: bool,
) -> Result<(), CliError> {
    let coordinator = open_coordinator(context, RemoteMode::Required).await?;
    coordinator.queue().recover_interrupted().await?;

    let cancel = CancellationToken::new();
    let interrupt = cancel_on_interrupt(cancel.clone());
    let result = match entity_type {
        Some(name) => {
            let entity_type = resolve_entity_type(&coordinator, name)?;
            coordinator.sync_entity(&entity_type, &cancel).await
        }
        None => coordinator.start_full_sync(&cancel).await,
    };
    interrupt.abort();
    let result = result?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", format_sync_result(&result));
    }

    match result.error {
        Some(error) if !result.success => Err(CliError::SyncFailed(error)),
        _ => Ok(()),
    }
}

pub async fn run_status(context: &Context, as_json: bool) -> Result<(), CliError> {
    let coordinator = open_coordinator(context, RemoteMode::Optional).await?;
    let item = StatusItem {
        status: coordinator.get_sync_status().await?,
        conflicts: coordinator.detect_conflicts().await?.len(),
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&item)?);
    } else {
        let now_ms = Utc::now().timestamp_millis();
        for line in format_status_lines(&item.status, item.conflicts, now_ms) {
            println!("{line}");
        }
    }
    Ok(())
}

pub async fn run_reset_failed(context: &Context, entity_type: Option<&str>) -> Result<(), CliError> {
    let coordinator = open_coordinator(context, RemoteMode::Optional).await?;
    let entity_type = entity_type
        .map(|name| resolve_entity_type(&coordinator, name))
        .transpose()?;

    let count = coordinator
        .metadata()
        .reset_failed(entity_type.as_ref())
        .await?;
    println!("Reset {count} failed records");
    Ok(())
}

pub async fn run_watch(context: &Context, interval_secs: Option<u64>) -> Result<(), CliError> {
    let interval = match interval_secs {
        Some(0) => {
            return Err(CliError::Config(
                "--interval-secs must be positive".to_string(),
            ))
        }
        Some(seconds) => Duration::from_secs(seconds),
        None => load_config(&context.config_path)?
            .engine_config()
            .map_err(CliError::Config)?
            .sync_interval(),
    };
    let coordinator = open_coordinator(context, RemoteMode::Required).await?;

    let cancel = CancellationToken::new();
    let interrupt = cancel_on_interrupt(cancel.clone());
    println!(
        "Syncing every {}s; press Ctrl-C to stop",
        interval.as_secs().max(1)
    );
    let outcome = coordinator.run(interval, &cancel).await;
    interrupt.abort();
    outcome?;
    println!("Stopped");
    Ok(())
}
