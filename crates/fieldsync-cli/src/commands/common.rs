use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fieldsync_core::models::SyncConflict;
use fieldsync_core::util::millis_to_datetime;
use fieldsync_core::{
    ConflictRecord, EntityId, EntityType, QueueEntry, QueueEntryId, RemoteTransport,
    SqliteEntityStore, SyncCoordinator, SyncOperationResult, SyncStatusSnapshot, SyncStore,
};

use crate::cli_config::CliConfig;
use crate::error::CliError;
use crate::remote::{HttpRemoteTransport, UnconfiguredRemote};

/// Whether a command needs to reach the remote
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoteMode {
    Required,
    Optional,
}

/// Locations shared by every command
#[derive(Clone, Debug)]
pub struct Context {
    pub db_path: PathBuf,
    pub config_path: PathBuf,
}

impl Context {
    pub fn resolve(cli_db_path: Option<PathBuf>, cli_config_path: Option<PathBuf>) -> Self {
        Self {
            db_path: resolve_db_path(cli_db_path),
            config_path: resolve_config_path(cli_config_path),
        }
    }
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("FIELDSYNC_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fieldsync")
        .join("fieldsync.db")
}

pub fn resolve_config_path(cli_config_path: Option<PathBuf>) -> PathBuf {
    cli_config_path
        .or_else(|| env::var_os("FIELDSYNC_CONFIG").map(PathBuf::from))
        .unwrap_or_else(crate::cli_config::default_config_path)
}

pub fn load_config(path: &Path) -> Result<CliConfig, CliError> {
    CliConfig::load_from_path(path).map_err(CliError::Config)
}

pub async fn open_coordinator(
    context: &Context,
    remote: RemoteMode,
) -> Result<SyncCoordinator, CliError> {
    let config = load_config(&context.config_path)?;
    let engine = config.engine_config().map_err(CliError::Config)?;

    let settings = config.remote_settings().map_err(CliError::Config)?;
    let transport: Arc<dyn RemoteTransport> = match (settings, remote) {
        (Some(settings), _) => Arc::new(HttpRemoteTransport::new(settings)?),
        (None, RemoteMode::Optional) => Arc::new(UnconfiguredRemote),
        (None, RemoteMode::Required) => return Err(CliError::RemoteNotConfigured),
    };

    let store = SyncStore::open_path(&context.db_path).await?;
    let local = Arc::new(SqliteEntityStore::new(store.clone()));
    Ok(SyncCoordinator::new(store, transport, local, &engine)?)
}

pub fn resolve_entity_type(
    coordinator: &SyncCoordinator,
    name: &str,
) -> Result<EntityType, CliError> {
    Ok(coordinator.registry().resolve(name)?)
}

pub fn parse_entity_id(value: &str) -> Result<EntityId, CliError> {
    Ok(EntityId::new(value)?)
}

/// Parse a payload argument; only objects and arrays are accepted
pub fn parse_payload(raw: &str) -> Result<serde_json::Value, CliError> {
    let value = serde_json::from_str::<serde_json::Value>(raw.trim())
        .map_err(|error| CliError::InvalidPayload(error.to_string()))?;
    if value.is_object() || value.is_array() {
        Ok(value)
    } else {
        Err(CliError::InvalidPayload(format!("got `{value}`")))
    }
}

pub fn parse_entry_id(raw: &str) -> Result<QueueEntryId, CliError> {
    let raw = raw.trim();
    raw.parse()
        .map_err(|_| CliError::InvalidEntryId(raw.to_string()))
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    millis_to_datetime(timestamp_ms)
        .format("%Y-%m-%d %H:%M:%S UTC")
        .to_string()
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    if timestamp_ms > now_ms {
        return format!("in {}", format_span(timestamp_ms - now_ms));
    }
    let diff = now_ms - timestamp_ms;
    if diff < 60_000 {
        "just now".to_string()
    } else {
        format!("{} ago", format_span(diff))
    }
}

fn format_span(diff: i64) -> String {
    let second = 1_000;
    let minute = 60 * second;
    let hour = 60 * minute;
    let day = 24 * hour;

    if diff < minute {
        format!("{}s", diff.max(second) / second)
    } else if diff < hour {
        format!("{}m", diff / minute)
    } else if diff < day {
        format!("{}h", diff / hour)
    } else {
        format!("{}d", diff / day)
    }
}

pub fn format_queue_lines(entries: &[QueueEntry], now_ms: i64) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            let id = entry.id.to_string();
            let key = entry.key().to_string();
            let mut line = format!(
                "{id:<36}  {:<6}  {key:<32}  {:<13}  {}/{}",
                entry.operation_type.as_str(),
                entry.status.as_str(),
                entry.retry_count,
                entry.max_retries
            );
            if let Some(next_attempt_at) = entry.next_attempt_at {
                line.push_str(&format!(
                    "  next {}",
                    format_relative_time(next_attempt_at, now_ms)
                ));
            }
            if let Some(error) = &entry.error_message {
                line.push_str(&format!("  ({error})"));
            }
            line
        })
        .collect()
}

pub fn format_conflict_lines(conflicts: &[ConflictRecord]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {}/{}  local={} remote={}",
                format_sync_timestamp(conflict.detected_at),
                conflict.entity_type,
                conflict.entity_id,
                conflict.local_version,
                conflict.remote_version
            )
        })
        .collect()
}

pub fn format_history_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {:<11}  {}/{}  local={} remote={}",
                format_sync_timestamp(conflict.resolved_at),
                conflict.strategy,
                conflict.entity_type,
                conflict.entity_id,
                conflict.local_version,
                conflict.remote_version
            )
        })
        .collect()
}

pub fn format_status_lines(
    status: &SyncStatusSnapshot,
    conflict_count: usize,
    now_ms: i64,
) -> Vec<String> {
    let last_sync = status.last_sync_time.map_or_else(
        || "never".to_string(),
        |timestamp| {
            format!(
                "{} ({})",
                format_sync_timestamp(timestamp),
                format_relative_time(timestamp, now_ms)
            )
        },
    );
    vec![
        format!("Syncing:    {}", if status.is_syncing { "yes" } else { "no" }),
        format!("Last sync:  {last_sync}"),
        format!("Pending:    {}", status.pending_items_count),
        format!("Conflicts:  {conflict_count}"),
    ]
}

pub fn format_sync_result(result: &SyncOperationResult) -> String {
    let noun = if result.items_synced == 1 { "item" } else { "items" };
    match &result.error {
        None => format!("Sync completed: {} {noun} synced", result.items_synced),
        Some(error) => format!(
            "Sync completed with errors: {} {noun} synced; {error}",
            result.items_synced
        ),
    }
}
