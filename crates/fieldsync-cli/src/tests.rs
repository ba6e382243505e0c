use std::path::PathBuf;

use clap::CommandFactory;
use fieldsync_core::{
    EntityId, EntityKey, EntityType, OperationType, QueueEntry, QueueStatus, ResolutionStrategy,
    SyncOperationResult, SyncStatusSnapshot,
};

use crate::cli::{Cli, CompletionShell};
use crate::commands::common::{
    format_queue_lines, format_relative_time, format_status_lines, format_sync_result,
    format_sync_timestamp, open_coordinator, parse_entry_id, parse_payload, Context, RemoteMode,
};
use crate::commands::completions::{render_completions, run_completions};
use crate::commands::conflicts::remote_mode_for;
use crate::commands::entity::{run_delete, run_put};
use crate::error::CliError;

fn temp_context(dir: &tempfile::TempDir) -> Context {
    Context {
        db_path: dir.path().join("fieldsync.db"),
        config_path: dir.path().join("cli-config.json"),
    }
}

#[test]
fn cli_definition_is_valid() {
    Cli::command().debug_assert();
}

#[test]
fn parse_payload_accepts_objects_and_arrays() {
    assert_eq!(
        parse_payload(r#" {"name": "Reef"} "#).unwrap(),
        serde_json::json!({"name": "Reef"})
    );
    assert!(parse_payload("[1, 2]").is_ok());
}

#[test]
fn parse_payload_rejects_scalars_and_garbage() {
    assert!(matches!(parse_payload("42"), Err(CliError::InvalidPayload(_))));
    assert!(matches!(
        parse_payload("{not json"),
        Err(CliError::InvalidPayload(_))
    ));
}

#[test]
fn parse_entry_id_rejects_non_uuid() {
    assert!(matches!(
        parse_entry_id("abc"),
        Err(CliError::InvalidEntryId(id)) if id == "abc"
    ));
    let id = fieldsync_core::QueueEntryId::new();
    assert_eq!(parse_entry_id(&format!(" {id} ")).unwrap(), id);
}

#[test]
fn format_relative_time_units() {
    let now = 10_000_000;
    assert_eq!(format_relative_time(now - 30_000, now), "just now");
    assert_eq!(format_relative_time(now - 120_000, now), "2m ago");
    assert_eq!(format_relative_time(now - 2 * 60 * 60_000, now), "2h ago");
    assert_eq!(format_relative_time(now + 4_000, now), "in 4s");
    assert_eq!(format_relative_time(now + 300_000, now), "in 5m");
}

#[test]
fn format_sync_timestamp_renders_utc() {
    assert_eq!(format_sync_timestamp(0), "1970-01-01 00:00:00 UTC");
    assert_eq!(
        format_sync_timestamp(1_700_000_000_000),
        "2023-11-14 22:13:20 UTC"
    );
}

#[test]
fn format_sync_result_mentions_errors() {
    assert_eq!(
        format_sync_result(&SyncOperationResult::succeeded(1, 0)),
        "Sync completed: 1 item synced"
    );
    let failed = SyncOperationResult::failed("Projects: p-1: offline", 2, 0);
    assert_eq!(
        format_sync_result(&failed),
        "Sync completed with errors: 2 items synced; Projects: p-1: offline"
    );
}

#[test]
fn format_status_lines_reports_never_synced() {
    let status = SyncStatusSnapshot {
        is_syncing: false,
        last_sync_time: None,
        pending_items_count: 3,
    };
    let lines = format_status_lines(&status, 1, 0);
    assert_eq!(lines[1], "Last sync:  never");
    assert_eq!(lines[2], "Pending:    3");
    assert_eq!(lines[3], "Conflicts:  1");
}

#[test]
fn format_queue_lines_show_state_and_error() {
    let mut entry = QueueEntry::new(
        OperationType::Update,
        EntityKey::new(
            EntityType::new("samples").unwrap(),
            EntityId::new("s-1").unwrap(),
        ),
        serde_json::json!({}),
        0,
        3,
        0,
    );
    entry.status = QueueStatus::PendingRetry;
    entry.retry_count = 1;
    entry.next_attempt_at = Some(61_000);
    entry.error_message = Some("HTTP 503".to_string());

    let lines = format_queue_lines(&[entry], 1_000);
    assert!(lines[0].contains("update"));
    assert!(lines[0].contains("samples/s-1"));
    assert!(lines[0].contains("pending_retry"));
    assert!(lines[0].contains("1/3"));
    assert!(lines[0].contains("next in 1m"));
    assert!(lines[0].ends_with("(HTTP 503)"));
}

#[test]
fn only_remote_reading_strategies_need_a_remote() {
    assert_eq!(
        remote_mode_for(ResolutionStrategy::ServerWins),
        RemoteMode::Required
    );
    assert_eq!(remote_mode_for(ResolutionStrategy::Merge), RemoteMode::Required);
    assert_eq!(
        remote_mode_for(ResolutionStrategy::ClientWins),
        RemoteMode::Optional
    );
}

#[test]
fn completions_reference_binary_name() {
    let script = String::from_utf8(render_completions(CompletionShell::Bash)).unwrap();
    assert!(script.contains("fieldsync"));
}

#[test]
fn completions_write_to_output_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fieldsync.fish");

    run_completions(CompletionShell::Fish, Some(&path)).unwrap();
    let script = std::fs::read_to_string(&path).unwrap();
    assert!(script.contains("complete -c fieldsync"));
}

#[test]
fn context_prefers_explicit_paths() {
    let context = Context::resolve(
        Some(PathBuf::from("/tmp/explicit.db")),
        Some(PathBuf::from("/tmp/explicit.json")),
    );
    assert_eq!(context.db_path, PathBuf::from("/tmp/explicit.db"));
    assert_eq!(context.config_path, PathBuf::from("/tmp/explicit.json"));
}

#[tokio::test(flavor = "multi_thread")]
async fn put_then_delete_queues_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let context = temp_context(&dir);

    run_put(&context, "samples", "s-1", r#"{"depth": 3}"#, 0)
        .await
        .unwrap();
    run_put(&context, "samples", "s-1", r#"{"depth": 4}"#, 0)
        .await
        .unwrap();
    run_delete(&context, "samples", "s-1").await.unwrap();

    let coordinator = open_coordinator(&context, RemoteMode::Optional)
        .await
        .unwrap();
    let operations = coordinator
        .queue()
        .get_queue_items(None, 10)
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.operation_type)
        .collect::<Vec<_>>();
    assert_eq!(
        operations,
        vec![
            OperationType::Create,
            OperationType::Update,
            OperationType::Delete
        ]
    );

    let key = EntityKey::new(
        EntityType::new("samples").unwrap(),
        EntityId::new("s-1").unwrap(),
    );
    assert!(coordinator.local_store().load(&key).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn put_rejects_unregistered_type() {
    let dir = tempfile::tempdir().unwrap();
    let context = temp_context(&dir);

    let error = run_put(&context, "invoices", "i-1", "{}", 0)
        .await
        .unwrap_err();
    assert!(error.to_string().contains("invoices"));
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_requires_configured_remote() {
    let dir = tempfile::tempdir().unwrap();
    let context = temp_context(&dir);

    let result = open_coordinator(&context, RemoteMode::Required).await;
    assert!(matches!(result, Err(CliError::RemoteNotConfigured)));
}
