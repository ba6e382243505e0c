use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] fieldsync_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Payload must be a JSON object or array: {0}")]
    InvalidPayload(String),
    #[error("Invalid queue entry id: {0}")]
    InvalidEntryId(String),
    #[error("Queue entry not found: {0}")]
    EntryNotFound(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Refusing to clear the queue without --yes")]
    ClearNotConfirmed,
    #[error(
        "Remote is not configured. Run `fieldsync config init --remote-url <URL>` or set FIELDSYNC_REMOTE_URL."
    )]
    RemoteNotConfigured,
    #[error("Sync finished with errors: {0}")]
    SyncFailed(String),
}
