//! Error types for fieldsync-core

use thiserror::Error;

use crate::sync::RemoteError;

/// Result type alias using fieldsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in fieldsync-core operations
///
/// Only bookkeeping failures surface through this type. Per-entity remote
/// failures are recorded on the queue entry or metadata record instead.
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid engine configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Entity changed while an operation on it was in flight
    #[error("Superseded: {0}")]
    Superseded(String),

    /// Remote read required by the caller failed
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),
}
