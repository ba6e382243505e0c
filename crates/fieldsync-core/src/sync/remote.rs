//! Remote transport port

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::models::{EntityKey, EntitySnapshot, OperationType};

/// Failure of a single remote call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Network or server trouble worth retrying
    #[error("Transient remote failure: {0}")]
    Transient(String),

    /// The call exceeded its deadline
    #[error("Remote call timed out")]
    Timeout,

    /// The remote copy moved past the precondition version
    #[error("Remote version conflict (remote is at version {remote_version})")]
    Conflict { remote_version: i64 },

    /// Permanent refusal; retrying cannot help
    #[error("Remote rejected operation: {0}")]
    Rejected(String),

    /// The caller cancelled the call
    #[error("Remote call cancelled")]
    Cancelled,
}

impl RemoteError {
    /// Whether another attempt may succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout)
    }
}

/// One mutation to apply remotely
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteOperation {
    /// Stable across retries of the same mutation
    pub idempotency_key: String,
    pub operation_type: OperationType,
    pub key: EntityKey,
    pub payload: serde_json::Value,
    /// Remote version the mutation was based on; `None` for creates
    pub base_version: Option<i64>,
}

/// Remote acknowledgement of an applied mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAck {
    /// Remote version after the mutation
    pub version: i64,
}

/// Remote store the engine replays mutations against
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Apply a mutation
    async fn apply(&self, operation: RemoteOperation) -> Result<RemoteAck, RemoteError>;

    /// Fetch the remote copy of an entity
    async fn fetch(&self, key: &EntityKey) -> Result<Option<EntitySnapshot>, RemoteError>;
}

/// Race a remote call against its deadline and the cancellation token
pub async fn guarded<T, F>(
    deadline: Duration,
    cancel: &CancellationToken,
    call: F,
) -> Result<T, RemoteError>
where
    F: Future<Output = Result<T, RemoteError>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(RemoteError::Cancelled),
        outcome = tokio::time::timeout(deadline, call) => {
            outcome.unwrap_or(Err(RemoteError::Timeout))
        }
    }
}
