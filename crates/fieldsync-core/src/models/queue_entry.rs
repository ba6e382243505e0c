//! Sync queue entry model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::entity::{EntityId, EntityKey, EntityType};
use crate::error::Error;

/// A unique identifier for a queued operation, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueEntryId(Uuid);

impl QueueEntryId {
    /// Create a new unique entry ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for QueueEntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueueEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueEntryId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Kind of local mutation being replayed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl OperationType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!(
                "Unknown operation type: {other}"
            ))),
        }
    }
}

/// Queue entry lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    InProgress,
    PendingRetry,
    Synced,
    Failed,
}

impl QueueStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::PendingRetry => "pending_retry",
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }

    /// Whether the entry still waits for a remote apply
    #[must_use]
    pub const fn is_outstanding(self) -> bool {
        matches!(self, Self::Pending | Self::PendingRetry)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "pending_retry" => Ok(Self::PendingRetry),
            "synced" => Ok(Self::Synced),
            "failed" => Ok(Self::Failed),
            other => Err(Error::Database(format!("Unknown queue status: {other}"))),
        }
    }
}

/// A single pending offline mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Unique identifier, also sent as the remote idempotency key
    pub id: QueueEntryId,
    /// Insertion sequence; FIFO tiebreaker within an entity
    pub seq: i64,
    pub operation_type: OperationType,
    pub entity_type: EntityType,
    pub entity_id: EntityId,
    /// Opaque serialized snapshot of the mutation
    pub payload: serde_json::Value,
    pub status: QueueStatus,
    /// Higher is serviced sooner
    pub priority: i32,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last remote attempt (Unix ms)
    pub last_attempt_at: Option<i64>,
    /// Earliest time the next retry may run (Unix ms)
    pub next_attempt_at: Option<i64>,
    pub error_message: Option<String>,
}

impl QueueEntry {
    /// New `pending` entry; `seq` is assigned on insert
    #[must_use]
    pub fn new(
        operation_type: OperationType,
        key: EntityKey,
        payload: serde_json::Value,
        priority: i32,
        max_retries: u32,
        created_at: i64,
    ) -> Self {
        Self {
            id: QueueEntryId::new(),
            seq: 0,
            operation_type,
            entity_type: key.entity_type,
            entity_id: key.entity_id,
            payload,
            status: QueueStatus::Pending,
            priority,
            retry_count: 0,
            max_retries,
            created_at,
            last_attempt_at: None,
            next_attempt_at: None,
            error_message: None,
        }
    }

    /// Entity this operation mutates
    #[must_use]
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type.clone(), self.entity_id.clone())
    }

    /// Whether the drain loop may attempt this entry at `now`
    #[must_use]
    pub fn is_due(&self, now: i64) -> bool {
        match self.status {
            QueueStatus::Pending => true,
            QueueStatus::PendingRetry => self.next_attempt_at.map_or(true, |at| at <= now),
            QueueStatus::InProgress | QueueStatus::Synced | QueueStatus::Failed => false,
        }
    }

    /// Whether retries are exhausted
    #[must_use]
    pub const fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(status: QueueStatus, next_attempt_at: Option<i64>) -> QueueEntry {
        QueueEntry {
            id: QueueEntryId::new(),
            seq: 1,
            operation_type: OperationType::Update,
            entity_type: EntityType::new("samples").unwrap(),
            entity_id: EntityId::new("s-1").unwrap(),
            payload: serde_json::json!({"depth": 3}),
            status,
            priority: 0,
            retry_count: 0,
            max_retries: 3,
            created_at: 0,
            last_attempt_at: None,
            next_attempt_at,
            error_message: None,
        }
    }

    #[test]
    fn queue_entry_id_parse_roundtrip() {
        let id = QueueEntryId::new();
        let parsed: QueueEntryId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn operation_type_parses_case_insensitively() {
        assert_eq!("Update".parse::<OperationType>().unwrap(), OperationType::Update);
        assert!("upsert".parse::<OperationType>().is_err());
    }

    #[test]
    fn queue_status_string_roundtrip() {
        for status in [
            QueueStatus::Pending,
            QueueStatus::InProgress,
            QueueStatus::PendingRetry,
            QueueStatus::Synced,
            QueueStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<QueueStatus>().unwrap(), status);
        }
    }

    #[test]
    fn pending_retry_waits_for_schedule() {
        let waiting = entry(QueueStatus::PendingRetry, Some(2_000));
        assert!(!waiting.is_due(1_999));
        assert!(waiting.is_due(2_000));
        assert!(entry(QueueStatus::Pending, None).is_due(0));
        assert!(!entry(QueueStatus::Failed, None).is_due(i64::MAX));
    }
}
