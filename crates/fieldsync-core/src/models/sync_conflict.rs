//! Sync conflict models

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::entity::{EntityId, EntityType};
use crate::error::Error;

/// A currently unresolved conflict, derived from flagged metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub entity_type: EntityType,
    pub entity_id: EntityId,
    pub local_version: i64,
    pub remote_version: i64,
    /// When the divergence was flagged (Unix ms)
    pub detected_at: i64,
}

/// How a flagged conflict is settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Remote payload is authoritative
    ServerWins,
    /// Local payload is authoritative
    #[default]
    ClientWins,
    /// Alias of `ClientWins`, recorded under its own name
    LocalWins,
    /// Field-level reconciliation of both payloads
    Merge,
}

impl ResolutionStrategy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ServerWins => "server_wins",
            Self::ClientWins => "client_wins",
            Self::LocalWins => "local_wins",
            Self::Merge => "merge",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "server_wins" | "remote_wins" => Ok(Self::ServerWins),
            "client_wins" => Ok(Self::ClientWins),
            "local_wins" => Ok(Self::LocalWins),
            "merge" => Ok(Self::Merge),
            other => Err(Error::InvalidInput(format!(
                "Unknown resolution strategy: {other}"
            ))),
        }
    }
}

/// Structural merge policy for two JSON payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Remote overlaid with every top-level key of local
    LocalPrecedence,
    /// Remote as-is
    RemotePrecedence,
    /// Whole payload with the newer `updatedAt` wins
    TimestampBased,
    /// Recursive merge, local wins on leaf conflicts
    #[default]
    DeepMerge,
}

impl MergeStrategy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LocalPrecedence => "local_precedence",
            Self::RemotePrecedence => "remote_precedence",
            Self::TimestampBased => "timestamp_based",
            Self::DeepMerge => "deep_merge",
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "local_precedence" => Ok(Self::LocalPrecedence),
            "remote_precedence" => Ok(Self::RemotePrecedence),
            "timestamp_based" => Ok(Self::TimestampBased),
            "deep_merge" => Ok(Self::DeepMerge),
            other => Err(Error::InvalidInput(format!(
                "Unknown merge strategy: {other}"
            ))),
        }
    }
}

/// Outcome of resolving one conflict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResolutionInfo {
    pub entity_type: EntityType,
    pub entity_id: EntityId,
    pub strategy: ResolutionStrategy,
    pub local_version: i64,
    pub remote_version: i64,
    /// Payload now held locally; `None` when the winning side had no record
    pub resolved_payload: Option<serde_json::Value>,
    /// Whether the resolved payload was queued for upload
    pub push_enqueued: bool,
    /// Resolution timestamp (Unix ms)
    pub resolved_at: i64,
}

/// Recorded sync conflict resolved by strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict row identifier
    pub id: i64,
    pub entity_type: String,
    pub entity_id: String,
    /// Local revision when the conflict was resolved
    pub local_version: i64,
    /// Remote revision when the conflict was resolved
    pub remote_version: i64,
    /// When the conflict was flagged (Unix ms)
    pub detected_at: i64,
    /// Resolution timestamp (Unix ms)
    pub resolved_at: i64,
    /// Resolution strategy name
    pub strategy: String,
}
