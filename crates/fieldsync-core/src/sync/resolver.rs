//! Conflict detection and resolution

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::db::{
    MetadataRepository, QueueRepository, SqliteMetadataRepository, SqliteQueueRepository,
};
use crate::models::{
    ConflictRecord, ConflictResolutionInfo, EntityId, EntityKey, EntitySnapshot, EntityType,
    MergeStrategy, OperationType, QueueEntry, ResolutionStrategy, SyncConflict, SyncMetadata,
};
use crate::services::SyncStore;
use crate::{Error, Result};

use super::clock::Clock;
use super::local::LocalEntityStore;
use super::remote::{guarded, RemoteTransport};

/// Payload fields consulted by [`MergeStrategy::TimestampBased`]
const TIMESTAMP_FIELDS: [&str; 2] = ["updatedAt", "updated_at"];

/// Settles entities flagged as conflicting
#[derive(Clone)]
pub struct ConflictResolver {
    store: SyncStore,
    local: Arc<dyn LocalEntityStore>,
    transport: Arc<dyn RemoteTransport>,
    clock: Arc<dyn Clock>,
    merge_strategy: MergeStrategy,
    remote_timeout: Duration,
    max_retries: u32,
}

/// What a strategy decided for the local copy and the remote
struct Outcome {
    local: Option<Value>,
    push: bool,
}

impl ConflictResolver {
    pub fn new(
        store: SyncStore,
        local: Arc<dyn LocalEntityStore>,
        transport: Arc<dyn RemoteTransport>,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            local,
            transport,
            clock,
            merge_strategy: config.merge_strategy,
            remote_timeout: config.remote_timeout(),
            max_retries: config.max_retries,
        }
    }

    /// Unresolved conflicts, oldest first
    pub async fn detect_conflicts(&self) -> Result<Vec<ConflictRecord>> {
        let records = self
            .store
            .run(|conn| SqliteMetadataRepository::new(conn).list_conflicts())
            .await?;
        Ok(records
            .iter()
            .filter_map(SyncMetadata::conflict_record)
            .collect())
    }

    /// Recently resolved conflicts, newest first
    pub async fn resolution_history(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        self.store.list_conflict_log(limit).await
    }

    /// Settle one conflict with `strategy`
    ///
    /// Returns `Ok(None)` when the entity has no metadata or is not flagged.
    /// Strategies that need the remote copy fetch it first; a failed fetch
    /// leaves the conflict untouched. A local write or enqueue that lands
    /// meanwhile aborts with [`Error::Superseded`] and the conflict stays flagged.
    pub async fn resolve_conflict(
        &self,
        entity_type: &EntityType,
        entity_id: &EntityId,
        strategy: ResolutionStrategy,
        cancel: &CancellationToken,
    ) -> Result<Option<ConflictResolutionInfo>> {
        let key = EntityKey::new(entity_type.clone(), entity_id.clone());
        let (record, seen_seq) = self
            .store
            .run(|conn| {
                let record = SqliteMetadataRepository::new(conn).get(&key)?;
                let seen_seq = SqliteQueueRepository::new(conn).max_seq_for(&key)?;
                Ok((record, seen_seq))
            })
            .await?;
        let Some(mut record) = record else {
            return Ok(None);
        };
        let Some(conflict) = record.conflict_record() else {
            tracing::debug!("{key} has no conflict to resolve");
            return Ok(None);
        };

        let local = self.local.load(&key).await?;
        let remote = match strategy {
            ResolutionStrategy::ServerWins | ResolutionStrategy::Merge => {
                guarded(self.remote_timeout, cancel, self.transport.fetch(&key)).await?
            }
            ResolutionStrategy::ClientWins | ResolutionStrategy::LocalWins => None,
        };
        let remote_missing = strategy == ResolutionStrategy::Merge && remote.is_none();
        if let Some(remote) = &remote {
            record.remote_version = remote.version;
        }

        let outcome = match strategy {
            ResolutionStrategy::ServerWins => Outcome {
                local: remote.map(|snapshot| snapshot.payload),
                push: false,
            },
            ResolutionStrategy::ClientWins | ResolutionStrategy::LocalWins => Outcome {
                local: local.map(|snapshot| snapshot.payload),
                push: true,
            },
            ResolutionStrategy::Merge => match (local, remote) {
                (Some(local), Some(remote)) => Outcome {
                    local: Some(merge_versions(
                        &local.payload,
                        &remote.payload,
                        self.merge_strategy,
                    )),
                    push: true,
                },
                (Some(local), None) => Outcome {
                    local: Some(local.payload),
                    push: true,
                },
                (None, remote) => Outcome {
                    local: remote.map(|snapshot| snapshot.payload),
                    push: false,
                },
            },
        };

        let now = self.clock.now_millis();
        let push = outcome.push.then(|| {
            let (operation_type, payload) = match outcome.local.clone() {
                None => (OperationType::Delete, Value::Null),
                Some(payload) if remote_missing => (OperationType::Create, payload),
                Some(payload) => (OperationType::Update, payload),
            };
            QueueEntry::new(
                operation_type,
                key.clone(),
                payload,
                0,
                self.max_retries,
                now,
            )
        });

        let seen_local_version = record.local_version;
        let remote_version = record.remote_version;
        let log = SyncConflict {
            id: 0,
            entity_type: key.entity_type.to_string(),
            entity_id: key.entity_id.to_string(),
            local_version: conflict.local_version,
            remote_version,
            detected_at: conflict.detected_at,
            resolved_at: now,
            strategy: strategy.as_str().to_string(),
        };

        let applied = self
            .store
            .transaction(|conn| {
                let queue = SqliteQueueRepository::new(conn);
                let metadata = SqliteMetadataRepository::new(conn);

                // Writes that landed during the fetch win over this resolution
                let Some(mut current) = metadata.get(&key)? else {
                    return Ok(false);
                };
                if !current.has_conflict
                    || current.local_version != seen_local_version
                    || queue.max_seq_for(&key)? > seen_seq
                {
                    return Ok(false);
                }

                let discarded = queue.discard_for_entity(&key, seen_seq)?;
                if discarded > 0 {
                    tracing::debug!("Discarded {discarded} superseded queue entries for {key}");
                }
                if let Some(entry) = &push {
                    queue.insert(entry)?;
                }

                current.remote_version = remote_version;
                current.resolve(strategy);
                metadata.save(&current)?;
                metadata.insert_conflict_log(&log)?;
                Ok(true)
            })
            .await?;
        if !applied {
            tracing::warn!("{key} changed while its conflict was being resolved; left flagged");
            return Err(Error::Superseded(format!(
                "{key} changed while its conflict was being resolved"
            )));
        }

        match &outcome.local {
            Some(payload) => {
                self.local
                    .save(&EntitySnapshot {
                        key: key.clone(),
                        payload: payload.clone(),
                        version: remote_version,
                        updated_at: now,
                    })
                    .await?;
            }
            None => {
                self.local.remove(&key).await?;
            }
        }

        tracing::info!(
            "Resolved conflict on {key} with {strategy} (local {}, remote {})",
            conflict.local_version,
            remote_version
        );

        Ok(Some(ConflictResolutionInfo {
            entity_type: key.entity_type,
            entity_id: key.entity_id,
            strategy,
            local_version: conflict.local_version,
            remote_version,
            resolved_payload: outcome.local,
            push_enqueued: push.is_some(),
            resolved_at: now,
        }))
    }
}

/// Combine two versions of a payload
#[must_use]
pub fn merge_versions(local: &Value, remote: &Value, strategy: MergeStrategy) -> Value {
    match strategy {
        MergeStrategy::LocalPrecedence => match (local, remote) {
            (Value::Object(local_fields), Value::Object(remote_fields)) => {
                let mut merged = remote_fields.clone();
                for (field, value) in local_fields {
                    merged.insert(field.clone(), value.clone());
                }
                Value::Object(merged)
            }
            _ => local.clone(),
        },
        MergeStrategy::RemotePrecedence => remote.clone(),
        MergeStrategy::TimestampBased => match (updated_at(local), updated_at(remote)) {
            (Some(local_at), Some(remote_at)) if remote_at > local_at => remote.clone(),
            _ => local.clone(),
        },
        MergeStrategy::DeepMerge => deep_merge(local, remote),
    }
}

fn deep_merge(local: &Value, remote: &Value) -> Value {
    match (local, remote) {
        (Value::Object(local_fields), Value::Object(remote_fields)) => {
            let mut merged = Map::with_capacity(local_fields.len().max(remote_fields.len()));
            for (field, remote_value) in remote_fields {
                let value = local_fields.get(field).map_or_else(
                    || remote_value.clone(),
                    |local_value| deep_merge(local_value, remote_value),
                );
                merged.insert(field.clone(), value);
            }
            for (field, local_value) in local_fields {
                if !remote_fields.contains_key(field) {
                    merged.insert(field.clone(), local_value.clone());
                }
            }
            Value::Object(merged)
        }
        _ => local.clone(),
    }
}

/// Update time in Unix ms, from an epoch number or an RFC 3339 string
#[allow(clippy::cast_possible_truncation)]
fn updated_at(payload: &Value) -> Option<i64> {
    let value = TIMESTAMP_FIELDS
        .iter()
        .find_map(|field| payload.get(*field))?;
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float as i64)),
        Value::String(text) => chrono::DateTime::parse_from_rfc3339(text)
            .map(|parsed| parsed.timestamp_millis())
            .ok()
            .or_else(|| text.parse().ok()),
        _ => None,
    }
}
