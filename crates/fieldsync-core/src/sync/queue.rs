//! Durable queue of offline mutations, replayed with retry and backoff

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::db::{
    MetadataRepository, QueueRepository, SqliteMetadataRepository, SqliteQueueRepository,
};
use crate::error::{Error, Result};
use crate::models::{
    EntityId, EntityKey, EntityRegistry, EntityType, OperationType, QueueEntry, QueueEntryId,
};
use crate::services::SyncStore;

use super::backoff::BackoffPolicy;
use super::clock::Clock;
use super::remote::{guarded, RemoteError, RemoteOperation, RemoteTransport};

/// What happened to one claimed entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Replay {
    Synced,
    Retrying,
    Failed,
    Cancelled,
}

/// Persistent queue of local mutations waiting for the remote
///
/// Entries of one entity are replayed strictly in insertion order. Priority
/// only decides which entity is serviced next.
#[derive(Clone)]
pub struct SyncQueue {
    store: SyncStore,
    transport: Arc<dyn RemoteTransport>,
    clock: Arc<dyn Clock>,
    registry: EntityRegistry,
    backoff: BackoffPolicy,
    max_retries: u32,
    max_sync_attempts: u32,
    remote_timeout: Duration,
    drain_lock: Arc<Mutex<()>>,
}

impl SyncQueue {
    pub fn new(
        store: SyncStore,
        transport: Arc<dyn RemoteTransport>,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Result<Self> {
        Ok(Self {
            store,
            transport,
            clock,
            registry: config.registry()?,
            backoff: config.backoff_policy(),
            max_retries: config.max_retries,
            max_sync_attempts: config.max_sync_attempts,
            remote_timeout: config.remote_timeout(),
            drain_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Queue a mutation with default priority
    pub async fn enqueue(
        &self,
        operation_type: OperationType,
        entity_type: EntityType,
        entity_id: EntityId,
        payload: serde_json::Value,
    ) -> Result<QueueEntry> {
        self.enqueue_with_priority(operation_type, entity_type, entity_id, payload, 0)
            .await
    }

    /// Queue a mutation; higher priorities are serviced sooner
    ///
    /// The entity's metadata is marked as having unpushed changes in the same
    /// transaction.
    pub async fn enqueue_with_priority(
        &self,
        operation_type: OperationType,
        entity_type: EntityType,
        entity_id: EntityId,
        payload: serde_json::Value,
        priority: i32,
    ) -> Result<QueueEntry> {
        if !self.registry.contains(&entity_type) {
            return Err(Error::InvalidInput(format!(
                "Unknown entity type '{entity_type}'"
            )));
        }

        let key = EntityKey::new(entity_type, entity_id);
        let entry = QueueEntry::new(
            operation_type,
            key.clone(),
            payload,
            priority,
            self.max_retries,
            self.clock.now_millis(),
        );
        let max_sync_attempts = self.max_sync_attempts;

        let stored = self
            .store
            .transaction(|conn| {
                let stored = SqliteQueueRepository::new(conn).insert(&entry)?;
                let metadata = SqliteMetadataRepository::new(conn);
                let mut record = metadata.get_or_create(&key, max_sync_attempts)?;
                record.stage_local_change();
                metadata.save(&record)?;
                Ok(stored)
            })
            .await?;

        tracing::debug!("Queued {operation_type} of {key} as {}", stored.id);
        Ok(stored)
    }

    /// Replay every due entry; returns how many reached the remote
    pub async fn process_queue(&self, cancel: &CancellationToken) -> Result<usize> {
        self.drain(None, cancel).await
    }

    /// Replay due entries of one entity type only
    pub async fn process_entity_type(
        &self,
        entity_type: &EntityType,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        self.drain(Some(entity_type), cancel).await
    }

    async fn drain(
        &self,
        entity_type: Option<&EntityType>,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let _drain = self.drain_lock.lock().await;
        let mut synced = 0;

        while !cancel.is_cancelled() {
            let now = self.clock.now_millis();
            let entries = self
                .store
                .run(|conn| SqliteQueueRepository::new(conn).list_unsettled())
                .await?;
            let Some(entry) = next_due(&entries, entity_type, now) else {
                break;
            };

            let claimed = self
                .store
                .run(|conn| SqliteQueueRepository::new(conn).claim(&entry.id, now))
                .await?;
            if !claimed {
                continue;
            }

            match self.replay(&entry, now, cancel).await? {
                Replay::Synced => synced += 1,
                Replay::Retrying | Replay::Failed => {}
                Replay::Cancelled => break,
            }
        }

        if synced > 0 {
            tracing::info!("Sync queue replayed {synced} entries");
        }
        Ok(synced)
    }

    async fn replay(
        &self,
        entry: &QueueEntry,
        started_at: i64,
        cancel: &CancellationToken,
    ) -> Result<Replay> {
        let key = entry.key();
        let max_sync_attempts = self.max_sync_attempts;

        let base_version = match entry.operation_type {
            OperationType::Create => None,
            OperationType::Update | OperationType::Delete => self
                .store
                .run(|conn| SqliteMetadataRepository::new(conn).get(&key))
                .await?
                .filter(|record| !record.is_new_remotely())
                .map(|record| record.remote_version),
        };
        let operation = RemoteOperation {
            idempotency_key: entry.id.to_string(),
            operation_type: entry.operation_type,
            key: key.clone(),
            payload: entry.payload.clone(),
            base_version,
        };

        let outcome = guarded(self.remote_timeout, cancel, self.transport.apply(operation)).await;
        let finished_at = self.clock.now_millis();

        match outcome {
            Ok(ack) => {
                self.store
                    .transaction(|conn| {
                        let queue = SqliteQueueRepository::new(conn);
                        queue.mark_synced(&entry.id)?;
                        let settled = queue.count_unsettled_for(&key)? == 0;

                        let metadata = SqliteMetadataRepository::new(conn);
                        let mut record = metadata.get_or_create(&key, max_sync_attempts)?;
                        record.advance_remote(ack.version, settled, finished_at);
                        metadata.save(&record)
                    })
                    .await?;
                tracing::debug!(
                    "Replayed {} of {key} (remote version {})",
                    entry.operation_type,
                    ack.version
                );
                Ok(Replay::Synced)
            }
            Err(RemoteError::Cancelled) => {
                self.store
                    .run(|conn| SqliteQueueRepository::new(conn).release(&entry.id))
                    .await?;
                tracing::debug!("Replay of {} cancelled; entry released", entry.id);
                Ok(Replay::Cancelled)
            }
            Err(RemoteError::Conflict { remote_version }) => {
                let message = RemoteError::Conflict { remote_version }.to_string();
                self.store
                    .transaction(|conn| {
                        SqliteQueueRepository::new(conn).mark_failed(
                            &entry.id,
                            entry.retry_count,
                            &message,
                        )?;
                        let metadata = SqliteMetadataRepository::new(conn);
                        let mut record = metadata.get_or_create(&key, max_sync_attempts)?;
                        record.flag_conflict(remote_version, finished_at);
                        metadata.save(&record)
                    })
                    .await?;
                tracing::warn!(
                    "{key} conflicts with remote version {remote_version}; entry {} held",
                    entry.id
                );
                Ok(Replay::Failed)
            }
            Err(error) => {
                let retry_count = entry.retry_count.saturating_add(1);
                let message = error.to_string();

                if error.is_retryable() && retry_count < entry.max_retries {
                    let next_attempt_at =
                        started_at.saturating_add(self.backoff.delay_millis(retry_count));
                    self.store
                        .run(|conn| {
                            SqliteQueueRepository::new(conn).mark_retry(
                                &entry.id,
                                retry_count,
                                next_attempt_at,
                                &message,
                            )
                        })
                        .await?;
                    tracing::warn!(
                        "Replay of {key} failed (attempt {retry_count}/{}), retrying at {next_attempt_at}: {message}",
                        entry.max_retries
                    );
                    return Ok(Replay::Retrying);
                }

                self.store
                    .transaction(|conn| {
                        SqliteQueueRepository::new(conn).mark_failed(
                            &entry.id,
                            retry_count,
                            &message,
                        )?;
                        let metadata = SqliteMetadataRepository::new(conn);
                        let mut record = metadata.get_or_create(&key, max_sync_attempts)?;
                        record.fail_permanently(&message);
                        metadata.save(&record)
                    })
                    .await?;
                tracing::warn!("Gave up replaying {key} after {retry_count} attempts: {message}");
                Ok(Replay::Failed)
            }
        }
    }

    /// Entries waiting for a remote apply
    pub async fn pending_count(&self) -> Result<usize> {
        self.store
            .run(|conn| SqliteQueueRepository::new(conn).count_outstanding())
            .await
    }

    pub async fn get_queue_items(
        &self,
        entity_type: Option<&EntityType>,
        limit: usize,
    ) -> Result<Vec<QueueEntry>> {
        self.store
            .run(|conn| SqliteQueueRepository::new(conn).list(entity_type, limit))
            .await
    }

    pub async fn get_entry(&self, id: &QueueEntryId) -> Result<Option<QueueEntry>> {
        self.store
            .run(|conn| SqliteQueueRepository::new(conn).get(id))
            .await
    }

    pub async fn remove_from_queue(&self, id: &QueueEntryId) -> Result<bool> {
        self.store
            .run(|conn| SqliteQueueRepository::new(conn).delete(id))
            .await
    }

    /// Drop every entry, synced or not
    pub async fn clear_queue(&self) -> Result<usize> {
        let _drain = self.drain_lock.lock().await;
        let removed = self
            .store
            .run(|conn| SqliteQueueRepository::new(conn).clear())
            .await?;
        tracing::warn!("Cleared sync queue ({removed} entries discarded)");
        Ok(removed)
    }

    /// Re-arm a `failed` entry with a fresh retry budget
    pub async fn retry_entry(&self, id: &QueueEntryId) -> Result<bool> {
        self.store
            .run(|conn| SqliteQueueRepository::new(conn).rearm(id))
            .await
    }

    /// Delete entries that already reached the remote
    pub async fn purge_synced(&self) -> Result<usize> {
        self.store
            .run(|conn| SqliteQueueRepository::new(conn).purge_synced())
            .await
    }

    /// Return entries stranded `in_progress` by a crash to `pending_retry`
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let _drain = self.drain_lock.lock().await;
        let recovered = self
            .store
            .run(|conn| SqliteQueueRepository::new(conn).reset_interrupted())
            .await?;
        if recovered > 0 {
            tracing::info!("Recovered {recovered} interrupted queue entries");
        }
        Ok(recovered)
    }

    /// Earliest scheduled retry (Unix ms)
    pub async fn next_retry_at(&self) -> Result<Option<i64>> {
        self.store
            .run(|conn| SqliteQueueRepository::new(conn).next_retry_at())
            .await
    }
}

/// Pick the next entry to replay from unsettled entries ordered by `seq`
///
/// Each entity may only advance through its oldest unsettled entry. An entity
/// whose oldest entry is waiting on backoff, in flight, or failed is skipped.
fn next_due(
    entries: &[QueueEntry],
    entity_type: Option<&EntityType>,
    now: i64,
) -> Option<QueueEntry> {
    struct Lane<'a> {
        head: &'a QueueEntry,
        priority: i32,
    }

    let mut lanes: HashMap<EntityKey, Lane<'_>> = HashMap::new();
    for entry in entries {
        if entity_type.is_some_and(|wanted| *wanted != entry.entity_type) {
            continue;
        }
        lanes
            .entry(entry.key())
            .and_modify(|lane| {
                if entry.status.is_outstanding() {
                    lane.priority = lane.priority.max(entry.priority);
                }
            })
            .or_insert(Lane {
                head: entry,
                priority: entry.priority,
            });
    }

    lanes
        .into_values()
        .filter(|lane| lane.head.is_due(now))
        .max_by_key(|lane| (lane.priority, Reverse(lane.head.seq)))
        .map(|lane| lane.head.clone())
}
