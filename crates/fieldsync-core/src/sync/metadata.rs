//! Per-entity sync metadata lifecycle

use std::sync::Arc;

use crate::config::{ConflictDetection, EngineConfig};
use crate::db::{MetadataRepository, SqliteMetadataRepository};
use crate::models::{EntityKey, EntityType, SyncMetadata};
use crate::services::SyncStore;
use crate::Result;

use super::clock::Clock;

/// Tracks which entities need syncing and how their last attempts went
#[derive(Clone)]
pub struct SyncMetadataStore {
    store: SyncStore,
    clock: Arc<dyn Clock>,
    max_sync_attempts: u32,
    conflict_detection: ConflictDetection,
}

impl SyncMetadataStore {
    pub fn new(store: SyncStore, clock: Arc<dyn Clock>, config: &EngineConfig) -> Self {
        Self {
            store,
            clock,
            max_sync_attempts: config.max_sync_attempts,
            conflict_detection: config.conflict_detection,
        }
    }

    /// Load, mutate and save one record in a single transaction
    async fn update<F>(&self, key: &EntityKey, mutate: F) -> Result<SyncMetadata>
    where
        F: FnOnce(&mut SyncMetadata, i64) + Send,
    {
        let now = self.clock.now_millis();
        let max_sync_attempts = self.max_sync_attempts;
        self.store
            .transaction(|conn| {
                let repo = SqliteMetadataRepository::new(conn);
                let mut record = repo.get_or_create(key, max_sync_attempts)?;
                mutate(&mut record, now);
                repo.save(&record)?;
                Ok(record)
            })
            .await
    }

    pub async fn get(&self, key: &EntityKey) -> Result<Option<SyncMetadata>> {
        self.store
            .run(|conn| SqliteMetadataRepository::new(conn).get(key))
            .await
    }

    /// Get the record for an entity, creating an idle one on first sight
    pub async fn get_or_create(&self, key: &EntityKey) -> Result<SyncMetadata> {
        let max_sync_attempts = self.max_sync_attempts;
        self.store
            .run(|conn| SqliteMetadataRepository::new(conn).get_or_create(key, max_sync_attempts))
            .await
    }

    /// Write-path hook: the local copy changed and must be pushed
    pub async fn record_local_change(&self, key: &EntityKey) -> Result<SyncMetadata> {
        self.update(key, |record, _| record.stage_local_change())
            .await
    }

    pub async fn mark_sync_started(&self, key: &EntityKey) -> Result<SyncMetadata> {
        self.update(key, SyncMetadata::begin_attempt).await
    }

    /// The remote holds local revision `pushed_version` at `remote_version`
    ///
    /// A local change recorded since `pushed_version` was read keeps the
    /// record pending.
    pub async fn mark_sync_success(
        &self,
        key: &EntityKey,
        pushed_version: i64,
        remote_version: i64,
    ) -> Result<SyncMetadata> {
        let mut settled = false;
        let record = self
            .update(key, |record, now| {
                settled = record.acknowledge(pushed_version, remote_version, now);
            })
            .await?;
        if settled {
            tracing::debug!("{key} synced at remote version {remote_version}");
        } else {
            tracing::debug!(
                "{key} acknowledged at remote version {remote_version}; newer local change pending"
            );
        }
        Ok(record)
    }

    pub async fn mark_sync_failed(&self, key: &EntityKey, error: &str) -> Result<SyncMetadata> {
        let flag_exhausted = self.conflict_detection == ConflictDetection::RetryHeuristic;
        let record = self
            .update(key, |record, now| {
                record.fail_attempt(error, flag_exhausted, now);
            })
            .await?;
        if record.has_conflict {
            tracing::warn!("{key} exhausted its sync attempts and was flagged as conflicting");
        } else {
            tracing::warn!(
                "{key} sync attempt {}/{} failed: {error}",
                record.sync_attempts,
                record.max_sync_attempts
            );
        }
        Ok(record)
    }

    /// Undo a started attempt that was cancelled before the remote answered
    pub async fn release_attempt(&self, key: &EntityKey) -> Result<SyncMetadata> {
        self.update(key, |record, _| record.release_attempt()).await
    }

    pub async fn flag_conflict(&self, key: &EntityKey, remote_version: i64) -> Result<SyncMetadata> {
        let record = self
            .update(key, |record, now| record.flag_conflict(remote_version, now))
            .await?;
        tracing::warn!(
            "{key} conflicts with remote (local {}, remote {})",
            record.local_version,
            record.remote_version
        );
        Ok(record)
    }

    /// Compare a remote revision seen out of band against the local record
    ///
    /// Returns `true` when a conflict was flagged.
    pub async fn observe_remote_version(&self, key: &EntityKey, version: i64) -> Result<bool> {
        let mut flagged = false;
        self.update(key, |record, now| {
            flagged = record.observe_remote(version, now);
        })
        .await?;
        if flagged {
            tracing::warn!("{key} has unpushed changes but remote moved to version {version}");
        }
        Ok(flagged)
    }

    /// Records of one type a sync pass should visit
    pub async fn list_unsynced(&self, entity_type: &EntityType) -> Result<Vec<SyncMetadata>> {
        self.store
            .run(|conn| SqliteMetadataRepository::new(conn).list_unsettled(entity_type))
            .await
    }

    pub async fn list(&self, entity_type: Option<&EntityType>) -> Result<Vec<SyncMetadata>> {
        self.store
            .run(|conn| SqliteMetadataRepository::new(conn).list(entity_type))
            .await
    }

    pub async fn list_conflicts(&self) -> Result<Vec<SyncMetadata>> {
        self.store
            .run(|conn| SqliteMetadataRepository::new(conn).list_conflicts())
            .await
    }

    /// Give `failed` records a fresh attempt budget
    pub async fn reset_failed(&self, entity_type: Option<&EntityType>) -> Result<usize> {
        let count = self
            .store
            .run(|conn| SqliteMetadataRepository::new(conn).reset_failed(entity_type))
            .await?;
        if count > 0 {
            tracing::info!("Re-armed {count} failed sync records");
        }
        Ok(count)
    }
}
