//! Top-level sync orchestration

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::models::{
    ConflictRecord, ConflictResolutionInfo, EntityId, EntityRegistry, EntityType,
    OperationType, ResolutionStrategy, SyncMetadata, SyncOperationResult, SyncStatusSnapshot,
};
use crate::services::SyncStore;

use super::clock::{Clock, SystemClock};
use super::local::LocalEntityStore;
use super::metadata::SyncMetadataStore;
use super::queue::SyncQueue;
use super::remote::{guarded, RemoteError, RemoteOperation, RemoteTransport};
use super::resolver::ConflictResolver;

const CANCELLED: &str = "Sync cancelled";

/// Clears the in-progress flag when a pass ends, however it ends
struct SyncGuard<'a>(&'a AtomicBool);

impl<'a> SyncGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// How one metadata record fared in a pass
enum RecordOutcome {
    Synced,
    /// Nothing to push; marked synced without a remote call
    Settled,
    Conflict,
    Failed(String),
    Cancelled,
}

/// Single entry point for running and inspecting sync
pub struct SyncCoordinator {
    store: SyncStore,
    queue: SyncQueue,
    metadata: SyncMetadataStore,
    resolver: ConflictResolver,
    local: Arc<dyn LocalEntityStore>,
    transport: Arc<dyn RemoteTransport>,
    clock: Arc<dyn Clock>,
    registry: EntityRegistry,
    remote_timeout: Duration,
    is_syncing: AtomicBool,
}

impl SyncCoordinator {
    /// Wire the engine components around one store, using the wall clock
    pub fn new(
        store: SyncStore,
        transport: Arc<dyn RemoteTransport>,
        local: Arc<dyn LocalEntityStore>,
        config: &EngineConfig,
    ) -> Result<Self> {
        Self::with_clock(store, transport, local, Arc::new(SystemClock), config)
    }

    pub fn with_clock(
        store: SyncStore,
        transport: Arc<dyn RemoteTransport>,
        local: Arc<dyn LocalEntityStore>,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            queue: SyncQueue::new(store.clone(), transport.clone(), clock.clone(), config)?,
            metadata: SyncMetadataStore::new(store.clone(), clock.clone(), config),
            resolver: ConflictResolver::new(
                store.clone(),
                local.clone(),
                transport.clone(),
                clock.clone(),
                config,
            ),
            registry: config.registry()?,
            remote_timeout: config.remote_timeout(),
            is_syncing: AtomicBool::new(false),
            store,
            local,
            transport,
            clock,
        })
    }

    pub const fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    pub const fn metadata(&self) -> &SyncMetadataStore {
        &self.metadata
    }

    pub const fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }

    pub fn local_store(&self) -> &dyn LocalEntityStore {
        self.local.as_ref()
    }

    pub const fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Sync every registered entity type, then replay the queue
    ///
    /// A second call while a pass is running returns immediately with
    /// `success = false`. The completion time is persisted even when the
    /// pass fails.
    pub async fn start_full_sync(&self, cancel: &CancellationToken) -> Result<SyncOperationResult> {
        let Some(_guard) = SyncGuard::acquire(&self.is_syncing) else {
            tracing::info!("Full sync requested while another sync is running");
            return Ok(SyncOperationResult::already_in_progress(
                self.clock.now_millis(),
            ));
        };

        tracing::info!(
            "Starting full sync of {} entity types",
            self.registry.types().len()
        );
        let outcome = self.full_pass(cancel).await;

        let timestamp = self.clock.now_millis();
        self.store.set_last_sync_time(timestamp).await?;

        let mut result = outcome?;
        result.timestamp = timestamp;
        if result.success {
            tracing::info!("Full sync finished: {} items synced", result.items_synced);
        } else {
            tracing::warn!(
                "Full sync finished with errors ({} items synced): {}",
                result.items_synced,
                result.error.as_deref().unwrap_or_default()
            );
        }
        Ok(result)
    }

    async fn full_pass(&self, cancel: &CancellationToken) -> Result<SyncOperationResult> {
        let mut results = Vec::with_capacity(self.registry.types().len() + 1);
        for entity_type in self.registry.types() {
            if cancel.is_cancelled() {
                break;
            }
            results.push(self.sync_type(entity_type, cancel).await?);
        }

        let replayed = self.queue.process_queue(cancel).await?;
        results.push(SyncOperationResult::succeeded(
            replayed,
            self.clock.now_millis(),
        ));

        let purged = self.queue.purge_synced().await?;
        if purged > 0 {
            tracing::debug!("Purged {purged} synced queue entries");
        }

        let now = self.clock.now_millis();
        if cancel.is_cancelled() {
            results.push(SyncOperationResult::failed(CANCELLED, 0, now));
        }
        Ok(SyncOperationResult::aggregate(results, now))
    }

    /// Sync one entity type on demand, including its queued mutations
    pub async fn sync_entity(
        &self,
        entity_type: &EntityType,
        cancel: &CancellationToken,
    ) -> Result<SyncOperationResult> {
        if !self.registry.contains(entity_type) {
            return Err(Error::InvalidInput(format!(
                "Unknown entity type '{entity_type}'"
            )));
        }
        let Some(_guard) = SyncGuard::acquire(&self.is_syncing) else {
            return Ok(SyncOperationResult::already_in_progress(
                self.clock.now_millis(),
            ));
        };

        let pass = self.sync_type(entity_type, cancel).await?;
        let replayed = self.queue.process_entity_type(entity_type, cancel).await?;
        let now = self.clock.now_millis();
        Ok(SyncOperationResult::aggregate(
            [pass, SyncOperationResult::succeeded(replayed, now)],
            now,
        ))
    }

    /// Push every unsettled record of one type
    async fn sync_type(
        &self,
        entity_type: &EntityType,
        cancel: &CancellationToken,
    ) -> Result<SyncOperationResult> {
        let records = self.metadata.list_unsynced(entity_type).await?;
        tracing::debug!("{} {entity_type} records to sync", records.len());

        let mut synced = 0;
        let mut errors = Vec::new();
        for record in records {
            if cancel.is_cancelled() {
                errors.push(CANCELLED.to_string());
                break;
            }
            match self.sync_record(&record, cancel).await? {
                RecordOutcome::Synced => synced += 1,
                RecordOutcome::Settled | RecordOutcome::Conflict => {}
                RecordOutcome::Failed(message) => {
                    errors.push(format!("{}: {message}", record.key.entity_id));
                }
                RecordOutcome::Cancelled => {
                    errors.push(CANCELLED.to_string());
                    break;
                }
            }
        }

        let now = self.clock.now_millis();
        if errors.is_empty() {
            Ok(SyncOperationResult::succeeded(synced, now))
        } else {
            Ok(SyncOperationResult::failed(
                format!("{}: {}", entity_type.display_name(), errors.join(", ")),
                synced,
                now,
            ))
        }
    }

    async fn sync_record(
        &self,
        record: &SyncMetadata,
        cancel: &CancellationToken,
    ) -> Result<RecordOutcome> {
        let key = &record.key;
        if !record.has_unpushed_changes() {
            self.metadata
                .mark_sync_success(key, record.local_version, record.remote_version)
                .await?;
            return Ok(RecordOutcome::Settled);
        }

        let snapshot = self.local.load(key).await?;
        let (operation_type, payload, base_version) = match snapshot {
            None if record.is_new_remotely() => {
                self.metadata
                    .mark_sync_success(key, record.local_version, record.remote_version)
                    .await?;
                return Ok(RecordOutcome::Settled);
            }
            None => (
                OperationType::Delete,
                serde_json::Value::Null,
                Some(record.remote_version),
            ),
            Some(snapshot) if record.is_new_remotely() => {
                (OperationType::Create, snapshot.payload, None)
            }
            Some(snapshot) => (
                OperationType::Update,
                snapshot.payload,
                Some(record.remote_version),
            ),
        };

        self.metadata.mark_sync_started(key).await?;
        let operation = RemoteOperation {
            idempotency_key: format!("{key}@{}", record.local_version),
            operation_type,
            key: key.clone(),
            payload,
            base_version,
        };

        match guarded(self.remote_timeout, cancel, self.transport.apply(operation)).await {
            Ok(ack) => {
                self.metadata
                    .mark_sync_success(key, record.local_version, ack.version)
                    .await?;
                Ok(RecordOutcome::Synced)
            }
            Err(RemoteError::Cancelled) => {
                self.metadata.release_attempt(key).await?;
                Ok(RecordOutcome::Cancelled)
            }
            Err(RemoteError::Conflict { remote_version }) => {
                self.metadata.flag_conflict(key, remote_version).await?;
                Ok(RecordOutcome::Conflict)
            }
            Err(error) => {
                let message = error.to_string();
                self.metadata.mark_sync_failed(key, &message).await?;
                Ok(RecordOutcome::Failed(message))
            }
        }
    }

    pub async fn get_sync_status(&self) -> Result<SyncStatusSnapshot> {
        Ok(SyncStatusSnapshot {
            is_syncing: self.is_syncing.load(Ordering::Acquire),
            last_sync_time: self.store.last_sync_time().await?,
            pending_items_count: self.queue.pending_count().await?,
        })
    }

    pub async fn detect_conflicts(&self) -> Result<Vec<ConflictRecord>> {
        self.resolver.detect_conflicts().await
    }

    pub async fn resolve_conflict(
        &self,
        entity_type: &EntityType,
        entity_id: &EntityId,
        strategy: ResolutionStrategy,
        cancel: &CancellationToken,
    ) -> Result<Option<ConflictResolutionInfo>> {
        self.resolver
            .resolve_conflict(entity_type, entity_id, strategy, cancel)
            .await
    }

    /// Run full sync passes until cancelled
    ///
    /// Sleeps `interval` between passes, waking earlier when a queued retry
    /// becomes due.
    pub async fn run(&self, interval: Duration, cancel: &CancellationToken) -> Result<()> {
        self.queue.recover_interrupted().await?;
        tracing::info!("Auto-sync started (interval {}ms)", interval.as_millis());

        loop {
            if let Err(error) = self.start_full_sync(cancel).await {
                tracing::warn!("Sync pass aborted: {error}");
            }

            let delay = self.next_wake_delay(interval).await?;
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!("Auto-sync stopped");
        Ok(())
    }

    async fn next_wake_delay(&self, interval: Duration) -> Result<Duration> {
        let Some(next_retry) = self.queue.next_retry_at().await? else {
            return Ok(interval);
        };
        let until = next_retry - self.clock.now_millis();
        if until <= 0 {
            // Overdue retries are blocked behind an earlier entry
            return Ok(interval);
        }
        let until = Duration::from_millis(u64::try_from(until).unwrap_or(u64::MAX));
        Ok(until.min(interval))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityKey, EntitySnapshot, MetadataStatus, SYNC_IN_PROGRESS};
    use crate::sync::testing::{key, Harness, ScriptedTransport};
    use serde_json::json;

    fn coordinator(harness: &Harness) -> SyncCoordinator {
        SyncCoordinator::with_clock(
            harness.store.clone(),
            harness.transport.clone(),
            harness.local.clone(),
            harness.clock.clone(),
            &harness.config,
        )
        .unwrap()
    }

    /// Local write path without the queue: save the payload, then mark it dirty
    async fn stage(coordinator: &SyncCoordinator, key: &EntityKey, payload: serde_json::Value) {
        let record = coordinator.metadata().record_local_change(key).await.unwrap();
        coordinator
            .local_store()
            .save(&EntitySnapshot {
                key: key.clone(),
                payload,
                version: record.local_version,
                updated_at: 0,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn full_sync_pushes_records_and_queue() {
        let harness = Harness::new().await;
        let coordinator = coordinator(&harness);
        let cancel = CancellationToken::new();

        stage(&coordinator, &key("projects", "p-1"), json!({"name": "Reef"})).await;
        let queued = key("samples", "s-1");
        coordinator
            .queue()
            .enqueue(
                OperationType::Create,
                queued.entity_type.clone(),
                queued.entity_id.clone(),
                json!({"depth": 3}),
            )
            .await
            .unwrap();

        let result = coordinator.start_full_sync(&cancel).await.unwrap();
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.items_synced, 2);
        assert_eq!(harness.transport.applied().len(), 2);

        let status = coordinator.get_sync_status().await.unwrap();
        assert!(!status.is_syncing);
        assert_eq!(status.pending_items_count, 0);
        assert_eq!(status.last_sync_time, Some(result.timestamp));

        let record = coordinator.metadata().get(&queued).await.unwrap().unwrap();
        assert_eq!(record.sync_status, MetadataStatus::Synced);
        assert!(coordinator
            .queue()
            .get_queue_items(None, 10)
            .await
            .unwrap()
            .is_empty());

        let again = coordinator.start_full_sync(&cancel).await.unwrap();
        assert!(again.success);
        assert_eq!(again.items_synced, 0);
    }

    #[tokio::test]
    async fn edit_during_push_is_pushed_next_pass() {
        let harness =
            Harness::with_transport(ScriptedTransport::with_delay(Duration::from_millis(100)))
                .await;
        let coordinator = coordinator(&harness);
        let cancel = CancellationToken::new();
        let target = key("projects", "p-1");
        stage(&coordinator, &target, json!({"v": 1})).await;

        let edit = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            stage(&coordinator, &target, json!({"v": 2})).await;
        };
        let (first, ()) = tokio::join!(coordinator.start_full_sync(&cancel), edit);
        assert!(first.unwrap().success);

        let record = coordinator.metadata().get(&target).await.unwrap().unwrap();
        assert_eq!(record.sync_status, MetadataStatus::Pending);
        assert!(record.has_unpushed_changes());
        assert_eq!(record.remote_version, 1);

        let second = coordinator.start_full_sync(&cancel).await.unwrap();
        assert!(second.success, "{:?}", second.error);
        assert_eq!(second.items_synced, 1);
        assert_eq!(
            harness.transport.remote(&target).unwrap().payload,
            json!({"v": 2})
        );
        let record = coordinator.metadata().get(&target).await.unwrap().unwrap();
        assert_eq!(record.sync_status, MetadataStatus::Synced);
    }

    #[tokio::test]
    async fn concurrent_full_syncs_are_exclusive() {
        let harness =
            Harness::with_transport(ScriptedTransport::with_delay(Duration::from_millis(50)))
                .await;
        let coordinator = coordinator(&harness);
        let cancel = CancellationToken::new();
        stage(&coordinator, &key("projects", "p-1"), json!({})).await;

        let (first, second) = tokio::join!(
            coordinator.start_full_sync(&cancel),
            coordinator.start_full_sync(&cancel)
        );
        let outcomes = [first.unwrap(), second.unwrap()];

        let rejected: Vec<_> = outcomes
            .iter()
            .filter(|result| result.error.as_deref() == Some(SYNC_IN_PROGRESS))
            .collect();
        assert_eq!(rejected.len(), 1);
        assert!(!rejected[0].success);
        assert!(outcomes.iter().any(|result| result.success));
        assert!(!coordinator.get_sync_status().await.unwrap().is_syncing);
    }

    #[tokio::test]
    async fn one_failing_type_does_not_stop_others() {
        let harness = Harness::new().await;
        let coordinator = coordinator(&harness);
        let cancel = CancellationToken::new();

        harness
            .transport
            .fail_type("projects", RemoteError::Transient("502 Bad Gateway".into()));
        stage(&coordinator, &key("projects", "p-1"), json!({})).await;
        stage(&coordinator, &key("samples", "s-1"), json!({})).await;
        stage(&coordinator, &key("samples", "s-2"), json!({})).await;

        let result = coordinator.start_full_sync(&cancel).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.items_synced, 2);
        let error = result.error.unwrap();
        assert!(error.starts_with("Projects: p-1"), "{error}");
        assert!(!error.contains("Samples"));

        let record = coordinator
            .metadata()
            .get(&key("projects", "p-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.sync_status, MetadataStatus::Pending);
        assert_eq!(record.sync_attempts, 1);
    }

    #[tokio::test]
    async fn repeated_failures_exhaust_record_attempts() {
        let harness = Harness::new().await;
        let coordinator = coordinator(&harness);
        let cancel = CancellationToken::new();
        let target = key("captures", "c-1");

        harness
            .transport
            .fail_type("captures", RemoteError::Timeout);
        stage(&coordinator, &target, json!({})).await;
        for _ in 0..5 {
            coordinator.start_full_sync(&cancel).await.unwrap();
        }
        assert_eq!(harness.transport.attempts().len(), 3);

        let record = coordinator.metadata().get(&target).await.unwrap().unwrap();
        assert_eq!(record.sync_status, MetadataStatus::Failed);

        harness.transport.heal_type("captures");
        coordinator.metadata().reset_failed(None).await.unwrap();
        let result = coordinator.start_full_sync(&cancel).await.unwrap();
        assert_eq!(result.items_synced, 1);
    }

    #[tokio::test]
    async fn pass_detects_conflict_and_client_wins_resolution_pushes() {
        let harness = Harness::new().await;
        let coordinator = coordinator(&harness);
        let cancel = CancellationToken::new();
        let target = key("projects", "p-1");

        harness.transport.seed(EntitySnapshot {
            key: target.clone(),
            payload: json!({"name": "theirs"}),
            version: 4,
            updated_at: 0,
        });
        stage(&coordinator, &target, json!({"name": "ours"})).await;

        let result = coordinator.start_full_sync(&cancel).await.unwrap();
        assert!(result.success);
        assert_eq!(result.items_synced, 0);

        let conflicts = coordinator.detect_conflicts().await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].remote_version, 4);

        let info = coordinator
            .resolve_conflict(
                &target.entity_type,
                &target.entity_id,
                ResolutionStrategy::ClientWins,
                &cancel,
            )
            .await
            .unwrap()
            .unwrap();
        assert!(info.push_enqueued);
        assert_eq!(coordinator.get_sync_status().await.unwrap().pending_items_count, 1);

        let result = coordinator.start_full_sync(&cancel).await.unwrap();
        assert_eq!(result.items_synced, 1);
        let remote = harness.transport.remote(&target).unwrap();
        assert_eq!(remote.payload, json!({"name": "ours"}));
        assert_eq!(remote.version, 5);
        assert!(coordinator.detect_conflicts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn local_removal_is_pushed_as_delete() {
        let harness = Harness::new().await;
        let coordinator = coordinator(&harness);
        let cancel = CancellationToken::new();
        let target = key("annotations", "a-1");

        stage(&coordinator, &target, json!({"text": "note"})).await;
        coordinator.start_full_sync(&cancel).await.unwrap();
        assert!(harness.transport.remote(&target).is_some());

        coordinator.local_store().remove(&target).await.unwrap();
        coordinator
            .metadata()
            .record_local_change(&target)
            .await
            .unwrap();
        let result = coordinator.start_full_sync(&cancel).await.unwrap();
        assert_eq!(result.items_synced, 1);
        assert!(harness.transport.remote(&target).is_none());
        assert_eq!(
            harness.transport.applied().last().unwrap().operation_type,
            OperationType::Delete
        );
    }

    #[tokio::test]
    async fn sync_entity_limits_to_one_type() {
        let harness = Harness::new().await;
        let coordinator = coordinator(&harness);
        let cancel = CancellationToken::new();

        stage(&coordinator, &key("projects", "p-1"), json!({})).await;
        stage(&coordinator, &key("samples", "s-1"), json!({})).await;

        let samples = EntityType::new("samples").unwrap();
        let result = coordinator.sync_entity(&samples, &cancel).await.unwrap();
        assert!(result.success);
        assert_eq!(result.items_synced, 1);
        assert_eq!(harness.transport.applied()[0].key.entity_type, samples);

        let unknown = EntityType::new("invoices").unwrap();
        assert!(coordinator.sync_entity(&unknown, &cancel).await.is_err());
    }

    #[tokio::test]
    async fn cancelled_sync_reports_and_still_stamps_time() {
        let harness = Harness::new().await;
        let coordinator = coordinator(&harness);
        let cancel = CancellationToken::new();
        cancel.cancel();

        stage(&coordinator, &key("projects", "p-1"), json!({})).await;
        let result = coordinator.start_full_sync(&cancel).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some(CANCELLED));
        assert!(harness.transport.attempts().is_empty());
        assert_eq!(
            coordinator.get_sync_status().await.unwrap().last_sync_time,
            Some(harness.clock.now_millis())
        );
    }

    #[tokio::test]
    async fn run_loop_syncs_until_cancelled() {
        let harness = Harness::new().await;
        let coordinator = coordinator(&harness);
        let cancel = CancellationToken::new();
        stage(&coordinator, &key("users", "u-1"), json!({"name": "Ada"})).await;

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        coordinator
            .run(Duration::from_millis(10), &cancel)
            .await
            .unwrap();

        assert_eq!(harness.transport.applied().len(), 1);
        assert!(coordinator
            .get_sync_status()
            .await
            .unwrap()
            .last_sync_time
            .is_some());
    }
}
