//! In-memory remote used by the engine tests

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::clock::ManualClock;
use super::local::SqliteEntityStore;
use super::remote::{RemoteAck, RemoteError, RemoteOperation, RemoteTransport};
use crate::config::EngineConfig;
use crate::models::{EntityId, EntityKey, EntitySnapshot, EntityType, OperationType};
use crate::services::SyncStore;

#[derive(Default)]
struct ScriptState {
    records: HashMap<EntityKey, EntitySnapshot>,
    failures: VecDeque<RemoteError>,
    failing_types: HashMap<EntityType, RemoteError>,
    attempts: Vec<RemoteOperation>,
    applied: Vec<RemoteOperation>,
}

/// Remote store with scripted failures and an optional per-call delay
#[derive(Default)]
pub struct ScriptedTransport {
    state: Mutex<ScriptState>,
    delay: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn seed(&self, snapshot: EntitySnapshot) {
        let mut state = self.state.lock().unwrap();
        state.records.insert(snapshot.key.clone(), snapshot);
    }

    /// Fail the next call with `error`
    pub fn fail_next(&self, error: RemoteError) {
        self.state.lock().unwrap().failures.push_back(error);
    }

    /// Fail every apply for one entity type
    pub fn fail_type(&self, entity_type: &str, error: RemoteError) {
        self.state
            .lock()
            .unwrap()
            .failing_types
            .insert(EntityType::new(entity_type).unwrap(), error);
    }

    pub fn heal_type(&self, entity_type: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_types
            .remove(&EntityType::new(entity_type).unwrap());
    }

    /// Every apply call, including failed ones
    pub fn attempts(&self) -> Vec<RemoteOperation> {
        self.state.lock().unwrap().attempts.clone()
    }

    /// Applies that succeeded, in order
    pub fn applied(&self) -> Vec<RemoteOperation> {
        self.state.lock().unwrap().applied.clone()
    }

    pub fn remote(&self, key: &EntityKey) -> Option<EntitySnapshot> {
        self.state.lock().unwrap().records.get(key).cloned()
    }
}

#[async_trait]
impl RemoteTransport for ScriptedTransport {
    async fn apply(&self, operation: RemoteOperation) -> Result<RemoteAck, RemoteError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.attempts.push(operation.clone());
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        if let Some(error) = state.failing_types.get(&operation.key.entity_type) {
            return Err(error.clone());
        }

        let current = state.records.get(&operation.key).map(|record| record.version);
        match (operation.operation_type, operation.base_version, current) {
            (OperationType::Create, _, Some(remote_version)) => {
                return Err(RemoteError::Conflict { remote_version });
            }
            (_, Some(base), current) if current.unwrap_or(0) != base => {
                return Err(RemoteError::Conflict {
                    remote_version: current.unwrap_or(0),
                });
            }
            _ => {}
        }

        let version = current.unwrap_or(0) + 1;
        if operation.operation_type == OperationType::Delete {
            state.records.remove(&operation.key);
        } else {
            state.records.insert(
                operation.key.clone(),
                EntitySnapshot {
                    key: operation.key.clone(),
                    payload: operation.payload.clone(),
                    version,
                    updated_at: 0,
                },
            );
        }
        state.applied.push(operation);
        Ok(RemoteAck { version })
    }

    async fn fetch(&self, key: &EntityKey) -> Result<Option<EntitySnapshot>, RemoteError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        Ok(state.records.get(key).cloned())
    }
}

pub fn key(entity_type: &str, entity_id: &str) -> EntityKey {
    EntityKey::new(
        EntityType::new(entity_type).unwrap(),
        EntityId::new(entity_id).unwrap(),
    )
}

/// Everything a component test needs, wired against one in-memory store
pub struct Harness {
    pub store: SyncStore,
    pub transport: Arc<ScriptedTransport>,
    pub local: Arc<SqliteEntityStore>,
    pub clock: Arc<ManualClock>,
    pub config: EngineConfig,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_transport(ScriptedTransport::new()).await
    }

    pub async fn with_transport(transport: ScriptedTransport) -> Self {
        let store = SyncStore::open_in_memory().await.unwrap();
        Self {
            local: Arc::new(SqliteEntityStore::new(store.clone())),
            store,
            transport: Arc::new(transport),
            clock: Arc::new(ManualClock::new(1_000_000)),
            config: EngineConfig::default(),
        }
    }
}
