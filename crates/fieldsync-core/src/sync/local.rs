//! Local entity store port

use async_trait::async_trait;

use crate::db::{SnapshotRepository, SqliteSnapshotRepository};
use crate::models::{EntityKey, EntitySnapshot};
use crate::services::SyncStore;
use crate::Result;

/// Local persistence of opaque entity payloads
#[async_trait]
pub trait LocalEntityStore: Send + Sync {
    async fn load(&self, key: &EntityKey) -> Result<Option<EntitySnapshot>>;
    async fn save(&self, snapshot: &EntitySnapshot) -> Result<()>;
    async fn remove(&self, key: &EntityKey) -> Result<bool>;
}

/// [`LocalEntityStore`] backed by the engine's own database
#[derive(Clone)]
pub struct SqliteEntityStore {
    store: SyncStore,
}

impl SqliteEntityStore {
    #[must_use]
    pub const fn new(store: SyncStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl LocalEntityStore for SqliteEntityStore {
    async fn load(&self, key: &EntityKey) -> Result<Option<EntitySnapshot>> {
        self.store
            .run(|conn| SqliteSnapshotRepository::new(conn).load(key))
            .await
    }

    async fn save(&self, snapshot: &EntitySnapshot) -> Result<()> {
        self.store
            .run(|conn| SqliteSnapshotRepository::new(conn).save(snapshot))
            .await
    }

    async fn remove(&self, key: &EntityKey) -> Result<bool> {
        self.store
            .run(|conn| SqliteSnapshotRepository::new(conn).remove(key))
            .await
    }
}
