//! Shared database handle used by every sync component.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex;

use crate::db::{
    Database, MetadataRepository, SqliteMetadataRepository, SqliteSnapshotRepository,
    SqliteStateRepository, SnapshotRepository, StateRepository, LAST_SYNC_TIME_KEY,
};
use crate::models::{EntitySnapshot, EntityType, SyncConflict};
use crate::Result;

/// Thread-safe handle to the engine's `SQLite` database.
///
/// Cloning is cheap; all clones share one connection behind an async mutex, so
/// repository calls made through [`SyncStore::run`] never interleave.
#[derive(Clone)]
pub struct SyncStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl SyncStore {
    /// Open the store at the given filesystem path, creating parent directories.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let open_path = db_path.clone();
        let db = tokio::task::spawn_blocking(move || Database::open(&open_path))
            .await
            .map_err(|error| crate::Error::Database(error.to_string()))??;

        tracing::info!("Opened sync store at {}", db_path.display());
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    /// Filesystem location, if the store is on disk.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Run repository calls against the connection.
    pub async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send,
        T: Send,
    {
        let db = self.db.lock().await;
        f(db.connection())
    }

    /// Run repository calls inside one transaction; rolled back on error.
    pub async fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send,
        T: Send,
    {
        let db = self.db.lock().await;
        let tx = db.connection().unchecked_transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Local copies of one entity type.
    pub async fn list_snapshots(&self, entity_type: &EntityType) -> Result<Vec<EntitySnapshot>> {
        self.run(|conn| SqliteSnapshotRepository::new(conn).list(entity_type))
            .await
    }

    /// List recently resolved sync conflicts.
    pub async fn list_conflict_log(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        self.run(|conn| SqliteMetadataRepository::new(conn).list_conflict_log(limit))
            .await
    }

    /// Completion time of the last full sync pass.
    pub async fn last_sync_time(&self) -> Result<Option<i64>> {
        self.run(|conn| SqliteStateRepository::new(conn).get_i64(LAST_SYNC_TIME_KEY))
            .await
    }

    /// Persist the completion time of a full sync pass.
    pub async fn set_last_sync_time(&self, timestamp: i64) -> Result<()> {
        self.run(|conn| {
            SqliteStateRepository::new(conn).set(LAST_SYNC_TIME_KEY, &timestamp.to_string())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{QueueRepository, SqliteQueueRepository};
    use crate::models::{EntityId, EntityKey, OperationType, QueueEntry};
    use tempfile::tempdir;

    #[tokio::test(flavor = "multi_thread")]
    async fn transaction_rolls_back_on_error() {
        let store = SyncStore::open_in_memory().await.unwrap();
        let key = EntityKey::new(
            EntityType::new("projects").unwrap(),
            EntityId::new("p-1").unwrap(),
        );

        let outcome: Result<()> = store
            .transaction(|conn| {
                let repo = SqliteQueueRepository::new(conn);
                repo.insert(&QueueEntry::new(
                    OperationType::Create,
                    key.clone(),
                    serde_json::json!({}),
                    0,
                    3,
                    1,
                ))?;
                Err(crate::Error::InvalidInput("abort".into()))
            })
            .await;
        assert!(outcome.is_err());

        let count = store
            .run(|conn| SqliteQueueRepository::new(conn).count_outstanding())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn last_sync_time_survives_reopen() {
        let tmp = tempdir().unwrap();
        let db_path = tmp.path().join("nested").join("fieldsync.db");

        let store = SyncStore::open_path(&db_path).await.unwrap();
        assert!(store.last_sync_time().await.unwrap().is_none());
        store.set_last_sync_time(1_234).await.unwrap();
        drop(store);

        let reopened = SyncStore::open_path(&db_path).await.unwrap();
        assert_eq!(reopened.db_path(), Some(db_path.as_path()));
        assert_eq!(reopened.last_sync_time().await.unwrap(), Some(1_234));
    }
}
