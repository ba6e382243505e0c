//! Local entity snapshot repository implementation

use crate::error::Result;
use crate::models::{EntityKey, EntitySnapshot, EntityType};
use rusqlite::{params, Connection, OptionalExtension};

use super::rows::parse_column;

/// Trait for local payload storage operations
pub trait SnapshotRepository {
    /// Load the local copy of an entity
    fn load(&self, key: &EntityKey) -> Result<Option<EntitySnapshot>>;

    /// Insert or replace the local copy of an entity
    fn save(&self, snapshot: &EntitySnapshot) -> Result<()>;

    /// Remove the local copy of an entity
    fn remove(&self, key: &EntityKey) -> Result<bool>;

    /// List local copies of one type
    fn list(&self, entity_type: &EntityType) -> Result<Vec<EntitySnapshot>>;
}

/// `SQLite` implementation of `SnapshotRepository`
pub struct SqliteSnapshotRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSnapshotRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_snapshot(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntitySnapshot> {
        Ok(EntitySnapshot {
            key: EntityKey::new(parse_column(row, 0)?, parse_column(row, 1)?),
            payload: row.get(2)?,
            version: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }
}

impl SnapshotRepository for SqliteSnapshotRepository<'_> {
    fn load(&self, key: &EntityKey) -> Result<Option<EntitySnapshot>> {
        let snapshot = self
            .conn
            .query_row(
                "SELECT entity_type, entity_id, payload, version, updated_at
                 FROM entity_snapshots WHERE entity_type = ? AND entity_id = ?",
                params![key.entity_type.as_str(), key.entity_id.as_str()],
                Self::parse_snapshot,
            )
            .optional()?;
        Ok(snapshot)
    }

    fn save(&self, snapshot: &EntitySnapshot) -> Result<()> {
        self.conn.execute(
            "INSERT INTO entity_snapshots (entity_type, entity_id, payload, version, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(entity_type, entity_id) DO UPDATE SET
                payload = excluded.payload,
                version = excluded.version,
                updated_at = excluded.updated_at",
            params![
                snapshot.key.entity_type.as_str(),
                snapshot.key.entity_id.as_str(),
                snapshot.payload,
                snapshot.version,
                snapshot.updated_at,
            ],
        )?;
        Ok(())
    }

    fn remove(&self, key: &EntityKey) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM entity_snapshots WHERE entity_type = ? AND entity_id = ?",
            params![key.entity_type.as_str(), key.entity_id.as_str()],
        )?;
        Ok(rows == 1)
    }

    fn list(&self, entity_type: &EntityType) -> Result<Vec<EntitySnapshot>> {
        let mut stmt = self.conn.prepare(
            "SELECT entity_type, entity_id, payload, version, updated_at
             FROM entity_snapshots WHERE entity_type = ?
             ORDER BY entity_id ASC",
        )?;

        let snapshots = stmt
            .query_map(params![entity_type.as_str()], Self::parse_snapshot)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(snapshots)
    }
}
