//! Sync metadata and conflict log repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use crate::error::Result;
use crate::models::{EntityKey, EntityType, MetadataStatus, SyncConflict, SyncMetadata};
use rusqlite::{params, Connection, OptionalExtension};

use super::rows::{bool_column, parse_column};

const METADATA_COLUMNS: &str = "entity_type, entity_id, sync_status, last_sync_attempt,
    last_sync_success, sync_attempts, max_sync_attempts, has_conflict, conflict_resolution,
    conflict_detected_at, local_version, remote_version, sync_error";

/// Trait for sync metadata storage operations
pub trait MetadataRepository {
    /// Get the record for an entity
    fn get(&self, key: &EntityKey) -> Result<Option<SyncMetadata>>;

    /// Get the record for an entity, creating an idle one if missing
    fn get_or_create(&self, key: &EntityKey, max_sync_attempts: u32) -> Result<SyncMetadata>;

    /// Insert or replace a record
    fn save(&self, record: &SyncMetadata) -> Result<()>;

    /// Records a sync pass should visit for one type
    ///
    /// Excludes `synced` and `failed` records, anything flagged as conflicting,
    /// and entities that still have unsynced queue entries.
    fn list_unsettled(&self, entity_type: &EntityType) -> Result<Vec<SyncMetadata>>;

    /// List records, optionally filtered by type
    fn list(&self, entity_type: Option<&EntityType>) -> Result<Vec<SyncMetadata>>;

    /// Records currently flagged as conflicting
    fn list_conflicts(&self) -> Result<Vec<SyncMetadata>>;

    /// Move `failed` records back to `pending` with a fresh attempt budget
    fn reset_failed(&self, entity_type: Option<&EntityType>) -> Result<usize>;

    /// Append a resolved conflict to the log
    fn insert_conflict_log(&self, conflict: &SyncConflict) -> Result<i64>;

    /// Most recent resolved conflicts, newest first
    fn list_conflict_log(&self, limit: usize) -> Result<Vec<SyncConflict>>;
}

/// `SQLite` implementation of `MetadataRepository`
pub struct SqliteMetadataRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteMetadataRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncMetadata> {
        Ok(SyncMetadata {
            key: EntityKey::new(parse_column(row, 0)?, parse_column(row, 1)?),
            sync_status: parse_column(row, 2)?,
            last_sync_attempt: row.get(3)?,
            last_sync_success: row.get(4)?,
            sync_attempts: row.get(5)?,
            max_sync_attempts: row.get(6)?,
            has_conflict: bool_column(row, 7)?,
            conflict_resolution: row.get(8)?,
            conflict_detected_at: row.get(9)?,
            local_version: row.get(10)?,
            remote_version: row.get(11)?,
            sync_error: row.get(12)?,
        })
    }

    fn parse_conflict(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncConflict> {
        Ok(SyncConflict {
            id: row.get(0)?,
            entity_type: row.get(1)?,
            entity_id: row.get(2)?,
            local_version: row.get(3)?,
            remote_version: row.get(4)?,
            detected_at: row.get(5)?,
            resolved_at: row.get(6)?,
            strategy: row.get(7)?,
        })
    }

    fn query_records(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<SyncMetadata>> {
        let mut stmt = self.conn.prepare(sql)?;
        let records = stmt
            .query_map(params, Self::parse_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}

impl MetadataRepository for SqliteMetadataRepository<'_> {
    fn get(&self, key: &EntityKey) -> Result<Option<SyncMetadata>> {
        let record = self
            .conn
            .query_row(
                &format!(
                    "SELECT {METADATA_COLUMNS} FROM sync_metadata
                     WHERE entity_type = ? AND entity_id = ?"
                ),
                params![key.entity_type.as_str(), key.entity_id.as_str()],
                Self::parse_record,
            )
            .optional()?;
        Ok(record)
    }

    fn get_or_create(&self, key: &EntityKey, max_sync_attempts: u32) -> Result<SyncMetadata> {
        if let Some(record) = self.get(key)? {
            return Ok(record);
        }
        let record = SyncMetadata::new(key.clone(), max_sync_attempts);
        self.save(&record)?;
        Ok(record)
    }

    fn save(&self, record: &SyncMetadata) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_metadata (entity_type, entity_id, sync_status, last_sync_attempt,
                last_sync_success, sync_attempts, max_sync_attempts, has_conflict,
                conflict_resolution, conflict_detected_at, local_version, remote_version,
                sync_error)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(entity_type, entity_id) DO UPDATE SET
                sync_status = excluded.sync_status,
                last_sync_attempt = excluded.last_sync_attempt,
                last_sync_success = excluded.last_sync_success,
                sync_attempts = excluded.sync_attempts,
                max_sync_attempts = excluded.max_sync_attempts,
                has_conflict = excluded.has_conflict,
                conflict_resolution = excluded.conflict_resolution,
                conflict_detected_at = excluded.conflict_detected_at,
                local_version = excluded.local_version,
                remote_version = excluded.remote_version,
                sync_error = excluded.sync_error",
            params![
                record.key.entity_type.as_str(),
                record.key.entity_id.as_str(),
                record.sync_status.as_str(),
                record.last_sync_attempt,
                record.last_sync_success,
                record.sync_attempts,
                record.max_sync_attempts,
                record.has_conflict,
                record.conflict_resolution,
                record.conflict_detected_at,
                record.local_version,
                record.remote_version,
                record.sync_error,
            ],
        )?;
        Ok(())
    }

    fn list_unsettled(&self, entity_type: &EntityType) -> Result<Vec<SyncMetadata>> {
        // Entities with queued mutations are replayed by the queue drain instead
        self.query_records(
            &format!(
                "SELECT {METADATA_COLUMNS} FROM sync_metadata AS m
                 WHERE m.entity_type = ?
                   AND m.sync_status IN ('idle', 'pending', 'syncing')
                   AND m.has_conflict = 0
                   AND NOT EXISTS (
                       SELECT 1 FROM sync_queue AS q
                       WHERE q.entity_type = m.entity_type
                         AND q.entity_id = m.entity_id
                         AND q.status != 'synced'
                   )
                 ORDER BY COALESCE(m.last_sync_attempt, 0) ASC, m.entity_id ASC"
            ),
            params![entity_type.as_str()],
        )
    }

    fn list(&self, entity_type: Option<&EntityType>) -> Result<Vec<SyncMetadata>> {
        self.query_records(
            &format!(
                "SELECT {METADATA_COLUMNS} FROM sync_metadata
                 WHERE (?1 IS NULL OR entity_type = ?1)
                 ORDER BY entity_type ASC, entity_id ASC"
            ),
            params![entity_type.map(EntityType::as_str)],
        )
    }

    fn list_conflicts(&self) -> Result<Vec<SyncMetadata>> {
        self.query_records(
            &format!(
                "SELECT {METADATA_COLUMNS} FROM sync_metadata
                 WHERE has_conflict = 1
                 ORDER BY COALESCE(conflict_detected_at, last_sync_attempt, 0) ASC"
            ),
            [],
        )
    }

    fn reset_failed(&self, entity_type: Option<&EntityType>) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE sync_metadata
             SET sync_status = ?1, sync_attempts = 0, sync_error = NULL
             WHERE sync_status = ?2 AND (?3 IS NULL OR entity_type = ?3)",
            params![
                MetadataStatus::Pending.as_str(),
                MetadataStatus::Failed.as_str(),
                entity_type.map(EntityType::as_str),
            ],
        )?;
        Ok(rows)
    }

    fn insert_conflict_log(&self, conflict: &SyncConflict) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO sync_conflicts (entity_type, entity_id, local_version, remote_version,
                detected_at, resolved_at, strategy)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                conflict.entity_type,
                conflict.entity_id,
                conflict.local_version,
                conflict.remote_version,
                conflict.detected_at,
                conflict.resolved_at,
                conflict.strategy,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn list_conflict_log(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, entity_type, entity_id, local_version, remote_version, detected_at,
                resolved_at, strategy
             FROM sync_conflicts
             ORDER BY resolved_at DESC, id DESC
             LIMIT ?",
        )?;

        let conflicts = stmt
            .query_map(params![limit as i64], Self::parse_conflict)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(conflicts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::EntityId;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn key(entity_type: &str, entity_id: &str) -> EntityKey {
        EntityKey::new(
            EntityType::new(entity_type).unwrap(),
            EntityId::new(entity_id).unwrap(),
        )
    }

    #[test]
    fn test_get_or_create_is_lazy_and_stable() {
        let db = setup();
        let repo = SqliteMetadataRepository::new(db.connection());
        let key = key("projects", "p-1");

        assert!(repo.get(&key).unwrap().is_none());
        let created = repo.get_or_create(&key, 3).unwrap();
        assert_eq!(created.sync_status, MetadataStatus::Idle);

        let mut updated = created.clone();
        updated.local_version = 4;
        repo.save(&updated).unwrap();

        let again = repo.get_or_create(&key, 3).unwrap();
        assert_eq!(again.local_version, 4);
    }

    #[test]
    fn test_save_roundtrips_all_fields() {
        let db = setup();
        let repo = SqliteMetadataRepository::new(db.connection());

        let mut record = SyncMetadata::new(key("samples", "s-9"), 5);
        record.sync_status = MetadataStatus::Pending;
        record.last_sync_attempt = Some(10);
        record.sync_attempts = 2;
        record.has_conflict = true;
        record.conflict_detected_at = Some(11);
        record.local_version = 3;
        record.remote_version = 2;
        record.sync_error = Some("timeout".into());
        repo.save(&record).unwrap();

        assert_eq!(repo.get(&record.key).unwrap().unwrap(), record);
    }

    #[test]
    fn test_list_unsettled_skips_synced_failed_and_conflicted() {
        let db = setup();
        let repo = SqliteMetadataRepository::new(db.connection());

        let mut pending = SyncMetadata::new(key("projects", "a"), 3);
        pending.sync_status = MetadataStatus::Pending;
        repo.save(&pending).unwrap();

        let mut synced = SyncMetadata::new(key("projects", "b"), 3);
        synced.sync_status = MetadataStatus::Synced;
        repo.save(&synced).unwrap();

        let mut failed = SyncMetadata::new(key("projects", "c"), 3);
        failed.sync_status = MetadataStatus::Failed;
        repo.save(&failed).unwrap();

        let mut conflicted = SyncMetadata::new(key("projects", "d"), 3);
        conflicted.sync_status = MetadataStatus::Pending;
        conflicted.has_conflict = true;
        repo.save(&conflicted).unwrap();

        repo.save(&SyncMetadata::new(key("samples", "e"), 3)).unwrap();

        let projects = EntityType::new("projects").unwrap();
        let listed = repo.list_unsettled(&projects).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].key.entity_id.as_str(), "a");

        assert_eq!(repo.list_conflicts().unwrap().len(), 1);
        assert_eq!(repo.list(Some(&projects)).unwrap().len(), 4);
        assert_eq!(repo.list(None).unwrap().len(), 5);
    }

    #[test]
    fn test_reset_failed() {
        let db = setup();
        let repo = SqliteMetadataRepository::new(db.connection());

        let mut failed = SyncMetadata::new(key("projects", "a"), 3);
        failed.sync_status = MetadataStatus::Failed;
        failed.sync_attempts = 3;
        failed.sync_error = Some("boom".into());
        repo.save(&failed).unwrap();

        assert_eq!(repo.reset_failed(None).unwrap(), 1);
        let reset = repo.get(&failed.key).unwrap().unwrap();
        assert_eq!(reset.sync_status, MetadataStatus::Pending);
        assert_eq!(reset.sync_attempts, 0);
        assert!(reset.sync_error.is_none());
    }

    #[test]
    fn test_conflict_log_newest_first() {
        let db = setup();
        let repo = SqliteMetadataRepository::new(db.connection());

        for (resolved_at, strategy) in [(100, "server_wins"), (200, "merge")] {
            repo.insert_conflict_log(&SyncConflict {
                id: 0,
                entity_type: "projects".into(),
                entity_id: "p-1".into(),
                local_version: 2,
                remote_version: 3,
                detected_at: 50,
                resolved_at,
                strategy: strategy.into(),
            })
            .unwrap();
        }

        let log = repo.list_conflict_log(10).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].strategy, "merge");
        assert_eq!(log[1].resolved_at, 100);
    }
}
