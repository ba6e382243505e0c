//! Sync queue repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use crate::error::Result;
use crate::models::{EntityKey, EntityType, QueueEntry, QueueEntryId};
use rusqlite::{params, Connection, OptionalExtension};

use super::rows::parse_column;

const ENTRY_COLUMNS: &str = "seq, id, operation_type, entity_type, entity_id, payload, status,
    priority, retry_count, max_retries, created_at, last_attempt_at, next_attempt_at, error_message";

/// Trait for queue storage operations
pub trait QueueRepository {
    /// Persist a new entry, returning it with its assigned sequence number
    fn insert(&self, entry: &QueueEntry) -> Result<QueueEntry>;

    /// Get an entry by ID
    fn get(&self, id: &QueueEntryId) -> Result<Option<QueueEntry>>;

    /// List entries, oldest first, optionally filtered by entity type
    fn list(&self, entity_type: Option<&EntityType>, limit: usize) -> Result<Vec<QueueEntry>>;

    /// Entries not yet synced (outstanding, in flight, or failed), oldest first
    fn list_unsettled(&self) -> Result<Vec<QueueEntry>>;

    /// Atomically move an outstanding entry to `in_progress`
    ///
    /// Returns `false` when another drain already claimed it.
    fn claim(&self, id: &QueueEntryId, now: i64) -> Result<bool>;

    /// Record a successful remote apply
    fn mark_synced(&self, id: &QueueEntryId) -> Result<()>;

    /// Record a failed attempt that will be retried at `next_attempt_at`
    fn mark_retry(
        &self,
        id: &QueueEntryId,
        retry_count: u32,
        next_attempt_at: i64,
        error: &str,
    ) -> Result<()>;

    /// Record a terminal failure
    fn mark_failed(&self, id: &QueueEntryId, retry_count: u32, error: &str) -> Result<()>;

    /// Return a claimed entry to its outstanding state without consuming a retry
    fn release(&self, id: &QueueEntryId) -> Result<()>;

    /// Re-arm a failed entry for another round of attempts
    fn rearm(&self, id: &QueueEntryId) -> Result<bool>;

    /// Count entries in `pending` or `pending_retry`
    fn count_outstanding(&self) -> Result<usize>;

    /// Earliest scheduled retry among `pending_retry` entries
    fn next_retry_at(&self) -> Result<Option<i64>>;

    /// Delete one entry
    fn delete(&self, id: &QueueEntryId) -> Result<bool>;

    /// Delete every entry
    fn clear(&self) -> Result<usize>;

    /// Delete entries already synced
    fn purge_synced(&self) -> Result<usize>;

    /// Return entries stranded `in_progress` by an interrupted drain to `pending_retry`
    fn reset_interrupted(&self) -> Result<usize>;

    /// Count entries of one entity that are not yet synced
    fn count_unsettled_for(&self, key: &EntityKey) -> Result<usize>;

    /// Highest sequence number ever assigned to one entity, 0 if none
    fn max_seq_for(&self, key: &EntityKey) -> Result<i64>;

    /// Drop an entity's waiting or failed entries up to `through_seq`
    ///
    /// In-flight entries and anything enqueued after `through_seq` are kept.
    fn discard_for_entity(&self, key: &EntityKey, through_seq: i64) -> Result<usize>;
}

/// `SQLite` implementation of `QueueRepository`
pub struct SqliteQueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a queue entry from a database row
    fn parse_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueEntry> {
        Ok(QueueEntry {
            seq: row.get(0)?,
            id: parse_column(row, 1)?,
            operation_type: parse_column(row, 2)?,
            entity_type: parse_column(row, 3)?,
            entity_id: parse_column(row, 4)?,
            payload: row.get(5)?,
            status: parse_column(row, 6)?,
            priority: row.get(7)?,
            retry_count: row.get(8)?,
            max_retries: row.get(9)?,
            created_at: row.get(10)?,
            last_attempt_at: row.get(11)?,
            next_attempt_at: row.get(12)?,
            error_message: row.get(13)?,
        })
    }
}

impl QueueRepository for SqliteQueueRepository<'_> {
    fn insert(&self, entry: &QueueEntry) -> Result<QueueEntry> {
        self.conn.execute(
            "INSERT INTO sync_queue (id, operation_type, entity_type, entity_id, payload, status,
                priority, retry_count, max_retries, created_at, last_attempt_at, next_attempt_at,
                error_message)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                entry.id.as_str(),
                entry.operation_type.as_str(),
                entry.entity_type.as_str(),
                entry.entity_id.as_str(),
                entry.payload,
                entry.status.as_str(),
                entry.priority,
                entry.retry_count,
                entry.max_retries,
                entry.created_at,
                entry.last_attempt_at,
                entry.next_attempt_at,
                entry.error_message,
            ],
        )?;

        let mut stored = entry.clone();
        stored.seq = self.conn.last_insert_rowid();
        Ok(stored)
    }

    fn get(&self, id: &QueueEntryId) -> Result<Option<QueueEntry>> {
        let entry = self
            .conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM sync_queue WHERE id = ?"),
                params![id.as_str()],
                Self::parse_entry,
            )
            .optional()?;
        Ok(entry)
    }

    fn list(&self, entity_type: Option<&EntityType>, limit: usize) -> Result<Vec<QueueEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM sync_queue
             WHERE (?1 IS NULL OR entity_type = ?1)
             ORDER BY seq ASC
             LIMIT ?2"
        ))?;

        let entries = stmt
            .query_map(
                params![entity_type.map(EntityType::as_str), limit as i64],
                Self::parse_entry,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entries)
    }

    fn list_unsettled(&self) -> Result<Vec<QueueEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM sync_queue
             WHERE status != 'synced'
             ORDER BY seq ASC"
        ))?;

        let entries = stmt
            .query_map([], Self::parse_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entries)
    }

    fn claim(&self, id: &QueueEntryId, now: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE sync_queue SET status = 'in_progress', last_attempt_at = ?
             WHERE id = ? AND status IN ('pending', 'pending_retry')",
            params![now, id.as_str()],
        )?;
        Ok(rows == 1)
    }

    fn mark_synced(&self, id: &QueueEntryId) -> Result<()> {
        self.conn.execute(
            "UPDATE sync_queue SET status = 'synced', next_attempt_at = NULL, error_message = NULL
             WHERE id = ?",
            params![id.as_str()],
        )?;
        Ok(())
    }

    fn mark_retry(
        &self,
        id: &QueueEntryId,
        retry_count: u32,
        next_attempt_at: i64,
        error: &str,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE sync_queue
             SET status = 'pending_retry', retry_count = ?, next_attempt_at = ?, error_message = ?
             WHERE id = ?",
            params![retry_count, next_attempt_at, error, id.as_str()],
        )?;
        Ok(())
    }

    fn mark_failed(&self, id: &QueueEntryId, retry_count: u32, error: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE sync_queue
             SET status = 'failed', retry_count = ?, next_attempt_at = NULL, error_message = ?
             WHERE id = ?",
            params![retry_count, error, id.as_str()],
        )?;
        Ok(())
    }

    fn release(&self, id: &QueueEntryId) -> Result<()> {
        self.conn.execute(
            "UPDATE sync_queue
             SET status = CASE WHEN retry_count = 0 THEN 'pending' ELSE 'pending_retry' END
             WHERE id = ? AND status = 'in_progress'",
            params![id.as_str()],
        )?;
        Ok(())
    }

    fn rearm(&self, id: &QueueEntryId) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE sync_queue
             SET status = 'pending', retry_count = 0, next_attempt_at = NULL, error_message = NULL
             WHERE id = ? AND status = 'failed'",
            params![id.as_str()],
        )?;
        Ok(rows == 1)
    }

    fn count_outstanding(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sync_queue WHERE status IN ('pending', 'pending_retry')",
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn next_retry_at(&self) -> Result<Option<i64>> {
        let next = self.conn.query_row(
            "SELECT MIN(next_attempt_at) FROM sync_queue WHERE status = 'pending_retry'",
            [],
            |row| row.get(0),
        )?;
        Ok(next)
    }

    fn delete(&self, id: &QueueEntryId) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM sync_queue WHERE id = ?", params![id.as_str()])?;
        Ok(rows == 1)
    }

    fn clear(&self) -> Result<usize> {
        Ok(self.conn.execute("DELETE FROM sync_queue", [])?)
    }

    fn purge_synced(&self) -> Result<usize> {
        Ok(self
            .conn
            .execute("DELETE FROM sync_queue WHERE status = 'synced'", [])?)
    }

    fn reset_interrupted(&self) -> Result<usize> {
        Ok(self.conn.execute(
            "UPDATE sync_queue SET status = 'pending_retry' WHERE status = 'in_progress'",
            [],
        )?)
    }

    fn count_unsettled_for(&self, key: &EntityKey) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sync_queue
             WHERE entity_type = ? AND entity_id = ? AND status != 'synced'",
            params![key.entity_type.as_str(), key.entity_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn max_seq_for(&self, key: &EntityKey) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COALESCE(MAX(seq), 0) FROM sync_queue WHERE entity_type = ? AND entity_id = ?",
            params![key.entity_type.as_str(), key.entity_id.as_str()],
            |row| row.get(0),
        )?)
    }

    fn discard_for_entity(&self, key: &EntityKey, through_seq: i64) -> Result<usize> {
        Ok(self.conn.execute(
            "DELETE FROM sync_queue
             WHERE entity_type = ? AND entity_id = ? AND seq <= ?
               AND status IN ('pending', 'pending_retry', 'failed')",
            params![key.entity_type.as_str(), key.entity_id.as_str(), through_seq],
        )?)
    }
}
