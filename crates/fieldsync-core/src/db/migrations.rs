//! Database migrations

use crate::error::Result;
use rusqlite::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 3;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }
    if version < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get::<_, i32>(0).map(|value| value != 0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Execute a migration's statements atomically
fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    for stmt in statements {
        tx.execute(stmt, [])?;
    }
    tx.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    tx.commit()?;

    tracing::info!("Migrated database to version {version}");
    Ok(())
}

/// Migration to version 1: Sync queue
fn migrate_v1(conn: &Connection) -> Result<()> {
    apply(
        conn,
        1,
        &[
            // Schema version tracking
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            // Pending offline mutations; seq preserves enqueue order
            "CREATE TABLE IF NOT EXISTS sync_queue (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                operation_type TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                priority INTEGER NOT NULL DEFAULT 0,
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                last_attempt_at INTEGER,
                next_attempt_at INTEGER,
                error_message TEXT
            )",
            "CREATE INDEX IF NOT EXISTS idx_sync_queue_status ON sync_queue(status)",
            "CREATE INDEX IF NOT EXISTS idx_sync_queue_entity ON sync_queue(entity_type, entity_id, seq)",
        ],
    )
}

/// Migration to version 2: Per-entity sync metadata
fn migrate_v2(conn: &Connection) -> Result<()> {
    apply(
        conn,
        2,
        &[
            "CREATE TABLE IF NOT EXISTS sync_metadata (
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                sync_status TEXT NOT NULL DEFAULT 'idle',
                last_sync_attempt INTEGER,
                last_sync_success INTEGER,
                sync_attempts INTEGER NOT NULL DEFAULT 0,
                max_sync_attempts INTEGER NOT NULL,
                has_conflict INTEGER NOT NULL DEFAULT 0,
                conflict_resolution TEXT,
                conflict_detected_at INTEGER,
                local_version INTEGER NOT NULL DEFAULT 0,
                remote_version INTEGER NOT NULL DEFAULT 0,
                sync_error TEXT,
                PRIMARY KEY (entity_type, entity_id)
            )",
            "CREATE INDEX IF NOT EXISTS idx_sync_metadata_status ON sync_metadata(entity_type, sync_status)",
            "CREATE INDEX IF NOT EXISTS idx_sync_metadata_conflict ON sync_metadata(has_conflict) WHERE has_conflict = 1",
        ],
    )
}

/// Migration to version 3: Conflict log, local snapshots, engine state
fn migrate_v3(conn: &Connection) -> Result<()> {
    apply(
        conn,
        3,
        &[
            "CREATE TABLE IF NOT EXISTS sync_conflicts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                local_version INTEGER NOT NULL,
                remote_version INTEGER NOT NULL,
                detected_at INTEGER NOT NULL,
                resolved_at INTEGER NOT NULL,
                strategy TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_entity ON sync_conflicts(entity_type, entity_id)",
            "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_resolved_at ON sync_conflicts(resolved_at DESC)",
            // Local copies of opaque entity payloads
            "CREATE TABLE IF NOT EXISTS entity_snapshots (
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                version INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (entity_type, entity_id)
            )",
            // Engine key-value state (local only)
            "CREATE TABLE IF NOT EXISTS engine_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?)",
            [name],
            |row| row.get::<_, i32>(0),
        )
        .unwrap()
            != 0
    }

    #[test]
    fn test_migrations() {
        let conn = setup();
        run(&conn).unwrap();

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_migrations_idempotent() {
        let conn = setup();
        run(&conn).unwrap();
        run(&conn).unwrap(); // Should not fail

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_migrations_create_sync_tables() {
        let conn = setup();
        run(&conn).unwrap();

        for table in [
            "sync_queue",
            "sync_metadata",
            "sync_conflicts",
            "entity_snapshots",
            "engine_state",
        ] {
            assert!(table_exists(&conn, table), "missing table {table}");
        }
    }
}
