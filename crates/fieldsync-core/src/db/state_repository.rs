//! Engine key-value state

use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension};

/// Key under which the last completed sync time is stored
pub const LAST_SYNC_TIME_KEY: &str = "last_sync_time";

/// Trait for engine state storage
pub trait StateRepository {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Read a value stored as an integer
    fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.get(key)?.and_then(|value| value.parse().ok()))
    }
}

/// `SQLite` implementation of `StateRepository`
pub struct SqliteStateRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteStateRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl StateRepository for SqliteStateRepository<'_> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM engine_state WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO engine_state (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}
