//! Per-user sync state repository

use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension};

/// Trait for sync state storage operations
pub trait SyncStateRepository {
    /// Load the raw JSON sync state for a user, if any was saved
    fn load(&self, user_id: &str) -> Result<Option<String>>;

    /// Save the raw JSON sync state for a user
    fn save(&self, user_id: &str, payload: &str) -> Result<()>;

    /// Forget the sync state of a user
    fn clear(&self, user_id: &str) -> Result<()>;
}

/// `SQLite` implementation of `SyncStateRepository`
pub struct SqliteSyncStateRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSyncStateRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl SyncStateRepository for SqliteSyncStateRepository<'_> {
    fn load(&self, user_id: &str) -> Result<Option<String>> {
        let payload = self
            .conn
            .query_row(
                "SELECT payload FROM sync_state WHERE user_id = ?",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(payload)
    }

    fn save(&self, user_id: &str, payload: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_state (user_id, payload) VALUES (?, ?)
             ON CONFLICT(user_id) DO UPDATE SET payload = excluded.payload",
            params![user_id, payload],
        )?;
        Ok(())
    }

    fn clear(&self, user_id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM sync_state WHERE user_id = ?", params![user_id])?;
        Ok(())
    }
}
