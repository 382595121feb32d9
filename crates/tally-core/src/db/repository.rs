//! Record repository implementation
//!
//! Records are stored as JSON payloads keyed by `(user_id, kind, id)`.
//! Tombstones live in the same table; `deleted` is a denormalized copy of the
//! payload flag so listing live records does not need to parse JSON.

use crate::error::Result;
use crate::models::EntityKind;
use rusqlite::{params, Connection};

/// A stored record row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRow {
    pub id: String,
    pub payload: String,
    pub deleted: bool,
}

/// Trait for record storage operations
pub trait RecordRepository {
    /// All rows of one kind for a user, tombstones included, ordered by id
    fn list(&self, user_id: &str, kind: EntityKind) -> Result<Vec<RecordRow>>;

    /// Replace every row of one kind for a user
    fn replace(&mut self, user_id: &str, kind: EntityKind, rows: &[RecordRow]) -> Result<()>;

    /// Insert or overwrite a single row
    fn upsert(&self, user_id: &str, kind: EntityKind, row: &RecordRow) -> Result<()>;

    /// Remove every row owned by a user
    fn wipe(&self, user_id: &str) -> Result<()>;
}

/// `SQLite` implementation of `RecordRepository`
pub struct SqliteRecordRepository<'a> {
    conn: &'a mut Connection,
}

impl<'a> SqliteRecordRepository<'a> {
    /// Create a new repository with the given connection
    pub fn new(conn: &'a mut Connection) -> Self {
        Self { conn }
    }

    fn parse_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecordRow> {
        Ok(RecordRow {
            id: row.get(0)?,
            payload: row.get(1)?,
            deleted: row.get::<_, i32>(2)? != 0,
        })
    }
}

impl RecordRepository for SqliteRecordRepository<'_> {
    fn list(&self, user_id: &str, kind: EntityKind) -> Result<Vec<RecordRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, payload, deleted FROM records
             WHERE user_id = ? AND kind = ?
             ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![user_id, kind.as_str()], Self::parse_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn replace(&mut self, user_id: &str, kind: EntityKind, rows: &[RecordRow]) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM records WHERE user_id = ? AND kind = ?",
            params![user_id, kind.as_str()],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO records (user_id, kind, id, payload, deleted) VALUES (?, ?, ?, ?, ?)",
            )?;
            for row in rows {
                stmt.execute(params![
                    user_id,
                    kind.as_str(),
                    row.id,
                    row.payload,
                    i32::from(row.deleted)
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn upsert(&self, user_id: &str, kind: EntityKind, row: &RecordRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO records (user_id, kind, id, payload, deleted) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(user_id, kind, id) DO UPDATE SET
                payload = excluded.payload,
                deleted = excluded.deleted",
            params![
                user_id,
                kind.as_str(),
                row.id,
                row.payload,
                i32::from(row.deleted)
            ],
        )?;
        Ok(())
    }

    fn wipe(&self, user_id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM records WHERE user_id = ?", params![user_id])?;
        Ok(())
    }
}
