//! Chat message repository — append-only dialogue rows.

use rusqlite::{Connection, params};

use crate::errors::Result;
use crate::sqlite::row_types::MessageRow;

/// Message repository — stateless, every method takes `&Connection`.
pub struct MessageRepo;

impl MessageRepo {
    /// Insert one message, returning its surrogate key.
    pub fn insert(
        conn: &Connection,
        session_id: &str,
        instance_id: Option<i64>,
        role: &str,
        content: &str,
        timestamp: &str,
    ) -> Result<i64> {
        let _ = conn.execute(
            "INSERT INTO chat_messages (session_id, instance_id, role, content, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![session_id, instance_id, role, content, timestamp],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// List a session's messages ordered by timestamp, ties broken by
    /// insertion order.
    pub fn list_by_session(conn: &Connection, session_id: &str) -> Result<Vec<MessageRow>> {
        let mut stmt = conn.prepare(
            "SELECT id, session_id, instance_id, role, content, timestamp
             FROM chat_messages WHERE session_id = ?1 ORDER BY timestamp, id",
        )?;
        let rows = stmt
            .query_map(params![session_id], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete all messages of a session (used by full-replace upserts).
    pub fn delete_by_session(conn: &Connection, session_id: &str) -> Result<usize> {
        let removed =
            conn.execute("DELETE FROM chat_messages WHERE session_id = ?1", params![session_id])?;
        Ok(removed)
    }

    /// Count message rows.
    pub fn count(conn: &Connection) -> Result<i64> {
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM chat_messages", [], |row| row.get(0))?;
        Ok(count)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
        Ok(MessageRow {
            id: row.get("id")?,
            session_id: row.get("session_id")?,
            instance_id: row.get("instance_id")?,
            role: row.get("role")?,
            content: row.get("content")?,
            timestamp: row.get("timestamp")?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
