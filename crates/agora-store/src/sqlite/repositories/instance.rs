//! Instance repository — parallel agent runs keyed by (session, ordinal).
//!
//! The surrogate `id` exists for join efficiency; callers address instances
//! by ordinal and never see the surrogate.

use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::Result;
use crate::sqlite::row_types::InstanceRow;

/// Fields for inserting or updating one instance. The surrogate key is
/// assigned by the database on insert and preserved on update.
#[derive(Clone, Debug)]
pub struct InstanceWrite {
    /// Ordinal within the session.
    pub ordinal: i64,
    /// Worktree path.
    pub worktree_path: String,
    /// Branch name.
    pub branch: String,
    /// Agent/runtime label.
    pub agent: Option<String>,
    /// Status string.
    pub status: String,
    /// External process-session handle.
    pub process_session_id: Option<String>,
    /// Captured output.
    pub output: Option<String>,
    /// Start timestamp.
    pub started_at: Option<String>,
    /// End timestamp.
    pub ended_at: Option<String>,
    /// Files changed.
    pub files_changed: Option<i64>,
    /// Lines added.
    pub lines_added: Option<i64>,
    /// Lines removed.
    pub lines_removed: Option<i64>,
}

const INSTANCE_COLUMNS: &str = "id, session_id, ordinal, worktree_path, branch, agent, status, \
     process_session_id, output, started_at, ended_at, files_changed, lines_added, lines_removed";

/// Instance repository — stateless, every method takes `&Connection`.
pub struct InstanceRepo;

impl InstanceRepo {
    /// Insert one instance, returning its surrogate key.
    pub fn insert(conn: &Connection, session_id: &str, write: &InstanceWrite) -> Result<i64> {
        let _ = conn.execute(
            "INSERT INTO instances (session_id, ordinal, worktree_path, branch, agent, status,
             process_session_id, output, started_at, ended_at, files_changed, lines_added,
             lines_removed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                session_id,
                write.ordinal,
                write.worktree_path,
                write.branch,
                write.agent,
                write.status,
                write.process_session_id,
                write.output,
                write.started_at,
                write.ended_at,
                write.files_changed,
                write.lines_added,
                write.lines_removed,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Update an existing (session, ordinal) pair in place, keeping its
    /// surrogate key (and therefore any message references to it). Returns
    /// the surrogate key, inserting if the ordinal is new.
    pub fn upsert(conn: &Connection, session_id: &str, write: &InstanceWrite) -> Result<i64> {
        let changed = conn.execute(
            "UPDATE instances SET worktree_path = ?3, branch = ?4, agent = ?5, status = ?6,
             process_session_id = ?7, output = ?8, started_at = ?9, ended_at = ?10,
             files_changed = ?11, lines_added = ?12, lines_removed = ?13
             WHERE session_id = ?1 AND ordinal = ?2",
            params![
                session_id,
                write.ordinal,
                write.worktree_path,
                write.branch,
                write.agent,
                write.status,
                write.process_session_id,
                write.output,
                write.started_at,
                write.ended_at,
                write.files_changed,
                write.lines_added,
                write.lines_removed,
            ],
        )?;
        if changed > 0 {
            Self::id_for_ordinal(conn, session_id, write.ordinal)?.ok_or_else(|| {
                crate::StoreError::Integrity(format!(
                    "instance {session_id}#{} vanished during upsert",
                    write.ordinal
                ))
            })
        } else {
            Self::insert(conn, session_id, write)
        }
    }

    /// List a session's instances in ordinal order.
    pub fn list_by_session(conn: &Connection, session_id: &str) -> Result<Vec<InstanceRow>> {
        let sql = format!(
            "SELECT {INSTANCE_COLUMNS} FROM instances WHERE session_id = ?1 ORDER BY ordinal"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![session_id], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Resolve an ordinal to its surrogate key.
    pub fn id_for_ordinal(
        conn: &Connection,
        session_id: &str,
        ordinal: i64,
    ) -> Result<Option<i64>> {
        let id = conn
            .query_row(
                "SELECT id FROM instances WHERE session_id = ?1 AND ordinal = ?2",
                params![session_id, ordinal],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Update the status of one (session, ordinal) pair.
    pub fn update_status(
        conn: &Connection,
        session_id: &str,
        ordinal: i64,
        status: &str,
    ) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE instances SET status = ?3 WHERE session_id = ?1 AND ordinal = ?2",
            params![session_id, ordinal, status],
        )?;
        Ok(changed > 0)
    }

    /// Delete instances of a session whose ordinal is not in `keep`.
    ///
    /// Message references to the removed instances go NULL and a removed
    /// winner is cleared, both via foreign-key actions.
    pub fn delete_except(conn: &Connection, session_id: &str, keep: &[i64]) -> Result<usize> {
        if keep.is_empty() {
            let removed = conn
                .execute("DELETE FROM instances WHERE session_id = ?1", params![session_id])?;
            return Ok(removed);
        }
        let placeholders: Vec<String> = (2..=keep.len() + 1).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "DELETE FROM instances WHERE session_id = ?1 AND ordinal NOT IN ({})",
            placeholders.join(", ")
        );
        let mut values: Vec<&dyn rusqlite::types::ToSql> = vec![&session_id as &dyn rusqlite::types::ToSql];
        for ordinal in keep {
            values.push(ordinal);
        }
        let removed = conn.execute(&sql, values.as_slice())?;
        Ok(removed)
    }

    /// Count instance rows.
    pub fn count(conn: &Connection) -> Result<i64> {
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM instances", [], |row| row.get(0))?;
        Ok(count)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<InstanceRow> {
        Ok(InstanceRow {
            id: row.get("id")?,
            session_id: row.get("session_id")?,
            ordinal: row.get("ordinal")?,
            worktree_path: row.get("worktree_path")?,
            branch: row.get("branch")?,
            agent: row.get("agent")?,
            status: row.get("status")?,
            process_session_id: row.get("process_session_id")?,
            output: row.get("output")?,
            started_at: row.get("started_at")?,
            ended_at: row.get("ended_at")?,
            files_changed: row.get("files_changed")?,
            lines_added: row.get("lines_added")?,
            lines_removed: row.get("lines_removed")?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
