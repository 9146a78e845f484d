//! Session repository — session rows, filtered listing, winner resolution.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tokio_util::sync::CancellationToken;

use agora_core::{SessionKind, SessionStatus};

use crate::errors::{Result, StoreError};
use crate::sqlite::row_types::{SessionListRow, SessionRow};

/// Filters for listing sessions. All fields are conjunctive.
#[derive(Clone, Debug, Default)]
pub struct SessionFilter {
    /// Filter by session kind.
    pub kind: Option<SessionKind>,
    /// Filter by lifecycle status.
    pub status: Option<SessionStatus>,
    /// Only sessions created at or after this instant.
    pub created_after: Option<DateTime<Utc>>,
    /// Only sessions created at or before this instant.
    pub created_before: Option<DateTime<Utc>>,
    /// Case-insensitive substring match over the task description.
    pub task_contains: Option<String>,
    /// Maximum results.
    pub limit: Option<i64>,
    /// Skip results.
    pub offset: Option<i64>,
}

/// Escape `%`, `_`, and the escape character itself for a LIKE pattern.
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

const SESSION_COLUMNS: &str = "id, workspace_id, kind, task, status, created_at, updated_at, \
     completed_at, model, timeout_seconds, preserve_artifacts, winner_instance_id, agents, \
     duration_seconds, files_changed, lines_added, lines_removed";

/// Session repository — stateless, every method takes `&Connection`.
pub struct SessionRepo;

impl SessionRepo {
    /// Insert a new session row.
    pub fn insert(conn: &Connection, row: &SessionRow) -> Result<()> {
        let _ = conn.execute(
            "INSERT INTO sessions (id, workspace_id, kind, task, status, created_at, updated_at,
             completed_at, model, timeout_seconds, preserve_artifacts, winner_instance_id, agents,
             duration_seconds, files_changed, lines_added, lines_removed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                row.id,
                row.workspace_id,
                row.kind,
                row.task,
                row.status,
                row.created_at,
                row.updated_at,
                row.completed_at,
                row.model,
                row.timeout_seconds,
                row.preserve_artifacts,
                row.winner_instance_id,
                row.agents,
                row.duration_seconds,
                row.files_changed,
                row.lines_added,
                row.lines_removed,
            ],
        )?;
        Ok(())
    }

    /// Replace the mutable fields of an existing session row.
    ///
    /// Identity fields (`id`, `workspace_id`, `created_at`) are never touched.
    pub fn update_fields(conn: &Connection, row: &SessionRow) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE sessions SET kind = ?2, task = ?3, status = ?4, updated_at = ?5,
             completed_at = ?6, model = ?7, timeout_seconds = ?8, preserve_artifacts = ?9,
             agents = ?10, duration_seconds = ?11, files_changed = ?12, lines_added = ?13,
             lines_removed = ?14
             WHERE id = ?1",
            params![
                row.id,
                row.kind,
                row.task,
                row.status,
                row.updated_at,
                row.completed_at,
                row.model,
                row.timeout_seconds,
                row.preserve_artifacts,
                row.agents,
                row.duration_seconds,
                row.files_changed,
                row.lines_added,
                row.lines_removed,
            ],
        )?;
        Ok(changed > 0)
    }

    /// Get a session scoped to a workspace.
    pub fn get_by_id(
        conn: &Connection,
        workspace_id: &str,
        session_id: &str,
    ) -> Result<Option<SessionRow>> {
        let sql =
            format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE workspace_id = ?1 AND id = ?2");
        let row = conn
            .query_row(&sql, params![workspace_id, session_id], Self::map_row)
            .optional()?;
        Ok(row)
    }

    /// Get a session by ID alone (used where the caller has no workspace).
    pub fn get_unscoped(conn: &Connection, session_id: &str) -> Result<Option<SessionRow>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1");
        let row = conn.query_row(&sql, params![session_id], Self::map_row).optional()?;
        Ok(row)
    }

    /// Check if a session ID exists anywhere.
    pub fn exists(conn: &Connection, session_id: &str) -> Result<bool> {
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sessions WHERE id = ?1)",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// List session IDs for a workspace (insertion-order free, for audits).
    pub fn list_ids(conn: &Connection, workspace_id: &str) -> Result<Vec<String>> {
        let mut stmt =
            conn.prepare("SELECT id FROM sessions WHERE workspace_id = ?1 ORDER BY id")?;
        let ids = stmt
            .query_map(params![workspace_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// List sessions for a workspace with filtering, most recently updated
    /// first. Child counts are recomputed by subquery, not read from stored
    /// counters.
    ///
    /// `cancel` is checked between rows; a cancelled scan returns
    /// [`StoreError::Cancelled`] without finishing the walk.
    pub fn list(
        conn: &Connection,
        workspace_id: &str,
        filter: &SessionFilter,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<SessionListRow>> {
        use std::fmt::Write;

        let mut sql = format!(
            "SELECT {SESSION_COLUMNS},
             (SELECT COUNT(*) FROM instances i WHERE i.session_id = sessions.id) AS instance_count,
             (SELECT COUNT(*) FROM chat_messages m WHERE m.session_id = sessions.id) AS message_count
             FROM sessions WHERE workspace_id = ?1"
        );
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(workspace_id.to_string())];

        if let Some(kind) = filter.kind {
            let _ = write!(sql, " AND kind = ?{}", param_values.len() + 1);
            param_values.push(Box::new(kind.as_str().to_string()));
        }
        if let Some(status) = filter.status {
            let _ = write!(sql, " AND status = ?{}", param_values.len() + 1);
            param_values.push(Box::new(status.as_str().to_string()));
        }
        if let Some(after) = filter.created_after {
            let _ = write!(sql, " AND created_at >= ?{}", param_values.len() + 1);
            param_values.push(Box::new(after.to_rfc3339()));
        }
        if let Some(before) = filter.created_before {
            let _ = write!(sql, " AND created_at <= ?{}", param_values.len() + 1);
            param_values.push(Box::new(before.to_rfc3339()));
        }
        if let Some(term) = &filter.task_contains {
            let _ = write!(sql, " AND task LIKE ?{} ESCAPE '\\'", param_values.len() + 1);
            param_values.push(Box::new(format!("%{}%", escape_like(term))));
        }
        sql.push_str(" ORDER BY updated_at DESC, id");
        if let Some(limit) = filter.limit {
            let _ = write!(sql, " LIMIT {limit}");
        }
        if let Some(offset) = filter.offset {
            let _ = write!(sql, " OFFSET {offset}");
        }

        let mut stmt = conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(Box::as_ref).collect();
        let mut rows = stmt.query(params_refs.as_slice())?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(StoreError::Cancelled);
            }
            out.push(SessionListRow {
                session: Self::map_row(row)?,
                instance_count: row.get("instance_count")?,
                message_count: row.get("message_count")?,
            });
        }
        Ok(out)
    }

    /// Set or clear the winner reference.
    pub fn set_winner(
        conn: &Connection,
        session_id: &str,
        winner_instance_id: Option<i64>,
    ) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE sessions SET winner_instance_id = ?2 WHERE id = ?1",
            params![session_id, winner_instance_id],
        )?;
        Ok(changed > 0)
    }

    /// Bump `updated_at` on a session.
    pub fn touch(conn: &Connection, session_id: &str, now: &str) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE sessions SET updated_at = ?2 WHERE id = ?1",
            params![session_id, now],
        )?;
        Ok(changed > 0)
    }

    /// Delete a session scoped to a workspace. Children cascade.
    pub fn delete(conn: &Connection, workspace_id: &str, session_id: &str) -> Result<bool> {
        let changed = conn.execute(
            "DELETE FROM sessions WHERE workspace_id = ?1 AND id = ?2",
            params![workspace_id, session_id],
        )?;
        Ok(changed > 0)
    }

    /// Count session rows.
    pub fn count(conn: &Connection) -> Result<i64> {
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
        Ok(count)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
        Ok(SessionRow {
            id: row.get("id")?,
            workspace_id: row.get("workspace_id")?,
            kind: row.get("kind")?,
            task: row.get("task")?,
            status: row.get("status")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            completed_at: row.get("completed_at")?,
            model: row.get("model")?,
            timeout_seconds: row.get("timeout_seconds")?,
            preserve_artifacts: row.get("preserve_artifacts")?,
            winner_instance_id: row.get("winner_instance_id")?,
            agents: row.get("agents")?,
            duration_seconds: row.get("duration_seconds")?,
            files_changed: row.get("files_changed")?,
            lines_added: row.get("lines_added")?,
            lines_removed: row.get("lines_removed")?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
