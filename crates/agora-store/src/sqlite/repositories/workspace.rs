//! Workspace repository — identity rows mapping path hashes back to paths.

use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::Result;
use crate::sqlite::row_types::WorkspaceRow;

/// Workspace repository — stateless, every method takes `&Connection`.
pub struct WorkspaceRepo;

impl WorkspaceRepo {
    /// Get or create the workspace row for a path, bumping `last_accessed_at`.
    pub fn get_or_create(conn: &Connection, path: &str) -> Result<WorkspaceRow> {
        Self::upsert_with_id(conn, &agora_core::workspace_id(path), path)
    }

    /// Upsert a workspace row under an explicit ID.
    ///
    /// `get_or_create` derives the ID from the path; maintenance tooling can
    /// pin an ID directly when re-registering a workspace under a hash
    /// recorded elsewhere.
    pub fn upsert_with_id(conn: &Connection, id: &str, path: &str) -> Result<WorkspaceRow> {
        let now = chrono::Utc::now().to_rfc3339();
        let _ = conn.execute(
            "INSERT INTO workspaces (id, path, created_at, last_accessed_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(id) DO UPDATE SET path = ?2, last_accessed_at = ?3",
            params![id, path, now],
        )?;
        Self::get_by_id(conn, id)?.ok_or_else(|| crate::StoreError::not_found("workspace", id))
    }

    /// Bump `last_accessed_at` on an existing workspace row.
    pub fn touch(conn: &Connection, id: &str, now: &str) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE workspaces SET last_accessed_at = ?2 WHERE id = ?1",
            params![id, now],
        )?;
        Ok(changed > 0)
    }

    /// Get a workspace by ID.
    pub fn get_by_id(conn: &Connection, id: &str) -> Result<Option<WorkspaceRow>> {
        let row = conn
            .query_row(
                "SELECT id, path, created_at, last_accessed_at FROM workspaces WHERE id = ?1",
                params![id],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// List all workspaces, most recently accessed first.
    pub fn list(conn: &Connection) -> Result<Vec<WorkspaceRow>> {
        let mut stmt = conn.prepare(
            "SELECT id, path, created_at, last_accessed_at FROM workspaces
             ORDER BY last_accessed_at DESC",
        )?;
        let rows = stmt
            .query_map([], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Count workspace rows.
    pub fn count(conn: &Connection) -> Result<i64> {
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM workspaces", [], |row| row.get(0))?;
        Ok(count)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<WorkspaceRow> {
        Ok(WorkspaceRow {
            id: row.get("id")?,
            path: row.get("path")?,
            created_at: row.get("created_at")?,
            last_accessed_at: row.get("last_accessed_at")?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
