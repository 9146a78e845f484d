//! Storage health reporting.

use std::path::Path;

use rusqlite::Connection;
use serde::Serialize;

use crate::errors::Result;
use crate::sqlite::migrations;
use crate::sqlite::repositories::instance::InstanceRepo;
use crate::sqlite::repositories::message::MessageRepo;
use crate::sqlite::repositories::session::SessionRepo;
use crate::sqlite::repositories::workspace::WorkspaceRepo;

/// Snapshot of storage health: row counts, on-disk size, integrity.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageHealth {
    /// Workspace row count.
    pub workspaces: i64,
    /// Session row count.
    pub sessions: i64,
    /// Instance row count.
    pub instances: i64,
    /// Chat message row count.
    pub messages: i64,
    /// Database file size in bytes (0 for in-memory stores).
    pub size_bytes: u64,
    /// Whether `PRAGMA integrity_check` reported `ok`.
    pub integrity_ok: bool,
    /// Highest applied schema migration.
    pub schema_version: u32,
}

/// Run `PRAGMA integrity_check` and report whether it passed.
pub fn integrity_check(conn: &Connection) -> Result<bool> {
    let verdict: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
    Ok(verdict == "ok")
}

/// Collect a [`StorageHealth`] snapshot.
pub fn collect(conn: &Connection, db_path: &Path) -> Result<StorageHealth> {
    let size_bytes = std::fs::metadata(db_path).map(|m| m.len()).unwrap_or(0);
    Ok(StorageHealth {
        workspaces: WorkspaceRepo::count(conn)?,
        sessions: SessionRepo::count(conn)?,
        instances: InstanceRepo::count(conn)?,
        messages: MessageRepo::count(conn)?,
        size_bytes,
        integrity_ok: integrity_check(conn)?,
        schema_version: migrations::current_version(conn)?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::migrations::run_migrations;

    #[test]
    fn empty_store_is_healthy() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        let _ = run_migrations(&conn).unwrap();

        let health = collect(&conn, Path::new(":memory:")).unwrap();
        assert_eq!(health.sessions, 0);
        assert_eq!(health.instances, 0);
        assert_eq!(health.messages, 0);
        assert!(health.integrity_ok);
        assert_eq!(health.schema_version, crate::sqlite::migrations::latest_version());
    }
}
