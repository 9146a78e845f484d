//! Schema migration runner for the session store database.
//!
//! Migrations are embedded at compile time via [`include_str!`] and executed
//! in version order. Each migration runs inside a transaction — a failure
//! rolls back cleanly with no partial schema state, and the store refuses to
//! serve requests until a later open succeeds.
//!
//! The `schema_version` table tracks which migrations have been applied.
//! Running the migrator is idempotent: already-applied versions are skipped.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::{Result, StoreError};

/// A single migration with a version number and SQL to execute.
struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in version order.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Core schema — workspaces, sessions, instances, chat messages",
        sql: include_str!("v001_schema.sql"),
    },
    Migration {
        version: 2,
        description: "Aggregate change metrics on sessions and instances",
        sql: include_str!("v002_change_metrics.sql"),
    },
];

/// Run all pending migrations on the given connection.
///
/// Creates the `schema_version` table if it doesn't exist, then applies
/// each migration whose version exceeds the current maximum. Each migration
/// runs in its own transaction.
///
/// # Errors
///
/// Returns [`StoreError::Migration`] if any migration SQL fails.
pub fn run_migrations(conn: &Connection) -> Result<u32> {
    ensure_version_table(conn)?;
    let current = current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version <= current {
            debug!(
                version = migration.version,
                description = migration.description,
                "migration already applied, skipping"
            );
            continue;
        }

        info!(
            version = migration.version,
            description = migration.description,
            "applying migration"
        );

        apply_migration(conn, migration)?;
        applied += 1;
    }

    if applied > 0 {
        info!(applied, "migrations complete");
    }

    Ok(applied)
}

/// Return the highest applied migration version, or 0 if none.
pub fn current_version(conn: &Connection) -> Result<u32> {
    let version: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .map_err(|e| StoreError::Migration {
            message: format!("failed to read schema_version: {e}"),
        })?;
    Ok(version)
}

/// Return the latest migration version defined in code.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal
// ─────────────────────────────────────────────────────────────────────────────

fn ensure_version_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
           version     INTEGER PRIMARY KEY,
           applied_at  TEXT    NOT NULL,
           description TEXT
         );",
    )
    .map_err(|e| StoreError::Migration {
        message: format!("failed to create schema_version table: {e}"),
    })?;
    Ok(())
}

fn apply_migration(conn: &Connection, migration: &Migration) -> Result<()> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| StoreError::Migration {
            message: format!("failed to begin transaction for v{}: {e}", migration.version),
        })?;

    tx.execute_batch(migration.sql)
        .map_err(|e| StoreError::Migration {
            message: format!(
                "migration v{} ({}) failed: {e}",
                migration.version, migration.description
            ),
        })?;

    let _ = tx
        .execute(
            "INSERT INTO schema_version (version, applied_at, description) VALUES (?1, datetime('now'), ?2)",
            rusqlite::params![migration.version, migration.description],
        )
        .map_err(|e| StoreError::Migration {
            message: format!("failed to record v{} in schema_version: {e}", migration.version),
        })?;

    tx.commit().map_err(|e| StoreError::Migration {
        message: format!("failed to commit v{}: {e}", migration.version),
    })?;

    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn open_memory() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;",
        )
        .unwrap();
        conn
    }

    #[test]
    fn run_migrations_creates_all_tables() {
        let conn = open_memory();
        let applied = run_migrations(&conn).unwrap();
        assert_eq!(applied, 2);

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        for table in ["workspaces", "sessions", "instances", "chat_messages", "schema_version"] {
            assert!(tables.contains(&table.to_string()), "missing table: {table}");
        }
    }

    #[test]
    fn run_migrations_is_idempotent() {
        let conn = open_memory();
        let first = run_migrations(&conn).unwrap();
        assert_eq!(first, 2);

        let second = run_migrations(&conn).unwrap();
        assert_eq!(second, 0);
    }

    #[test]
    fn current_version_after_migration() {
        let conn = open_memory();
        run_migrations(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), 2);
        assert_eq!(latest_version(), 2);
    }

    #[test]
    fn schema_version_records_applied_migration() {
        let conn = open_memory();
        run_migrations(&conn).unwrap();

        let (version, desc): (u32, String) = conn
            .query_row(
                "SELECT version, description FROM schema_version WHERE version = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();

        assert_eq!(version, 1);
        assert!(desc.contains("Core schema"));
    }

    #[test]
    fn indexes_are_created() {
        let conn = open_memory();
        run_migrations(&conn).unwrap();

        let indexes: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'index' AND name LIKE 'idx_%'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        for idx in [
            "idx_sessions_workspace",
            "idx_sessions_updated",
            "idx_instances_session",
            "idx_messages_session",
        ] {
            assert!(indexes.contains(&idx.to_string()), "missing index: {idx}");
        }
    }

    #[test]
    fn enum_check_constraints_enforced() {
        let conn = open_memory();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO workspaces (id, path, created_at, last_accessed_at)
             VALUES ('ws_1', '/tmp/test', '2025-01-01T00:00:00Z', '2025-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        let result = conn.execute(
            "INSERT INTO sessions (id, workspace_id, kind, task, status, created_at, updated_at)
             VALUES ('s1', 'ws_1', 'tournament', 'x', 'running',
                     '2025-01-01T00:00:00Z', '2025-01-01T00:00:00Z')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn foreign_keys_enforced() {
        let conn = open_memory();
        run_migrations(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO sessions (id, workspace_id, kind, task, status, created_at, updated_at)
             VALUES ('s1', 'ws_missing', 'debate', 'x', 'running',
                     '2025-01-01T00:00:00Z', '2025-01-01T00:00:00Z')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn duplicate_ordinal_rejected_by_unique_index() {
        let conn = open_memory();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO workspaces (id, path, created_at, last_accessed_at)
             VALUES ('ws_1', '/tmp/test', '2025-01-01T00:00:00Z', '2025-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO sessions (id, workspace_id, kind, task, status, created_at, updated_at)
             VALUES ('s1', 'ws_1', 'competition', 'x', 'running',
                     '2025-01-01T00:00:00Z', '2025-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO instances (session_id, ordinal, worktree_path, branch, status)
             VALUES ('s1', 1, '/tmp/wt1', 'b1', 'idle')",
            [],
        )
        .unwrap();

        let duplicate = conn.execute(
            "INSERT INTO instances (session_id, ordinal, worktree_path, branch, status)
             VALUES ('s1', 1, '/tmp/wt2', 'b2', 'idle')",
            [],
        );
        assert!(duplicate.is_err());
    }

    #[test]
    fn session_delete_cascades_and_clears_message_refs() {
        let conn = open_memory();
        run_migrations(&conn).unwrap();

        conn.execute_batch(
            "INSERT INTO workspaces (id, path, created_at, last_accessed_at)
             VALUES ('ws_1', '/tmp/test', '2025-01-01T00:00:00Z', '2025-01-01T00:00:00Z');
             INSERT INTO sessions (id, workspace_id, kind, task, status, created_at, updated_at)
             VALUES ('s1', 'ws_1', 'competition', 'x', 'running',
                     '2025-01-01T00:00:00Z', '2025-01-01T00:00:00Z');
             INSERT INTO instances (session_id, ordinal, worktree_path, branch, status)
             VALUES ('s1', 1, '/tmp/wt1', 'b1', 'running');
             INSERT INTO chat_messages (session_id, instance_id, role, content, timestamp)
             VALUES ('s1', 1, 'user', 'hello', '2025-01-01T00:00:01Z');",
        )
        .unwrap();

        // Deleting just the instance clears the message reference.
        conn.execute("DELETE FROM instances WHERE session_id = 's1'", []).unwrap();
        let instance_ref: Option<i64> = conn
            .query_row("SELECT instance_id FROM chat_messages WHERE session_id = 's1'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert!(instance_ref.is_none());

        // Deleting the session removes the messages too.
        conn.execute("DELETE FROM sessions WHERE id = 's1'", []).unwrap();
        let messages: i64 = conn
            .query_row("SELECT COUNT(*) FROM chat_messages", [], |row| row.get(0))
            .unwrap();
        assert_eq!(messages, 0);
    }

    #[test]
    fn winner_reference_cleared_on_instance_delete() {
        let conn = open_memory();
        run_migrations(&conn).unwrap();

        conn.execute_batch(
            "INSERT INTO workspaces (id, path, created_at, last_accessed_at)
             VALUES ('ws_1', '/tmp/test', '2025-01-01T00:00:00Z', '2025-01-01T00:00:00Z');
             INSERT INTO sessions (id, workspace_id, kind, task, status, created_at, updated_at)
             VALUES ('s1', 'ws_1', 'competition', 'x', 'completed',
                     '2025-01-01T00:00:00Z', '2025-01-01T00:00:00Z');
             INSERT INTO instances (session_id, ordinal, worktree_path, branch, status)
             VALUES ('s1', 1, '/tmp/wt1', 'b1', 'completed');
             UPDATE sessions SET winner_instance_id =
               (SELECT id FROM instances WHERE session_id = 's1' AND ordinal = 1)
             WHERE id = 's1';",
        )
        .unwrap();

        conn.execute("DELETE FROM instances WHERE session_id = 's1'", []).unwrap();

        let winner: Option<i64> = conn
            .query_row("SELECT winner_instance_id FROM sessions WHERE id = 's1'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert!(winner.is_none());
    }

    #[test]
    fn oversized_message_content_rejected() {
        let conn = open_memory();
        run_migrations(&conn).unwrap();

        conn.execute_batch(
            "INSERT INTO workspaces (id, path, created_at, last_accessed_at)
             VALUES ('ws_1', '/tmp/test', '2025-01-01T00:00:00Z', '2025-01-01T00:00:00Z');
             INSERT INTO sessions (id, workspace_id, kind, task, status, created_at, updated_at)
             VALUES ('s1', 'ws_1', 'debate', 'x', 'running',
                     '2025-01-01T00:00:00Z', '2025-01-01T00:00:00Z');",
        )
        .unwrap();

        let oversized = "x".repeat(100_001);
        let result = conn.execute(
            "INSERT INTO chat_messages (session_id, role, content, timestamp)
             VALUES ('s1', 'user', ?1, '2025-01-01T00:00:01Z')",
            rusqlite::params![oversized],
        );
        assert!(result.is_err());
    }

    #[test]
    fn v002_metric_columns_are_nullable() {
        let conn = open_memory();
        run_migrations(&conn).unwrap();

        conn.execute_batch(
            "INSERT INTO workspaces (id, path, created_at, last_accessed_at)
             VALUES ('ws_1', '/tmp/test', '2025-01-01T00:00:00Z', '2025-01-01T00:00:00Z');
             INSERT INTO sessions (id, workspace_id, kind, task, status, created_at, updated_at)
             VALUES ('s1', 'ws_1', 'ensemble', 'x', 'running',
                     '2025-01-01T00:00:00Z', '2025-01-01T00:00:00Z');",
        )
        .unwrap();

        let (duration, files): (Option<i64>, Option<i64>) = conn
            .query_row(
                "SELECT duration_seconds, files_changed FROM sessions WHERE id = 's1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert!(duration.is_none());
        assert!(files.is_none());
    }
}
