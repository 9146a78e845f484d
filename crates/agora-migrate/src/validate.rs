//! Post-migration validation of the relational store.
//!
//! Recounts rows, probes for orphaned children (foreign-key targets
//! missing), audits enum columns against their allowed sets, and runs the
//! storage-level integrity check. Foreign keys and CHECK constraints make
//! these conditions unreachable through the repository layer — the audit
//! exists to catch corruption and hand-edited databases before cutover is
//! declared complete.

use rusqlite::Connection;
use serde::Serialize;
use tracing::info;

use agora_core::{InstanceStatus, MessageRole, SessionKind, SessionStatus};
use agora_store::{Result, SessionStore, StoreError, health};

/// Result of a full-store validation pass.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    /// Workspace row count.
    pub workspaces: i64,
    /// Session row count.
    pub sessions: i64,
    /// Instance row count.
    pub instances: i64,
    /// Chat message row count.
    pub messages: i64,
    /// Instances whose session row is missing.
    pub orphaned_instances: i64,
    /// Messages whose session row is missing.
    pub orphaned_messages: i64,
    /// Messages referencing a missing instance.
    pub dangling_message_refs: i64,
    /// Sessions whose winner reference points at a missing instance.
    pub dangling_winner_refs: i64,
    /// Rows with an enum value outside the allowed set.
    pub invalid_enum_rows: i64,
    /// Whether `PRAGMA integrity_check` passed.
    pub integrity_ok: bool,
}

impl ValidationReport {
    /// Valid only if every check passed.
    pub fn is_valid(&self) -> bool {
        self.orphaned_instances == 0
            && self.orphaned_messages == 0
            && self.dangling_message_refs == 0
            && self.dangling_winner_refs == 0
            && self.invalid_enum_rows == 0
            && self.integrity_ok
    }
}

fn quoted_set(values: &[&'static str]) -> String {
    values
        .iter()
        .map(|v| format!("'{v}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn count(conn: &Connection, sql: &str) -> Result<i64> {
    let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(n)
}

fn validate_blocking(conn: &Connection) -> Result<ValidationReport> {
    let session_kinds =
        quoted_set(&SessionKind::ALL.iter().map(|k| k.as_str()).collect::<Vec<_>>());
    let session_statuses =
        quoted_set(&SessionStatus::ALL.iter().map(|s| s.as_str()).collect::<Vec<_>>());
    let instance_statuses =
        quoted_set(&InstanceStatus::ALL.iter().map(|s| s.as_str()).collect::<Vec<_>>());
    let roles = quoted_set(&MessageRole::ALL.iter().map(|r| r.as_str()).collect::<Vec<_>>());

    let invalid_enum_rows = count(
        conn,
        &format!(
            "SELECT
               (SELECT COUNT(*) FROM sessions
                 WHERE kind NOT IN ({session_kinds}) OR status NOT IN ({session_statuses}))
             + (SELECT COUNT(*) FROM instances WHERE status NOT IN ({instance_statuses}))
             + (SELECT COUNT(*) FROM chat_messages WHERE role NOT IN ({roles}))"
        ),
    )?;

    Ok(ValidationReport {
        workspaces: count(conn, "SELECT COUNT(*) FROM workspaces")?,
        sessions: count(conn, "SELECT COUNT(*) FROM sessions")?,
        instances: count(conn, "SELECT COUNT(*) FROM instances")?,
        messages: count(conn, "SELECT COUNT(*) FROM chat_messages")?,
        orphaned_instances: count(
            conn,
            "SELECT COUNT(*) FROM instances i
             LEFT JOIN sessions s ON s.id = i.session_id WHERE s.id IS NULL",
        )?,
        orphaned_messages: count(
            conn,
            "SELECT COUNT(*) FROM chat_messages m
             LEFT JOIN sessions s ON s.id = m.session_id WHERE s.id IS NULL",
        )?,
        dangling_message_refs: count(
            conn,
            "SELECT COUNT(*) FROM chat_messages m
             LEFT JOIN instances i ON i.id = m.instance_id
             WHERE m.instance_id IS NOT NULL AND i.id IS NULL",
        )?,
        dangling_winner_refs: count(
            conn,
            "SELECT COUNT(*) FROM sessions s
             LEFT JOIN instances i ON i.id = s.winner_instance_id
             WHERE s.winner_instance_id IS NOT NULL AND i.id IS NULL",
        )?,
        invalid_enum_rows,
        integrity_ok: health::integrity_check(conn)?,
    })
}

/// Run the validation pass against a store.
pub async fn validate_store(store: &SessionStore) -> Result<ValidationReport> {
    let store = store.clone();
    let report = tokio::task::spawn_blocking(move || {
        let conn = store.pool().get().map_err(StoreError::from)?;
        validate_blocking(&conn)
    })
    .await
    .map_err(|e| StoreError::Internal(format!("validation task panicked: {e}")))??;

    info!(
        sessions = report.sessions,
        instances = report.instances,
        messages = report.messages,
        valid = report.is_valid(),
        "store validation complete"
    );
    Ok(report)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use agora_core::{Session, SessionKind, SessionStatus};
    use chrono::Utc;

    fn sample_session(id: &str) -> Session {
        Session {
            id: id.into(),
            workspace_path: "/tmp/ws".into(),
            kind: SessionKind::Debate,
            task: "t".into(),
            status: SessionStatus::Running,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
            model: None,
            timeout_seconds: None,
            preserve_artifacts: false,
            winner_ordinal: None,
            agents: Vec::new(),
            metrics: None,
            instances: Vec::new(),
            messages: Vec::new(),
        }
    }

    #[tokio::test]
    async fn clean_store_validates() {
        let store = SessionStore::in_memory().unwrap();
        store.create_session(sample_session("s1")).await.unwrap();

        let report = validate_store(&store).await.unwrap();
        assert!(report.is_valid());
        assert_eq!(report.sessions, 1);
        assert_eq!(report.workspaces, 1);
    }

    #[tokio::test]
    async fn orphaned_rows_are_reported() {
        let store = SessionStore::in_memory().unwrap();
        store.create_session(sample_session("s1")).await.unwrap();

        // Simulate a hand-edited database: with enforcement off, rows that
        // violate referential integrity can be planted directly.
        {
            let conn = store.pool().get().unwrap();
            conn.execute_batch("PRAGMA foreign_keys = OFF;").unwrap();
            conn.execute(
                "INSERT INTO instances (session_id, ordinal, worktree_path, branch, status)
                 VALUES ('ghost', 1, '/tmp/wt', 'b', 'idle')",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO chat_messages (session_id, instance_id, role, content, timestamp)
                 VALUES ('ghost', 9999, 'user', 'hi', '2025-06-01T00:00:00+00:00')",
                [],
            )
            .unwrap();
            conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        }

        let report = validate_store(&store).await.unwrap();
        assert_eq!(report.orphaned_instances, 1);
        assert_eq!(report.orphaned_messages, 1);
        assert_eq!(report.dangling_message_refs, 1);
        assert!(!report.is_valid());
    }
}
