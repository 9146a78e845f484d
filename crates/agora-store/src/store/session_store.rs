//! High-level transactional [`SessionStore`] API.
//!
//! Composes all repository operations into atomic, session-centric methods.
//! Every write method runs inside a single `SQLite` transaction — callers
//! never observe partial state.
//!
//! The public surface is async: rusqlite work runs on `spawn_blocking`, and
//! no connection is ever held across an await point. Pure validation happens
//! before the blocking hop, so malformed input is rejected without touching
//! storage.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use agora_core::{
    ChangeMetrics, ChatMessage, Instance, InstanceStatus, Session, SessionKind, SessionMetrics,
    SessionStatus,
};

use crate::errors::{Result, StoreError};
use crate::health::{self, StorageHealth};
use crate::retry::{RetryPolicy, with_busy_retry};
use crate::sqlite::connection::{ConnectionConfig, ConnectionPool, PooledConnection, new_file, new_in_memory};
use crate::sqlite::migrations::run_migrations;
use crate::sqlite::repositories::instance::{InstanceRepo, InstanceWrite};
use crate::sqlite::repositories::message::MessageRepo;
use crate::sqlite::repositories::session::{SessionFilter, SessionRepo};
use crate::sqlite::repositories::workspace::WorkspaceRepo;
use crate::sqlite::row_types::{InstanceRow, MessageRow, SessionRow};

/// Upper bound on chat message content, in characters. Mirrored by a CHECK
/// constraint in the schema.
pub const MAX_MESSAGE_CONTENT_CHARS: usize = 100_000;

/// Store configuration.
#[derive(Clone, Debug, Default)]
pub struct StoreConfig {
    /// Connection pool settings.
    pub connection: ConnectionConfig,
    /// Busy-retry policy for write contention.
    pub retry: RetryPolicy,
}

/// Outcome of an upsert.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The session did not exist and was inserted.
    Inserted,
    /// The session existed and was fully replaced.
    Replaced,
}

/// Lightweight session row for list views. Child counts are recomputed on
/// read, never read from stored counters.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// Session ID.
    pub id: String,
    /// Workspace ID.
    pub workspace_id: String,
    /// Execution mode.
    pub kind: SessionKind,
    /// Task description.
    pub task: String,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Completion timestamp, if completed/failed.
    pub completed_at: Option<DateTime<Utc>>,
    /// Model label.
    pub model: Option<String>,
    /// Number of instances.
    pub instance_count: i64,
    /// Number of chat messages.
    pub message_count: i64,
}

/// The session persistence engine.
///
/// Cheap to clone — clones share the pool and the integrity halt latch.
#[derive(Clone)]
pub struct SessionStore {
    pool: ConnectionPool,
    db_path: PathBuf,
    retry: RetryPolicy,
    halted: Arc<AtomicBool>,
}

impl SessionStore {
    /// Open (or create) the store at `path` and bring the schema up to date.
    ///
    /// A failed migration is fatal: no store handle is returned and nothing
    /// can operate on a partial schema.
    pub fn open(path: &Path, config: &StoreConfig) -> Result<Self> {
        let pool = new_file(path, &config.connection)?;
        let conn = pool.get()?;
        let applied = run_migrations(&conn)?;
        drop(conn);
        info!(path = %path.display(), applied, "session store opened");
        Ok(Self {
            pool,
            db_path: path.to_owned(),
            retry: config.retry.clone(),
            halted: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Open an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let config = StoreConfig::default();
        let pool = new_in_memory(&config.connection)?;
        let conn = pool.get()?;
        let _ = run_migrations(&conn)?;
        drop(conn);
        Ok(Self {
            pool,
            db_path: PathBuf::from(":memory:"),
            retry: config.retry,
            halted: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Path of the database file (`:memory:` for in-memory stores).
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// The underlying pool, for maintenance tooling. Connections taken from
    /// here must never be held across an await point.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Whether writes are currently refused after an integrity failure.
    pub fn writes_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Clear the integrity halt latch. This is the operator explicitly
    /// accepting possible data loss instead of restoring a backup.
    pub fn acknowledge_integrity_failure(&self) {
        warn!("integrity failure acknowledged by operator, resuming writes");
        self.halted.store(false, Ordering::SeqCst);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Session lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Create a session with all of its instances and messages, atomically.
    pub async fn create_session(&self, session: Session) -> Result<Session> {
        self.ensure_writable()?;
        validate_session(&session)?;
        self.run(move |store| store.create_session_blocking(&session)).await
    }

    /// Replace a session's mutable fields and its full instance set.
    ///
    /// Instances absent from the new set are removed; message references to
    /// them go NULL and a removed winner is cleared (foreign-key actions).
    /// Messages themselves are not touched. Bumps `updated_at`.
    pub async fn update_session(&self, session: Session) -> Result<Session> {
        self.ensure_writable()?;
        validate_session(&session)?;
        self.run(move |store| store.update_session_blocking(&session)).await
    }

    /// Insert the session if absent, fully replace it if present. The
    /// importer's entry point — safe to re-run after partial failure.
    pub async fn upsert_session(&self, session: Session) -> Result<UpsertOutcome> {
        self.ensure_writable()?;
        validate_session(&session)?;
        self.run(move |store| store.upsert_session_blocking(&session)).await
    }

    /// Load a session with instances (ordinal order) and messages
    /// (timestamp order, ties by insertion).
    pub async fn get_session(&self, workspace_id: &str, session_id: &str) -> Result<Session> {
        let workspace_id = workspace_id.to_string();
        let session_id = session_id.to_string();
        self.run(move |store| store.get_session_blocking(&workspace_id, &session_id)).await
    }

    /// Load a session by ID alone, without knowing its workspace.
    ///
    /// Mirroring layers use this to locate a session's workspace after
    /// id-keyed writes like [`Self::append_chat_message`].
    pub async fn find_session(&self, session_id: &str) -> Result<Session> {
        let session_id = session_id.to_string();
        self.run(move |store| {
            let workspace_id = {
                let conn = store.conn()?;
                SessionRepo::get_unscoped(&conn, &session_id)?
                    .map(|row| row.workspace_id)
                    .ok_or_else(|| StoreError::not_found("session", &*session_id))?
            };
            store.get_session_blocking(&workspace_id, &session_id)
        })
        .await
    }

    /// List sessions for a workspace, most recently updated first.
    ///
    /// `cancel` is checked between rows.
    pub async fn list_sessions(
        &self,
        workspace_id: &str,
        filter: SessionFilter,
        cancel: Option<CancellationToken>,
    ) -> Result<Vec<SessionSummary>> {
        let workspace_id = workspace_id.to_string();
        self.run(move |store| store.list_sessions_blocking(&workspace_id, &filter, cancel.as_ref()))
            .await
    }

    /// Load every session of a workspace eagerly (instances + messages).
    /// Used by the migration consistency checker.
    pub async fn load_full_sessions(
        &self,
        workspace_id: &str,
        cancel: Option<CancellationToken>,
    ) -> Result<Vec<Session>> {
        let workspace_id = workspace_id.to_string();
        self.run(move |store| store.load_full_sessions_blocking(&workspace_id, cancel.as_ref()))
            .await
    }

    /// Cascading delete. Returns `Ok(false)` when the session was already
    /// absent, so retries stay safe.
    pub async fn delete_session(&self, workspace_id: &str, session_id: &str) -> Result<bool> {
        self.ensure_writable()?;
        let workspace_id = workspace_id.to_string();
        let session_id = session_id.to_string();
        self.run(move |store| store.delete_session_blocking(&workspace_id, &session_id)).await
    }

    /// Append one chat message, resolving an optional instance ordinal to
    /// its surrogate key in the same transaction, and bump `updated_at`.
    pub async fn append_chat_message(
        &self,
        session_id: &str,
        message: ChatMessage,
    ) -> Result<ChatMessage> {
        self.ensure_writable()?;
        validate_message_content(&message.content)?;
        let session_id = session_id.to_string();
        self.run(move |store| store.append_chat_message_blocking(&session_id, &message)).await
    }

    /// Update one instance's status and bump the parent's `updated_at`.
    pub async fn update_instance_status(
        &self,
        session_id: &str,
        ordinal: u32,
        status: InstanceStatus,
    ) -> Result<()> {
        self.ensure_writable()?;
        let session_id = session_id.to_string();
        self.run(move |store| store.update_instance_status_blocking(&session_id, ordinal, status))
            .await
    }

    /// Collect a storage health snapshot.
    pub async fn health(&self) -> Result<StorageHealth> {
        self.run(move |store| {
            let conn = store.conn()?;
            health::collect(&conn, &store.db_path)
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internal plumbing
    // ─────────────────────────────────────────────────────────────────────

    fn ensure_writable(&self) -> Result<()> {
        if self.writes_halted() {
            return Err(StoreError::Integrity(
                "writes halted after integrity failure; restore a backup or acknowledge data loss"
                    .into(),
            ));
        }
        Ok(())
    }

    /// Run blocking storage work off the async runtime. An `Integrity` error
    /// latches the halt flag so subsequent writes are refused.
    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&SessionStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        let result = tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| StoreError::Internal(format!("storage task panicked: {e}")))?;
        if let Err(StoreError::Integrity(msg)) = &result {
            warn!(error = %msg, "integrity failure detected, halting writes");
            self.halted.store(true, Ordering::SeqCst);
        }
        result
    }

    fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    fn create_session_blocking(&self, session: &Session) -> Result<Session> {
        let workspace_id = agora_core::workspace_id(&session.workspace_path);
        with_busy_retry(&self.retry, || {
            let conn = self.conn()?;
            let tx = conn.unchecked_transaction()?;
            if SessionRepo::exists(&tx, &session.id)? {
                return Err(StoreError::Validation(format!(
                    "session id already exists: {}",
                    session.id
                )));
            }
            let ws = WorkspaceRepo::get_or_create(&tx, &session.workspace_path)?;
            insert_session_tree(&tx, &ws.id, session)?;
            tx.commit()?;
            Ok(())
        })?;
        self.get_session_blocking(&workspace_id, &session.id)
    }

    fn update_session_blocking(&self, session: &Session) -> Result<Session> {
        let workspace_id = agora_core::workspace_id(&session.workspace_path);
        with_busy_retry(&self.retry, || {
            let conn = self.conn()?;
            let tx = conn.unchecked_transaction()?;
            let existing = SessionRepo::get_by_id(&tx, &workspace_id, &session.id)?
                .ok_or_else(|| StoreError::not_found("session", &*session.id))?;

            let mut row = session_to_row(&workspace_id, session);
            row.created_at = existing.created_at.clone();
            row.updated_at = Utc::now().to_rfc3339();
            let _ = SessionRepo::update_fields(&tx, &row)?;

            let keep: Vec<i64> =
                session.instances.iter().map(|i| i64::from(i.ordinal)).collect();
            let _ = InstanceRepo::delete_except(&tx, &session.id, &keep)?;

            let mut ids_by_ordinal = HashMap::new();
            for instance in &session.instances {
                let id = InstanceRepo::upsert(&tx, &session.id, &instance_write(instance))?;
                let _ = ids_by_ordinal.insert(instance.ordinal, id);
            }
            let winner_id = resolve_winner(&ids_by_ordinal, session.winner_ordinal)?;
            let _ = SessionRepo::set_winner(&tx, &session.id, winner_id)?;

            // Session write bumps the workspace's last access.
            let _ = WorkspaceRepo::get_or_create(&tx, &session.workspace_path)?;
            tx.commit()?;
            Ok(())
        })?;
        self.get_session_blocking(&workspace_id, &session.id)
    }

    fn upsert_session_blocking(&self, session: &Session) -> Result<UpsertOutcome> {
        with_busy_retry(&self.retry, || {
            let conn = self.conn()?;
            let tx = conn.unchecked_transaction()?;
            let ws = WorkspaceRepo::get_or_create(&tx, &session.workspace_path)?;

            let outcome = match SessionRepo::get_unscoped(&tx, &session.id)? {
                Some(existing) if existing.workspace_id != ws.id => {
                    return Err(StoreError::Validation(format!(
                        "session {} already exists in another workspace",
                        session.id
                    )));
                }
                Some(_) => {
                    let _ = SessionRepo::delete(&tx, &ws.id, &session.id)?;
                    insert_session_tree(&tx, &ws.id, session)?;
                    UpsertOutcome::Replaced
                }
                None => {
                    insert_session_tree(&tx, &ws.id, session)?;
                    UpsertOutcome::Inserted
                }
            };
            tx.commit()?;
            Ok(outcome)
        })
    }

    fn get_session_blocking(&self, workspace_id: &str, session_id: &str) -> Result<Session> {
        let conn = self.conn()?;
        // Snapshot: all three reads under one transaction.
        let tx = conn.unchecked_transaction()?;
        let row = SessionRepo::get_by_id(&tx, workspace_id, session_id)?
            .ok_or_else(|| StoreError::not_found("session", session_id))?;
        let ws = WorkspaceRepo::get_by_id(&tx, workspace_id)?.ok_or_else(|| {
            StoreError::Integrity(format!("session {session_id} references missing workspace"))
        })?;
        let instances = InstanceRepo::list_by_session(&tx, session_id)?;
        let messages = MessageRepo::list_by_session(&tx, session_id)?;
        drop(tx);
        row_to_session(&row, &ws.path, &instances, &messages)
    }

    fn list_sessions_blocking(
        &self,
        workspace_id: &str,
        filter: &SessionFilter,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<SessionSummary>> {
        let conn = self.conn()?;
        let rows = SessionRepo::list(&conn, workspace_id, filter, cancel)?;
        rows.into_iter()
            .map(|row| {
                Ok(SessionSummary {
                    id: row.session.id.clone(),
                    workspace_id: row.session.workspace_id.clone(),
                    kind: parse_enum(&row.session.kind)?,
                    task: row.session.task.clone(),
                    status: parse_enum(&row.session.status)?,
                    created_at: parse_ts(&row.session.created_at, "created_at")?,
                    updated_at: parse_ts(&row.session.updated_at, "updated_at")?,
                    completed_at: row
                        .session
                        .completed_at
                        .as_deref()
                        .map(|ts| parse_ts(ts, "completed_at"))
                        .transpose()?,
                    model: row.session.model.clone(),
                    instance_count: row.instance_count,
                    message_count: row.message_count,
                })
            })
            .collect()
    }

    fn load_full_sessions_blocking(
        &self,
        workspace_id: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<Session>> {
        let conn = self.conn()?;
        let ids = SessionRepo::list_ids(&conn, workspace_id)?;
        drop(conn);
        let mut sessions = Vec::with_capacity(ids.len());
        for id in ids {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(StoreError::Cancelled);
            }
            sessions.push(self.get_session_blocking(workspace_id, &id)?);
        }
        Ok(sessions)
    }

    fn delete_session_blocking(&self, workspace_id: &str, session_id: &str) -> Result<bool> {
        with_busy_retry(&self.retry, || {
            let conn = self.conn()?;
            let deleted = SessionRepo::delete(&conn, workspace_id, session_id)?;
            if !deleted {
                info!(session_id, "delete: session already absent");
            }
            Ok(deleted)
        })
    }

    fn append_chat_message_blocking(
        &self,
        session_id: &str,
        message: &ChatMessage,
    ) -> Result<ChatMessage> {
        with_busy_retry(&self.retry, || {
            let conn = self.conn()?;
            let tx = conn.unchecked_transaction()?;
            let session = SessionRepo::get_unscoped(&tx, session_id)?
                .ok_or_else(|| StoreError::not_found("session", session_id))?;
            let instance_id = match message.instance_ordinal {
                Some(ordinal) => Some(
                    InstanceRepo::id_for_ordinal(&tx, session_id, i64::from(ordinal))?
                        .ok_or_else(|| {
                            StoreError::not_found("instance", format!("{session_id}#{ordinal}"))
                        })?,
                ),
                None => None,
            };
            let _ = MessageRepo::insert(
                &tx,
                session_id,
                instance_id,
                message.role.as_str(),
                &message.content,
                &message.timestamp.to_rfc3339(),
            )?;
            let now = Utc::now().to_rfc3339();
            let _ = SessionRepo::touch(&tx, session_id, &now)?;
            let _ = WorkspaceRepo::touch(&tx, &session.workspace_id, &now)?;
            tx.commit()?;
            Ok(message.clone())
        })
    }

    fn update_instance_status_blocking(
        &self,
        session_id: &str,
        ordinal: u32,
        status: InstanceStatus,
    ) -> Result<()> {
        with_busy_retry(&self.retry, || {
            let conn = self.conn()?;
            let tx = conn.unchecked_transaction()?;
            let changed =
                InstanceRepo::update_status(&tx, session_id, i64::from(ordinal), status.as_str())?;
            if !changed {
                return Err(StoreError::not_found(
                    "instance",
                    format!("{session_id}#{ordinal}"),
                ));
            }
            let now = Utc::now().to_rfc3339();
            let _ = SessionRepo::touch(&tx, session_id, &now)?;
            if let Some(session) = SessionRepo::get_unscoped(&tx, session_id)? {
                let _ = WorkspaceRepo::touch(&tx, &session.workspace_id, &now)?;
            }
            tx.commit()?;
            Ok(())
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Validation
// ─────────────────────────────────────────────────────────────────────────────

/// Validate a session tree without touching storage.
pub fn validate_session(session: &Session) -> Result<()> {
    if session.id.trim().is_empty() {
        return Err(StoreError::Validation("session id must not be empty".into()));
    }
    if session.workspace_path.trim().is_empty() {
        return Err(StoreError::Validation("workspace path must not be empty".into()));
    }

    let mut seen = HashSet::new();
    for instance in &session.instances {
        if !seen.insert(instance.ordinal) {
            return Err(StoreError::Validation(format!(
                "duplicate instance ordinal {} in session {}",
                instance.ordinal, session.id
            )));
        }
    }

    if let Some(winner) = session.winner_ordinal {
        if session.kind != SessionKind::Competition {
            return Err(StoreError::Validation(format!(
                "winner is only valid for competition sessions, not {}",
                session.kind
            )));
        }
        if !seen.contains(&winner) {
            return Err(StoreError::Validation(format!(
                "winner ordinal {winner} does not match any instance"
            )));
        }
    }

    let terminal =
        matches!(session.status, SessionStatus::Completed | SessionStatus::Failed);
    if terminal != session.completed_at.is_some() {
        return Err(StoreError::Validation(format!(
            "completed_at must be set exactly when status is completed or failed (status: {})",
            session.status
        )));
    }

    for message in &session.messages {
        validate_message_content(&message.content)?;
        if let Some(ordinal) = message.instance_ordinal {
            if !seen.contains(&ordinal) {
                return Err(StoreError::Validation(format!(
                    "message references unknown instance ordinal {ordinal}"
                )));
            }
        }
    }

    Ok(())
}

/// Validate chat message content bounds.
pub fn validate_message_content(content: &str) -> Result<()> {
    let len = content.chars().count();
    if len > MAX_MESSAGE_CONTENT_CHARS {
        return Err(StoreError::Validation(format!(
            "message content too large: {len} chars (max {MAX_MESSAGE_CONTENT_CHARS})"
        )));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Row ↔ domain conversion
// ─────────────────────────────────────────────────────────────────────────────

fn parse_ts(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Integrity(format!("bad {field} timestamp '{value}': {e}")))
}

fn parse_enum<T: std::str::FromStr<Err = agora_core::ParseEnumError>>(value: &str) -> Result<T> {
    value.parse::<T>().map_err(|e| StoreError::Integrity(e.to_string()))
}

fn session_to_row(workspace_id: &str, session: &Session) -> SessionRow {
    let metrics = session.metrics.clone().unwrap_or_default();
    SessionRow {
        id: session.id.clone(),
        workspace_id: workspace_id.to_string(),
        kind: session.kind.as_str().to_string(),
        task: session.task.clone(),
        status: session.status.as_str().to_string(),
        created_at: session.created_at.to_rfc3339(),
        updated_at: session.updated_at.to_rfc3339(),
        completed_at: session.completed_at.map(|ts| ts.to_rfc3339()),
        model: session.model.clone(),
        timeout_seconds: session.timeout_seconds,
        preserve_artifacts: session.preserve_artifacts,
        winner_instance_id: None,
        agents: serde_json::to_string(&session.agents).unwrap_or_else(|_| "[]".to_string()),
        duration_seconds: metrics.duration_seconds,
        files_changed: metrics.files_changed,
        lines_added: metrics.lines_added,
        lines_removed: metrics.lines_removed,
    }
}

fn instance_write(instance: &Instance) -> InstanceWrite {
    let metrics = instance.metrics.clone().unwrap_or_default();
    InstanceWrite {
        ordinal: i64::from(instance.ordinal),
        worktree_path: instance.worktree_path.clone(),
        branch: instance.branch.clone(),
        agent: instance.agent.clone(),
        status: instance.status.as_str().to_string(),
        process_session_id: instance.process_session_id.clone(),
        output: instance.output.clone(),
        started_at: instance.started_at.map(|ts| ts.to_rfc3339()),
        ended_at: instance.ended_at.map(|ts| ts.to_rfc3339()),
        files_changed: metrics.files_changed,
        lines_added: metrics.lines_added,
        lines_removed: metrics.lines_removed,
    }
}

fn resolve_winner(
    ids_by_ordinal: &HashMap<u32, i64>,
    winner_ordinal: Option<u32>,
) -> Result<Option<i64>> {
    match winner_ordinal {
        None => Ok(None),
        Some(ordinal) => ids_by_ordinal.get(&ordinal).copied().map(Some).ok_or_else(|| {
            StoreError::Validation(format!("winner ordinal {ordinal} does not match any instance"))
        }),
    }
}

/// Insert a full session tree under an existing workspace row.
fn insert_session_tree(conn: &Connection, workspace_id: &str, session: &Session) -> Result<()> {
    SessionRepo::insert(conn, &session_to_row(workspace_id, session))?;

    let mut ids_by_ordinal = HashMap::new();
    for instance in &session.instances {
        let id = InstanceRepo::insert(conn, &session.id, &instance_write(instance))?;
        let _ = ids_by_ordinal.insert(instance.ordinal, id);
    }

    let winner_id = resolve_winner(&ids_by_ordinal, session.winner_ordinal)?;
    if winner_id.is_some() {
        let _ = SessionRepo::set_winner(conn, &session.id, winner_id)?;
    }

    for message in &session.messages {
        let instance_id = message
            .instance_ordinal
            .and_then(|ordinal| ids_by_ordinal.get(&ordinal))
            .copied();
        let _ = MessageRepo::insert(
            conn,
            &session.id,
            instance_id,
            message.role.as_str(),
            &message.content,
            &message.timestamp.to_rfc3339(),
        )?;
    }
    Ok(())
}

fn row_to_session(
    row: &SessionRow,
    workspace_path: &str,
    instances: &[InstanceRow],
    messages: &[MessageRow],
) -> Result<Session> {
    let agents: Vec<String> = serde_json::from_str(&row.agents)
        .map_err(|e| StoreError::Integrity(format!("bad agents column for {}: {e}", row.id)))?;

    let metrics = SessionMetrics {
        duration_seconds: row.duration_seconds,
        files_changed: row.files_changed,
        lines_added: row.lines_added,
        lines_removed: row.lines_removed,
    };

    let mut ordinal_by_id = HashMap::new();
    let domain_instances = instances
        .iter()
        .map(|inst| {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let ordinal = inst.ordinal as u32;
            let _ = ordinal_by_id.insert(inst.id, ordinal);
            let change = ChangeMetrics {
                files_changed: inst.files_changed,
                lines_added: inst.lines_added,
                lines_removed: inst.lines_removed,
            };
            Ok(Instance {
                ordinal,
                worktree_path: inst.worktree_path.clone(),
                branch: inst.branch.clone(),
                agent: inst.agent.clone(),
                status: parse_enum(&inst.status)?,
                process_session_id: inst.process_session_id.clone(),
                output: inst.output.clone(),
                started_at: inst
                    .started_at
                    .as_deref()
                    .map(|ts| parse_ts(ts, "started_at"))
                    .transpose()?,
                ended_at: inst
                    .ended_at
                    .as_deref()
                    .map(|ts| parse_ts(ts, "ended_at"))
                    .transpose()?,
                metrics: if change.is_empty() { None } else { Some(change) },
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let domain_messages = messages
        .iter()
        .map(|msg| {
            Ok(ChatMessage {
                role: parse_enum(&msg.role)?,
                content: msg.content.clone(),
                timestamp: parse_ts(&msg.timestamp, "timestamp")?,
                instance_ordinal: msg.instance_id.and_then(|id| ordinal_by_id.get(&id)).copied(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let winner_ordinal =
        row.winner_instance_id.and_then(|id| ordinal_by_id.get(&id)).copied();

    Ok(Session {
        id: row.id.clone(),
        workspace_path: workspace_path.to_string(),
        kind: parse_enum(&row.kind)?,
        task: row.task.clone(),
        status: parse_enum(&row.status)?,
        created_at: parse_ts(&row.created_at, "created_at")?,
        updated_at: parse_ts(&row.updated_at, "updated_at")?,
        completed_at: row
            .completed_at
            .as_deref()
            .map(|ts| parse_ts(ts, "completed_at"))
            .transpose()?,
        model: row.model.clone(),
        timeout_seconds: row.timeout_seconds,
        preserve_artifacts: row.preserve_artifacts,
        winner_ordinal,
        agents,
        metrics: if metrics.is_empty() { None } else { Some(metrics) },
        instances: domain_instances,
        messages: domain_messages,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use agora_core::MessageRole;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    fn ts(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, secs).unwrap()
    }

    fn instance(ordinal: u32) -> Instance {
        Instance {
            ordinal,
            worktree_path: format!("/tmp/ws/.worktrees/s1-{ordinal}"),
            branch: format!("agora/s1-{ordinal}"),
            agent: Some("claude".into()),
            status: InstanceStatus::Idle,
            process_session_id: Some(format!("term-{ordinal}")),
            output: None,
            started_at: Some(ts(0)),
            ended_at: None,
            metrics: None,
        }
    }

    fn session(id: &str, kind: SessionKind, instances: Vec<Instance>) -> Session {
        Session {
            id: id.into(),
            workspace_path: "/tmp/ws".into(),
            kind,
            task: "refactor the tokenizer".into(),
            status: SessionStatus::Running,
            created_at: ts(0),
            updated_at: ts(0),
            completed_at: None,
            model: Some("claude-sonnet-4".into()),
            timeout_seconds: Some(1800),
            preserve_artifacts: false,
            winner_ordinal: None,
            agents: vec!["claude".into(), "codex".into()],
            metrics: None,
            instances,
            messages: Vec::new(),
        }
    }

    fn ws_id() -> String {
        agora_core::workspace_id("/tmp/ws")
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = SessionStore::in_memory().unwrap();
        let mut sess = session("S1", SessionKind::Competition, vec![instance(1), instance(2)]);
        sess.messages.push(ChatMessage {
            role: MessageRole::User,
            content: "start".into(),
            timestamp: ts(1),
            instance_ordinal: None,
        });

        let created = store.create_session(sess.clone()).await.unwrap();
        let loaded = store.get_session(&ws_id(), "S1").await.unwrap();
        assert_eq!(created, loaded);
        assert_eq!(loaded.instances.len(), 2);
        assert_eq!(loaded.instances[0].ordinal, 1);
        assert_eq!(loaded.instances[1].ordinal, 2);
        assert_eq!(loaded.messages.len(), 1);
        assert_eq!(loaded, sess);
    }

    #[tokio::test]
    async fn duplicate_session_id_is_validation_error() {
        let store = SessionStore::in_memory().unwrap();
        store
            .create_session(session("S1", SessionKind::Debate, vec![]))
            .await
            .unwrap();
        let err = store
            .create_session(session("S1", SessionKind::Debate, vec![]))
            .await
            .unwrap_err();
        assert_matches!(err, StoreError::Validation(_));
    }

    #[tokio::test]
    async fn duplicate_ordinal_fails_and_persists_nothing() {
        let store = SessionStore::in_memory().unwrap();
        let sess = session("S1", SessionKind::Competition, vec![instance(1), instance(1)]);
        let err = store.create_session(sess).await.unwrap_err();
        assert_matches!(err, StoreError::Validation(_));

        let err = store.get_session(&ws_id(), "S1").await.unwrap_err();
        assert_matches!(err, StoreError::NotFound { .. });
    }

    #[tokio::test]
    async fn winner_must_reference_existing_instance() {
        let store = SessionStore::in_memory().unwrap();
        let mut sess = session("S1", SessionKind::Competition, vec![instance(1)]);
        sess.winner_ordinal = Some(5);
        let err = store.create_session(sess).await.unwrap_err();
        assert_matches!(err, StoreError::Validation(_));
    }

    #[tokio::test]
    async fn winner_rejected_for_non_competition() {
        let store = SessionStore::in_memory().unwrap();
        let mut sess = session("S1", SessionKind::Ensemble, vec![instance(1)]);
        sess.winner_ordinal = Some(1);
        let err = store.create_session(sess).await.unwrap_err();
        assert_matches!(err, StoreError::Validation(_));
    }

    #[tokio::test]
    async fn winner_round_trips() {
        let store = SessionStore::in_memory().unwrap();
        let mut sess = session("S1", SessionKind::Competition, vec![instance(1), instance(2)]);
        sess.status = SessionStatus::Completed;
        sess.completed_at = Some(ts(30));
        sess.winner_ordinal = Some(2);

        store.create_session(sess).await.unwrap();
        let loaded = store.get_session(&ws_id(), "S1").await.unwrap();
        assert_eq!(loaded.winner_ordinal, Some(2));
    }

    #[tokio::test]
    async fn completed_at_invariant_enforced() {
        let store = SessionStore::in_memory().unwrap();

        let mut missing = session("S1", SessionKind::Debate, vec![]);
        missing.status = SessionStatus::Completed;
        assert_matches!(
            store.create_session(missing).await.unwrap_err(),
            StoreError::Validation(_)
        );

        let mut spurious = session("S2", SessionKind::Debate, vec![]);
        spurious.completed_at = Some(ts(5));
        assert_matches!(
            store.create_session(spurious).await.unwrap_err(),
            StoreError::Validation(_)
        );
    }

    #[tokio::test]
    async fn append_message_referencing_instance() {
        let store = SessionStore::in_memory().unwrap();
        store
            .create_session(session("S1", SessionKind::Competition, vec![instance(1), instance(2)]))
            .await
            .unwrap();

        let message = ChatMessage {
            role: MessageRole::User,
            content: "hi".into(),
            timestamp: ts(2),
            instance_ordinal: Some(1),
        };
        store.append_chat_message("S1", message).await.unwrap();

        let loaded = store.get_session(&ws_id(), "S1").await.unwrap();
        assert_eq!(loaded.messages.len(), 1);
        assert_eq!(loaded.messages[0].instance_ordinal, Some(1));
        assert!(loaded.updated_at > loaded.created_at);
    }

    #[tokio::test]
    async fn append_message_unknown_ordinal_is_not_found() {
        let store = SessionStore::in_memory().unwrap();
        store
            .create_session(session("S1", SessionKind::Debate, vec![]))
            .await
            .unwrap();

        let message = ChatMessage {
            role: MessageRole::User,
            content: "hi".into(),
            timestamp: ts(2),
            instance_ordinal: Some(3),
        };
        let err = store.append_chat_message("S1", message).await.unwrap_err();
        assert_matches!(err, StoreError::NotFound { entity: "instance", .. });
    }

    #[tokio::test]
    async fn append_message_oversized_content_rejected() {
        let store = SessionStore::in_memory().unwrap();
        store
            .create_session(session("S1", SessionKind::Debate, vec![]))
            .await
            .unwrap();

        let message = ChatMessage {
            role: MessageRole::User,
            content: "x".repeat(MAX_MESSAGE_CONTENT_CHARS + 1),
            timestamp: ts(2),
            instance_ordinal: None,
        };
        let err = store.append_chat_message("S1", message).await.unwrap_err();
        assert_matches!(err, StoreError::Validation(_));
    }

    #[tokio::test]
    async fn delete_session_cascades_and_is_idempotent() {
        let store = SessionStore::in_memory().unwrap();
        let mut sess = session("S1", SessionKind::Competition, vec![instance(1)]);
        sess.messages.push(ChatMessage {
            role: MessageRole::User,
            content: "hello".into(),
            timestamp: ts(1),
            instance_ordinal: Some(1),
        });
        store.create_session(sess).await.unwrap();

        assert!(store.delete_session(&ws_id(), "S1").await.unwrap());
        assert!(!store.delete_session(&ws_id(), "S1").await.unwrap());

        let err = store.get_session(&ws_id(), "S1").await.unwrap_err();
        assert_matches!(err, StoreError::NotFound { .. });

        let health = store.health().await.unwrap();
        assert_eq!(health.sessions, 0);
        assert_eq!(health.instances, 0);
        assert_eq!(health.messages, 0);
    }

    #[tokio::test]
    async fn update_session_replaces_instance_set() {
        let store = SessionStore::in_memory().unwrap();
        let mut sess = session("S1", SessionKind::Competition, vec![instance(1), instance(2)]);
        sess.messages.push(ChatMessage {
            role: MessageRole::User,
            content: "to instance 2".into(),
            timestamp: ts(1),
            instance_ordinal: Some(2),
        });
        store.create_session(sess.clone()).await.unwrap();

        // Drop instance 2, keep instance 1 with a new status.
        sess.instances.remove(1);
        sess.instances[0].status = InstanceStatus::Running;
        sess.messages.clear(); // update never touches messages
        let updated = store.update_session(sess).await.unwrap();

        assert_eq!(updated.instances.len(), 1);
        assert_eq!(updated.instances[0].status, InstanceStatus::Running);
        // The message survives with its instance reference cleared.
        assert_eq!(updated.messages.len(), 1);
        assert_eq!(updated.messages[0].instance_ordinal, None);
    }

    #[tokio::test]
    async fn update_session_missing_is_not_found() {
        let store = SessionStore::in_memory().unwrap();
        let err = store
            .update_session(session("ghost", SessionKind::Debate, vec![]))
            .await
            .unwrap_err();
        assert_matches!(err, StoreError::NotFound { .. });
    }

    #[tokio::test]
    async fn update_instance_status_bumps_parent() {
        let store = SessionStore::in_memory().unwrap();
        store
            .create_session(session("S1", SessionKind::Ensemble, vec![instance(1)]))
            .await
            .unwrap();

        store
            .update_instance_status("S1", 1, InstanceStatus::Completed)
            .await
            .unwrap();

        let loaded = store.get_session(&ws_id(), "S1").await.unwrap();
        assert_eq!(loaded.instances[0].status, InstanceStatus::Completed);
        assert!(loaded.updated_at > loaded.created_at);

        let err = store
            .update_instance_status("S1", 9, InstanceStatus::Completed)
            .await
            .unwrap_err();
        assert_matches!(err, StoreError::NotFound { .. });
    }

    #[tokio::test]
    async fn list_sessions_filters_and_orders() {
        let store = SessionStore::in_memory().unwrap();
        store
            .create_session(session("S1", SessionKind::Competition, vec![instance(1)]))
            .await
            .unwrap();
        store
            .create_session(session("S2", SessionKind::Debate, vec![]))
            .await
            .unwrap();

        let all = store
            .list_sessions(&ws_id(), SessionFilter::default(), None)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let competitions = store
            .list_sessions(
                &ws_id(),
                SessionFilter { kind: Some(SessionKind::Competition), ..Default::default() },
                None,
            )
            .await
            .unwrap();
        assert_eq!(competitions.len(), 1);
        assert_eq!(competitions[0].id, "S1");
        assert_eq!(competitions[0].instance_count, 1);

        let search = store
            .list_sessions(
                &ws_id(),
                SessionFilter { task_contains: Some("tokenizer".into()), ..Default::default() },
                None,
            )
            .await
            .unwrap();
        assert_eq!(search.len(), 2);
    }

    #[tokio::test]
    async fn upsert_inserts_then_replaces() {
        let store = SessionStore::in_memory().unwrap();
        let mut sess = session("S1", SessionKind::Competition, vec![instance(1)]);

        let outcome = store.upsert_session(sess.clone()).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);

        sess.task = "new task".into();
        let outcome = store.upsert_session(sess.clone()).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Replaced);

        let loaded = store.get_session(&ws_id(), "S1").await.unwrap();
        assert_eq!(loaded.task, "new task");

        let health = store.health().await.unwrap();
        assert_eq!(health.sessions, 1);
        assert_eq!(health.instances, 1);
    }

    #[tokio::test]
    async fn metrics_round_trip() {
        let store = SessionStore::in_memory().unwrap();
        let mut sess = session("S1", SessionKind::Competition, vec![instance(1)]);
        sess.status = SessionStatus::Completed;
        sess.completed_at = Some(ts(40));
        sess.metrics = Some(SessionMetrics {
            duration_seconds: Some(40),
            files_changed: Some(7),
            lines_added: Some(120),
            lines_removed: Some(33),
        });
        sess.instances[0].metrics = Some(ChangeMetrics {
            files_changed: Some(7),
            lines_added: Some(120),
            lines_removed: Some(33),
        });

        store.create_session(sess.clone()).await.unwrap();
        let loaded = store.get_session(&ws_id(), "S1").await.unwrap();
        assert_eq!(loaded.metrics, sess.metrics);
        assert_eq!(loaded.instances[0].metrics, sess.instances[0].metrics);
    }

    #[tokio::test]
    async fn list_respects_cancellation() {
        let store = SessionStore::in_memory().unwrap();
        store
            .create_session(session("S1", SessionKind::Debate, vec![]))
            .await
            .unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let err = store
            .list_sessions(&ws_id(), SessionFilter::default(), Some(token))
            .await
            .unwrap_err();
        assert_matches!(err, StoreError::Cancelled);
    }

    #[tokio::test]
    async fn halt_latch_refuses_writes_until_acknowledged() {
        let store = SessionStore::in_memory().unwrap();
        store.halted.store(true, Ordering::SeqCst);

        let err = store
            .create_session(session("S1", SessionKind::Debate, vec![]))
            .await
            .unwrap_err();
        assert_matches!(err, StoreError::Integrity(_));
        assert!(store.writes_halted());

        store.acknowledge_integrity_failure();
        assert!(!store.writes_halted());
        store
            .create_session(session("S1", SessionKind::Debate, vec![]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn file_backed_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agora.db");
        let store = SessionStore::open(&path, &StoreConfig::default()).unwrap();

        store
            .create_session(session("S1", SessionKind::Competition, vec![instance(1)]))
            .await
            .unwrap();
        drop(store);

        // Reopen and read back.
        let store = SessionStore::open(&path, &StoreConfig::default()).unwrap();
        let loaded = store.get_session(&ws_id(), "S1").await.unwrap();
        assert_eq!(loaded.instances.len(), 1);
    }
}
