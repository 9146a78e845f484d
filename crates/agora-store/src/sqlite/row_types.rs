//! Database row types for mapping between `SQLite` rows and Rust structs.
//!
//! These represent the raw database row shape — not the public API types.
//! Conversion to domain types ([`agora_core::Session`] and friends) happens
//! in the store facade.

/// Raw session row from the `sessions` table.
#[derive(Clone, Debug)]
pub struct SessionRow {
    /// Session ID.
    pub id: String,
    /// Workspace ID (`ws_` + path hash).
    pub workspace_id: String,
    /// Session kind string.
    pub kind: String,
    /// Task description.
    pub task: String,
    /// Status string.
    pub status: String,
    /// Creation timestamp.
    pub created_at: String,
    /// Last update timestamp.
    pub updated_at: String,
    /// Completion timestamp (null unless completed/failed).
    pub completed_at: Option<String>,
    /// Model label.
    pub model: Option<String>,
    /// Timeout in seconds.
    pub timeout_seconds: Option<i64>,
    /// Whether worktrees are preserved.
    pub preserve_artifacts: bool,
    /// Surrogate key of the winning instance.
    pub winner_instance_id: Option<i64>,
    /// Runtime labels as a JSON array string.
    pub agents: String,
    /// Wall-clock duration in seconds.
    pub duration_seconds: Option<i64>,
    /// Aggregate files changed.
    pub files_changed: Option<i64>,
    /// Aggregate lines added.
    pub lines_added: Option<i64>,
    /// Aggregate lines removed.
    pub lines_removed: Option<i64>,
}

/// Raw instance row from the `instances` table.
#[derive(Clone, Debug)]
pub struct InstanceRow {
    /// Surrogate key.
    pub id: i64,
    /// Owning session ID.
    pub session_id: String,
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
    /// Files changed in the worktree.
    pub files_changed: Option<i64>,
    /// Lines added.
    pub lines_added: Option<i64>,
    /// Lines removed.
    pub lines_removed: Option<i64>,
}

/// Raw chat message row from the `chat_messages` table.
#[derive(Clone, Debug)]
pub struct MessageRow {
    /// Surrogate key. Breaks timestamp ties in ordering.
    pub id: i64,
    /// Owning session ID.
    pub session_id: String,
    /// Referenced instance surrogate key, if any.
    pub instance_id: Option<i64>,
    /// Role string.
    pub role: String,
    /// Message text.
    pub content: String,
    /// Message timestamp.
    pub timestamp: String,
}

/// Raw workspace row from the `workspaces` table.
#[derive(Clone, Debug)]
pub struct WorkspaceRow {
    /// Workspace ID (`ws_` + path hash).
    pub id: String,
    /// Human-meaningful path.
    pub path: String,
    /// Creation timestamp.
    pub created_at: String,
    /// Last session write for this workspace.
    pub last_accessed_at: String,
}

/// Session row plus recomputed child counts, for list views.
#[derive(Clone, Debug)]
pub struct SessionListRow {
    /// The session row.
    pub session: SessionRow,
    /// Number of instances (recomputed on read).
    pub instance_count: i64,
    /// Number of chat messages (recomputed on read).
    pub message_count: i64,
}
