//! Session domain types.
//!
//! A [`Session`] is one complete multi-agent execution run. It owns zero or
//! more [`Instance`]s (parallel agent runs in separate worktrees) and an
//! ordered list of [`ChatMessage`]s. Serde renames match the persisted wire
//! format (camelCase), which the legacy per-workspace JSON store also used.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A string that is not a member of the target enum's allowed set.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid {field} value: '{value}'")]
pub struct ParseEnumError {
    /// Which enum field failed to parse.
    pub field: &'static str,
    /// The rejected value.
    pub value: String,
}

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident, $field:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $(
                #[doc = $text]
                $variant,
            )+
        }

        impl $name {
            /// All allowed values, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// The persisted string form.
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    _ => Err(ParseEnumError { field: $field, value: s.to_string() }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(
    /// Execution mode of a session.
    SessionKind,
    "kind",
    {
        Competition => "competition",
        Ensemble => "ensemble",
        Debate => "debate",
    }
);

string_enum!(
    /// Lifecycle status of a session.
    SessionStatus,
    "status",
    {
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Paused => "paused",
    }
);

string_enum!(
    /// Lifecycle status of a worktree instance.
    InstanceStatus,
    "status",
    {
        Idle => "idle",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Paused => "paused",
        Archived => "archived",
    }
);

string_enum!(
    /// Author role of a chat message.
    MessageRole,
    "role",
    {
        User => "user",
        Assistant => "assistant",
        System => "system",
    }
);

/// Aggregate metrics for a finished session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    /// Wall-clock duration in seconds.
    #[serde(default)]
    pub duration_seconds: Option<i64>,
    /// Files changed across all instances.
    #[serde(default)]
    pub files_changed: Option<i64>,
    /// Lines added across all instances.
    #[serde(default)]
    pub lines_added: Option<i64>,
    /// Lines removed across all instances.
    #[serde(default)]
    pub lines_removed: Option<i64>,
}

impl SessionMetrics {
    /// Whether every field is unset.
    pub fn is_empty(&self) -> bool {
        self.duration_seconds.is_none()
            && self.files_changed.is_none()
            && self.lines_added.is_none()
            && self.lines_removed.is_none()
    }
}

/// Change metrics for a single instance's worktree.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeMetrics {
    /// Files changed in the worktree.
    #[serde(default)]
    pub files_changed: Option<i64>,
    /// Lines added.
    #[serde(default)]
    pub lines_added: Option<i64>,
    /// Lines removed.
    #[serde(default)]
    pub lines_removed: Option<i64>,
}

impl ChangeMetrics {
    /// Whether every field is unset.
    pub fn is_empty(&self) -> bool {
        self.files_changed.is_none() && self.lines_added.is_none() && self.lines_removed.is_none()
    }
}

/// One parallel agent run inside a session, tied to a worktree and branch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    /// Position within the session. `(session_id, ordinal)` is unique.
    pub ordinal: u32,
    /// Filesystem path of the instance's worktree.
    pub worktree_path: String,
    /// Branch the instance works on.
    pub branch: String,
    /// Agent/runtime label (e.g. which CLI runs in the worktree).
    #[serde(default)]
    pub agent: Option<String>,
    /// Lifecycle status.
    pub status: InstanceStatus,
    /// Opaque handle into the external process/session manager.
    #[serde(default)]
    pub process_session_id: Option<String>,
    /// Captured output. Can be large.
    #[serde(default)]
    pub output: Option<String>,
    /// When the agent run started.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the agent run ended.
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    /// Worktree change metrics, if measured.
    #[serde(default)]
    pub metrics: Option<ChangeMetrics>,
}

/// One turn of interactive dialogue tied to a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Author role.
    pub role: MessageRole,
    /// Message text. Bounded length, enforced at write time.
    pub content: String,
    /// When the message was produced. Ordering key (ties broken by insertion).
    pub timestamp: DateTime<Utc>,
    /// Instance this message addresses, if any. Cleared (not cascaded) when
    /// the instance is deleted.
    #[serde(default)]
    pub instance_ordinal: Option<u32>,
}

/// One complete multi-agent execution run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Caller-supplied, globally unique ID.
    pub id: String,
    /// Workspace path this session ran in. The store derives the workspace
    /// hash from this and never persists the raw path in the session row.
    /// Absent in legacy files (their name carries the hash instead); the
    /// importer fills it in after resolution, and the store rejects an empty
    /// path at the API boundary.
    #[serde(default)]
    pub workspace_path: String,
    /// Execution mode.
    pub kind: SessionKind,
    /// Free-text task description.
    pub task: String,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
    /// Set iff status is `completed` or `failed`.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Model label, if pinned.
    #[serde(default)]
    pub model: Option<String>,
    /// Per-session timeout, if any.
    #[serde(default)]
    pub timeout_seconds: Option<i64>,
    /// Whether worktrees are kept after the session ends.
    #[serde(default)]
    pub preserve_artifacts: bool,
    /// Winning instance ordinal. Only meaningful for competition sessions.
    #[serde(default)]
    pub winner_ordinal: Option<u32>,
    /// Runtime labels used, in launch order.
    #[serde(default)]
    pub agents: Vec<String>,
    /// Aggregate metrics, if measured.
    #[serde(default)]
    pub metrics: Option<SessionMetrics>,
    /// Parallel agent runs, ordered by ordinal.
    #[serde(default)]
    pub instances: Vec<Instance>,
    /// Chat history, ordered by timestamp.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

impl Session {
    /// Look up an instance by ordinal.
    pub fn instance(&self, ordinal: u32) -> Option<&Instance> {
        self.instances.iter().find(|i| i.ordinal == ordinal)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
