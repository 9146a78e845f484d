//! # agora-core
//!
//! Shared domain types for the Agora session persistence engine:
//!
//! - **Sessions**: one multi-agent execution run (competition, ensemble, or
//!   debate), owning parallel worktree instances and an ordered chat history
//! - **Enums**: string-backed session/instance/message enums matching the
//!   persisted wire format exactly
//! - **Workspace identity**: one-way hash derivation from workspace paths

#![deny(unsafe_code)]

pub mod ids;
pub mod session;

pub use ids::{workspace_hash, workspace_id, workspace_id_from_hash};
pub use session::{
    ChangeMetrics, ChatMessage, Instance, InstanceStatus, MessageRole, ParseEnumError, Session,
    SessionKind, SessionMetrics, SessionStatus,
};
