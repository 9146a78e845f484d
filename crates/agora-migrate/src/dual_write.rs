//! Transition-window dual-write adapter.
//!
//! Wraps every write so it lands in both stores. The relational store is
//! authoritative: its failure is the operation's failure, and its result is
//! what the caller sees. The legacy mirror preserves the rollback path — a
//! mirror failure is logged at `warn!` and never fails the operation.
//!
//! Mirroring is session-granular: after the authoritative write commits, the
//! full session is re-read from the new store and written into the legacy
//! workspace file. That keeps the mirror logic independent of which
//! fine-grained operation ran.

use tokio_util::sync::CancellationToken;
use tracing::warn;

use agora_core::{ChatMessage, InstanceStatus, Session};
use agora_store::{Result, SessionFilter, SessionStore, SessionSummary};

use crate::consistency::{ConsistencyReport, check_consistency};
use crate::legacy::{LegacyStore, hash_from_workspace_id};

/// Dual-write wrapper around the authoritative [`SessionStore`].
#[derive(Clone)]
pub struct DualWriteStore {
    store: SessionStore,
    legacy: LegacyStore,
}

impl DualWriteStore {
    /// Wrap `store`, mirroring into `legacy`.
    pub fn new(store: SessionStore, legacy: LegacyStore) -> Self {
        Self { store, legacy }
    }

    /// The authoritative store.
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Create a session in both stores.
    pub async fn create_session(&self, session: Session) -> Result<Session> {
        let created = self.store.create_session(session).await?;
        self.mirror_session(&created);
        Ok(created)
    }

    /// Update a session in both stores.
    pub async fn update_session(&self, session: Session) -> Result<Session> {
        let updated = self.store.update_session(session).await?;
        self.mirror_session(&updated);
        Ok(updated)
    }

    /// Delete a session from both stores.
    pub async fn delete_session(&self, workspace_id: &str, session_id: &str) -> Result<bool> {
        let deleted = self.store.delete_session(workspace_id, session_id).await?;
        match hash_from_workspace_id(workspace_id) {
            Ok(hash) => {
                if let Err(e) = self.legacy.remove_session(hash, session_id) {
                    warn!(session_id, error = %e, "legacy mirror delete failed");
                }
            }
            Err(e) => warn!(workspace_id, error = %e, "legacy mirror delete skipped"),
        }
        Ok(deleted)
    }

    /// Append a chat message in both stores.
    pub async fn append_chat_message(
        &self,
        session_id: &str,
        message: ChatMessage,
    ) -> Result<ChatMessage> {
        let appended = self.store.append_chat_message(session_id, message).await?;
        self.mirror_by_id(session_id).await;
        Ok(appended)
    }

    /// Update an instance status in both stores.
    pub async fn update_instance_status(
        &self,
        session_id: &str,
        ordinal: u32,
        status: InstanceStatus,
    ) -> Result<()> {
        self.store.update_instance_status(session_id, ordinal, status).await?;
        self.mirror_by_id(session_id).await;
        Ok(())
    }

    /// Reads pass straight through to the authoritative store.
    pub async fn get_session(&self, workspace_id: &str, session_id: &str) -> Result<Session> {
        self.store.get_session(workspace_id, session_id).await
    }

    /// Reads pass straight through to the authoritative store.
    pub async fn list_sessions(
        &self,
        workspace_id: &str,
        filter: SessionFilter,
        cancel: Option<CancellationToken>,
    ) -> Result<Vec<SessionSummary>> {
        self.store.list_sessions(workspace_id, filter, cancel).await
    }

    /// Compare both stores' full session sets for one workspace.
    pub async fn check_consistency(&self, workspace_id: &str) -> Result<ConsistencyReport> {
        check_consistency(&self.store, &self.legacy, workspace_id).await
    }

    /// Mirror a freshly written session into its legacy workspace file.
    fn mirror_session(&self, session: &Session) {
        let hash = agora_core::workspace_hash(&session.workspace_path);
        if let Err(e) = self.legacy.upsert_session(&hash, session) {
            warn!(session_id = session.id, error = %e, "legacy mirror write failed");
        }
    }

    /// Mirror after an id-keyed write, re-reading the session first.
    async fn mirror_by_id(&self, session_id: &str) {
        match self.store.find_session(session_id).await {
            Ok(session) => self.mirror_session(&session),
            Err(e) => {
                warn!(session_id, error = %e, "legacy mirror skipped: session re-read failed");
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
