//! Structural comparison of the legacy and relational stores.
//!
//! During the dual-write window both stores hold the same logical data. The
//! consistency check loads both full session sets for a workspace and
//! compares matching IDs field by field; any divergence is reported with the
//! field paths that differ, never silently swallowed.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::info;

use agora_core::Session;
use agora_store::{Result, SessionStore};

use crate::legacy::{LegacyStore, hash_from_workspace_id};

/// One diverging session.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDiff {
    /// Session ID present in both stores.
    pub id: String,
    /// Field paths that differ (e.g. `status`, `instances[2].branch`).
    pub fields: Vec<String>,
}

/// Result of comparing both stores for one workspace.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyReport {
    /// Session IDs equal in both stores.
    pub matched: Vec<String>,
    /// Sessions present in both stores with differing content.
    pub mismatched: Vec<SessionDiff>,
    /// Session IDs only in the legacy store.
    pub legacy_only: Vec<String>,
    /// Session IDs only in the relational store.
    pub new_only: Vec<String>,
}

impl ConsistencyReport {
    /// Whether the stores agree completely.
    pub fn is_consistent(&self) -> bool {
        self.mismatched.is_empty() && self.legacy_only.is_empty() && self.new_only.is_empty()
    }
}

/// Compare both stores' full session sets for `workspace_id`.
pub async fn check_consistency(
    store: &SessionStore,
    legacy: &LegacyStore,
    workspace_id: &str,
) -> Result<ConsistencyReport> {
    let hash = hash_from_workspace_id(workspace_id)?;
    let legacy_sessions = legacy.load_by_hash(hash)?.sessions;
    let new_sessions = store.load_full_sessions(workspace_id, None).await?;

    let legacy_by_id: BTreeMap<&str, &Session> =
        legacy_sessions.iter().map(|s| (s.id.as_str(), s)).collect();
    let new_by_id: BTreeMap<&str, &Session> =
        new_sessions.iter().map(|s| (s.id.as_str(), s)).collect();

    let mut report = ConsistencyReport::default();
    for (id, legacy_session) in &legacy_by_id {
        match new_by_id.get(id) {
            None => report.legacy_only.push((*id).to_string()),
            Some(new_session) => {
                let fields = diff_sessions(legacy_session, new_session);
                if fields.is_empty() {
                    report.matched.push((*id).to_string());
                } else {
                    report.mismatched.push(SessionDiff { id: (*id).to_string(), fields });
                }
            }
        }
    }
    for id in new_by_id.keys() {
        if !legacy_by_id.contains_key(id) {
            report.new_only.push((*id).to_string());
        }
    }

    info!(
        workspace_id,
        matched = report.matched.len(),
        mismatched = report.mismatched.len(),
        legacy_only = report.legacy_only.len(),
        new_only = report.new_only.len(),
        "consistency check complete"
    );
    Ok(report)
}

/// Field-by-field structural diff of two sessions. Returns the paths that
/// differ; empty means equal.
pub fn diff_sessions(legacy: &Session, new: &Session) -> Vec<String> {
    let mut fields = Vec::new();
    let mut check = |name: &str, equal: bool| {
        if !equal {
            fields.push(name.to_string());
        }
    };

    check("workspacePath", legacy.workspace_path == new.workspace_path);
    check("kind", legacy.kind == new.kind);
    check("task", legacy.task == new.task);
    check("status", legacy.status == new.status);
    check("createdAt", legacy.created_at == new.created_at);
    check("updatedAt", legacy.updated_at == new.updated_at);
    check("completedAt", legacy.completed_at == new.completed_at);
    check("model", legacy.model == new.model);
    check("timeoutSeconds", legacy.timeout_seconds == new.timeout_seconds);
    check("preserveArtifacts", legacy.preserve_artifacts == new.preserve_artifacts);
    check("winnerOrdinal", legacy.winner_ordinal == new.winner_ordinal);
    check("agents", legacy.agents == new.agents);
    check("metrics", legacy.metrics == new.metrics);

    if legacy.instances.len() == new.instances.len() {
        for (a, b) in legacy.instances.iter().zip(&new.instances) {
            let prefix = format!("instances[{}]", a.ordinal);
            if a.ordinal != b.ordinal {
                fields.push(format!("{prefix}.ordinal"));
                continue;
            }
            if a != b {
                fields.push(prefix);
            }
        }
    } else {
        fields.push("instances".to_string());
    }

    if legacy.messages.len() == new.messages.len() {
        for (index, (a, b)) in legacy.messages.iter().zip(&new.messages).enumerate() {
            if a != b {
                fields.push(format!("messages[{index}]"));
            }
        }
    } else {
        fields.push("messages".to_string());
    }

    fields
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
