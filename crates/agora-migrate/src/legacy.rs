//! The legacy one-file-per-workspace JSON store.
//!
//! Each workspace's sessions live in a single `<hash>.json` file, where the
//! stem is the one-way hash of the workspace path. During the transition
//! window this module is both read (importer, consistency checks) and
//! written (dual-write mirror); after cutover the files are archived.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use agora_core::Session;
use agora_store::{Result, StoreError};

/// Current legacy file format version.
pub const LEGACY_FILE_VERSION: u32 = 1;

fn default_version() -> u32 {
    LEGACY_FILE_VERSION
}

/// One legacy workspace file: a version tag and a session list.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyWorkspaceFile {
    /// Format version.
    #[serde(default = "default_version")]
    pub version: u32,
    /// All sessions of the workspace.
    #[serde(default)]
    pub sessions: Vec<Session>,
}

/// Handle on a legacy store directory.
#[derive(Clone, Debug)]
pub struct LegacyStore {
    dir: PathBuf,
}

impl LegacyStore {
    /// Create a handle for `dir`. The directory is created lazily on first
    /// write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path for a workspace hash.
    pub fn file_for_hash(&self, hash: &str) -> PathBuf {
        self.dir.join(format!("{hash}.json"))
    }

    /// Enumerate legacy files as `(hash, path)` pairs.
    ///
    /// Only `<16-hex>.json` names qualify; anything else in the directory
    /// (mapping files, archives, editor droppings) is skipped.
    pub fn list_files(&self) -> Result<Vec<(String, PathBuf)>> {
        let mut files = Vec::new();
        if !self.dir.exists() {
            return Ok(files);
        }
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() || path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if stem.len() == 16 && stem.chars().all(|c| c.is_ascii_hexdigit()) {
                files.push((stem.to_string(), path));
            }
        }
        files.sort();
        Ok(files)
    }

    /// Parse one legacy file. Unknown enum values and malformed structure are
    /// rejected here, before anything reaches the relational store.
    pub fn load(&self, path: &Path) -> Result<LegacyWorkspaceFile> {
        let content = std::fs::read_to_string(path)?;
        let file: LegacyWorkspaceFile = serde_json::from_str(&content)?;
        Ok(file)
    }

    /// Load the file for a workspace hash, or an empty file if absent.
    pub fn load_by_hash(&self, hash: &str) -> Result<LegacyWorkspaceFile> {
        let path = self.file_for_hash(hash);
        if !path.exists() {
            return Ok(LegacyWorkspaceFile::default());
        }
        self.load(&path)
    }

    /// Write a workspace file atomically (temp file + rename).
    pub fn save(&self, hash: &str, file: &LegacyWorkspaceFile) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.file_for_hash(hash);
        let tmp = self.dir.join(format!(".{hash}.tmp-{}", Uuid::now_v7()));
        let json = serde_json::to_string_pretty(file)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        debug!(hash, sessions = file.sessions.len(), "legacy file written");
        Ok(())
    }

    /// Insert or replace one session in its workspace file.
    pub fn upsert_session(&self, hash: &str, session: &Session) -> Result<()> {
        let mut file = self.load_by_hash(hash)?;
        match file.sessions.iter_mut().find(|s| s.id == session.id) {
            Some(slot) => *slot = session.clone(),
            None => file.sessions.push(session.clone()),
        }
        self.save(hash, &file)
    }

    /// Remove one session from its workspace file. Missing session or file
    /// is fine — mirrored deletes must stay idempotent.
    pub fn remove_session(&self, hash: &str, session_id: &str) -> Result<bool> {
        let path = self.file_for_hash(hash);
        if !path.exists() {
            return Ok(false);
        }
        let mut file = self.load(&path)?;
        let before = file.sessions.len();
        file.sessions.retain(|s| s.id != session_id);
        let removed = file.sessions.len() < before;
        if removed {
            self.save(hash, &file)?;
        }
        Ok(removed)
    }
}

/// Extract the bare hash from a workspace row ID (`ws_<hash>`).
pub fn hash_from_workspace_id(workspace_id: &str) -> Result<&str> {
    workspace_id.strip_prefix("ws_").ok_or_else(|| {
        StoreError::Validation(format!("not a workspace id: {workspace_id}"))
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use agora_core::{SessionKind, SessionStatus};
    use chrono::Utc;

    fn sample_session(id: &str) -> Session {
        Session {
            id: id.into(),
            workspace_path: "/tmp/ws".into(),
            kind: SessionKind::Competition,
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

    #[test]
    fn save_and_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = LegacyStore::new(dir.path());
        let hash = agora_core::workspace_hash("/tmp/ws");

        let file = LegacyWorkspaceFile {
            version: LEGACY_FILE_VERSION,
            sessions: vec![sample_session("s1")],
        };
        store.save(&hash, &file).unwrap();

        let loaded = store.load_by_hash(&hash).unwrap();
        assert_eq!(loaded.sessions.len(), 1);
        assert_eq!(loaded.sessions[0].id, "s1");
    }

    #[test]
    fn list_files_skips_non_hash_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = LegacyStore::new(dir.path());
        let hash = agora_core::workspace_hash("/tmp/ws");
        store.save(&hash, &LegacyWorkspaceFile::default()).unwrap();
        std::fs::write(dir.path().join("workspace-paths.json"), "{}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let files = store.list_files().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, hash);
    }

    #[test]
    fn upsert_session_replaces_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = LegacyStore::new(dir.path());
        let hash = agora_core::workspace_hash("/tmp/ws");

        store.upsert_session(&hash, &sample_session("s1")).unwrap();
        let mut changed = sample_session("s1");
        changed.task = "changed".into();
        store.upsert_session(&hash, &changed).unwrap();
        store.upsert_session(&hash, &sample_session("s2")).unwrap();

        let loaded = store.load_by_hash(&hash).unwrap();
        assert_eq!(loaded.sessions.len(), 2);
        assert_eq!(loaded.sessions[0].task, "changed");
    }

    #[test]
    fn remove_session_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = LegacyStore::new(dir.path());
        let hash = agora_core::workspace_hash("/tmp/ws");
        store.upsert_session(&hash, &sample_session("s1")).unwrap();

        assert!(store.remove_session(&hash, "s1").unwrap());
        assert!(!store.remove_session(&hash, "s1").unwrap());
        assert!(!store.remove_session("deadbeefdeadbeef", "s1").unwrap());
    }

    #[test]
    fn load_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = LegacyStore::new(dir.path());
        let path = dir.path().join("deadbeefdeadbeef.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(store.load(&path).is_err());
    }

    #[test]
    fn load_tolerates_missing_workspace_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = LegacyStore::new(dir.path());
        let path = dir.path().join("deadbeefdeadbeef.json");
        std::fs::write(
            &path,
            r#"{"sessions": [{
                "id": "s1",
                "kind": "debate",
                "task": "argue",
                "status": "running",
                "createdAt": "2025-06-01T00:00:00Z",
                "updatedAt": "2025-06-01T00:00:00Z"
            }]}"#,
        )
        .unwrap();

        let file = store.load(&path).unwrap();
        assert_eq!(file.version, LEGACY_FILE_VERSION);
        assert_eq!(file.sessions[0].workspace_path, "");
    }

    #[test]
    fn hash_extraction_from_workspace_id() {
        assert_eq!(hash_from_workspace_id("ws_deadbeef").unwrap(), "deadbeef");
        assert!(hash_from_workspace_id("deadbeef").is_err());
    }
}
