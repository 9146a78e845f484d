//! Legacy store archival.
//!
//! Once migration is validated, the legacy files are moved aside — never
//! deleted — so the rollback path survives until someone decides otherwise.

use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use agora_store::Result;

use crate::legacy::LegacyStore;

/// Result of archiving a legacy store.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveReport {
    /// Directory the legacy files were moved into.
    pub archive_dir: PathBuf,
    /// Number of files moved.
    pub files_moved: usize,
}

/// Move every legacy workspace file into a timestamped `archive/` subdirectory.
///
/// The mapping file and anything else in the directory stay where they are;
/// only `<hash>.json` workspace files move.
pub fn archive_legacy_store(legacy: &LegacyStore) -> Result<ArchiveReport> {
    let files = legacy.list_files()?;
    let archive_dir = legacy
        .dir()
        .join("archive")
        .join(Utc::now().format("%Y%m%d-%H%M%S").to_string());

    if !files.is_empty() {
        std::fs::create_dir_all(&archive_dir)?;
    }

    let mut files_moved = 0;
    for (hash, path) in files {
        let dest = archive_dir.join(format!("{hash}.json"));
        std::fs::rename(&path, &dest)?;
        files_moved += 1;
    }

    info!(archive_dir = %archive_dir.display(), files_moved, "legacy store archived");
    Ok(ArchiveReport { archive_dir, files_moved })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use crate::legacy::LegacyWorkspaceFile;

    #[test]
    fn archives_workspace_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let legacy = LegacyStore::new(dir.path());
        let hash = agora_core::workspace_hash("/tmp/ws");
        legacy.save(&hash, &LegacyWorkspaceFile::default()).unwrap();
        std::fs::write(dir.path().join("workspace-paths.json"), "{}").unwrap();

        let report = archive_legacy_store(&legacy).unwrap();
        assert_eq!(report.files_moved, 1);
        assert!(report.archive_dir.join(format!("{hash}.json")).exists());
        // The original slot is empty, the mapping file untouched.
        assert!(!legacy.file_for_hash(&hash).exists());
        assert!(dir.path().join("workspace-paths.json").exists());
        // Nothing was deleted: the archived copy still parses.
        assert!(legacy.load(&report.archive_dir.join(format!("{hash}.json"))).is_ok());
    }

    #[test]
    fn empty_store_archives_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let legacy = LegacyStore::new(dir.path());
        let report = archive_legacy_store(&legacy).unwrap();
        assert_eq!(report.files_moved, 0);
        assert!(!report.archive_dir.exists());
    }
}
