//! Backup and restore maintenance.
//!
//! Backups are online snapshots taken with `VACUUM INTO`: readers and the
//! writer keep running, and WAL content is checkpointed into the snapshot, so
//! a backup is always a single self-contained file with no side-files to
//! copy. Restore is the only operation that requires the store to be closed.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::params;
use serde::Serialize;
use tracing::{info, warn};

use crate::errors::{Result, StoreError};
use crate::store::session_store::SessionStore;

/// One backup on disk.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupInfo {
    /// Backup ID (timestamped, doubles as the file stem).
    pub id: String,
    /// Full path of the backup file.
    pub path: PathBuf,
    /// Size in bytes.
    pub size_bytes: u64,
}

fn backup_file(backups_dir: &Path, id: &str) -> PathBuf {
    backups_dir.join(format!("{id}.db"))
}

impl SessionStore {
    /// Take an online snapshot of the store into `backups_dir`.
    ///
    /// Does not require exclusive access: concurrent readers and writers
    /// proceed while the snapshot is written.
    pub async fn backup(&self, backups_dir: &Path) -> Result<BackupInfo> {
        let backups_dir = backups_dir.to_owned();
        let store = self.clone();
        tokio::task::spawn_blocking(move || backup_blocking(&store, &backups_dir))
            .await
            .map_err(|e| StoreError::Internal(format!("backup task panicked: {e}")))?
    }
}

fn backup_blocking(store: &SessionStore, backups_dir: &Path) -> Result<BackupInfo> {
    std::fs::create_dir_all(backups_dir)?;
    // Timestamp plus a process-local sequence number: IDs stay sortable even
    // for two snapshots in the same second.
    static BACKUP_SEQ: std::sync::atomic::AtomicU32 = std::sync::atomic::AtomicU32::new(0);
    let seq = BACKUP_SEQ.fetch_add(1, std::sync::atomic::Ordering::Relaxed) % 10_000;
    let id = format!("agora-{}-{seq:04}", Utc::now().format("%Y%m%d-%H%M%S"));
    let dest = backup_file(backups_dir, &id);
    if dest.exists() {
        return Err(StoreError::Conflict(format!("backup {id} already exists")));
    }

    let conn = store.pool().get().map_err(StoreError::from)?;
    let dest_str = dest.to_string_lossy().into_owned();
    let _ = conn
        .execute("VACUUM INTO ?1", params![dest_str])
        .map_err(StoreError::from)?;

    let size_bytes = std::fs::metadata(&dest)?.len();
    info!(id, size_bytes, "backup written");
    Ok(BackupInfo { id, path: dest, size_bytes })
}

/// List backups in `backups_dir`, newest first.
pub fn list_backups(backups_dir: &Path) -> Result<Vec<BackupInfo>> {
    let mut backups = Vec::new();
    if !backups_dir.exists() {
        return Ok(backups);
    }
    for entry in std::fs::read_dir(backups_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().is_none_or(|ext| ext != "db") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        backups.push(BackupInfo {
            id: stem.to_string(),
            size_bytes: entry.metadata()?.len(),
            path,
        });
    }
    // IDs embed the timestamp, so lexicographic order is chronological.
    backups.sort_by(|a, b| b.id.cmp(&a.id));
    Ok(backups)
}

/// Replace the live store file with a backup.
///
/// Refuses with [`StoreError::Conflict`] while the store appears open
/// elsewhere (a WAL side-file is present). Stale `-wal`/`-shm` files from the
/// replaced database are removed so the restored snapshot opens clean.
pub fn restore(db_path: &Path, backups_dir: &Path, backup_id: &str) -> Result<()> {
    let source = backup_file(backups_dir, backup_id);
    if !source.exists() {
        return Err(StoreError::not_found("backup", backup_id));
    }

    let wal = wal_path(db_path);
    if wal.exists() {
        return Err(StoreError::Conflict(format!(
            "store at {} appears to be open (WAL present); close it before restoring",
            db_path.display()
        )));
    }

    let _ = std::fs::copy(&source, db_path)?;
    for side in [wal, shm_path(db_path)] {
        if side.exists() {
            std::fs::remove_file(&side)?;
        }
    }
    info!(backup_id, path = %db_path.display(), "store restored from backup");
    Ok(())
}

/// Delete all but the newest `keep_n` backups.
///
/// Individual unlink failures are logged and skipped, never surfaced — a
/// prune must not fail the maintenance run that triggered it.
pub fn prune_backups(backups_dir: &Path, keep_n: usize) -> Result<usize> {
    let backups = list_backups(backups_dir)?;
    let mut removed = 0;
    for backup in backups.iter().skip(keep_n) {
        match std::fs::remove_file(&backup.path) {
            Ok(()) => removed += 1,
            Err(e) => warn!(id = backup.id, error = %e, "failed to prune backup"),
        }
    }
    if removed > 0 {
        info!(removed, kept = keep_n.min(backups.len()), "pruned backups");
    }
    Ok(removed)
}

fn wal_path(db_path: &Path) -> PathBuf {
    sidecar(db_path, "-wal")
}

fn shm_path(db_path: &Path) -> PathBuf {
    sidecar(db_path, "-shm")
}

fn sidecar(db_path: &Path, suffix: &str) -> PathBuf {
    let mut name = db_path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
