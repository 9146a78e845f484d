//! One-shot, idempotent ingestion of the legacy store.
//!
//! Each legacy file is processed independently: a parse, resolution, or
//! write failure on one file is recorded and never aborts the rest of the
//! batch. Sessions load through UPSERT semantics, so the importer can be
//! re-run safely after a partial failure or interruption.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use agora_store::{Result, SessionStore, StoreError, UpsertOutcome, validate_session};

use crate::legacy::{LegacyStore, LegacyWorkspaceFile};
use crate::resolver::WorkspaceResolver;
use crate::validate::{ValidationReport, validate_store};

/// One recorded failure, attributed to a file and optionally a session.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileImportError {
    /// The legacy file involved.
    pub file: PathBuf,
    /// The session within the file, when the failure was session-scoped.
    pub session_id: Option<String>,
    /// Human-readable failure description.
    pub error: String,
}

/// Per-run counts and collected errors.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    /// Whether this was a dry run (nothing written).
    pub dry_run: bool,
    /// Files examined, including failed ones.
    pub files_processed: usize,
    /// Files with at least one failure.
    pub files_failed: usize,
    /// Sessions written (or, on a dry run, parsed and valid).
    pub sessions_imported: usize,
    /// Subset of `sessions_imported` that replaced an existing row.
    pub sessions_replaced: usize,
    /// Instances carried by the imported sessions.
    pub instances_imported: usize,
    /// Messages carried by the imported sessions.
    pub messages_imported: usize,
    /// All recorded failures.
    pub errors: Vec<FileImportError>,
}

impl ImportReport {
    /// Whether every file imported without error.
    pub fn is_clean(&self) -> bool {
        self.files_failed == 0 && self.errors.is_empty()
    }
}

/// The legacy-store importer.
pub struct LegacyImporter<R> {
    store: SessionStore,
    legacy: LegacyStore,
    resolver: R,
}

impl<R: WorkspaceResolver> LegacyImporter<R> {
    /// Build an importer over the given stores and resolver.
    pub fn new(store: SessionStore, legacy: LegacyStore, resolver: R) -> Self {
        Self { store, legacy, resolver }
    }

    /// Run the migration. With `dry_run`, files are parsed, resolved, and
    /// validated but nothing is written.
    ///
    /// `cancel` is checked between files, never mid-transaction.
    pub async fn run(
        &mut self,
        dry_run: bool,
        cancel: Option<&CancellationToken>,
    ) -> Result<ImportReport> {
        let files = self.legacy.list_files()?;
        info!(files = files.len(), dry_run, "legacy import starting");

        let mut report = ImportReport { dry_run, ..ImportReport::default() };
        for (hash, path) in files {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(StoreError::Cancelled);
            }
            report.files_processed += 1;
            match self.import_file(&hash, &path, dry_run, &mut report).await {
                Ok(true) => {}
                Ok(false) => report.files_failed += 1,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "legacy file failed");
                    report.files_failed += 1;
                    report.errors.push(FileImportError {
                        file: path,
                        session_id: None,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            files = report.files_processed,
            failed = report.files_failed,
            sessions = report.sessions_imported,
            instances = report.instances_imported,
            messages = report.messages_imported,
            "legacy import finished"
        );
        Ok(report)
    }

    /// Re-count rows and audit referential/enum/storage integrity.
    pub async fn validate(&self) -> Result<ValidationReport> {
        validate_store(&self.store).await
    }

    /// Import one file. Returns `Ok(false)` if any of its sessions failed.
    /// A returned error means the file as a whole could not be processed.
    async fn import_file(
        &mut self,
        hash: &str,
        path: &Path,
        dry_run: bool,
        report: &mut ImportReport,
    ) -> Result<bool> {
        let file = self.legacy.load(path)?;
        let workspace_path = self.resolve_workspace(hash, &file)?;

        let mut all_ok = true;
        for mut session in file.sessions {
            session.workspace_path.clone_from(&workspace_path);
            let session_id = session.id.clone();
            let instances = session.instances.len();
            let messages = session.messages.len();

            let outcome = if dry_run {
                validate_session(&session).map(|()| UpsertOutcome::Inserted)
            } else {
                self.store.upsert_session(session).await
            };

            match outcome {
                Ok(result) => {
                    report.sessions_imported += 1;
                    if result == UpsertOutcome::Replaced {
                        report.sessions_replaced += 1;
                    }
                    report.instances_imported += instances;
                    report.messages_imported += messages;
                }
                Err(e) => {
                    warn!(session_id, error = %e, "session failed to import");
                    all_ok = false;
                    report.errors.push(FileImportError {
                        file: path.to_owned(),
                        session_id: Some(session_id),
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(all_ok)
    }

    /// Resolve the workspace path for a file hash.
    ///
    /// A file whose sessions already carry a path matching the hash is
    /// self-describing; otherwise the pluggable resolver (mapping file plus
    /// fallback) decides.
    fn resolve_workspace(&mut self, hash: &str, file: &LegacyWorkspaceFile) -> Result<String> {
        for session in &file.sessions {
            if !session.workspace_path.is_empty()
                && agora_core::workspace_hash(&session.workspace_path) == hash
            {
                return Ok(session.workspace_path.clone());
            }
        }
        self.resolver.resolve(hash)?.ok_or_else(|| StoreError::Migration {
            message: format!("cannot resolve workspace path for hash {hash}"),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
