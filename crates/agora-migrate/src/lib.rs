//! # agora-migrate
//!
//! Live cutover from the legacy one-file-per-workspace JSON store to the
//! relational store, with no data loss:
//!
//! - **[`LegacyStore`]**: read/write access to the legacy JSON files
//! - **[`LegacyImporter`]**: one-shot, idempotent, per-file-isolated ingestion
//! - **[`WorkspaceResolver`]**: pluggable hash → path resolution backed by a
//!   persisted mapping file
//! - **[`DualWriteStore`]**: transition-window mirror that writes both stores
//!   and keeps the new store authoritative
//! - **Consistency/validation**: structural diff of both stores, orphan and
//!   enum audits of the new store
//! - **Archival**: moves legacy files aside after a verified migration,
//!   never deleting data

#![deny(unsafe_code)]

pub mod archive;
pub mod consistency;
pub mod dual_write;
pub mod importer;
pub mod legacy;
pub mod resolver;
pub mod validate;

pub use archive::{ArchiveReport, archive_legacy_store};
pub use consistency::{ConsistencyReport, SessionDiff, check_consistency};
pub use dual_write::DualWriteStore;
pub use importer::{FileImportError, ImportReport, LegacyImporter};
pub use legacy::{LegacyStore, LegacyWorkspaceFile};
pub use resolver::{MappingResolver, StaticResolver, WorkspaceResolver};
pub use validate::{ValidationReport, validate_store};
