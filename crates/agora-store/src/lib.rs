//! # agora-store
//!
//! Embedded relational session store for the Agora engine.
//!
//! Replaces the legacy one-file-per-workspace JSON store with a `SQLite`
//! database. Responsibilities:
//!
//! - **Connection management**: bounded `r2d2` pool with WAL mode and foreign
//!   keys enforced on every connection
//! - **Migrations**: version-tracked SQL schema evolution, embedded at compile
//!   time, applied atomically on open
//! - **Repositories**: stateless per-table SQL operations
//! - **[`SessionStore`]**: the transactional async facade — every multi-table
//!   write runs in a single transaction
//! - **Maintenance**: online backup/restore and storage health reporting

#![deny(unsafe_code)]

pub mod backup;
pub mod errors;
pub mod health;
pub mod retry;
pub mod sqlite;
pub mod store;

pub use errors::{Result, StoreError};
pub use health::StorageHealth;
pub use store::session_store::{
    SessionStore, SessionSummary, StoreConfig, UpsertOutcome, validate_session,
};
pub use sqlite::repositories::session::SessionFilter;
