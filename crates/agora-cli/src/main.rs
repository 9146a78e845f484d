//! `agora` — out-of-band maintenance and migration CLI.
//!
//! Everything destructive follows the same shape: back up first, act, then
//! verify. The GUI never calls this binary; it exists for operators running
//! the cutover and for periodic health checks.

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};

use agora_migrate::{
    LegacyImporter, LegacyStore, MappingResolver, archive_legacy_store, check_consistency,
    validate_store,
};
use agora_migrate::resolver::default_mapping_path;
use agora_store::{SessionStore, StoreConfig, backup};

#[derive(Parser)]
#[command(name = "agora", about = "Agora session store maintenance", version)]
struct Cli {
    /// Path of the session database.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Directory of the legacy per-workspace JSON store.
    #[arg(long, global = true)]
    legacy_dir: Option<PathBuf>,

    /// Directory backups are written to.
    #[arg(long, global = true)]
    backups_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import the legacy JSON store into the session database.
    Migrate {
        /// Parse and validate only; write nothing.
        #[arg(long)]
        dry_run: bool,
    },
    /// Re-count rows and audit referential, enum, and storage integrity.
    Validate,
    /// Compare the legacy and relational stores for one workspace.
    CheckConsistency {
        /// Workspace path to compare.
        workspace: String,
    },
    /// Take an online backup of the session database.
    Backup,
    /// List backups, newest first.
    ListBackups,
    /// Delete all but the newest N backups.
    PruneBackups {
        /// How many backups to keep.
        #[arg(long, default_value_t = 5)]
        keep: usize,
    },
    /// Replace the live database with a backup. The store must be closed.
    Restore {
        /// Backup ID, as shown by `list-backups`.
        backup_id: String,
    },
    /// Report row counts, file size, and integrity state.
    Health,
    /// Move the legacy files into a timestamped archive directory.
    ArchiveLegacy,
}

fn home_dir() -> PathBuf {
    std::env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("/tmp"))
}

fn agora_dir() -> PathBuf {
    home_dir().join(".agora")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let db_path = cli.db.unwrap_or_else(|| agora_dir().join("sessions.db"));
    let legacy_dir = cli.legacy_dir.unwrap_or_else(|| agora_dir().join("legacy"));
    let backups_dir = cli.backups_dir.unwrap_or_else(|| agora_dir().join("backups"));

    match cli.command {
        Command::Migrate { dry_run } => {
            let store = open_store(&db_path)?;
            if !dry_run {
                // Risky multi-write operation: snapshot first.
                let info = store.backup(&backups_dir).await.context("pre-migration backup")?;
                tracing::info!(backup_id = info.id, "pre-migration backup taken");
            }
            let legacy = LegacyStore::new(&legacy_dir);
            let resolver = MappingResolver::load(default_mapping_path(&legacy_dir), None)
                .context("load workspace mapping")?;
            let mut importer = LegacyImporter::new(store, legacy, resolver);
            let report = importer.run(dry_run, None).await.context("import legacy store")?;
            print_json(&report)?;
            if !report.is_clean() {
                bail!("{} of {} files failed", report.files_failed, report.files_processed);
            }
        }
        Command::Validate => {
            let store = open_store(&db_path)?;
            let report = validate_store(&store).await?;
            print_json(&report)?;
            if !report.is_valid() {
                bail!("validation failed");
            }
        }
        Command::CheckConsistency { workspace } => {
            let store = open_store(&db_path)?;
            let legacy = LegacyStore::new(&legacy_dir);
            let report =
                check_consistency(&store, &legacy, &agora_core::workspace_id(&workspace)).await?;
            print_json(&report)?;
            if !report.is_consistent() {
                bail!("stores diverge for workspace {workspace}");
            }
        }
        Command::Backup => {
            let store = open_store(&db_path)?;
            let info = store.backup(&backups_dir).await?;
            print_json(&info)?;
        }
        Command::ListBackups => {
            print_json(&backup::list_backups(&backups_dir)?)?;
        }
        Command::PruneBackups { keep } => {
            let removed = backup::prune_backups(&backups_dir, keep)?;
            println!("removed {removed} backups");
        }
        Command::Restore { backup_id } => {
            backup::restore(&db_path, &backups_dir, &backup_id)
                .with_context(|| format!("restore {backup_id}"))?;
            println!("restored {backup_id}");
        }
        Command::Health => {
            let store = open_store(&db_path)?;
            let health = store.health().await?;
            print_json(&health)?;
            if !health.integrity_ok {
                bail!("integrity check failed");
            }
        }
        Command::ArchiveLegacy => {
            let store = open_store(&db_path)?;
            let report = validate_store(&store).await?;
            if !report.is_valid() {
                bail!("refusing to archive: store validation failed");
            }
            let archived = archive_legacy_store(&LegacyStore::new(&legacy_dir))?;
            print_json(&archived)?;
        }
    }

    Ok(())
}

fn open_store(db_path: &std::path::Path) -> anyhow::Result<SessionStore> {
    SessionStore::open(db_path, &StoreConfig::default())
        .with_context(|| format!("open session store at {}", db_path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
