//! Workspace hash resolution.
//!
//! Legacy file names carry only the one-way hash of the workspace path. The
//! importer needs the path back to register the workspace row, so resolution
//! goes through a persisted hash → path mapping file, with a pluggable
//! fallback for hashes the mapping doesn't know. The fallback is a plain
//! callback — the migration core has no console or UI dependency.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use agora_store::Result;

/// Resolves workspace hashes to paths.
pub trait WorkspaceResolver {
    /// Resolve a hash to its workspace path, or `None` if unknown.
    fn resolve(&mut self, hash: &str) -> Result<Option<String>>;
}

/// Caller-supplied fallback for hashes missing from the mapping file.
pub type ResolveFallback = Box<dyn FnMut(&str) -> Option<String> + Send>;

/// Resolver backed by a persisted JSON mapping file (`hash → path`).
///
/// Fallback resolutions are written back to the file so a re-run (or the
/// next migration phase) doesn't ask twice.
pub struct MappingResolver {
    mapping_path: PathBuf,
    mapping: BTreeMap<String, String>,
    fallback: Option<ResolveFallback>,
}

impl MappingResolver {
    /// Load the mapping file (missing file means an empty mapping).
    pub fn load(mapping_path: impl Into<PathBuf>, fallback: Option<ResolveFallback>) -> Result<Self> {
        let mapping_path = mapping_path.into();
        let mapping = if mapping_path.exists() {
            let content = std::fs::read_to_string(&mapping_path)?;
            serde_json::from_str(&content)?
        } else {
            BTreeMap::new()
        };
        debug!(path = %mapping_path.display(), entries = mapping.len(), "workspace mapping loaded");
        Ok(Self { mapping_path, mapping, fallback })
    }

    /// Number of known mappings.
    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    /// Whether no mappings are known.
    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    /// Record a resolution and persist the mapping file.
    pub fn learn(&mut self, hash: &str, path: &str) -> Result<()> {
        let _ = self.mapping.insert(hash.to_string(), path.to_string());
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.mapping_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.mapping)?;
        std::fs::write(&self.mapping_path, json)?;
        Ok(())
    }
}

impl WorkspaceResolver for MappingResolver {
    fn resolve(&mut self, hash: &str) -> Result<Option<String>> {
        if let Some(path) = self.mapping.get(hash) {
            return Ok(Some(path.clone()));
        }
        let Some(fallback) = self.fallback.as_mut() else {
            return Ok(None);
        };
        match fallback(hash) {
            Some(path) => {
                info!(hash, path, "workspace hash resolved via fallback");
                self.learn(hash, &path)?;
                Ok(Some(path))
            }
            None => Ok(None),
        }
    }
}

/// Fixed mapping resolver for tests and scripted migrations.
pub struct StaticResolver(pub BTreeMap<String, String>);

impl StaticResolver {
    /// Build from `(hash, path)` pairs.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(hash, path)| (hash.to_string(), path.to_string()))
                .collect(),
        )
    }
}

impl WorkspaceResolver for StaticResolver {
    fn resolve(&mut self, hash: &str) -> Result<Option<String>> {
        Ok(self.0.get(hash).cloned())
    }
}

/// Convenience: the standard mapping file location next to a legacy dir.
pub fn default_mapping_path(legacy_dir: &Path) -> PathBuf {
    legacy_dir.join("workspace-paths.json")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
