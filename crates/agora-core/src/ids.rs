//! Workspace identity derivation.
//!
//! A workspace is identified by a one-way hash of its path, so session rows
//! can be grouped without embedding user filesystem layout in primary keys.
//! The legacy per-workspace store used the same hash as its file name stem,
//! which is why derivation must not touch the filesystem — imported paths may
//! not exist on the machine running the migration.

use sha2::{Digest, Sha256};

/// Length of the hex hash used for workspace identity.
const HASH_LEN: usize = 16;

/// Normalize a workspace path for hashing.
///
/// Trailing slashes are stripped (except for a bare root) so `/a/b` and
/// `/a/b/` hash identically. No filesystem access.
fn normalize(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() { "/" } else { trimmed }
}

/// One-way hash of a workspace path: first 16 hex chars of SHA-256.
pub fn workspace_hash(path: &str) -> String {
    let digest = Sha256::digest(normalize(path).as_bytes());
    let mut hex = format!("{digest:x}");
    hex.truncate(HASH_LEN);
    hex
}

/// Workspace row ID for a path (`ws_` + hash).
pub fn workspace_id(path: &str) -> String {
    workspace_id_from_hash(&workspace_hash(path))
}

/// Workspace row ID for an already-derived hash.
pub fn workspace_id_from_hash(hash: &str) -> String {
    format!("ws_{hash}")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable() {
        assert_eq!(workspace_hash("/tmp/project"), workspace_hash("/tmp/project"));
    }

    #[test]
    fn hash_is_16_hex_chars() {
        let hash = workspace_hash("/tmp/project");
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn trailing_slash_ignored() {
        assert_eq!(workspace_hash("/tmp/project/"), workspace_hash("/tmp/project"));
    }

    #[test]
    fn root_path_hashes() {
        assert_eq!(workspace_hash("/"), workspace_hash("///"));
    }

    #[test]
    fn different_paths_differ() {
        assert_ne!(workspace_hash("/tmp/a"), workspace_hash("/tmp/b"));
    }

    #[test]
    fn id_carries_prefix() {
        let id = workspace_id("/tmp/project");
        assert!(id.starts_with("ws_"));
        assert_eq!(id, workspace_id_from_hash(&workspace_hash("/tmp/project")));
    }
}
