//! Snapshot manifest records

use crate::error::{Result, RollbackError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Manifest file name inside a snapshot directory
pub(crate) const MANIFEST_FILE: &str = "manifest.json";

/// Directory holding captured file contents
pub(crate) const BLOB_DIR: &str = "blobs";

/// Lifecycle of a stored snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SnapshotStatus {
    /// Capture in progress
    Pending,
    /// Complete and restorable
    Valid,
    /// Restored successfully; kept for audit only
    Consumed,
    /// Past the retention window; no longer restorable
    Expired,
}

impl std::fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SnapshotStatus::Pending => "pending",
            SnapshotStatus::Valid => "valid",
            SnapshotStatus::Consumed => "consumed",
            SnapshotStatus::Expired => "expired",
        };
        f.write_str(label)
    }
}

/// A region of the workspace covered by a snapshot
///
/// Restoring a scope brings it back to exactly the captured state: captured files are
/// rewritten and files that appeared afterwards are removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "kebab-case")]
pub enum SnapshotScope {
    /// Every file below a directory
    Directory(PathBuf),
    /// A single file, which may not have existed at capture time
    File(PathBuf),
}

impl SnapshotScope {
    /// Workspace-relative path of the scope
    pub fn path(&self) -> &Path {
        match self {
            SnapshotScope::Directory(path) | SnapshotScope::File(path) => path,
        }
    }

    /// Whether a workspace-relative file path falls inside this scope
    pub fn covers(&self, file: &Path) -> bool {
        match self {
            SnapshotScope::Directory(dir) => file.starts_with(dir),
            SnapshotScope::File(path) => file == path,
        }
    }
}

/// One captured file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    /// Workspace-relative path of the original file
    pub path: PathBuf,
    /// Blob file name inside the snapshot directory
    pub blob: String,
    /// blake3 hash of the captured content
    pub hash: String,
    /// Captured size in bytes
    pub size: u64,
}

/// Pre-image of everything one update is about to touch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackSnapshot {
    /// Identifier of the update (or component) owning the snapshot
    pub context_update_id: String,
    /// Capture time
    pub timestamp: DateTime<Utc>,
    /// Domains whose context directories were captured
    pub affected_domains: Vec<String>,
    /// Current status
    pub status: SnapshotStatus,
    /// Regions covered by the snapshot
    pub scopes: Vec<SnapshotScope>,
    /// Captured files
    pub entries: Vec<SnapshotEntry>,
}

impl RollbackSnapshot {
    /// Number of captured files
    pub fn file_count(&self) -> usize {
        self.entries.len()
    }

    /// Total captured bytes
    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }

    /// Whether a workspace-relative file falls inside any covered scope
    pub fn covers(&self, file: &Path) -> bool {
        self.scopes.iter().any(|scope| scope.covers(file))
    }
}

pub(crate) fn hash_bytes(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

pub(crate) fn write_manifest(dir: &Path, snapshot: &RollbackSnapshot) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(snapshot)?;
    let tmp = dir.join(format!("{}.tmp", MANIFEST_FILE));
    fs::write(&tmp, bytes)
        .map_err(|e| RollbackError::store(format!("writing manifest in {:?}", dir), e))?;
    fs::rename(&tmp, dir.join(MANIFEST_FILE))
        .map_err(|e| RollbackError::store(format!("committing manifest in {:?}", dir), e))
}

pub(crate) fn read_manifest(dir: &Path) -> Result<RollbackSnapshot> {
    let bytes = fs::read(dir.join(MANIFEST_FILE))
        .map_err(|e| RollbackError::store(format!("reading manifest in {:?}", dir), e))?;
    Ok(serde_json::from_slice(&bytes)?)
}
