//! Snapshot capture, validation, restore and retention
//!
//! The store keeps one directory per snapshot:
//!
//! ```text
//! <store>/<id>/manifest.json
//! <store>/<id>/blobs/000000
//! <store>/<id>/blobs/000001
//! ```
//!
//! Captures are written to `<store>/.<id>.partial` and renamed into place only once
//! every blob and the manifest are on disk, so a snapshot is either complete or absent.

use crate::error::{Result, RollbackError};
use crate::layout::{validate_key, ContextLayout};
use crate::snapshot::{
    hash_bytes, read_manifest, write_manifest, RollbackSnapshot, SnapshotEntry, SnapshotScope,
    SnapshotStatus, BLOB_DIR,
};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Default retention for stored snapshots (7 days)
pub const DEFAULT_RETENTION_HOURS: u64 = 168;

/// Default snapshot store location, relative to the workspace root
pub const DEFAULT_STORE_DIR: &str = ".lecoord/rollback";

const PARTIAL_SUFFIX: &str = ".partial";

/// Rollback manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollbackConfig {
    /// Snapshot store directory (relative paths resolve against the workspace root)
    pub store_dir: PathBuf,

    /// Snapshots older than this many hours are no longer restorable and get purged
    pub retention_hours: u64,
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from(DEFAULT_STORE_DIR),
            retention_hours: DEFAULT_RETENTION_HOURS,
        }
    }
}

/// Outcome of a successful restore
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    /// Snapshot that was restored
    pub update_id: String,
    /// Files rewritten with their captured content
    pub restored_files: Vec<PathBuf>,
    /// Files created after the capture that were removed
    pub removed_files: Vec<PathBuf>,
}

/// Outcome of a retention pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    /// Whether anything was actually deleted
    pub dry_run: bool,
    /// Snapshots past retention (purged unless dry run)
    pub purged_snapshots: Vec<String>,
    /// Abandoned partial captures (purged unless dry run)
    pub purged_partials: usize,
    /// Snapshots left in the store
    pub retained: usize,
}

/// Captures restorable pre-images and restores them on demand
///
/// The in-memory index mirrors the manifests on disk and is rebuilt by [`RollbackManager::open`].
pub struct RollbackManager {
    layout: ContextLayout,
    store_root: PathBuf,
    retention: chrono::Duration,
    index: Mutex<BTreeMap<String, RollbackSnapshot>>,
}

impl RollbackManager {
    /// Open (or create) the snapshot store and load existing manifests
    pub fn open(layout: ContextLayout, config: &RollbackConfig) -> Result<Self> {
        let store_root = if config.store_dir.is_absolute() {
            config.store_dir.clone()
        } else {
            layout.workspace_root().join(&config.store_dir)
        };

        fs::create_dir_all(&store_root)
            .map_err(|e| RollbackError::store(format!("creating store {:?}", store_root), e))?;

        let mut index = BTreeMap::new();
        let entries = fs::read_dir(&store_root)
            .map_err(|e| RollbackError::store(format!("listing store {:?}", store_root), e))?;

        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || !entry.path().is_dir() {
                continue;
            }
            match read_manifest(&entry.path()) {
                Ok(snapshot) => {
                    index.insert(snapshot.context_update_id.clone(), snapshot);
                }
                Err(e) => warn!("Skipping unreadable snapshot {}: {}", name, e),
            }
        }

        info!(
            "Rollback store opened at {:?} ({} snapshots)",
            store_root,
            index.len()
        );

        // chrono::Duration::hours panics on overflow
        let retention_hours = config.retention_hours.min(24 * 365 * 100) as i64;

        Ok(Self {
            layout,
            store_root,
            retention: chrono::Duration::hours(retention_hours),
            index: Mutex::new(index),
        })
    }

    /// Workspace layout this manager resolves paths against
    pub fn layout(&self) -> &ContextLayout {
        &self.layout
    }

    /// Absolute snapshot store directory
    pub fn store_root(&self) -> &Path {
        &self.store_root
    }

    /// Capture the context directories of `affected_domains` under `context_update_id`
    ///
    /// Must complete before any mutation of those directories begins; an error here
    /// means nothing was stored.
    pub fn create_snapshot(
        &self,
        context_update_id: &str,
        affected_domains: &[String],
    ) -> Result<RollbackSnapshot> {
        let scopes = affected_domains
            .iter()
            .map(|domain| {
                self.layout
                    .relative_domain_dir(domain)
                    .map(SnapshotScope::Directory)
            })
            .collect::<Result<Vec<_>>>()?;

        self.capture(context_update_id, affected_domains.to_vec(), scopes)
    }

    /// Capture arbitrary files or directories under `id`
    ///
    /// Paths that do not exist yet are recorded as file scopes, so restoring removes
    /// whatever was created there afterwards.
    pub fn create_path_snapshot(&self, id: &str, paths: &[PathBuf]) -> Result<RollbackSnapshot> {
        let mut scopes = Vec::with_capacity(paths.len());
        for path in paths {
            let relative = self.layout.to_relative(path)?;
            if self.layout.to_absolute(&relative).is_dir() {
                scopes.push(SnapshotScope::Directory(relative));
            } else {
                scopes.push(SnapshotScope::File(relative));
            }
        }
        scopes.dedup();

        self.capture(id, Vec::new(), scopes)
    }

    fn capture(
        &self,
        id: &str,
        affected_domains: Vec<String>,
        scopes: Vec<SnapshotScope>,
    ) -> Result<RollbackSnapshot> {
        validate_key(id)?;

        let final_dir = self.store_root.join(id);
        if self.index.lock().contains_key(id) || final_dir.exists() {
            return Err(RollbackError::AlreadyExists(id.to_string()));
        }

        let partial_dir = self.store_root.join(format!(".{}{}", id, PARTIAL_SUFFIX));
        if partial_dir.exists() {
            fs::remove_dir_all(&partial_dir).map_err(|e| {
                RollbackError::store(format!("clearing stale capture {:?}", partial_dir), e)
            })?;
        }

        let written = self.write_partial(&partial_dir, id, affected_domains, scopes);
        let snapshot = match written {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let _ = fs::remove_dir_all(&partial_dir);
                warn!("Snapshot {} aborted before commit: {}", id, e);
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&partial_dir, &final_dir) {
            let _ = fs::remove_dir_all(&partial_dir);
            return Err(RollbackError::store(format!("committing snapshot {}", id), e));
        }

        let mut index = self.index.lock();
        if index.contains_key(id) {
            drop(index);
            let _ = fs::remove_dir_all(&final_dir);
            return Err(RollbackError::AlreadyExists(id.to_string()));
        }
        index.insert(id.to_string(), snapshot.clone());

        info!(
            "Snapshot {} captured: {} files, {} bytes",
            id,
            snapshot.file_count(),
            snapshot.total_bytes()
        );

        Ok(snapshot)
    }

    fn write_partial(
        &self,
        partial_dir: &Path,
        id: &str,
        affected_domains: Vec<String>,
        scopes: Vec<SnapshotScope>,
    ) -> Result<RollbackSnapshot> {
        let blob_dir = partial_dir.join(BLOB_DIR);
        fs::create_dir_all(&blob_dir)
            .map_err(|e| RollbackError::store(format!("creating {:?}", blob_dir), e))?;

        let mut entries = Vec::new();
        let mut seen = HashSet::new();

        for scope in &scopes {
            for relative in self.files_in_scope(scope)? {
                if !seen.insert(relative.clone()) {
                    continue;
                }

                let absolute = self.layout.to_absolute(&relative);
                let bytes = fs::read(&absolute).map_err(|source| RollbackError::Capture {
                    path: absolute.clone(),
                    source,
                })?;

                let blob = format!("{:06}", entries.len());
                fs::write(blob_dir.join(&blob), &bytes)
                    .map_err(|e| RollbackError::store(format!("writing blob {}", blob), e))?;

                entries.push(SnapshotEntry {
                    path: relative,
                    blob,
                    hash: hash_bytes(&bytes),
                    size: bytes.len() as u64,
                });
            }
        }

        let snapshot = RollbackSnapshot {
            context_update_id: id.to_string(),
            timestamp: Utc::now(),
            affected_domains,
            status: SnapshotStatus::Valid,
            scopes,
            entries,
        };

        write_manifest(partial_dir, &snapshot)?;
        Ok(snapshot)
    }

    /// Workspace-relative files currently present inside a scope, in stable order
    fn files_in_scope(&self, scope: &SnapshotScope) -> Result<Vec<PathBuf>> {
        let absolute = self.layout.to_absolute(scope.path());
        match scope {
            SnapshotScope::File(relative) => {
                if absolute.is_file() {
                    Ok(vec![relative.clone()])
                } else {
                    Ok(Vec::new())
                }
            }
            SnapshotScope::Directory(_) => {
                if !absolute.is_dir() {
                    return Ok(Vec::new());
                }
                let mut files = Vec::new();
                for entry in WalkDir::new(&absolute).sort_by_file_name() {
                    let entry = entry.map_err(|e| RollbackError::Capture {
                        path: absolute.clone(),
                        source: e.into(),
                    })?;
                    if entry.file_type().is_file() {
                        files.push(self.layout.to_relative(entry.path())?);
                    }
                }
                Ok(files)
            }
        }
    }

    /// Look up a snapshot by identifier
    pub fn get_snapshot(&self, id: &str) -> Option<RollbackSnapshot> {
        self.index.lock().get(id).cloned().map(|s| self.effective(s))
    }

    /// Check that a snapshot is present, restorable and structurally complete
    pub fn validate_rollback_data(&self, update_id: &str) -> bool {
        match self.check_integrity(update_id) {
            Ok(_) => true,
            Err(e) => {
                debug!("Rollback data for {} failed validation: {}", update_id, e);
                false
            }
        }
    }

    fn check_integrity(&self, id: &str) -> Result<RollbackSnapshot> {
        let snapshot = self
            .get_snapshot(id)
            .ok_or_else(|| RollbackError::NotFound(id.to_string()))?;

        if snapshot.status != SnapshotStatus::Valid {
            return Err(RollbackError::invalid(
                id,
                format!("snapshot is {}", snapshot.status),
            ));
        }

        let dir = self.store_root.join(id);
        let on_disk = read_manifest(&dir)
            .map_err(|e| RollbackError::invalid(id, format!("manifest unreadable: {}", e)))?;
        if on_disk.entries != snapshot.entries {
            return Err(RollbackError::invalid(id, "manifest does not match index"));
        }

        let blob_dir = dir.join(BLOB_DIR);
        let stored: BTreeSet<String> = fs::read_dir(&blob_dir)
            .map_err(|e| RollbackError::invalid(id, format!("blob directory unreadable: {}", e)))?
            .flatten()
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        let expected: BTreeSet<String> = snapshot.entries.iter().map(|e| e.blob.clone()).collect();

        if stored != expected {
            return Err(RollbackError::invalid(
                id,
                format!(
                    "captured file list mismatch ({} expected, {} stored)",
                    expected.len(),
                    stored.len()
                ),
            ));
        }

        Ok(snapshot)
    }

    /// Restore every captured file and remove files created since the capture
    ///
    /// All blobs are loaded and verified before the first write. A failed write is
    /// returned as [`RollbackError::RestoreWrite`]; the snapshot stays valid so the
    /// failure can be handled manually.
    pub fn execute_holistic_rollback(&self, update_id: &str) -> Result<RestoreReport> {
        let snapshot = self.check_integrity(update_id)?;
        let blob_dir = self.store_root.join(update_id).join(BLOB_DIR);

        let mut staged = Vec::with_capacity(snapshot.entries.len());
        for entry in &snapshot.entries {
            let bytes = fs::read(blob_dir.join(&entry.blob)).map_err(|e| {
                RollbackError::invalid(update_id, format!("blob {} unreadable: {}", entry.blob, e))
            })?;
            if hash_bytes(&bytes) != entry.hash {
                return Err(RollbackError::invalid(
                    update_id,
                    format!("content hash mismatch for {:?}", entry.path),
                ));
            }
            staged.push((entry.path.clone(), bytes));
        }

        let captured: HashSet<&PathBuf> = snapshot.entries.iter().map(|e| &e.path).collect();
        let mut stale = Vec::new();
        for scope in &snapshot.scopes {
            let current = self.files_in_scope(scope).map_err(|e| {
                RollbackError::invalid(update_id, format!("scope unreadable: {}", e))
            })?;
            stale.extend(current.into_iter().filter(|path| !captured.contains(path)));
        }

        let mut restored_files = Vec::with_capacity(staged.len());
        for (relative, bytes) in staged {
            let absolute = self.layout.to_absolute(&relative);
            if let Err(source) = write_atomically(&absolute, &bytes) {
                error!(
                    "Restore of {} failed at {:?}; manual intervention required",
                    update_id, absolute
                );
                return Err(RollbackError::RestoreWrite {
                    path: absolute,
                    source,
                });
            }
            restored_files.push(relative);
        }

        let mut removed_files = Vec::with_capacity(stale.len());
        for relative in stale {
            let absolute = self.layout.to_absolute(&relative);
            if let Err(source) = fs::remove_file(&absolute) {
                error!(
                    "Restore of {} could not remove {:?}; manual intervention required",
                    update_id, absolute
                );
                return Err(RollbackError::RestoreWrite {
                    path: absolute,
                    source,
                });
            }
            removed_files.push(relative);
        }

        self.set_status(update_id, SnapshotStatus::Consumed)?;

        info!(
            "Snapshot {} restored: {} rewritten, {} removed",
            update_id,
            restored_files.len(),
            removed_files.len()
        );

        Ok(RestoreReport {
            update_id: update_id.to_string(),
            restored_files,
            removed_files,
        })
    }

    /// Snapshots that are still restorable, oldest first
    pub fn get_pending_rollbacks(&self) -> Vec<RollbackSnapshot> {
        let mut pending: Vec<RollbackSnapshot> = self
            .index
            .lock()
            .values()
            .cloned()
            .map(|s| self.effective(s))
            .filter(|s| matches!(s.status, SnapshotStatus::Pending | SnapshotStatus::Valid))
            .collect();
        pending.sort_by_key(|s| s.timestamp);
        pending
    }

    /// Drop a snapshot that is confirmed unnecessary
    pub fn discard_snapshot(&self, id: &str) -> Result<()> {
        if self.index.lock().remove(id).is_none() {
            return Err(RollbackError::NotFound(id.to_string()));
        }
        let dir = self.store_root.join(id);
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .map_err(|e| RollbackError::store(format!("removing snapshot {}", id), e))?;
        }
        debug!("Snapshot {} discarded", id);
        Ok(())
    }

    /// Purge snapshots past retention and abandoned partial captures
    pub fn perform_maintenance(&self, dry_run: bool) -> Result<MaintenanceReport> {
        let cutoff = Utc::now() - self.retention;

        let purged_snapshots: Vec<String> = self
            .index
            .lock()
            .values()
            .filter(|s| s.timestamp < cutoff)
            .map(|s| s.context_update_id.clone())
            .collect();

        let partials: Vec<PathBuf> = fs::read_dir(&self.store_root)
            .map_err(|e| RollbackError::store("listing store for maintenance", e))?
            .flatten()
            .filter(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                name.starts_with('.') && name.ends_with(PARTIAL_SUFFIX)
            })
            .map(|entry| entry.path())
            .collect();

        if !dry_run {
            for id in &purged_snapshots {
                let dir = self.store_root.join(id);
                match fs::remove_dir_all(&dir) {
                    Ok(()) => {
                        self.index.lock().remove(id);
                    }
                    Err(e) => {
                        warn!("Could not purge snapshot {}: {}", id, e);
                        if let Some(snapshot) = self.index.lock().get_mut(id) {
                            snapshot.status = SnapshotStatus::Expired;
                        }
                    }
                }
            }
            for partial in &partials {
                if let Err(e) = fs::remove_dir_all(partial) {
                    warn!("Could not purge partial capture {:?}: {}", partial, e);
                }
            }
        }

        let retained = self.index.lock().len();
        info!(
            "Rollback maintenance{}: {} snapshots, {} partials past retention",
            if dry_run { " (dry run)" } else { "" },
            purged_snapshots.len(),
            partials.len()
        );

        Ok(MaintenanceReport {
            dry_run,
            purged_snapshots,
            purged_partials: partials.len(),
            retained,
        })
    }

    fn set_status(&self, id: &str, status: SnapshotStatus) -> Result<()> {
        let mut index = self.index.lock();
        let snapshot = index
            .get_mut(id)
            .ok_or_else(|| RollbackError::NotFound(id.to_string()))?;
        snapshot.status = status;
        write_manifest(&self.store_root.join(id), snapshot)
    }

    /// Report valid snapshots past retention as expired
    fn effective(&self, mut snapshot: RollbackSnapshot) -> RollbackSnapshot {
        if snapshot.status == SnapshotStatus::Valid
            && snapshot.timestamp < Utc::now() - self.retention
        {
            snapshot.status = SnapshotStatus::Expired;
        }
        snapshot
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.lecoord-tmp", file_name));
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, RollbackManager) {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = ContextLayout::with_default_context(dir.path());
        let manager = RollbackManager::open(layout, &RollbackConfig::default()).expect("open");
        (dir, manager)
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, content).expect("write");
    }

    #[test]
    fn test_restore_brings_back_prior_content_and_removes_new_files() {
        let (dir, manager) = setup();
        write(dir.path(), ".context/Analysis/CONTEXT.md", "original");
        write(dir.path(), ".context/Analysis/nested/extra.md", "keep me");

        let snapshot = manager
            .create_snapshot("update-1", &["Analysis".to_string()])
            .expect("snapshot");
        assert_eq!(snapshot.file_count(), 2);
        assert_eq!(snapshot.status, SnapshotStatus::Valid);

        write(dir.path(), ".context/Analysis/CONTEXT.md", "regenerated");
        write(dir.path(), ".context/Analysis/NEW.md", "new file");
        fs::remove_file(dir.path().join(".context/Analysis/nested/extra.md")).expect("rm");

        let report = manager.execute_holistic_rollback("update-1").expect("restore");
        assert_eq!(report.restored_files.len(), 2);
        assert_eq!(report.removed_files, vec![PathBuf::from(".context/Analysis/NEW.md")]);

        assert_eq!(
            fs::read_to_string(dir.path().join(".context/Analysis/CONTEXT.md")).unwrap(),
            "original"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join(".context/Analysis/nested/extra.md")).unwrap(),
            "keep me"
        );
        assert!(!dir.path().join(".context/Analysis/NEW.md").exists());
        assert_eq!(
            manager.get_snapshot("update-1").unwrap().status,
            SnapshotStatus::Consumed
        );
    }

    #[test]
    fn test_snapshot_of_missing_domain_restores_to_empty() {
        let (dir, manager) = setup();
        manager
            .create_snapshot("update-2", &["Fresh".to_string()])
            .expect("snapshot");

        write(dir.path(), ".context/Fresh/CONTEXT.md", "generated");
        manager.execute_holistic_rollback("update-2").expect("restore");

        assert!(!dir.path().join(".context/Fresh/CONTEXT.md").exists());
    }

    #[test]
    fn test_duplicate_snapshot_rejected() {
        let (_dir, manager) = setup();
        manager.create_snapshot("dup", &[]).expect("first");
        let err = manager.create_snapshot("dup", &[]).unwrap_err();
        assert!(matches!(err, RollbackError::AlreadyExists(_)));
    }

    #[test]
    fn test_validation_fails_when_blob_missing() {
        let (dir, manager) = setup();
        write(dir.path(), ".context/Analysis/CONTEXT.md", "original");
        manager
            .create_snapshot("update-3", &["Analysis".to_string()])
            .expect("snapshot");
        assert!(manager.validate_rollback_data("update-3"));

        fs::remove_file(manager.store_root().join("update-3/blobs/000000")).expect("rm blob");
        assert!(!manager.validate_rollback_data("update-3"));

        write(dir.path(), ".context/Analysis/CONTEXT.md", "changed");
        let err = manager.execute_holistic_rollback("update-3").unwrap_err();
        assert!(matches!(err, RollbackError::Invalid { .. }));
        assert_eq!(
            fs::read_to_string(dir.path().join(".context/Analysis/CONTEXT.md")).unwrap(),
            "changed",
            "failed validation must not touch workspace files"
        );
    }

    #[test]
    fn test_tampered_blob_detected_before_any_write() {
        let (dir, manager) = setup();
        write(dir.path(), ".context/Analysis/a.md", "a");
        write(dir.path(), ".context/Analysis/b.md", "b");
        manager
            .create_snapshot("update-4", &["Analysis".to_string()])
            .expect("snapshot");

        fs::write(manager.store_root().join("update-4/blobs/000001"), "tampered").expect("write");
        write(dir.path(), ".context/Analysis/a.md", "a2");

        assert!(manager.execute_holistic_rollback("update-4").is_err());
        assert_eq!(
            fs::read_to_string(dir.path().join(".context/Analysis/a.md")).unwrap(),
            "a2"
        );
    }

    #[test]
    fn test_consumed_snapshot_not_pending() {
        let (_dir, manager) = setup();
        manager.create_snapshot("a", &[]).expect("a");
        manager.create_snapshot("b", &[]).expect("b");
        manager.execute_holistic_rollback("a").expect("restore");

        let pending: Vec<String> = manager
            .get_pending_rollbacks()
            .into_iter()
            .map(|s| s.context_update_id)
            .collect();
        assert_eq!(pending, vec!["b".to_string()]);
        assert!(!manager.validate_rollback_data("a"));
    }

    #[test]
    fn test_maintenance_dry_run_keeps_snapshots() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = ContextLayout::with_default_context(dir.path());
        let config = RollbackConfig {
            retention_hours: 0,
            ..RollbackConfig::default()
        };
        let manager = RollbackManager::open(layout, &config).expect("open");
        manager.create_snapshot("old", &[]).expect("snapshot");
        fs::create_dir_all(manager.store_root().join(".abandoned.partial")).expect("mkdir");

        std::thread::sleep(std::time::Duration::from_millis(5));

        let dry = manager.perform_maintenance(true).expect("dry run");
        assert!(dry.dry_run);
        assert_eq!(dry.purged_snapshots, vec!["old".to_string()]);
        assert_eq!(dry.purged_partials, 1);
        assert!(manager.store_root().join("old").exists());

        let real = manager.perform_maintenance(false).expect("maintenance");
        assert_eq!(real.purged_snapshots, vec!["old".to_string()]);
        assert_eq!(real.retained, 0);
        assert!(!manager.store_root().join("old").exists());
        assert!(!manager.store_root().join(".abandoned.partial").exists());
    }

    #[test]
    fn test_path_snapshot_outside_workspace_rejected() {
        let (_dir, manager) = setup();
        let err = manager
            .create_path_snapshot("bad", &[PathBuf::from("../outside.md")])
            .unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
        assert!(!manager.store_root().join("bad").exists());
    }
}
