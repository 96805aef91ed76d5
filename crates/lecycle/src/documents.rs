//! Document operations on the filesystem

use crate::plan::DocumentOperationKind;
use anyhow::{bail, Context};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Executes document operations
///
/// `affected_paths` must list every workspace-relative path `execute` may create,
/// modify or remove, so the coordinator can snapshot them first.
pub trait DocumentExecutor: Send + Sync {
    fn affected_paths(&self, kind: &DocumentOperationKind) -> Vec<PathBuf>;

    fn execute(&self, kind: &DocumentOperationKind) -> anyhow::Result<()>;
}

/// Moves and rewrites markdown documents inside a workspace
#[derive(Debug, Clone)]
pub struct FsDocumentExecutor {
    workspace_root: PathBuf,
    docs_root: PathBuf,
    archive_dir: PathBuf,
}

impl FsDocumentExecutor {
    pub fn new(
        workspace_root: impl Into<PathBuf>,
        docs_root: impl Into<PathBuf>,
        archive_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            docs_root: docs_root.into(),
            archive_dir: archive_dir.into(),
        }
    }

    /// Archive location of a document, mirroring its place below the docs root
    pub fn archive_path(&self, source: &Path) -> PathBuf {
        let below = source.strip_prefix(&self.docs_root).unwrap_or(source);
        self.archive_dir.join(below)
    }

    fn absolute(&self, relative: &Path) -> PathBuf {
        self.workspace_root.join(relative)
    }

    fn move_file(&self, from: &Path, to: &Path) -> anyhow::Result<()> {
        let (src, dst) = (self.absolute(from), self.absolute(to));
        if !src.is_file() {
            bail!("document not found: {}", from.display());
        }
        if dst.exists() {
            bail!("destination already exists: {}", to.display());
        }
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        fs::rename(&src, &dst)
            .with_context(|| format!("moving {} to {}", from.display(), to.display()))?;
        debug!("Moved {:?} -> {:?}", from, to);
        Ok(())
    }
}

impl DocumentExecutor for FsDocumentExecutor {
    fn affected_paths(&self, kind: &DocumentOperationKind) -> Vec<PathBuf> {
        match kind {
            DocumentOperationKind::Migrate {
                source,
                target,
                archive_original,
            } => {
                let mut paths = vec![source.clone(), target.clone()];
                if *archive_original {
                    paths.push(self.archive_path(source));
                }
                paths
            }
            DocumentOperationKind::Archive { source } => {
                vec![source.clone(), self.archive_path(source)]
            }
            DocumentOperationKind::Restructure { source, target } => {
                vec![source.clone(), target.clone()]
            }
            DocumentOperationKind::RewriteReferences { document, .. } => vec![document.clone()],
        }
    }

    fn execute(&self, kind: &DocumentOperationKind) -> anyhow::Result<()> {
        match kind {
            DocumentOperationKind::Migrate {
                source,
                target,
                archive_original,
            } => {
                let (src, dst) = (self.absolute(source), self.absolute(target));
                if !src.is_file() {
                    bail!("document not found: {}", source.display());
                }
                if dst.exists() {
                    bail!("destination already exists: {}", target.display());
                }
                if let Some(parent) = dst.parent() {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("creating {}", parent.display()))?;
                }
                fs::copy(&src, &dst).with_context(|| {
                    format!("copying {} to {}", source.display(), target.display())
                })?;
                if *archive_original {
                    self.move_file(source, &self.archive_path(source))?;
                }
                Ok(())
            }
            DocumentOperationKind::Archive { source } => {
                self.move_file(source, &self.archive_path(source))
            }
            DocumentOperationKind::Restructure { source, target } => {
                self.move_file(source, target)
            }
            DocumentOperationKind::RewriteReferences {
                document,
                replacements,
            } => {
                let path = self.absolute(document);
                let mut content = fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", document.display()))?;
                for (from, to) in replacements {
                    content = content.replace(from.as_str(), to);
                }
                let tmp = path.with_extension("lecoord-tmp");
                fs::write(&tmp, content).with_context(|| format!("writing {}", tmp.display()))?;
                fs::rename(&tmp, &path)
                    .with_context(|| format!("replacing {}", document.display()))?;
                Ok(())
            }
        }
    }
}
