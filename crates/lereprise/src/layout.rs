//! Workspace and context directory layout

use crate::error::{Result, RollbackError};
use std::path::{Component, Path, PathBuf};

/// Default directory (relative to the workspace root) holding generated context
pub const DEFAULT_CONTEXT_DIR: &str = ".context";

/// Where a workspace keeps its generated per-domain context
///
/// All paths handed to the rollback manager are normalised against the workspace
/// root; anything resolving outside of it is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextLayout {
    workspace_root: PathBuf,
    context_dir: PathBuf,
}

impl ContextLayout {
    /// Create a layout with the context directory relative to `workspace_root`
    pub fn new(workspace_root: impl Into<PathBuf>, context_dir: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            context_dir: context_dir.into(),
        }
    }

    /// Layout using [`DEFAULT_CONTEXT_DIR`]
    pub fn with_default_context(workspace_root: impl Into<PathBuf>) -> Self {
        Self::new(workspace_root, DEFAULT_CONTEXT_DIR)
    }

    /// Workspace root directory
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Context directory relative to the workspace root
    pub fn context_dir(&self) -> &Path {
        &self.context_dir
    }

    /// Absolute context root
    pub fn context_root(&self) -> PathBuf {
        self.workspace_root.join(&self.context_dir)
    }

    /// Context directory of one domain, relative to the workspace root
    pub fn relative_domain_dir(&self, domain: &str) -> Result<PathBuf> {
        validate_key(domain)?;
        Ok(self.context_dir.join(domain))
    }

    /// Absolute context directory of one domain
    pub fn domain_dir(&self, domain: &str) -> Result<PathBuf> {
        Ok(self.workspace_root.join(self.relative_domain_dir(domain)?))
    }

    /// Normalise a path to be relative to the workspace root
    pub fn to_relative(&self, path: &Path) -> Result<PathBuf> {
        let candidate = if path.is_absolute() {
            path.strip_prefix(&self.workspace_root)
                .map_err(|_| RollbackError::OutsideWorkspace(path.to_path_buf()))?
                .to_path_buf()
        } else {
            path.to_path_buf()
        };

        let mut normalised = PathBuf::new();
        for component in candidate.components() {
            match component {
                Component::Normal(part) => normalised.push(part),
                Component::CurDir => {}
                _ => return Err(RollbackError::OutsideWorkspace(path.to_path_buf())),
            }
        }

        if normalised.as_os_str().is_empty() {
            return Err(RollbackError::OutsideWorkspace(path.to_path_buf()));
        }

        Ok(normalised)
    }

    /// Resolve a workspace-relative path to an absolute one
    pub fn to_absolute(&self, relative: &Path) -> PathBuf {
        self.workspace_root.join(relative)
    }
}

/// Check that a key is usable as a single directory name
pub(crate) fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(RollbackError::InvalidKey(key.to_string()))
    }
}
