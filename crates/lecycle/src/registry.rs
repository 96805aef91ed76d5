//! Capability registry
//!
//! The registry maps placeholder IDs to the final capability IDs they were converted
//! to, and both to the document describing them.

use crate::error::{CoordinationError, Result};
use crate::plan::RegistryOperationKind;
use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Storage for placeholder and capability records
pub trait RegistryStore: Send + Sync {
    /// Workspace-relative files `apply` may modify
    fn registry_paths(&self) -> Vec<PathBuf>;

    /// Allocate final capability IDs, one per placeholder, without recording them
    fn propose_capability_ids(&self, placeholder_ids: &[String], domain: &str)
        -> Result<Vec<String>>;

    fn apply(&self, kind: &RegistryOperationKind) -> anyhow::Result<()>;
}

/// Conversion state of a placeholder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceholderState {
    Pending,
    Converted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceholderRecord {
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_path: Option<PathBuf>,
    pub status: PlaceholderState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityRecord {
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub converted_from: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// On-disk registry document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Registry {
    pub capabilities: BTreeMap<String, CapabilityRecord>,
    pub placeholders: BTreeMap<String, PlaceholderRecord>,
}

/// Registry kept in a single pretty-printed JSON file
pub struct JsonRegistryStore {
    workspace_root: PathBuf,
    registry_file: PathBuf,
    lock: Mutex<()>,
}

impl JsonRegistryStore {
    /// `registry_file` is relative to `workspace_root`
    pub fn new(workspace_root: impl Into<PathBuf>, registry_file: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            registry_file: registry_file.into(),
            lock: Mutex::new(()),
        }
    }

    fn path(&self) -> PathBuf {
        self.workspace_root.join(&self.registry_file)
    }

    /// Current registry content; a missing file is an empty registry
    pub fn load(&self) -> anyhow::Result<Registry> {
        let path = self.path();
        if !path.exists() {
            return Ok(Registry::default());
        }
        let raw =
            fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    fn save(&self, registry: &Registry) -> anyhow::Result<()> {
        let path = self.path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(registry)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }

    /// Record a new pending placeholder
    pub fn register_placeholder(
        &self,
        placeholder_id: &str,
        domain: &str,
        document_path: Option<&Path>,
    ) -> anyhow::Result<()> {
        let _guard = self.lock.lock();
        let mut registry = self.load()?;
        if registry.placeholders.contains_key(placeholder_id) {
            bail!("placeholder {} already registered", placeholder_id);
        }
        registry.placeholders.insert(
            placeholder_id.to_string(),
            PlaceholderRecord {
                domain: domain.to_string(),
                document_path: document_path.map(Path::to_path_buf),
                status: PlaceholderState::Pending,
                capability_id: None,
            },
        );
        self.save(&registry)
    }
}

/// `CAP-<DOMAIN>-` with the domain upper-cased and non-alphanumerics dashed
pub fn capability_prefix(domain: &str) -> String {
    let domain: String = domain
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '-'
            }
        })
        .collect();
    format!("CAP-{}-", domain)
}

impl RegistryStore for JsonRegistryStore {
    fn registry_paths(&self) -> Vec<PathBuf> {
        vec![self.registry_file.clone()]
    }

    fn propose_capability_ids(
        &self,
        placeholder_ids: &[String],
        domain: &str,
    ) -> Result<Vec<String>> {
        let registry = {
            let _guard = self.lock.lock();
            self.load()?
        };

        for id in placeholder_ids {
            match registry.placeholders.get(id) {
                None => {
                    return Err(CoordinationError::Validation(format!(
                        "unknown placeholder: {}",
                        id
                    )))
                }
                Some(record) if record.status != PlaceholderState::Pending => {
                    return Err(CoordinationError::Validation(format!(
                        "placeholder {} was already converted",
                        id
                    )))
                }
                Some(_) => {}
            }
        }

        let prefix = capability_prefix(domain);
        let highest = registry
            .capabilities
            .keys()
            .filter_map(|id| id.strip_prefix(&prefix))
            .filter_map(|n| n.parse::<u32>().ok())
            .max()
            .unwrap_or(0);

        Ok((1..=placeholder_ids.len() as u32)
            .map(|n| format!("{}{:03}", prefix, highest + n))
            .collect())
    }

    fn apply(&self, kind: &RegistryOperationKind) -> anyhow::Result<()> {
        let _guard = self.lock.lock();
        let mut registry = self.load()?;

        match kind {
            RegistryOperationKind::ConvertPlaceholder {
                placeholder_id,
                capability_id,
                domain,
                document_path,
            } => {
                if registry.capabilities.contains_key(capability_id) {
                    bail!("capability {} already exists", capability_id);
                }
                let Some(placeholder) = registry.placeholders.get_mut(placeholder_id) else {
                    bail!("unknown placeholder: {}", placeholder_id);
                };
                if placeholder.status != PlaceholderState::Pending {
                    bail!("placeholder {} was already converted", placeholder_id);
                }

                placeholder.status = PlaceholderState::Converted;
                placeholder.capability_id = Some(capability_id.clone());
                if document_path.is_some() {
                    placeholder.document_path = document_path.clone();
                }
                let document_path = placeholder.document_path.clone();

                registry.capabilities.insert(
                    capability_id.clone(),
                    CapabilityRecord {
                        domain: domain.clone(),
                        document_path,
                        converted_from: Some(placeholder_id.clone()),
                        created_at: Utc::now(),
                    },
                );
                debug!("Converted {} -> {}", placeholder_id, capability_id);
            }
            RegistryOperationKind::UpdateDocumentPath { from, to } => {
                let mut updated = 0;
                for record in registry.capabilities.values_mut() {
                    if record.document_path.as_ref() == Some(from) {
                        record.document_path = Some(to.clone());
                        updated += 1;
                    }
                }
                for record in registry.placeholders.values_mut() {
                    if record.document_path.as_ref() == Some(from) {
                        record.document_path = Some(to.clone());
                        updated += 1;
                    }
                }
                debug!("Re-pointed {} registry entries {:?} -> {:?}", updated, from, to);
            }
        }

        self.save(&registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, JsonRegistryStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonRegistryStore::new(dir.path(), "docs/capability-registry.json");
        (dir, store)
    }

    #[test]
    fn test_propose_continues_numbering() {
        let (_dir, store) = store();
        store.register_placeholder("PH-1", "Analysis", None).unwrap();
        store.register_placeholder("PH-2", "Analysis", None).unwrap();
        store
            .apply(&RegistryOperationKind::ConvertPlaceholder {
                placeholder_id: "PH-1".into(),
                capability_id: "CAP-ANALYSIS-007".into(),
                domain: "Analysis".into(),
                document_path: None,
            })
            .unwrap();

        let ids = store
            .propose_capability_ids(&["PH-2".to_string()], "Analysis")
            .unwrap();
        assert_eq!(ids, vec!["CAP-ANALYSIS-008".to_string()]);
    }

    #[test]
    fn test_propose_rejects_unknown_or_converted() {
        let (_dir, store) = store();
        let err = store
            .propose_capability_ids(&["PH-9".to_string()], "Analysis")
            .unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
    }

    #[test]
    fn test_convert_then_repath() {
        let (_dir, store) = store();
        store
            .register_placeholder("PH-1", "NewConcepts", Some(Path::new("docs/NewConcepts/a.md")))
            .unwrap();
        store
            .apply(&RegistryOperationKind::ConvertPlaceholder {
                placeholder_id: "PH-1".into(),
                capability_id: "CAP-ANALYSIS-001".into(),
                domain: "Analysis".into(),
                document_path: None,
            })
            .unwrap();
        store
            .apply(&RegistryOperationKind::UpdateDocumentPath {
                from: "docs/NewConcepts/a.md".into(),
                to: "docs/Analysis/a.md".into(),
            })
            .unwrap();

        let registry = store.load().unwrap();
        let cap = &registry.capabilities["CAP-ANALYSIS-001"];
        assert_eq!(cap.document_path, Some(PathBuf::from("docs/Analysis/a.md")));
        assert_eq!(cap.converted_from.as_deref(), Some("PH-1"));
        assert_eq!(
            registry.placeholders["PH-1"].status,
            PlaceholderState::Converted
        );

        // a second conversion of the same placeholder fails
        assert!(store
            .apply(&RegistryOperationKind::ConvertPlaceholder {
                placeholder_id: "PH-1".into(),
                capability_id: "CAP-ANALYSIS-002".into(),
                domain: "Analysis".into(),
                document_path: None,
            })
            .is_err());
    }

    #[test]
    fn test_capability_prefix() {
        assert_eq!(capability_prefix("data flow"), "CAP-DATA-FLOW-");
    }
}
