// Engine Configuration
//
// *La Configuration* (The Configuration) - one settings file per workspace

use anyhow::{bail, Context, Result};
use lecontexte::HolisticConfig;
use lecycle::CoordinationConfig;
use lereprise::RollbackConfig;
use letravail::JobsConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Directory holding engine state, relative to the workspace root
pub const STATE_DIR: &str = ".lecoord";

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = ".lecoord/config.toml";

/// Engine configuration
///
/// Every section falls back to its defaults when missing from the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Snapshot store settings
    pub rollback: RollbackConfig,

    /// Background job settings
    pub jobs: JobsConfig,

    /// Holistic context update settings
    pub holistic: HolisticConfig,

    /// Lifecycle coordination settings
    pub coordination: CoordinationConfig,
}

impl EngineConfig {
    /// Path of the configuration file inside `workspace`
    pub fn path<P: AsRef<Path>>(workspace: P) -> PathBuf {
        workspace.as_ref().join(DEFAULT_CONFIG_FILE)
    }

    /// Load configuration from a workspace
    ///
    /// Looks for `.lecoord/config.toml` in the workspace directory.
    /// If not found, returns default configuration.
    pub fn load<P: AsRef<Path>>(workspace: P) -> Result<Self> {
        let config_path = Self::path(workspace);

        if !config_path.exists() {
            return Ok(EngineConfig::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        let config: EngineConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {:?}", config_path))?;

        Ok(config)
    }

    /// Save configuration to a workspace
    ///
    /// Creates the `.lecoord` directory if it doesn't exist.
    pub fn save<P: AsRef<Path>>(&self, workspace: P) -> Result<PathBuf> {
        let config_dir = workspace.as_ref().join(STATE_DIR);
        fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config directory: {:?}", config_dir))?;

        let config_path = Self::path(workspace);
        let toml_string =
            toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(&config_path, toml_string)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(config_path)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let paths = [
            ("rollback.store_dir", &self.rollback.store_dir),
            ("holistic.context_dir", &self.holistic.context_dir),
            ("coordination.docs_root", &self.coordination.docs_root),
            ("coordination.archive_dir", &self.coordination.archive_dir),
            ("coordination.registry_file", &self.coordination.registry_file),
        ];
        for (name, path) in paths {
            if path.as_os_str().is_empty() {
                bail!("{} must not be empty", name);
            }
        }

        if self.jobs.max_concurrent_jobs == 0 {
            bail!("jobs.max_concurrent_jobs must be at least 1");
        }
        if self.jobs.history_limit == 0 {
            bail!("jobs.history_limit must be at least 1");
        }
        if self.holistic.batch_size == 0 {
            bail!("holistic.batch_size must be at least 1");
        }
        if self.holistic.default_timeout_secs == 0 {
            bail!("holistic.default_timeout_secs must be at least 1");
        }
        if self.coordination.minimum_approvals == 0 {
            bail!("coordination.minimum_approvals must be at least 1");
        }
        if self.coordination.approval_poll_interval_ms == 0 {
            bail!("coordination.approval_poll_interval_ms must be at least 1");
        }
        if self.coordination.event_capacity == 0 {
            bail!("coordination.event_capacity must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::load(dir.path()).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.rollback.retention_hours, 168);
        assert_eq!(config.jobs.max_concurrent_jobs, 4);
        assert_eq!(config.holistic.batch_size, 50);
        assert_eq!(config.holistic.default_timeout_secs, 15);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.coordination.minimum_approvals = 2;
        config.holistic.source_roots = vec![PathBuf::from("src")];

        let path = config.save(dir.path()).unwrap();
        assert!(path.ends_with("config.toml"));

        let loaded = EngineConfig::load(dir.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(STATE_DIR)).unwrap();
        fs::write(
            EngineConfig::path(dir.path()),
            "[coordination]\nminimum_approvals = 3\n",
        )
        .unwrap();

        let config = EngineConfig::load(dir.path()).unwrap();
        assert_eq!(config.coordination.minimum_approvals, 3);
        assert_eq!(config.coordination.approval_timeout_secs, 3600);
        assert_eq!(config.jobs, JobsConfig::default());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = EngineConfig::default();
        config.holistic.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.jobs.max_concurrent_jobs = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.coordination.docs_root = PathBuf::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(STATE_DIR)).unwrap();
        fs::write(EngineConfig::path(dir.path()), "[holistic]\nbatch_size = 0\n").unwrap();
        assert!(EngineConfig::load(dir.path()).is_err());
    }
}
