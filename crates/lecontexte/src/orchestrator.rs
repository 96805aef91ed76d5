//! Holistic update orchestration
//!
//! One update resolves its changed files to domains, snapshots those domains' context
//! directories, then regenerates every domain from scratch. Any failure, including a
//! blown budget, restores the snapshot before the result is returned.

use crate::collaborators::{
    ContentGenerator, DomainResolver, GeneratedArtifact, PathSegmentResolver, SourceFile,
    SummaryContentGenerator,
};
use crate::error::{Result, UpdateError, UpdateErrorKind};
use crate::update::{HolisticUpdateRequest, HolisticUpdateResult, PerformanceMetrics};
use chrono::Utc;
use lereprise::{MaintenanceReport, RestoreReport, RollbackManager, DEFAULT_CONTEXT_DIR};
use letravail::CancellationToken;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Files per inventory batch
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Default performance budget in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Update results kept for status queries
pub const DEFAULT_UPDATE_HISTORY: usize = 100;

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HolisticConfig {
    /// Directory (relative to the workspace root) holding per-domain context
    pub context_dir: PathBuf,

    /// Workspace-relative source roots; empty means the workspace root itself
    pub source_roots: Vec<PathBuf>,

    /// Directory names never scanned for sources
    pub exclude_dirs: Vec<String>,

    /// Files per inventory batch
    pub batch_size: usize,

    /// Budget applied when a caller does not supply one
    pub default_timeout_secs: u64,

    /// Update results kept for status queries
    pub history_limit: usize,

    /// Update results older than this are trimmed by maintenance
    pub retention_hours: u64,
}

impl Default for HolisticConfig {
    fn default() -> Self {
        Self {
            context_dir: PathBuf::from(DEFAULT_CONTEXT_DIR),
            source_roots: Vec::new(),
            exclude_dirs: vec!["target".to_string(), "node_modules".to_string()],
            batch_size: DEFAULT_BATCH_SIZE,
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            history_limit: DEFAULT_UPDATE_HISTORY,
            retention_hours: lereprise::DEFAULT_RETENTION_HOURS,
        }
    }
}

impl HolisticConfig {
    /// Budget applied when a caller does not supply one
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }
}

/// Orchestrator maintenance outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HolisticMaintenanceReport {
    /// Whether anything was actually removed
    pub dry_run: bool,
    /// Snapshot store maintenance
    pub rollback: MaintenanceReport,
    /// Update results past retention
    pub trimmed_history: usize,
}

/// Soft deadline plus optional cancellation, checked at batch and domain boundaries
pub(crate) struct Budget<'a> {
    start: Instant,
    timeout: Duration,
    token: Option<&'a CancellationToken>,
}

impl<'a> Budget<'a> {
    pub(crate) fn new(timeout: Duration, token: Option<&'a CancellationToken>) -> Self {
        Self {
            start: Instant::now(),
            timeout,
            token,
        }
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.token.is_some_and(|t| t.is_cancelled()) {
            return Err(UpdateError::cancelled());
        }
        if self.elapsed() > self.timeout {
            return Err(UpdateError::timeout(format!(
                "performance budget of {} ms exceeded",
                self.timeout.as_millis()
            )));
        }
        Ok(())
    }

    pub(crate) async fn checkpoint(&self) -> Result<()> {
        tokio::task::yield_now().await;
        self.check()
    }
}

/// Exclusive hold on a set of domains; released on drop
pub(crate) struct DomainClaim<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    domains: Vec<String>,
}

impl Drop for DomainClaim<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock();
        for domain in &self.domains {
            in_flight.remove(domain);
        }
    }
}

struct UpdateRun<'a> {
    update_id: String,
    affected_domains: Vec<String>,
    updated_files: Vec<PathBuf>,
    metrics: PerformanceMetrics,
    snapshot_taken: bool,
    // held until the outcome is concluded, restore included
    claim: Option<DomainClaim<'a>>,
}

/// Regenerates affected-domain context atomically under a time budget
pub struct HolisticUpdateOrchestrator {
    pub(crate) config: HolisticConfig,
    pub(crate) rollback: Arc<RollbackManager>,
    pub(crate) resolver: Arc<dyn DomainResolver>,
    pub(crate) generator: Arc<dyn ContentGenerator>,
    history: Mutex<VecDeque<HolisticUpdateResult>>,
    in_flight: Mutex<HashSet<String>>,
}

impl HolisticUpdateOrchestrator {
    /// Build an orchestrator with explicit collaborators
    pub fn new(
        config: HolisticConfig,
        rollback: Arc<RollbackManager>,
        resolver: Arc<dyn DomainResolver>,
        generator: Arc<dyn ContentGenerator>,
    ) -> Self {
        Self {
            config,
            rollback,
            resolver,
            generator,
            history: Mutex::new(VecDeque::new()),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Orchestrator using [`PathSegmentResolver`] and [`SummaryContentGenerator`]
    pub fn with_defaults(config: HolisticConfig, rollback: Arc<RollbackManager>) -> Self {
        let resolver = PathSegmentResolver::new(
            rollback.layout().workspace_root(),
            config.source_roots.clone(),
        );
        Self::new(
            config,
            rollback,
            Arc::new(resolver),
            Arc::new(SummaryContentGenerator),
        )
    }

    /// Active configuration
    pub fn config(&self) -> &HolisticConfig {
        &self.config
    }

    /// Rollback manager holding this orchestrator's snapshots
    pub fn rollback_manager(&self) -> &Arc<RollbackManager> {
        &self.rollback
    }

    /// Domains a set of paths resolves to, sorted and deduplicated
    pub fn resolve_domains(&self, paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .filter_map(|path| self.resolver.resolve(path))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Regenerate the context of every domain touched by `request.changed_files`
    ///
    /// Never reports success with an execution time above the request's budget; a
    /// failed or cancelled update is rolled back before returning.
    pub async fn execute_holistic_update(
        &self,
        request: HolisticUpdateRequest,
        token: Option<&CancellationToken>,
    ) -> HolisticUpdateResult {
        let budget = Budget::new(request.performance_timeout, token);
        let mut run = UpdateRun {
            update_id: format!("holistic-{}", uuid::Uuid::new_v4()),
            affected_domains: Vec::new(),
            updated_files: Vec::new(),
            metrics: PerformanceMetrics::default(),
            snapshot_taken: false,
            claim: None,
        };

        info!(
            "Holistic update {} started: {} changed files ({:?})",
            run.update_id,
            request.changed_files.len(),
            request.trigger_type
        );

        let outcome = self.run_update(&request, &budget, &mut run).await;
        let result = self.conclude(run, outcome, &budget, &request);

        let mut history = self.history.lock();
        history.push_front(result.clone());
        history.truncate(self.config.history_limit);

        result
    }

    async fn run_update<'s>(
        &'s self,
        request: &HolisticUpdateRequest,
        budget: &Budget<'_>,
        run: &mut UpdateRun<'s>,
    ) -> Result<()> {
        if request.changed_files.is_empty() {
            return Err(UpdateError::validation("changedFiles must not be empty"));
        }
        if request.performance_timeout.is_zero() {
            return Err(UpdateError::validation("performanceTimeout must be positive"));
        }

        let discovery = Instant::now();
        run.affected_domains = self.resolve_domains(&request.changed_files);
        if run.affected_domains.is_empty() {
            info!("Update {}: no changed file maps to a domain", run.update_id);
            run.metrics.discovery_ms = millis(discovery.elapsed());
            return Ok(());
        }

        run.claim = Some(self.claim(&run.affected_domains)?);
        self.rollback
            .create_snapshot(&run.update_id, &run.affected_domains)?;
        run.snapshot_taken = true;
        run.metrics.discovery_ms = millis(discovery.elapsed());

        for domain in run.affected_domains.clone() {
            budget.checkpoint().await?;

            let analysis = Instant::now();
            let sources = self.inventory(&domain, budget, &mut run.metrics).await?;
            let artifacts = self.generator.generate(&domain, &sources).map_err(|e| {
                UpdateError::execution(format!("content generation for {} failed: {:#}", domain, e))
            })?;
            run.metrics.analysis_ms += millis(analysis.elapsed());

            // nothing is written for a domain once the budget is gone
            budget.check()?;

            let cleanup = Instant::now();
            let written = self.replace_domain_context(&domain, &artifacts)?;
            debug!("Domain {} regenerated: {} files", domain, written.len());
            run.updated_files.extend(written);
            run.metrics.cleanup_ms += millis(cleanup.elapsed());
        }

        Ok(())
    }

    fn conclude(
        &self,
        mut run: UpdateRun<'_>,
        outcome: Result<()>,
        budget: &Budget<'_>,
        request: &HolisticUpdateRequest,
    ) -> HolisticUpdateResult {
        let elapsed = budget.elapsed();
        let mut failure = outcome.err();
        if failure.is_none() && elapsed > request.performance_timeout {
            failure = Some(UpdateError::timeout(format!(
                "completed in {} ms, over the {} ms budget",
                elapsed.as_millis(),
                request.performance_timeout.as_millis()
            )));
        }

        let mut rolled_back = false;
        if let Some(err) = failure.clone() {
            warn!("Holistic update {} failed: {}", run.update_id, err);
            if run.snapshot_taken {
                match self.rollback.execute_holistic_rollback(&run.update_id) {
                    Ok(report) => {
                        rolled_back = true;
                        run.updated_files.clear();
                        info!(
                            "Update {} rolled back ({} files restored, {} removed)",
                            run.update_id,
                            report.restored_files.len(),
                            report.removed_files.len()
                        );
                    }
                    Err(rollback_err) => {
                        error!(
                            "Update {} could not be rolled back: {}",
                            run.update_id, rollback_err
                        );
                        failure = Some(UpdateError::new(
                            UpdateErrorKind::Rollback,
                            format!("{}; rollback failed: {}", err, rollback_err),
                        ));
                    }
                }
            }
        }

        let success = failure.is_none();
        let total = if success { elapsed } else { budget.elapsed() };
        run.metrics.total_ms = millis(total);

        if success {
            info!(
                "Holistic update {} completed in {} ms: {} domains, {} files",
                run.update_id,
                run.metrics.total_ms,
                run.affected_domains.len(),
                run.updated_files.len()
            );
        }

        HolisticUpdateResult {
            update_id: run.update_id,
            success,
            execution_time: millis(total),
            affected_domains: run.affected_domains,
            updated_files: run.updated_files,
            performance_metrics: run.metrics,
            error: failure,
            rolled_back,
            trigger_type: request.trigger_type,
            git_commit_hash: request.git_commit_hash.clone(),
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn claim(&self, domains: &[String]) -> Result<DomainClaim<'_>> {
        let mut in_flight = self.in_flight.lock();
        if let Some(busy) = domains.iter().find(|d| in_flight.contains(d.as_str())) {
            return Err(UpdateError::conflict(format!(
                "domain {} is being regenerated by another update",
                busy
            )));
        }
        in_flight.extend(domains.iter().cloned());
        Ok(DomainClaim {
            in_flight: &self.in_flight,
            domains: domains.to_vec(),
        })
    }

    async fn inventory(
        &self,
        domain: &str,
        budget: &Budget<'_>,
        metrics: &mut PerformanceMetrics,
    ) -> Result<Vec<SourceFile>> {
        let Some(dir) = self.resolver.source_dir(domain) else {
            return Ok(Vec::new());
        };
        let files = self.list_source_files(&dir)?;

        let mut sources = Vec::with_capacity(files.len());
        for batch in files.chunks(self.config.batch_size.max(1)) {
            for path in batch {
                sources.push(self.read_source(path)?);
            }
            metrics.batches_processed += 1;
            metrics.files_analyzed += batch.len();
            budget.checkpoint().await?;
        }
        Ok(sources)
    }

    /// Workspace-relative source files below `dir`, sorted, skipping hidden and excluded
    /// directories
    pub(crate) fn list_source_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let root = self.rollback.layout().workspace_root();
        let start = root.join(dir);
        if !start.is_dir() {
            return Ok(Vec::new());
        }

        let exclude = &self.config.exclude_dirs;
        let mut files = Vec::new();
        let walker = WalkDir::new(&start)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() == 0 {
                    return true;
                }
                let name = entry.file_name().to_string_lossy();
                !name.starts_with('.') && !exclude.iter().any(|ex| ex.as_str() == name)
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry below {:?}: {}", start, e);
                    continue;
                }
            };
            if entry.file_type().is_file() {
                if let Ok(relative) = entry.path().strip_prefix(root) {
                    files.push(relative.to_path_buf());
                }
            }
        }
        Ok(files)
    }

    pub(crate) fn read_source(&self, relative: &Path) -> Result<SourceFile> {
        let absolute = self.rollback.layout().to_absolute(relative);
        let bytes = fs::read(&absolute).map_err(|e| {
            UpdateError::execution(format!("reading source {:?} failed: {}", relative, e))
        })?;
        Ok(SourceFile {
            path: relative.to_path_buf(),
            hash: blake3::hash(&bytes).to_hex().to_string(),
            size: bytes.len() as u64,
        })
    }

    /// Replace a domain's context directory wholesale with the generated artifacts
    pub(crate) fn replace_domain_context(
        &self,
        domain: &str,
        artifacts: &[GeneratedArtifact],
    ) -> Result<Vec<PathBuf>> {
        let layout = self.rollback.layout();
        let relative_dir = layout.relative_domain_dir(domain)?;
        let absolute_dir = layout.to_absolute(&relative_dir);

        if let Some(bad) = artifacts
            .iter()
            .find(|a| !is_plain_relative(&a.relative_path))
        {
            return Err(UpdateError::execution(format!(
                "generator for {} produced an invalid path {:?}",
                domain, bad.relative_path
            )));
        }

        let io_err = |what: &str, path: &Path, e: std::io::Error| {
            UpdateError::execution(format!("{} {:?} failed: {}", what, path, e))
        };

        if absolute_dir.exists() {
            fs::remove_dir_all(&absolute_dir)
                .map_err(|e| io_err("clearing context", &absolute_dir, e))?;
        }
        fs::create_dir_all(&absolute_dir)
            .map_err(|e| io_err("creating context", &absolute_dir, e))?;

        let mut written = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let target = absolute_dir.join(&artifact.relative_path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| io_err("creating", parent, e))?;
            }
            fs::write(&target, &artifact.content).map_err(|e| io_err("writing", &target, e))?;
            written.push(relative_dir.join(&artifact.relative_path));
        }
        Ok(written)
    }

    /// Most recent update results, newest first
    pub fn get_recent_update_status(&self, limit: usize) -> Vec<HolisticUpdateResult> {
        self.history.lock().iter().take(limit).cloned().collect()
    }

    /// Restore the pre-update snapshot of an earlier update
    pub fn rollback_update(&self, update_id: &str, validate_first: bool) -> Result<RestoreReport> {
        let snapshot = self
            .rollback
            .get_snapshot(update_id)
            .ok_or_else(|| UpdateError::validation(format!("no snapshot for update {}", update_id)))?;

        if validate_first && !self.rollback.validate_rollback_data(update_id) {
            return Err(UpdateError::new(
                UpdateErrorKind::Rollback,
                format!("rollback data for {} failed validation", update_id),
            ));
        }

        let _claim = self.claim(&snapshot.affected_domains)?;
        let report = self.rollback.execute_holistic_rollback(update_id)?;

        if let Some(entry) = self
            .history
            .lock()
            .iter_mut()
            .find(|r| r.update_id == update_id)
        {
            entry.rolled_back = true;
        }
        info!("Update {} rolled back on request", update_id);
        Ok(report)
    }

    /// Purge snapshots and update history past retention
    pub fn perform_maintenance(&self, dry_run: bool) -> Result<HolisticMaintenanceReport> {
        let rollback = self.rollback.perform_maintenance(dry_run)?;

        let hours = self.config.retention_hours.min(24 * 365 * 100) as i64;
        let cutoff = Utc::now() - chrono::Duration::hours(hours);
        let mut history = self.history.lock();
        let trimmed_history = history.iter().filter(|r| r.timestamp < cutoff).count();
        if !dry_run {
            history.retain(|r| r.timestamp >= cutoff);
        }

        Ok(HolisticMaintenanceReport {
            dry_run,
            rollback,
            trimmed_history,
        })
    }
}

fn is_plain_relative(path: &Path) -> bool {
    !path.as_os_str().is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)))
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
