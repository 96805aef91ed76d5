//! Full-repository reindex
//!
//! The bulk path trades atomicity for throughput: no snapshot is taken, failed
//! batches and failed domains are reported instead of rolled back, and the report
//! states the coverage that was actually achieved.

use crate::collaborators::SourceFile;
use crate::error::{Result, UpdateError, UpdateErrorKind};
use crate::orchestrator::{millis, Budget, HolisticUpdateOrchestrator};
use letravail::{CancellationToken, ProgressReporter};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Reindex tuning
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReindexOptions {
    /// Files per batch (configured batch size when unset)
    pub batch_size: Option<usize>,
    /// Soft budget for the whole run (unbounded when unset)
    pub timeout: Option<Duration>,
}

/// A batch that could not be processed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchError {
    pub batch_index: usize,
    pub files: usize,
    pub message: String,
}

/// A domain whose context could not be regenerated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainFailure {
    pub domain: String,
    pub error: UpdateError,
}

/// Outcome of a full-repository reindex
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReindexReport {
    pub reindex_id: String,
    pub total_files: usize,
    pub indexed_files: usize,
    /// Files outside every domain
    pub unmapped_files: usize,
    pub batches_total: usize,
    pub batches_succeeded: usize,
    pub batch_errors: Vec<BatchError>,
    pub updated_domains: Vec<String>,
    /// Domains regenerated from an incomplete inventory
    pub partial_domains: Vec<String>,
    pub failed_domains: Vec<DomainFailure>,
    pub updated_files: usize,
    /// Indexed share of mapped files, 0.0-1.0
    pub coverage: f64,
    pub cancelled: bool,
    pub timed_out: bool,
    pub execution_time: u64,
}

impl ReindexReport {
    /// Every mapped file indexed and every domain regenerated
    pub fn is_complete(&self) -> bool {
        !self.cancelled
            && !self.timed_out
            && self.batch_errors.is_empty()
            && self.failed_domains.is_empty()
    }
}

impl HolisticUpdateOrchestrator {
    /// Re-inventory every source file and regenerate every domain
    ///
    /// Batches are checkpoints for cancellation and the budget; a batch that fails is
    /// recorded and skipped. Errors only when the workspace cannot be listed at all.
    pub async fn full_repository_reindex(
        &self,
        options: ReindexOptions,
        token: Option<&CancellationToken>,
        progress: &ProgressReporter,
    ) -> Result<ReindexReport> {
        let reindex_id = format!("reindex-{}", uuid::Uuid::new_v4());
        let budget = Budget::new(options.timeout.unwrap_or(Duration::MAX), token);
        let batch_size = options.batch_size.unwrap_or(self.config.batch_size).max(1);

        progress.report(0, "Discovering source files");
        let files = self.discover_all_sources()?;

        let mut mapped: Vec<(PathBuf, String)> = Vec::with_capacity(files.len());
        let mut unmapped_files = 0;
        for path in files {
            match self.resolver.resolve(&path) {
                Some(domain) => mapped.push((path, domain)),
                None => unmapped_files += 1,
            }
        }

        info!(
            "Reindex {} started: {} mapped files, {} unmapped, batch size {}",
            reindex_id,
            mapped.len(),
            unmapped_files,
            batch_size
        );

        let batches: Vec<&[(PathBuf, String)]> = mapped.chunks(batch_size).collect();
        let mut report = ReindexReport {
            reindex_id,
            total_files: mapped.len() + unmapped_files,
            indexed_files: 0,
            unmapped_files,
            batches_total: batches.len(),
            batches_succeeded: 0,
            batch_errors: Vec::new(),
            updated_domains: Vec::new(),
            partial_domains: Vec::new(),
            failed_domains: Vec::new(),
            updated_files: 0,
            coverage: 0.0,
            cancelled: false,
            timed_out: false,
            execution_time: 0,
        };

        let mut by_domain: BTreeMap<String, Vec<SourceFile>> = BTreeMap::new();
        let mut incomplete: BTreeSet<String> = BTreeSet::new();

        for (index, batch) in batches.iter().enumerate() {
            if let Err(stop) = budget.checkpoint().await {
                self.mark_stopped(&mut report, &stop);
                break;
            }

            match self.read_batch(batch) {
                Ok(sources) => {
                    report.indexed_files += sources.len();
                    report.batches_succeeded += 1;
                    for (source, (_, domain)) in sources.into_iter().zip(batch.iter()) {
                        by_domain.entry(domain.clone()).or_default().push(source);
                    }
                }
                Err(err) => {
                    warn!("Reindex batch {} failed: {}", index, err);
                    for (_, domain) in batch.iter() {
                        incomplete.insert(domain.clone());
                    }
                    report.batch_errors.push(BatchError {
                        batch_index: index,
                        files: batch.len(),
                        message: err.message().to_string(),
                    });
                }
            }

            // inventory is the first 80%, regeneration the rest
            progress.report(((index + 1) * 80 / batches.len()) as u8, "Indexing sources");
        }

        if !report.cancelled && !report.timed_out {
            let domain_count = by_domain.len();
            for (position, (domain, sources)) in by_domain.into_iter().enumerate() {
                if let Err(stop) = budget.checkpoint().await {
                    self.mark_stopped(&mut report, &stop);
                    break;
                }

                match self.regenerate(&domain, &sources) {
                    Ok(written) => {
                        report.updated_files += written;
                        if incomplete.contains(&domain) {
                            report.partial_domains.push(domain.clone());
                        }
                        report.updated_domains.push(domain);
                    }
                    Err(error) => {
                        warn!("Reindex of domain {} failed: {}", domain, error);
                        report.failed_domains.push(DomainFailure { domain, error });
                    }
                }

                progress.report(
                    80 + ((position + 1) * 20 / domain_count.max(1)) as u8,
                    "Regenerating domains",
                );
            }
        }

        let mapped_total = report.total_files - report.unmapped_files;
        report.coverage = if mapped_total == 0 {
            1.0
        } else {
            report.indexed_files as f64 / mapped_total as f64
        };
        report.execution_time = millis(budget.elapsed());

        info!(
            "Reindex {} finished: {}/{} files, {} domains updated, {} failed, coverage {:.1}%",
            report.reindex_id,
            report.indexed_files,
            mapped_total,
            report.updated_domains.len(),
            report.failed_domains.len(),
            report.coverage * 100.0
        );

        Ok(report)
    }

    fn mark_stopped(&self, report: &mut ReindexReport, stop: &UpdateError) {
        match stop.error_kind() {
            UpdateErrorKind::Cancelled => report.cancelled = true,
            _ => report.timed_out = true,
        }
        info!("Reindex {} stopped: {}", report.reindex_id, stop);
    }

    fn discover_all_sources(&self) -> Result<Vec<PathBuf>> {
        let root = self.rollback.layout().workspace_root();
        if !root.is_dir() {
            return Err(UpdateError::validation(format!(
                "workspace root {:?} is not a directory",
                root
            )));
        }

        if self.config.source_roots.is_empty() {
            return self.list_source_files(Path::new(""));
        }

        let mut files = Vec::new();
        for source_root in &self.config.source_roots {
            files.extend(self.list_source_files(source_root)?);
        }
        files.sort();
        files.dedup();
        Ok(files)
    }

    fn read_batch(&self, batch: &[(PathBuf, String)]) -> Result<Vec<SourceFile>> {
        batch
            .iter()
            .map(|(path, _)| self.read_source(path))
            .collect()
    }

    fn regenerate(&self, domain: &str, sources: &[SourceFile]) -> Result<usize> {
        let _claim = self.claim(&[domain.to_string()])?;
        let artifacts = self.generator.generate(domain, sources).map_err(|e| {
            UpdateError::execution(format!("content generation for {} failed: {:#}", domain, e))
        })?;
        Ok(self.replace_domain_context(domain, &artifacts)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{ContentGenerator, GeneratedArtifact, PathSegmentResolver};
    use crate::orchestrator::HolisticConfig;
    use crate::SummaryContentGenerator;
    use lereprise::{ContextLayout, RollbackConfig, RollbackManager};
    use std::fs;
    use std::sync::Arc;

    struct PickyGenerator;

    impl ContentGenerator for PickyGenerator {
        fn generate(&self, domain: &str, sources: &[SourceFile]) -> anyhow::Result<Vec<GeneratedArtifact>> {
            if domain == "Broken" {
                anyhow::bail!("cannot summarise {}", domain);
            }
            SummaryContentGenerator.generate(domain, sources)
        }
    }

    fn setup(files: usize) -> (tempfile::TempDir, HolisticUpdateOrchestrator) {
        let dir = tempfile::tempdir().unwrap();
        for n in 0..files {
            let path = dir.path().join(format!("Analysis/file{:03}.cs", n));
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, format!("class C{} {{}}", n)).unwrap();
        }
        fs::create_dir_all(dir.path().join("Broken")).unwrap();
        fs::write(dir.path().join("Broken/b.cs"), "b").unwrap();
        fs::write(dir.path().join("README.md"), "top level").unwrap();

        let rollback = Arc::new(
            RollbackManager::open(
                ContextLayout::with_default_context(dir.path()),
                &RollbackConfig::default(),
            )
            .unwrap(),
        );
        let orch = HolisticUpdateOrchestrator::new(
            HolisticConfig::default(),
            rollback,
            Arc::new(PathSegmentResolver::new(dir.path(), Vec::new())),
            Arc::new(PickyGenerator),
        );
        (dir, orch)
    }

    #[tokio::test]
    async fn test_reindex_batches_and_reports_domain_failures() {
        let (dir, orch) = setup(120);

        let report = orch
            .full_repository_reindex(ReindexOptions::default(), None, &ProgressReporter::noop())
            .await
            .unwrap();

        // 121 mapped files in batches of 50
        assert_eq!(report.batches_total, 3);
        assert_eq!(report.batches_succeeded, 3);
        assert_eq!(report.indexed_files, 121);
        assert_eq!(report.unmapped_files, 1);
        assert_eq!(report.coverage, 1.0);
        assert_eq!(report.updated_domains, vec!["Analysis".to_string()]);
        assert_eq!(report.failed_domains.len(), 1);
        assert_eq!(report.failed_domains[0].domain, "Broken");
        assert!(!report.is_complete());
        assert!(dir.path().join(".context/Analysis/CONTEXT.md").exists());
    }

    #[tokio::test]
    async fn test_cancelled_reindex_reports_partial_coverage() {
        let (_dir, orch) = setup(10);
        let source = letravail::CancellationSource::new();
        source.cancel();
        let token = source.token();

        let report = orch
            .full_repository_reindex(
                ReindexOptions {
                    batch_size: Some(2),
                    timeout: None,
                },
                Some(&token),
                &ProgressReporter::noop(),
            )
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.batches_succeeded, 0);
        assert_eq!(report.coverage, 0.0);
        assert!(report.updated_domains.is_empty());
    }
}
