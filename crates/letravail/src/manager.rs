//! Job registry and scheduling

use crate::cancel::{CancellationSource, ProgressReporter};
use crate::error::JobError;
use crate::job::{Job, JobRequest, JobStartResult, JobStatus};
use crate::runner::{JobContext, JobRunner};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default global limit on concurrently active jobs
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 4;

/// Default number of terminal jobs kept for inspection
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Job manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Jobs that may be queued or running at the same time
    pub max_concurrent_jobs: usize,

    /// Terminal jobs retained in recent history
    pub history_limit: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

struct ActiveJob {
    job: Job,
    cancel: CancellationSource,
}

#[derive(Default)]
struct JobTable {
    active: HashMap<String, ActiveJob>,
    recent: VecDeque<Job>,
}

impl JobTable {
    fn find(&self, job_id: &str) -> Option<Job> {
        self.active
            .get(job_id)
            .map(|entry| entry.job.clone())
            .or_else(|| self.recent.iter().find(|job| job.job_id == job_id).cloned())
    }
}

/// Registry of job runners and of queued, running and recently finished jobs
///
/// Runners are registered up front with [`JobManager::register_runner`]; the manager is
/// then shared behind an `Arc`. [`JobManager::start_job`] must be called from inside a
/// tokio runtime.
pub struct JobManager {
    config: JobsConfig,
    runners: HashMap<String, Arc<dyn JobRunner>>,
    table: Arc<Mutex<JobTable>>,
}

impl JobManager {
    /// Create an empty registry
    pub fn new(config: JobsConfig) -> Self {
        Self {
            config,
            runners: HashMap::new(),
            table: Arc::new(Mutex::new(JobTable::default())),
        }
    }

    /// Register the body for a job type, replacing any previous one
    pub fn register_runner(&mut self, job_type: impl Into<String>, runner: impl JobRunner + 'static) {
        let job_type = job_type.into();
        debug!("Registered job runner: {}", job_type);
        self.runners.insert(job_type, Arc::new(runner));
    }

    /// Registered job types, sorted
    pub fn job_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.runners.keys().cloned().collect();
        types.sort();
        types
    }

    /// Register a job and start its body without waiting for it
    ///
    /// Returns `started = false` only for an unknown job type or when the concurrency
    /// limit is reached.
    pub fn start_job(&self, request: JobRequest) -> JobStartResult {
        let Some(runner) = self.runners.get(&request.job_type).cloned() else {
            warn!("Rejected job of unknown type {}", request.job_type);
            return JobStartResult::rejected(JobError::UnknownType(request.job_type).to_string());
        };

        let job_id = format!("job-{}", uuid::Uuid::new_v4());
        let cancel = CancellationSource::new();

        {
            let mut table = self.table.lock();
            if table.active.len() >= self.config.max_concurrent_jobs {
                warn!(
                    "Rejected {} job: {} jobs already active",
                    request.job_type,
                    table.active.len()
                );
                return JobStartResult::rejected(
                    JobError::ConcurrencyLimit(table.active.len()).to_string(),
                );
            }
            table.active.insert(
                job_id.clone(),
                ActiveJob {
                    job: Job::queued(job_id.clone(), &request),
                    cancel: cancel.clone(),
                },
            );
        }

        info!(
            "Job {} queued ({} requested by {})",
            job_id, request.job_type, request.requested_by
        );

        let ctx = JobContext::new(
            job_id.clone(),
            cancel.token(),
            progress_reporter(self.table.clone(), job_id.clone()),
        );
        let table = self.table.clone();
        let history_limit = self.config.history_limit;
        let id = job_id.clone();
        let parameters = request.parameters;

        tokio::spawn(async move {
            if !mark_running(&table, &id) {
                finish(&table, &id, Err(JobError::Cancelled), true, history_limit);
                return;
            }

            // Run the body on its own task so a panic is recorded as a failure
            let body = tokio::spawn(runner.run(ctx, parameters));
            let outcome = match body.await {
                Ok(outcome) => outcome,
                Err(join_err) => Err(JobError::Failed(format!("job body panicked: {}", join_err))),
            };
            let cancel_requested = cancel.is_cancelled();
            finish(&table, &id, outcome, cancel_requested, history_limit);
        });

        JobStartResult::started(job_id)
    }

    /// Current record of a job, active or recent
    pub fn get_job_status(&self, job_id: &str) -> Option<Job> {
        self.table.lock().find(job_id)
    }

    /// Queued and running jobs, oldest first
    pub fn get_active_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .table
            .lock()
            .active
            .values()
            .map(|entry| entry.job.clone())
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    /// Most recently finished jobs, newest first
    pub fn get_recent_jobs(&self, limit: usize) -> Vec<Job> {
        self.table.lock().recent.iter().take(limit).cloned().collect()
    }

    /// Request cooperative cancellation
    ///
    /// Returns false if the job is unknown or already terminal. The body stops at its
    /// next checkpoint.
    pub fn cancel_job(&self, job_id: &str) -> bool {
        let mut table = self.table.lock();
        match table.active.get_mut(job_id) {
            Some(entry) if !entry.job.status.is_terminal() => {
                entry.cancel.cancel();
                entry.job.progress.message = "Cancellation requested".to_string();
                info!("Cancellation requested for job {}", job_id);
                true
            }
            _ => false,
        }
    }

    /// Poll until the job reaches a terminal state or `timeout` elapses
    pub async fn wait_for_completion(&self, job_id: &str, timeout: Duration) -> Option<Job> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let job = self.get_job_status(job_id)?;
            if job.status.is_terminal() || tokio::time::Instant::now() >= deadline {
                return Some(job);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

fn progress_reporter(table: Arc<Mutex<JobTable>>, job_id: String) -> ProgressReporter {
    ProgressReporter::new(move |current, message| {
        if let Some(entry) = table.lock().active.get_mut(&job_id) {
            entry.job.progress.current = current;
            entry.job.progress.message = message.to_string();
        }
    })
}

/// Move a queued job to running; false if it was cancelled before starting
fn mark_running(table: &Mutex<JobTable>, job_id: &str) -> bool {
    let mut table = table.lock();
    let Some(entry) = table.active.get_mut(job_id) else {
        return false;
    };
    if entry.cancel.is_cancelled() {
        return false;
    }
    entry.job.status = JobStatus::Running;
    entry.job.started_at = Some(Utc::now());
    entry.job.progress.message = "Running".to_string();
    debug!("Job {} running", job_id);
    true
}

fn finish(
    table: &Mutex<JobTable>,
    job_id: &str,
    outcome: Result<Value, JobError>,
    cancel_requested: bool,
    history_limit: usize,
) {
    let mut table = table.lock();
    let Some(ActiveJob { mut job, .. }) = table.active.remove(job_id) else {
        return;
    };

    job.completed_at = Some(Utc::now());
    match outcome {
        Ok(value) => {
            job.status = JobStatus::Completed;
            job.progress.current = 100;
            job.progress.message = "Completed".to_string();
            job.result = Some(value);
            info!("Job {} completed", job_id);
        }
        Err(JobError::Cancelled) => {
            job.status = JobStatus::Cancelled;
            job.progress.message = "Cancelled".to_string();
            job.error = Some(JobError::Cancelled.to_string());
            info!("Job {} cancelled", job_id);
        }
        Err(err) if cancel_requested => {
            job.status = JobStatus::Cancelled;
            job.progress.message = "Cancelled".to_string();
            job.error = Some(err.to_string());
            info!("Job {} cancelled: {}", job_id, err);
        }
        Err(err) => {
            job.status = JobStatus::Failed;
            job.progress.message = "Failed".to_string();
            job.error = Some(err.to_string());
            warn!("Job {} failed: {}", job_id, err);
        }
    }

    table.recent.push_front(job);
    table.recent.truncate(history_limit);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::job_fn;
    use serde_json::json;

    fn manager_with(config: JobsConfig) -> JobManager {
        let mut manager = JobManager::new(config);
        manager.register_runner(
            "echo",
            job_fn(|ctx: JobContext, params: Value| async move {
                ctx.report(50, "halfway");
                ctx.checkpoint().await?;
                Ok::<Value, JobError>(params)
            }),
        );
        manager.register_runner(
            "fail",
            job_fn(|_ctx: JobContext, _params: Value| async move {
                Err::<Value, JobError>(JobError::Failed("boom".to_string()))
            }),
        );
        manager.register_runner(
            "spin",
            job_fn(|ctx: JobContext, _params: Value| async move {
                loop {
                    if let Err(err) = ctx.checkpoint().await {
                        return Err::<Value, JobError>(err);
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }),
        );
        manager
    }

    #[tokio::test]
    async fn test_unknown_type_not_started() {
        let manager = manager_with(JobsConfig::default());
        let result = manager.start_job(JobRequest::new("nope", Value::Null, "test"));
        assert!(!result.started);
        assert!(result.job_id.is_none());
        assert!(result.reason.unwrap().contains("Unknown job type"));
    }

    #[tokio::test]
    async fn test_completed_job_moves_to_history() {
        let manager = manager_with(JobsConfig::default());
        let started = manager.start_job(JobRequest::new("echo", json!({"n": 1}), "test"));
        let job_id = started.job_id.unwrap();

        let job = manager
            .wait_for_completion(&job_id, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(json!({"n": 1})));
        assert_eq!(job.progress.current, 100);
        assert!(job.started_at.is_some() && job.completed_at.is_some());
        assert!(manager.get_active_jobs().is_empty());
        assert_eq!(manager.get_recent_jobs(10)[0].job_id, job_id);
    }

    #[tokio::test]
    async fn test_failure_recorded() {
        let manager = manager_with(JobsConfig::default());
        let job_id = manager
            .start_job(JobRequest::new("fail", Value::Null, "test"))
            .job_id
            .unwrap();

        let job = manager
            .wait_for_completion(&job_id, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("Job failed: boom"));
        assert!(!manager.cancel_job(&job_id));
    }

    #[tokio::test]
    async fn test_concurrency_limit() {
        let manager = manager_with(JobsConfig {
            max_concurrent_jobs: 1,
            ..JobsConfig::default()
        });
        let first = manager.start_job(JobRequest::new("spin", Value::Null, "test"));
        assert!(first.started);

        let second = manager.start_job(JobRequest::new("spin", Value::Null, "test"));
        assert!(!second.started);

        manager.cancel_job(first.job_id.as_deref().unwrap());
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let manager = manager_with(JobsConfig {
            max_concurrent_jobs: 10,
            history_limit: 2,
        });
        for n in 0..3 {
            let id = manager
                .start_job(JobRequest::new("echo", json!(n), "test"))
                .job_id
                .unwrap();
            manager.wait_for_completion(&id, Duration::from_secs(2)).await;
        }

        let recent = manager.get_recent_jobs(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].result, Some(json!(2)));
    }

    #[tokio::test]
    async fn test_cancel_unknown_job() {
        let manager = manager_with(JobsConfig::default());
        assert!(!manager.cancel_job("job-missing"));
        assert!(manager.get_job_status("job-missing").is_none());
    }
}
