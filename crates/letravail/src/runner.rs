//! Job bodies

use crate::cancel::{CancellationToken, ProgressReporter};
use crate::error::{JobError, Result};
use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;

/// Everything a running job body gets from the registry
#[derive(Debug, Clone)]
pub struct JobContext {
    job_id: String,
    token: CancellationToken,
    progress: ProgressReporter,
}

impl JobContext {
    /// Build a context; the registry does this for every started job
    pub fn new(job_id: impl Into<String>, token: CancellationToken, progress: ProgressReporter) -> Self {
        Self {
            job_id: job_id.into(),
            token,
            progress,
        }
    }

    /// Context for running a body inline, outside the registry
    pub fn detached(job_id: impl Into<String>) -> Self {
        Self::new(job_id, CancellationToken::never(), ProgressReporter::noop())
    }

    /// Identifier of the running job
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Cancellation token for nested long-running calls
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Progress reporter for nested long-running calls
    pub fn progress(&self) -> &ProgressReporter {
        &self.progress
    }

    /// Report progress (0-100)
    pub fn report(&self, current: u8, message: &str) {
        self.progress.report(current, message);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Yield to the scheduler, then fail with [`JobError::Cancelled`] if cancellation
    /// was requested
    pub async fn checkpoint(&self) -> Result<()> {
        tokio::task::yield_now().await;
        if self.token.is_cancelled() {
            Err(JobError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Body of one job type
pub trait JobRunner: Send + Sync {
    /// Run the job to completion, observing `ctx` at checkpoints
    fn run(&self, ctx: JobContext, parameters: Value) -> BoxFuture<'static, Result<Value>>;
}

/// [`JobRunner`] backed by a closure; see [`job_fn`]
pub struct FnRunner<F> {
    f: F,
}

/// Wrap an async closure as a [`JobRunner`]
pub fn job_fn<F, Fut>(f: F) -> FnRunner<F>
where
    F: Fn(JobContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    FnRunner { f }
}

impl<F, Fut> JobRunner for FnRunner<F>
where
    F: Fn(JobContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    fn run(&self, ctx: JobContext, parameters: Value) -> BoxFuture<'static, Result<Value>> {
        Box::pin((self.f)(ctx, parameters))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationSource;
    use serde_json::json;

    #[tokio::test]
    async fn test_checkpoint_reports_cancellation() {
        let source = CancellationSource::new();
        let ctx = JobContext::new("job-1", source.token(), ProgressReporter::noop());
        assert!(ctx.checkpoint().await.is_ok());

        source.cancel();
        assert_eq!(ctx.checkpoint().await, Err(JobError::Cancelled));
    }

    #[tokio::test]
    async fn test_closure_runner() {
        let runner = job_fn(|ctx: JobContext, params: Value| async move {
            ctx.checkpoint().await?;
            Ok::<Value, JobError>(json!({"echo": params, "job": ctx.job_id()}))
        });

        let out = runner
            .run(JobContext::detached("job-2"), json!(7))
            .await
            .unwrap();
        assert_eq!(out, json!({"echo": 7, "job": "job-2"}));
    }
}
