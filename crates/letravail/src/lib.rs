//! letravail - Job Manager
//!
//! *Le Travail* (The Work) - runs long operations in the background with progress
//! reporting and cooperative cancellation.
//!
//! Job bodies are registered per job type as [`JobRunner`]s. Each body receives a
//! [`JobContext`] and is expected to call [`JobContext::checkpoint`] between units of
//! work; cancellation is only observed there.

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

/// Cancellation tokens and progress reporting
pub mod cancel;

/// Job error types
pub mod error;

/// Job records
pub mod job;

/// Job registry and scheduling
pub mod manager;

/// Job bodies
pub mod runner;

pub use cancel::{CancellationSource, CancellationToken, ProgressReporter};
pub use error::{JobError, Result};
pub use job::{Job, JobProgress, JobRequest, JobStartResult, JobStatus};
pub use manager::{JobManager, JobsConfig, DEFAULT_HISTORY_LIMIT, DEFAULT_MAX_CONCURRENT_JOBS};
pub use runner::{job_fn, FnRunner, JobContext, JobRunner};
