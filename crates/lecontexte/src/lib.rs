//! lecontexte - Holistic Update Orchestrator
//!
//! *Le Contexte* (The Context) - regenerates the context of every affected domain from
//! scratch, under a soft time budget, with a rollback snapshot taken first.

pub mod collaborators;
pub mod error;
pub mod orchestrator;
pub mod reindex;
pub mod update;

pub use collaborators::{
    ContentGenerator, DomainResolver, GeneratedArtifact, PathSegmentResolver, SourceFile,
    SummaryContentGenerator, CONTEXT_FILE,
};
pub use error::{Result, UpdateError, UpdateErrorKind};
pub use orchestrator::{
    HolisticConfig, HolisticMaintenanceReport, HolisticUpdateOrchestrator, DEFAULT_BATCH_SIZE,
    DEFAULT_TIMEOUT_SECS, DEFAULT_UPDATE_HISTORY,
};
pub use reindex::{BatchError, DomainFailure, ReindexOptions, ReindexReport};
pub use update::{HolisticUpdateRequest, HolisticUpdateResult, PerformanceMetrics, TriggerType};
