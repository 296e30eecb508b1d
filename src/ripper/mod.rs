//! Rip pipeline.
//!
//! The orchestrator state machine, the extraction driver with its
//! direct/backup fallback policy, durable job snapshots, crash recovery and
//! the post-processing handoff.

mod driver;
mod job_store;
mod library;
mod models;
mod orchestrator;
mod recovery;
pub mod tool;

pub use driver::{
    plan_attempts, re_resolve_titles, DriverEvent, ExtractionDriver, ExtractionOutcome,
};
pub use job_store::{FileJobStore, JobStore, PersistenceError};
pub use library::{sanitize_folder_name, FsLibrary, LibraryHandoff};
pub use models::{
    ErrorInfo, ExtractionError, Job, JobState, RipMode, RipPhase, RipProgress, RipStrategy,
};
pub use orchestrator::RipOrchestrator;
pub use recovery::{plan_recovery, RecoveryAction, COMPLETE_RATIO};
pub use tool::{DiscSource, DiscTool, ProgressUpdate, RunOptions, RunReport, ToolRunError};
