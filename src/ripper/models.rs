//! Data models for the rip pipeline.
//!
//! The [`Job`] is the central persisted entity: exactly one exists at a time
//! (single physical drive), it is mutated only by the orchestrator, and it
//! is written to durable storage after every state transition.

use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identify::{MediaKind, ScoreResult};
use crate::makemkv::{DiscKind, Track};

/// Configured extraction strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RipStrategy {
    /// Direct first, backup fallback on failure.
    Smart,
    /// Decrypt the full disc first, then extract from the backup.
    AlwaysBackup,
    /// Single direct attempt, failure is terminal.
    DirectOnly,
}

impl RipStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RipStrategy::Smart => "smart",
            RipStrategy::AlwaysBackup => "always_backup",
            RipStrategy::DirectOnly => "direct_only",
        }
    }
}

impl FromStr for RipStrategy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "smart" => Ok(RipStrategy::Smart),
            "always_backup" => Ok(RipStrategy::AlwaysBackup),
            "direct_only" => Ok(RipStrategy::DirectOnly),
            _ => Err(()),
        }
    }
}

/// Extraction mode actually in effect for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RipMode {
    Direct,
    Backup,
}

/// Sub-state of `Ripping` when Blu-ray fallback applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RipPhase {
    DirectAttempt,
    BackupAttempt,
}

impl RipPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RipPhase::DirectAttempt => "DIRECT_ATTEMPT",
            RipPhase::BackupAttempt => "BACKUP_ATTEMPT",
        }
    }
}

/// Job state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Scanning,
    Scanned,
    Countdown,
    AwaitingReview,
    Ripping,
    PostProcessing,
    Complete,
    Failed,
    Cancelled,
    /// Assigned at startup when a persisted job's progress is below the
    /// completion ratio; requires manual action, never auto-finalized.
    Incomplete,
}

impl JobState {
    /// Terminal states release the drive for a new job. `Incomplete` is
    /// terminal pending manual action.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Complete | JobState::Failed | JobState::Cancelled | JobState::Incomplete
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Scanning => "SCANNING",
            JobState::Scanned => "SCANNED",
            JobState::Countdown => "COUNTDOWN",
            JobState::AwaitingReview => "AWAITING_REVIEW",
            JobState::Ripping => "RIPPING",
            JobState::PostProcessing => "POST_PROCESSING",
            JobState::Complete => "COMPLETE",
            JobState::Failed => "FAILED",
            JobState::Cancelled => "CANCELLED",
            JobState::Incomplete => "INCOMPLETE",
        }
    }
}

/// Byte-level extraction progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RipProgress {
    pub bytes_done: u64,
    pub bytes_expected: u64,
}

impl RipProgress {
    /// Completion ratio in `0.0..=1.0`. Zero when nothing is expected yet.
    pub fn ratio(&self) -> f64 {
        if self.bytes_expected == 0 {
            0.0
        } else {
            self.bytes_done as f64 / self.bytes_expected as f64
        }
    }
}

/// Diagnostic context attached to a failed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
    /// Last output lines from the extraction tool, when available.
    pub tool_tail: Vec<String>,
}

/// A rip job from disc insertion to completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub device_path: String,
    pub disc_label: String,
    pub disc_kind: Option<DiscKind>,
    pub media_kind: MediaKind,
    pub tracks: Vec<Track>,
    /// Non-empty subset of `tracks` once the job reaches `Ripping`.
    pub selected_tracks: Vec<Track>,
    pub identification: Option<ScoreResult>,
    pub state: JobState,
    /// Mode actually in effect; never `Backup` for DVDs.
    pub rip_mode: RipMode,
    pub rip_phase: Option<RipPhase>,
    pub progress: RipProgress,
    pub output_dir: Option<PathBuf>,
    pub season_number: u32,
    pub eject_done: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<ErrorInfo>,
}

impl Job {
    pub fn new(device_path: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            device_path: device_path.into(),
            disc_label: String::new(),
            disc_kind: None,
            media_kind: MediaKind::Unknown,
            tracks: Vec::new(),
            selected_tracks: Vec::new(),
            identification: None,
            state: JobState::Scanning,
            rip_mode: RipMode::Direct,
            rip_phase: None,
            progress: RipProgress::default(),
            output_dir: None,
            season_number: 1,
            eject_done: false,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    /// Display title: identification when present, cleaned label otherwise.
    pub fn display_title(&self) -> String {
        self.identification
            .as_ref()
            .map(|s| s.candidate.title.clone())
            .unwrap_or_else(|| self.disc_label.replace('_', " "))
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Extraction failure taxonomy. Drives the fallback policy: silent
/// failures and stalls during a direct attempt are fallback-eligible in
/// smart mode; backup failures are terminal.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("direct extraction failed: {message}")]
    DirectFailed { message: String, tail: Vec<String> },
    #[error("backup extraction failed: {message}")]
    BackupFailed { message: String, tail: Vec<String> },
    #[error("tool reported success but wrote no meaningful output")]
    SilentFailure { phase: RipPhase },
    #[error("no progress for {secs}s, extraction stalled")]
    Stalled { secs: u64, phase: RipPhase },
    /// Control flow for manual stop; never recorded as a failure.
    #[error("extraction cancelled")]
    Cancelled,
}

impl ExtractionError {
    pub fn kind_str(&self) -> &'static str {
        match self {
            ExtractionError::DirectFailed { .. } => "DIRECT_FAILED",
            ExtractionError::BackupFailed { .. } => "BACKUP_FAILED",
            ExtractionError::SilentFailure { .. } => "SILENT_FAILURE",
            ExtractionError::Stalled { .. } => "STALLED",
            ExtractionError::Cancelled => "CANCELLED",
        }
    }

    pub fn tail(&self) -> &[String] {
        match self {
            ExtractionError::DirectFailed { tail, .. }
            | ExtractionError::BackupFailed { tail, .. } => tail,
            _ => &[],
        }
    }

    pub fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo {
            kind: self.kind_str().to_string(),
            message: self.to_string(),
            tool_tail: self.tail().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_is_terminal() {
        assert!(!JobState::Scanning.is_terminal());
        assert!(!JobState::Scanned.is_terminal());
        assert!(!JobState::Countdown.is_terminal());
        assert!(!JobState::AwaitingReview.is_terminal());
        assert!(!JobState::Ripping.is_terminal());
        assert!(!JobState::PostProcessing.is_terminal());
        assert!(JobState::Complete.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
        assert!(JobState::Incomplete.is_terminal());
    }

    #[test]
    fn test_strategy_round_trip() {
        for s in [
            RipStrategy::Smart,
            RipStrategy::AlwaysBackup,
            RipStrategy::DirectOnly,
        ] {
            assert_eq!(RipStrategy::from_str(s.as_str()), Ok(s));
        }
        assert!(RipStrategy::from_str("bogus").is_err());
    }

    #[test]
    fn test_progress_ratio() {
        let progress = RipProgress {
            bytes_done: 45,
            bytes_expected: 100,
        };
        assert!((progress.ratio() - 0.45).abs() < f64::EPSILON);
        assert_eq!(RipProgress::default().ratio(), 0.0);
    }

    #[test]
    fn test_job_serialization_round_trip() {
        let mut job = Job::new("/dev/sr0");
        job.disc_label = "THE_MATRIX".to_string();
        job.state = JobState::Ripping;
        job.rip_phase = Some(RipPhase::DirectAttempt);
        job.progress = RipProgress {
            bytes_done: 10,
            bytes_expected: 100,
        };

        let json = serde_json::to_string(&job).unwrap();
        let back: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, job.id);
        assert_eq!(back.state, JobState::Ripping);
        assert_eq!(back.rip_phase, Some(RipPhase::DirectAttempt));
        assert_eq!(back.progress, job.progress);
    }

    #[test]
    fn test_display_title_falls_back_to_label() {
        let mut job = Job::new("/dev/sr0");
        job.disc_label = "THE_MATRIX".to_string();
        assert_eq!(job.display_title(), "THE MATRIX");
    }

    #[test]
    fn test_error_info_from_extraction_error() {
        let err = ExtractionError::DirectFailed {
            message: "copy protection decryption failed".to_string(),
            tail: vec!["MSG tail".to_string()],
        };
        let info = err.to_error_info();
        assert_eq!(info.kind, "DIRECT_FAILED");
        assert_eq!(info.tool_tail.len(), 1);
        assert!(info.message.contains("copy protection"));
    }
}
