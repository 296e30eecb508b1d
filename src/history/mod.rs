//! Activity log and rip history.
//!
//! Append-only record of state transitions, identification decisions and
//! failures, plus a table of finished rips feeding the dashboard and the
//! periodic digest. Consumed by external collaborators, never read back by
//! the rip pipeline itself.

mod store;

pub use store::SqliteHistoryStore;

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

/// Activity event classification.
///
/// Manual cancellations get their own kind so they are never counted as
/// errors in failure statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    ServiceStarted,
    ScanStarted,
    DiscDetected,
    ScanFailed,
    Identified,
    IdentifyFallback,
    StateChanged,
    CountdownStarted,
    CountdownCancelled,
    RipStarted,
    FallbackToBackup,
    RipCompleted,
    RipFailed,
    RipCancelled,
    MovedToLibrary,
    MovedToReview,
    ReviewResolved,
    RecoveryResumed,
    RecoveryIncomplete,
    DigestEmitted,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::ServiceStarted => "service_started",
            ActivityKind::ScanStarted => "scan_started",
            ActivityKind::DiscDetected => "disc_detected",
            ActivityKind::ScanFailed => "scan_failed",
            ActivityKind::Identified => "identified",
            ActivityKind::IdentifyFallback => "identify_fallback",
            ActivityKind::StateChanged => "state_changed",
            ActivityKind::CountdownStarted => "countdown_started",
            ActivityKind::CountdownCancelled => "countdown_cancelled",
            ActivityKind::RipStarted => "rip_started",
            ActivityKind::FallbackToBackup => "fallback_to_backup",
            ActivityKind::RipCompleted => "rip_completed",
            ActivityKind::RipFailed => "rip_failed",
            ActivityKind::RipCancelled => "rip_cancelled",
            ActivityKind::MovedToLibrary => "moved_to_library",
            ActivityKind::MovedToReview => "moved_to_review",
            ActivityKind::ReviewResolved => "review_resolved",
            ActivityKind::RecoveryResumed => "recovery_resumed",
            ActivityKind::RecoveryIncomplete => "recovery_incomplete",
            ActivityKind::DigestEmitted => "digest_emitted",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "service_started" => Some(ActivityKind::ServiceStarted),
            "scan_started" => Some(ActivityKind::ScanStarted),
            "disc_detected" => Some(ActivityKind::DiscDetected),
            "scan_failed" => Some(ActivityKind::ScanFailed),
            "identified" => Some(ActivityKind::Identified),
            "identify_fallback" => Some(ActivityKind::IdentifyFallback),
            "state_changed" => Some(ActivityKind::StateChanged),
            "countdown_started" => Some(ActivityKind::CountdownStarted),
            "countdown_cancelled" => Some(ActivityKind::CountdownCancelled),
            "rip_started" => Some(ActivityKind::RipStarted),
            "fallback_to_backup" => Some(ActivityKind::FallbackToBackup),
            "rip_completed" => Some(ActivityKind::RipCompleted),
            "rip_failed" => Some(ActivityKind::RipFailed),
            "rip_cancelled" => Some(ActivityKind::RipCancelled),
            "moved_to_library" => Some(ActivityKind::MovedToLibrary),
            "moved_to_review" => Some(ActivityKind::MovedToReview),
            "review_resolved" => Some(ActivityKind::ReviewResolved),
            "recovery_resumed" => Some(ActivityKind::RecoveryResumed),
            "recovery_incomplete" => Some(ActivityKind::RecoveryIncomplete),
            "digest_emitted" => Some(ActivityKind::DigestEmitted),
            _ => None,
        }
    }
}

/// One appended activity record.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityEvent {
    /// Unix timestamp.
    pub created_at: i64,
    pub kind: ActivityKind,
    pub job_id: Option<String>,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ActivityEvent {
    pub fn new(kind: ActivityKind, message: impl Into<String>) -> Self {
        Self {
            created_at: chrono::Utc::now().timestamp(),
            kind,
            job_id: None,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_job(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// A finished rip, recorded for history and digests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RipRecord {
    pub job_id: String,
    pub title: String,
    pub year: Option<i32>,
    pub disc_kind: Option<String>,
    pub media_kind: String,
    pub size_bytes: u64,
    pub duration_secs: i64,
    pub rip_phase: String,
    pub finished_at: i64,
}

/// Storage for activity events and rip history.
pub trait HistoryStore: Send + Sync {
    fn log_event(&self, event: ActivityEvent) -> Result<()>;
    fn recent_events(&self, limit: usize) -> Result<Vec<ActivityEvent>>;
    fn record_rip(&self, record: RipRecord) -> Result<()>;
    fn rips_since(&self, since: i64) -> Result<Vec<RipRecord>>;
    fn prune_events_older_than(&self, cutoff: i64) -> Result<usize>;
}

/// Convenience wrapper that builds well-formed activity entries.
///
/// Logging failures are reported and swallowed: a broken activity log must
/// never fail a rip.
#[derive(Clone)]
pub struct ActivityLogger {
    store: Arc<dyn HistoryStore>,
}

impl ActivityLogger {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self { store }
    }

    fn log(&self, event: ActivityEvent) {
        if let Err(e) = self.store.log_event(event) {
            warn!("failed to write activity log: {e}");
        }
    }

    pub fn service_started(&self) {
        self.log(ActivityEvent::new(
            ActivityKind::ServiceStarted,
            "service started",
        ));
    }

    pub fn scan_started(&self, job_id: &str, device: &str) {
        self.log(
            ActivityEvent::new(ActivityKind::ScanStarted, format!("scan started on {device}"))
                .with_job(job_id),
        );
    }

    pub fn disc_detected(&self, job_id: &str, kind: &str, label: &str) {
        self.log(
            ActivityEvent::new(
                ActivityKind::DiscDetected,
                format!("disc detected: {label} ({kind})"),
            )
            .with_job(job_id),
        );
    }

    pub fn scan_failed(&self, job_id: &str, error: &str) {
        self.log(
            ActivityEvent::new(ActivityKind::ScanFailed, format!("scan failed: {error}"))
                .with_job(job_id),
        );
    }

    pub fn identified(&self, job_id: &str, label: &str, title: &str, score: u8, band: &str) {
        self.log(
            ActivityEvent::new(
                ActivityKind::Identified,
                format!("identified: {label} -> {title} ({score}, {band})"),
            )
            .with_job(job_id)
            .with_details(json!({ "score": score, "band": band })),
        );
    }

    pub fn identify_fallback(&self, job_id: &str, label: &str) {
        self.log(
            ActivityEvent::new(
                ActivityKind::IdentifyFallback,
                format!("no confident match for {label}, falling back to disc label"),
            )
            .with_job(job_id),
        );
    }

    pub fn state_changed(&self, job_id: &str, from: &str, to: &str) {
        self.log(
            ActivityEvent::new(ActivityKind::StateChanged, format!("{from} -> {to}"))
                .with_job(job_id),
        );
    }

    pub fn countdown_started(&self, job_id: &str, secs: u64) {
        self.log(
            ActivityEvent::new(
                ActivityKind::CountdownStarted,
                format!("auto-rip countdown started ({secs}s)"),
            )
            .with_job(job_id),
        );
    }

    pub fn countdown_cancelled(&self, job_id: &str) {
        self.log(
            ActivityEvent::new(ActivityKind::CountdownCancelled, "countdown cancelled")
                .with_job(job_id),
        );
    }

    pub fn rip_started(&self, job_id: &str, title: &str, mode: &str) {
        self.log(
            ActivityEvent::new(ActivityKind::RipStarted, format!("rip started: {title} ({mode})"))
                .with_job(job_id),
        );
    }

    pub fn fallback_to_backup(&self, job_id: &str) {
        self.log(
            ActivityEvent::new(
                ActivityKind::FallbackToBackup,
                "direct extraction failed, switching to backup method",
            )
            .with_job(job_id),
        );
    }

    pub fn rip_completed(&self, job_id: &str, title: &str) {
        self.log(
            ActivityEvent::new(ActivityKind::RipCompleted, format!("rip completed: {title}"))
                .with_job(job_id),
        );
    }

    pub fn rip_failed(&self, job_id: &str, title: &str, error: &str) {
        self.log(
            ActivityEvent::new(
                ActivityKind::RipFailed,
                format!("rip failed: {title} - {error}"),
            )
            .with_job(job_id),
        );
    }

    pub fn rip_cancelled(&self, job_id: &str, title: &str) {
        self.log(
            ActivityEvent::new(ActivityKind::RipCancelled, format!("rip cancelled: {title}"))
                .with_job(job_id),
        );
    }

    pub fn moved_to_library(&self, job_id: &str, dest: &str) {
        self.log(
            ActivityEvent::new(ActivityKind::MovedToLibrary, format!("moved to {dest}"))
                .with_job(job_id),
        );
    }

    pub fn moved_to_review(&self, job_id: &str, dest: &str) {
        self.log(
            ActivityEvent::new(ActivityKind::MovedToReview, format!("parked for review in {dest}"))
                .with_job(job_id),
        );
    }

    pub fn review_resolved(&self, job_id: &str, title: &str) {
        self.log(
            ActivityEvent::new(
                ActivityKind::ReviewResolved,
                format!("review resolved as {title}"),
            )
            .with_job(job_id),
        );
    }

    pub fn recovery_resumed(&self, job_id: &str, state: &str) {
        self.log(
            ActivityEvent::new(
                ActivityKind::RecoveryResumed,
                format!("recovered job in state {state}"),
            )
            .with_job(job_id),
        );
    }

    pub fn recovery_incomplete(&self, job_id: &str, ratio: f64) {
        self.log(
            ActivityEvent::new(
                ActivityKind::RecoveryIncomplete,
                format!("incomplete rip at {:.0}%, needs manual action", ratio * 100.0),
            )
            .with_job(job_id),
        );
    }

    pub fn digest_emitted(&self, rip_count: usize) {
        self.log(ActivityEvent::new(
            ActivityKind::DigestEmitted,
            format!("digest emitted covering {rip_count} rip(s)"),
        ));
    }
}
