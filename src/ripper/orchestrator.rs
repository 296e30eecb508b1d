//! Job orchestrator.
//!
//! The top-level state machine: sequences scan, identification, countdown,
//! extraction and post-processing; persists the job after every transition;
//! recovers interrupted jobs at startup; and owns cancellation. One
//! physical drive means at most one active job, enforced by the lock around
//! every transition.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::history::{ActivityLogger, HistoryStore, RipRecord};
use crate::identify::{
    classify_media, episode_tracks, select_movie_tracks, ConfidenceBand, IdentificationEngine,
    MediaKind,
};
use crate::notify::{NotificationEvent, Notifier};
use crate::probe::MediaProbe;
use crate::review::{ReviewQueueEntry, ReviewQueueStore};

use super::driver::{mkv_files, plan_attempts, DriverEvent, ExtractionDriver, ExtractionOutcome};
use super::job_store::JobStore;
use super::library::{sanitize_folder_name, LibraryHandoff};
use super::models::{ErrorInfo, ExtractionError, Job, JobState, RipMode, RipPhase, RipProgress};
use super::recovery::{plan_recovery, RecoveryAction};
use super::tool::{DiscSource, DiscTool};

/// How long a stop request waits for the rip task to kill its child and
/// acknowledge before giving up on the handle.
const STOP_ACK_TIMEOUT: Duration = Duration::from_secs(30);

struct OrchestratorState {
    job: Option<Job>,
    rip_cancel: Option<CancellationToken>,
    rip_task: Option<JoinHandle<()>>,
    countdown_cancel: Option<CancellationToken>,
    uncertain_cancel: Option<CancellationToken>,
}

/// Drives rip jobs from disc insertion to completion.
pub struct RipOrchestrator {
    cfg: AppConfig,
    tool: Arc<dyn DiscTool>,
    driver: ExtractionDriver,
    engine: Arc<IdentificationEngine>,
    probe: Arc<dyn MediaProbe>,
    job_store: Arc<dyn JobStore>,
    history: Arc<dyn HistoryStore>,
    activity: ActivityLogger,
    review: Arc<dyn ReviewQueueStore>,
    notifier: Arc<dyn Notifier>,
    library: Arc<dyn LibraryHandoff>,
    inner: Mutex<OrchestratorState>,
}

impl RipOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: AppConfig,
        tool: Arc<dyn DiscTool>,
        engine: Arc<IdentificationEngine>,
        probe: Arc<dyn MediaProbe>,
        job_store: Arc<dyn JobStore>,
        history: Arc<dyn HistoryStore>,
        review: Arc<dyn ReviewQueueStore>,
        notifier: Arc<dyn Notifier>,
        library: Arc<dyn LibraryHandoff>,
    ) -> Arc<Self> {
        let driver = ExtractionDriver::new(tool.clone(), cfg.paths.clone(), cfg.ripping.clone());
        Arc::new(Self {
            activity: ActivityLogger::new(history.clone()),
            cfg,
            tool,
            driver,
            engine,
            probe,
            job_store,
            history,
            review,
            notifier,
            library,
            inner: Mutex::new(OrchestratorState {
                job: None,
                rip_cancel: None,
                rip_task: None,
                countdown_cancel: None,
                uncertain_cancel: None,
            }),
        })
    }

    // =========================================================================
    // Entry points
    // =========================================================================

    /// Scan-and-identify entry point, called by the disc-insertion hook or
    /// a manual trigger. Runs the pipeline up to countdown/review; the rip
    /// itself continues in background tasks.
    pub async fn scan_and_identify(self: Arc<Self>) -> Result<()> {
        let job = {
            let mut inner = self.inner.lock().await;
            if let Some(job) = &inner.job {
                if !job.state.is_terminal() {
                    bail!("a job is already active (state {})", job.state.as_str());
                }
            }
            let job = Job::new(&self.cfg.device);
            self.job_store.save(&job)?;
            inner.job = Some(job.clone());
            job
        };
        self.activity.scan_started(&job.id, &self.cfg.device);
        info!("scanning disc in {}", self.cfg.device);

        let source = DiscSource::Device(self.cfg.device.clone());
        let info = match self.tool.scan(&source).await {
            Ok(info) => info,
            Err(e) => {
                // Disc may simply be unreadable; surfaced, not retried.
                self.activity.scan_failed(&job.id, &e.to_string());
                self.fail_job("SCAN_ERROR", &e.to_string(), Vec::new()).await;
                return Ok(());
            }
        };

        let job = self
            .update_job(|job| {
                job.disc_label = info.label.clone();
                job.disc_kind = info.kind;
                job.tracks = info.tracks.clone();
                job.state = JobState::Scanned;
            })
            .await?;
        self.activity.disc_detected(
            &job.id,
            job.disc_kind.map(|k| k.as_str()).unwrap_or("UNKNOWN"),
            &job.disc_label,
        );

        if self.cfg.ripping.hands_free {
            return self.continue_hands_free(&job).await;
        }

        let id = self
            .engine
            .identify(
                &job.disc_label,
                &job.tracks,
                MediaKind::Unknown,
                self.cfg.ripping.main_feature_only,
            )
            .await;
        if id.selected_tracks.is_empty() {
            self.fail_job("SCAN_ERROR", "no extractable tracks found", Vec::new())
                .await;
            return Ok(());
        }

        let band = id
            .score
            .as_ref()
            .map(|s| s.band)
            .unwrap_or(ConfidenceBand::Low);
        let job = self
            .update_job(|job| {
                job.media_kind = id.media_kind;
                job.identification = id.score.clone();
                job.selected_tracks = id.selected_tracks.clone();
            })
            .await?;

        match &id.score {
            Some(s) => self.activity.identified(
                &job.id,
                &job.disc_label,
                &s.candidate.title,
                s.score,
                format!("{:?}", s.band).to_uppercase().as_str(),
            ),
            None => self.activity.identify_fallback(&job.id, &job.disc_label),
        }

        if band.needs_review() {
            self.enter_awaiting_review().await?;
        } else if self.cfg.ripping.auto_rip {
            self.begin_countdown().await?;
        }
        // Otherwise the job holds at Scanned for a manual start.
        Ok(())
    }

    /// Hands-free: classify TV/movie from track durations only and head
    /// straight for the rip; identification happens post-rip from the
    /// extracted file's measured runtime.
    async fn continue_hands_free(self: Arc<Self>, job: &Job) -> Result<()> {
        let media_kind = classify_media(&job.tracks, MediaKind::Unknown, &self.cfg.identification);
        let selected = match media_kind {
            MediaKind::Tv => episode_tracks(&job.tracks, &self.cfg.identification),
            _ => select_movie_tracks(
                &job.tracks,
                None,
                self.cfg.ripping.main_feature_only,
                &self.cfg.identification,
            ),
        };
        if selected.is_empty() {
            self.fail_job("SCAN_ERROR", "no extractable tracks found", Vec::new())
                .await;
            return Ok(());
        }
        self.update_job(|job| {
            job.media_kind = media_kind;
            job.selected_tracks = selected.clone();
        })
        .await?;
        self.begin_rip().await
    }

    /// Manual rip start, for jobs held at Scanned or parked for review.
    pub async fn start_rip(self: Arc<Self>) -> Result<()> {
        self.cancel_pending_timers().await;
        self.begin_rip().await
    }

    /// Apply a corrected title: re-identify with the corrected text. A
    /// correction within the suppression window cancels the scheduled
    /// uncertain-id notification.
    pub async fn apply_title(self: Arc<Self>, title: &str) -> Result<()> {
        let job = self.current_job().await.context("no active job")?;
        if !matches!(
            job.state,
            JobState::Scanned | JobState::Countdown | JobState::AwaitingReview
        ) {
            bail!("cannot edit title in state {}", job.state.as_str());
        }
        self.cancel_pending_timers().await;

        let hint = job.media_kind;
        let id = self
            .engine
            .identify(title, &job.tracks, hint, self.cfg.ripping.main_feature_only)
            .await;
        let band = id
            .score
            .as_ref()
            .map(|s| s.band)
            .unwrap_or(ConfidenceBand::Low);

        let job = self
            .update_job(|job| {
                job.media_kind = id.media_kind;
                job.identification = id.score.clone();
                if !id.selected_tracks.is_empty() {
                    job.selected_tracks = id.selected_tracks.clone();
                }
                job.state = JobState::Scanned;
            })
            .await?;

        if band.needs_review() {
            self.enter_awaiting_review().await?;
        } else {
            // Confident now: drop the review entry and resume the normal path.
            let _ = self.review.remove(&job.id);
            if self.cfg.ripping.auto_rip {
                self.begin_countdown().await?;
            }
        }
        Ok(())
    }

    /// Cancel a running countdown, holding the job at Scanned.
    pub async fn cancel_countdown(&self) -> Result<()> {
        let token = self.inner.lock().await.countdown_cancel.take();
        if let Some(token) = token {
            token.cancel();
        }
        let job = self
            .update_job(|job| {
                if job.state == JobState::Countdown {
                    job.state = JobState::Scanned;
                }
            })
            .await?;
        self.activity.countdown_cancelled(&job.id);
        Ok(())
    }

    /// Stop everything: kill the extraction process (bounded wait, then
    /// force-kill), mark the job Cancelled, eject, release the drive. A
    /// manual stop is an outcome, never an error.
    pub async fn stop(&self) -> Result<()> {
        info!("stop requested");
        let (countdown, uncertain, rip, task, device) = {
            let mut inner = self.inner.lock().await;
            (
                inner.countdown_cancel.take(),
                inner.uncertain_cancel.take(),
                inner.rip_cancel.take(),
                inner.rip_task.take(),
                inner.job.as_ref().map(|j| j.device_path.clone()),
            )
        };
        if let Some(token) = countdown {
            token.cancel();
        }
        if let Some(token) = uncertain {
            token.cancel();
        }
        if let Some(token) = rip {
            token.cancel();
        }
        if let Some(task) = task {
            // The rip task terminates the child before it exits; the drive
            // is released only after that.
            if tokio::time::timeout(STOP_ACK_TIMEOUT, task).await.is_err() {
                warn!("rip task did not acknowledge cancellation in time");
            }
        }
        self.mark_cancelled().await;
        let device = device.unwrap_or_else(|| self.cfg.device.clone());
        self.tool.eject(&device).await;
        Ok(())
    }

    /// Snapshot of the current job, if any.
    pub async fn current_job(&self) -> Option<Job> {
        self.inner.lock().await.job.clone()
    }

    // =========================================================================
    // Recovery
    // =========================================================================

    /// Load a persisted job at startup and decide what to do with it. A
    /// likely-complete rip (progress >= 90%) resumes into post-processing
    /// pending verification; anything less is surfaced as Incomplete.
    pub async fn recover_on_startup(self: Arc<Self>) -> Result<()> {
        let Some(job) = self.job_store.load()? else {
            return Ok(());
        };

        match plan_recovery(job.state, job.progress.ratio()) {
            RecoveryAction::Discard => {
                info!("discarding stale terminal job snapshot {}", job.id);
                self.job_store.clear()?;
            }
            RecoveryAction::MarkIncomplete => {
                warn!(
                    "recovered job {} at {:.0}% - marking incomplete",
                    job.id,
                    job.progress.ratio() * 100.0
                );
                self.activity.recovery_incomplete(&job.id, job.progress.ratio());
                let mut job = job;
                job.state = JobState::Incomplete;
                job.touch();
                self.job_store.save(&job)?;
                self.inner.lock().await.job = Some(job);
            }
            RecoveryAction::Resume(state) => {
                info!("resuming job {} from state {}", job.id, state.as_str());
                self.activity.recovery_resumed(&job.id, state.as_str());
                self.inner.lock().await.job = Some(job.clone());

                let files = job
                    .output_dir
                    .as_ref()
                    .map(|dir| mkv_files(dir))
                    .unwrap_or_default();
                if files.is_empty() {
                    warn!("recovered job has no output files, marking incomplete");
                    self.update_job(|job| job.state = JobState::Incomplete).await?;
                    return Ok(());
                }
                let outcome = ExtractionOutcome {
                    output_dir: job.output_dir.clone().unwrap_or_default(),
                    bytes_written: files.iter().map(|(_, size)| size).sum(),
                    files: files.into_iter().map(|(path, _)| path).collect(),
                    phase: job.rip_phase.unwrap_or(RipPhase::DirectAttempt),
                };
                let job = self
                    .update_job(|job| job.state = JobState::PostProcessing)
                    .await?;
                let this = self.clone();
                tokio::spawn(async move {
                    this.post_process(job, outcome).await;
                });
            }
        }
        Ok(())
    }

    // =========================================================================
    // Review queue operations
    // =========================================================================

    /// Apply a manual resolution to a parked rip: move its files into the
    /// library under the corrected title and drop the entry.
    pub async fn resolve_review(&self, job_id: &str, title: &str, year: Option<i32>) -> Result<()> {
        let entry = self
            .review
            .get(job_id)?
            .with_context(|| format!("no review entry for job {job_id}"))?;

        if let Some(dir) = &entry.file_path {
            let mut files: Vec<PathBuf> =
                mkv_files(dir).into_iter().map(|(path, _)| path).collect();
            // Episode numbering follows name order.
            files.sort();
            if !files.is_empty() {
                let dest = match entry.media_kind {
                    MediaKind::Tv => {
                        self.library.finalize_tv(title, entry.season_number, &files)?
                    }
                    _ => self.library.finalize_movie(title, year, &files)?,
                };
                self.activity
                    .moved_to_library(job_id, &dest.display().to_string());
            }
        }

        self.review.remove(job_id)?;
        self.activity.review_resolved(job_id, title);
        self.notifier.notify(NotificationEvent::Complete {
            job_id: job_id.to_string(),
            title: title.to_string(),
        });
        Ok(())
    }

    /// Drop a parked rip entirely, deleting its files.
    pub async fn delete_review(&self, job_id: &str) -> Result<()> {
        if let Some(entry) = self.review.get(job_id)? {
            if let Some(dir) = entry.file_path {
                let _ = std::fs::remove_dir_all(dir);
            }
        }
        self.review.remove(job_id)?;
        Ok(())
    }

    // =========================================================================
    // Pipeline internals
    // =========================================================================

    async fn enter_awaiting_review(&self) -> Result<()> {
        let job = self
            .update_job(|job| job.state = JobState::AwaitingReview)
            .await?;

        self.review.add(ReviewQueueEntry {
            job_id: job.id.clone(),
            disc_label: job.disc_label.clone(),
            best_guess: job.identification.clone(),
            file_path: None,
            media_kind: job.media_kind,
            season_number: job.season_number,
            created_at: chrono::Utc::now().timestamp(),
        })?;

        // Schedule the uncertain-id notification; a correction within the
        // window suppresses it.
        let token = CancellationToken::new();
        self.inner.lock().await.uncertain_cancel = Some(token.clone());
        let notifier = self.notifier.clone();
        let delay = Duration::from_secs(self.cfg.identification.uncertain_suppress_secs);
        let event = NotificationEvent::UncertainId {
            job_id: job.id.clone(),
            disc_label: job.disc_label.clone(),
            best_guess: job
                .identification
                .as_ref()
                .map(|s| s.candidate.title.clone()),
        };
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => notifier.notify(event),
                _ = token.cancelled() => {}
            }
        });
        Ok(())
    }

    async fn begin_countdown(self: Arc<Self>) -> Result<()> {
        let job = self
            .update_job(|job| job.state = JobState::Countdown)
            .await?;
        let secs = self.cfg.ripping.countdown_secs;
        self.activity.countdown_started(&job.id, secs);

        let token = CancellationToken::new();
        self.inner.lock().await.countdown_cancel = Some(token.clone());
        let this = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                    if let Err(e) = this.begin_rip().await {
                        error!("failed to start rip after countdown: {e:#}");
                    }
                }
                _ = token.cancelled() => {}
            }
        });
        Ok(())
    }

    async fn begin_rip(self: Arc<Self>) -> Result<()> {
        let (job, cancel) = {
            let mut inner = self.inner.lock().await;
            let Some(job) = inner.job.as_mut() else {
                bail!("no active job");
            };
            if !matches!(
                job.state,
                JobState::Scanned | JobState::Countdown | JobState::AwaitingReview
            ) {
                bail!("cannot start rip from state {}", job.state.as_str());
            }
            if job.selected_tracks.is_empty() {
                bail!("no tracks selected for extraction");
            }

            let attempts = plan_attempts(job.disc_kind, self.cfg.ripping.strategy);
            job.rip_phase = attempts.first().copied();
            job.rip_mode = if attempts.first() == Some(&RipPhase::BackupAttempt) {
                RipMode::Backup
            } else {
                RipMode::Direct
            };
            job.progress = RipProgress {
                bytes_done: 0,
                bytes_expected: job
                    .selected_tracks
                    .iter()
                    .filter_map(|t| t.size_bytes)
                    .sum(),
            };
            job.output_dir = Some(match job.media_kind {
                MediaKind::Tv => self.cfg.paths.raw.join(sanitize_folder_name(&format!(
                    "{}_S{:02}",
                    job.display_title(),
                    job.season_number
                ))),
                _ => self
                    .cfg
                    .paths
                    .raw
                    .join(sanitize_folder_name(&job.disc_label)),
            });
            let before = job.state;
            job.state = JobState::Ripping;
            job.touch();
            self.job_store.save(job)?;
            self.activity
                .state_changed(&job.id, before.as_str(), job.state.as_str());

            let job_snapshot = job.clone();
            let cancel = CancellationToken::new();
            inner.rip_cancel = Some(cancel.clone());
            (job_snapshot, cancel)
        };

        self.activity.rip_started(
            &job.id,
            &job.display_title(),
            self.cfg.ripping.strategy.as_str(),
        );

        let (events_tx, events_rx) = unbounded_channel();
        self.clone().spawn_progress_task(events_rx);

        let this = self.clone();
        let handle = tokio::spawn(async move {
            let result = this.driver.extract(&job, events_tx, cancel).await;
            this.finish_rip(result).await;
        });
        self.inner.lock().await.rip_task = Some(handle);
        Ok(())
    }

    /// Consume driver events, updating the job and persisting progress at
    /// a bounded rate so a crash mid-rip recovers with a current ratio.
    fn spawn_progress_task(self: Arc<Self>, mut rx: UnboundedReceiver<DriverEvent>) {
        let this = self.clone();
        let save_every = Duration::from_secs(self.cfg.ripping.progress_save_interval_secs.max(1));
        tokio::spawn(async move {
            let mut last_save = tokio::time::Instant::now();
            while let Some(event) = rx.recv().await {
                let mut inner = this.inner.lock().await;
                let Some(job) = inner.job.as_mut() else {
                    continue;
                };
                // Late events must not touch a job that already moved on,
                // or they would resurrect a cleared snapshot.
                if job.state != JobState::Ripping {
                    continue;
                }
                match event {
                    DriverEvent::Progress(update) => {
                        job.progress.bytes_done = update.bytes_done;
                        job.progress.bytes_expected = update.bytes_expected;
                        job.touch();
                        if last_save.elapsed() >= save_every {
                            if let Err(e) = this.job_store.save(job) {
                                warn!("failed to persist progress: {e}");
                            }
                            last_save = tokio::time::Instant::now();
                        }
                    }
                    DriverEvent::Phase(phase) => {
                        if phase == RipPhase::BackupAttempt && job.rip_mode == RipMode::Direct {
                            this.activity.fallback_to_backup(&job.id);
                            job.rip_mode = RipMode::Backup;
                        }
                        job.rip_phase = Some(phase);
                        job.touch();
                        if let Err(e) = this.job_store.save(job) {
                            warn!("failed to persist phase change: {e}");
                        }
                    }
                }
            }
        });
    }

    async fn finish_rip(&self, result: Result<ExtractionOutcome, ExtractionError>) {
        match result {
            Ok(outcome) => {
                let bytes_written = outcome.bytes_written;
                let job = match self
                    .update_job(|job| {
                        // The scan may not have reported sizes; the files on
                        // disk are the ground truth for the final ratio.
                        if job.progress.bytes_expected == 0 {
                            job.progress.bytes_expected = bytes_written;
                        }
                        job.progress.bytes_done = job.progress.bytes_expected;
                        job.state = JobState::PostProcessing;
                    })
                    .await
                {
                    Ok(job) => job,
                    Err(e) => {
                        error!("failed to transition into post-processing: {e:#}");
                        return;
                    }
                };
                self.post_process(job, outcome).await;
            }
            Err(ExtractionError::Cancelled) => {
                self.mark_cancelled().await;
            }
            Err(e) => {
                let info = e.to_error_info();
                let job = self
                    .update_job(|job| {
                        job.state = JobState::Failed;
                        job.error = Some(info.clone());
                    })
                    .await;
                if let Ok(job) = job {
                    self.activity
                        .rip_failed(&job.id, &job.display_title(), &info.message);
                    self.notifier.notify(NotificationEvent::Error {
                        job_id: job.id.clone(),
                        message: info.message,
                    });
                }
            }
        }
    }

    async fn post_process(&self, job: Job, outcome: ExtractionOutcome) {
        if let Err(e) = self.run_post_process(&job, &outcome).await {
            let message = format!("post-processing failed: {e:#}");
            self.activity
                .rip_failed(&job.id, &job.display_title(), &message);
            let _ = self
                .update_job(|job| {
                    job.state = JobState::Failed;
                    job.error = Some(ErrorInfo {
                        kind: "POST_PROCESS".to_string(),
                        message: message.clone(),
                        tool_tail: Vec::new(),
                    });
                })
                .await;
            self.notifier.notify(NotificationEvent::Error {
                job_id: job.id.clone(),
                message,
            });
        }
    }

    async fn run_post_process(&self, job: &Job, outcome: &ExtractionOutcome) -> Result<()> {
        let mut score = job.identification.clone();

        if self.cfg.ripping.hands_free {
            // Identify against what was actually extracted, not the scan.
            let largest = outcome
                .files
                .iter()
                .max_by_key(|path| std::fs::metadata(path).map(|m| m.len()).unwrap_or(0));
            if let Some(path) = largest {
                match self.probe.measure_duration(path).await {
                    Ok(secs) => {
                        score = self.engine.identify_runtime(&job.disc_label, secs).await;
                    }
                    Err(e) => warn!("media probe failed: {e:#}"),
                }
            }
            self.update_job(|job| job.identification = score.clone())
                .await?;
        }

        let band = score
            .as_ref()
            .map(|s| s.band)
            .unwrap_or(ConfidenceBand::Low);

        if band.needs_review() {
            let dest = self
                .library
                .move_to_review(&job.id, &job.disc_label, &outcome.files)?;
            self.review.add(ReviewQueueEntry {
                job_id: job.id.clone(),
                disc_label: job.disc_label.clone(),
                best_guess: score.clone(),
                file_path: Some(dest.clone()),
                media_kind: job.media_kind,
                season_number: job.season_number,
                created_at: chrono::Utc::now().timestamp(),
            })?;
            self.activity
                .moved_to_review(&job.id, &dest.display().to_string());
            self.notifier.notify(NotificationEvent::UncertainId {
                job_id: job.id.clone(),
                disc_label: job.disc_label.clone(),
                best_guess: score.as_ref().map(|s| s.candidate.title.clone()),
            });
            return self.complete_job(dest).await;
        }

        let score = score.context("confident band without a score")?;
        // Poster/year/synopsis by the matched record's id, never a second
        // title search.
        let details = self.engine.refine(&score).await;
        let title = details
            .as_ref()
            .map(|d| d.title.clone())
            .unwrap_or_else(|| score.candidate.title.clone());
        let year = details.as_ref().and_then(|d| d.year).or(score.candidate.year);

        let dest = match job.media_kind {
            MediaKind::Tv => self
                .library
                .finalize_tv(&title, job.season_number, &outcome.files)?,
            _ => self.library.finalize_movie(&title, year, &outcome.files)?,
        };
        self.activity
            .moved_to_library(&job.id, &dest.display().to_string());

        let record = RipRecord {
            job_id: job.id.clone(),
            title: title.clone(),
            year,
            disc_kind: job.disc_kind.map(|k| k.as_str().to_string()),
            media_kind: format!("{:?}", job.media_kind).to_uppercase(),
            size_bytes: outcome.bytes_written,
            duration_secs: (chrono::Utc::now() - job.created_at).num_seconds(),
            rip_phase: outcome.phase.as_str().to_string(),
            finished_at: chrono::Utc::now().timestamp(),
        };
        if let Err(e) = self.history.record_rip(record) {
            warn!("failed to record rip history: {e}");
        }

        self.activity.rip_completed(&job.id, &title);
        self.notifier.notify(NotificationEvent::Complete {
            job_id: job.id.clone(),
            title,
        });
        self.complete_job(dest).await
    }

    async fn complete_job(&self, dest: PathBuf) -> Result<()> {
        let eject = self.cfg.ripping.eject_when_done;
        if eject {
            let device = {
                let inner = self.inner.lock().await;
                inner.job.as_ref().map(|j| j.device_path.clone())
            };
            if let Some(device) = device {
                self.tool.eject(&device).await;
            }
        }
        self.update_job(|job| {
            job.state = JobState::Complete;
            job.output_dir = Some(dest.clone());
            job.eject_done = eject;
        })
        .await?;
        // Terminal and archived to history; the snapshot's job is done.
        self.job_store.clear()?;
        Ok(())
    }

    /// Mark the current job Cancelled, once. Cancellation is logged with
    /// its own activity kind so it never counts as a failure.
    async fn mark_cancelled(&self) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(job) = inner.job.as_mut() else {
            return false;
        };
        if job.state.is_terminal() {
            return false;
        }
        let before = job.state;
        job.state = JobState::Cancelled;
        job.touch();
        self.activity
            .state_changed(&job.id, before.as_str(), job.state.as_str());
        self.activity.rip_cancelled(&job.id, &job.display_title());
        if let Err(e) = self.job_store.clear() {
            warn!("failed to clear job snapshot after cancellation: {e}");
        }
        true
    }

    async fn cancel_pending_timers(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(token) = inner.countdown_cancel.take() {
            token.cancel();
        }
        if let Some(token) = inner.uncertain_cancel.take() {
            token.cancel();
        }
    }

    async fn fail_job(&self, kind: &str, message: &str, tool_tail: Vec<String>) {
        let result = self
            .update_job(|job| {
                job.state = JobState::Failed;
                job.error = Some(ErrorInfo {
                    kind: kind.to_string(),
                    message: message.to_string(),
                    tool_tail: tool_tail.clone(),
                });
            })
            .await;
        match result {
            Ok(job) => {
                self.notifier.notify(NotificationEvent::Error {
                    job_id: job.id,
                    message: message.to_string(),
                });
            }
            Err(e) => error!("failed to persist job failure: {e:#}"),
        }
    }

    /// Mutate the job under the lock, persist it, and log any state
    /// change. Persistence failure is fatal to the transition.
    async fn update_job<F>(&self, mutate: F) -> Result<Job>
    where
        F: FnOnce(&mut Job),
    {
        let mut inner = self.inner.lock().await;
        let Some(job) = inner.job.as_mut() else {
            bail!("no active job");
        };
        let before = job.state;
        mutate(job);
        job.touch();
        self.job_store.save(job)?;
        if job.state != before {
            self.activity
                .state_changed(&job.id, before.as_str(), job.state.as_str());
        }
        Ok(job.clone())
    }
}
