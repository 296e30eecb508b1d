//! Extraction driver.
//!
//! Executes the direct/backup strategy for a job: plans the attempt
//! sequence from disc kind and configured strategy, runs the tool, verifies
//! that "success" actually produced output, and falls back from direct to
//! backup extraction at most once.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{LibraryPaths, RippingSettings};
use crate::makemkv::{DiscKind, Track};

use super::library::sanitize_folder_name;
use super::models::{ExtractionError, Job, RipPhase, RipStrategy};
use super::tool::{DiscSource, DiscTool, ProgressUpdate, RunOptions, ToolRunError};

/// Same-duration window treated as alternate angles when re-resolving
/// titles against a backup scan.
const ANGLE_EPSILON_SECS: u64 = 5;

/// Result of a successful extraction.
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub output_dir: PathBuf,
    pub files: Vec<PathBuf>,
    pub bytes_written: u64,
    /// The phase that produced the output.
    pub phase: RipPhase,
}

/// Events streamed to the orchestrator while an extraction runs.
#[derive(Debug, Clone, Copy)]
pub enum DriverEvent {
    Progress(ProgressUpdate),
    /// A new attempt phase started; fallback transitions are observable
    /// (and persisted) through this.
    Phase(RipPhase),
}

/// Fraction of overall progress assigned to each phase of a backup rip:
/// the disc copy is the first half, extraction from the backup the second.
#[derive(Debug, Clone, Copy)]
struct ProgressScale {
    base: f64,
    span: f64,
}

const FULL: ProgressScale = ProgressScale { base: 0.0, span: 1.0 };
const BACKUP_COPY: ProgressScale = ProgressScale { base: 0.0, span: 0.5 };
const BACKUP_EXTRACT: ProgressScale = ProgressScale { base: 0.5, span: 0.5 };

/// Plan the attempt sequence for a disc kind and configured strategy.
///
/// DVDs always extract directly: backup produces an image format that is
/// unusable for DVD structures.
pub fn plan_attempts(kind: Option<DiscKind>, strategy: RipStrategy) -> Vec<RipPhase> {
    match (kind, strategy) {
        (Some(DiscKind::Dvd), _) => vec![RipPhase::DirectAttempt],
        (_, RipStrategy::DirectOnly) => vec![RipPhase::DirectAttempt],
        (_, RipStrategy::AlwaysBackup) => vec![RipPhase::BackupAttempt],
        (_, RipStrategy::Smart) => vec![RipPhase::DirectAttempt, RipPhase::BackupAttempt],
    }
}

/// Map each originally selected track onto the closest-duration track from
/// a backup re-scan. Title indices can differ between a live-disc scan and
/// a backup scan, so indices are never carried over directly.
pub fn re_resolve_titles(selected: &[Track], backup_tracks: &[Track]) -> Vec<Track> {
    let mut resolved: Vec<Track> = Vec::new();
    for original in selected {
        let mut candidates: Vec<&Track> = backup_tracks.iter().collect();
        candidates.sort_by_key(|c| {
            let diff = c.duration_secs.abs_diff(original.duration_secs);
            // Near-identical durations are angles of the same feature;
            // bucket them so the playlist name decides.
            let bucket = diff / ANGLE_EPSILON_SECS.max(1);
            (
                bucket,
                c.playlist.clone().unwrap_or_else(|| "~".to_string()),
                c.index,
            )
        });
        if let Some(best) = candidates.first() {
            if !resolved.iter().any(|t| t.index == best.index) {
                resolved.push((*best).clone());
            }
        }
    }
    resolved
}

pub struct ExtractionDriver {
    tool: Arc<dyn DiscTool>,
    paths: LibraryPaths,
    cfg: RippingSettings,
}

impl ExtractionDriver {
    pub fn new(tool: Arc<dyn DiscTool>, paths: LibraryPaths, cfg: RippingSettings) -> Self {
        Self { tool, paths, cfg }
    }

    /// Run the full extraction policy for a job.
    ///
    /// Progress lands on `events` as absolute bytes against the job's
    /// expected total. `cancel` kills the underlying process and aborts.
    pub async fn extract(
        &self,
        job: &Job,
        events: UnboundedSender<DriverEvent>,
        cancel: CancellationToken,
    ) -> Result<ExtractionOutcome, ExtractionError> {
        let out_dir = job
            .output_dir
            .clone()
            .unwrap_or_else(|| self.paths.raw.join(sanitize_folder_name(&job.disc_label)));
        let expected_total: u64 = job
            .selected_tracks
            .iter()
            .filter_map(|t| t.size_bytes)
            .sum();

        let attempts = plan_attempts(job.disc_kind, self.cfg.strategy);
        let mut direct_error: Option<ExtractionError> = None;

        for phase in attempts {
            if cancel.is_cancelled() {
                return Err(ExtractionError::Cancelled);
            }
            let _ = events.send(DriverEvent::Phase(phase));
            match phase {
                RipPhase::DirectAttempt => {
                    let source = DiscSource::Device(job.device_path.clone());
                    match self
                        .rip_selected(
                            &source,
                            &job.selected_tracks,
                            &out_dir,
                            expected_total,
                            FULL,
                            &events,
                            &cancel,
                            RipPhase::DirectAttempt,
                        )
                        .await
                    {
                        Ok((files, bytes_written)) => {
                            return Ok(ExtractionOutcome {
                                output_dir: out_dir,
                                files,
                                bytes_written,
                                phase: RipPhase::DirectAttempt,
                            })
                        }
                        Err(ExtractionError::Cancelled) => return Err(ExtractionError::Cancelled),
                        Err(e) => {
                            // Smart mode proceeds to the backup attempt;
                            // direct-only plans end here.
                            warn!("direct extraction failed: {e}");
                            direct_error = Some(e);
                        }
                    }
                }
                RipPhase::BackupAttempt => {
                    if direct_error.is_some() {
                        info!("falling back to backup extraction (copy protection bypass)");
                    }
                    match self
                        .run_backup(job, &out_dir, expected_total, &events, &cancel)
                        .await
                    {
                        Ok(outcome) => return Ok(outcome),
                        Err(ExtractionError::Cancelled) => return Err(ExtractionError::Cancelled),
                        Err(e) => {
                            return Err(combine_with_direct(e, direct_error));
                        }
                    }
                }
            }
        }

        Err(direct_error.unwrap_or(ExtractionError::SilentFailure {
            phase: RipPhase::DirectAttempt,
        }))
    }

    /// Backup sequence: copy the full disc (unless a valid backup is
    /// already sitting there from a failed earlier run), re-scan the backup
    /// to re-resolve title indices, extract from it, delete the temp area.
    async fn run_backup(
        &self,
        job: &Job,
        out_dir: &Path,
        expected_total: u64,
        events: &UnboundedSender<DriverEvent>,
        cancel: &CancellationToken,
    ) -> Result<ExtractionOutcome, ExtractionError> {
        let backup_dir = self.paths.backup.join(sanitize_folder_name(&job.disc_label));
        let min_bytes = match job.disc_kind {
            Some(DiscKind::Dvd) => self.cfg.min_backup_bytes_dvd,
            _ => self.cfg.min_backup_bytes_bluray,
        };

        let mut reused = false;
        if backup_is_valid(&backup_dir, min_bytes) {
            info!(
                "found existing backup at {:?}, skipping backup phase",
                backup_dir
            );
            reused = true;
        } else {
            if backup_dir.exists() {
                warn!("existing backup at {:?} is not valid, re-copying", backup_dir);
                let _ = tokio::fs::remove_dir_all(&backup_dir).await;
            }
            let opts = RunOptions {
                expected_bytes: expected_total,
                stall_timeout: Duration::from_secs(self.cfg.stall_timeout_secs),
                kill_grace: Duration::from_secs(self.cfg.kill_grace_secs),
                cancel: cancel.clone(),
                progress: Some(scaled_sender(events.clone(), expected_total, BACKUP_COPY, 0)),
            };
            let report = self
                .tool
                .backup_disc(&job.device_path, &backup_dir, opts)
                .await
                .map_err(backup_run_error)?;

            if !report.progress_seen && !backup_is_valid(&backup_dir, min_bytes) {
                return Err(ExtractionError::BackupFailed {
                    message: "backup reported success but no valid disc structure was written"
                        .to_string(),
                    tail: report.tail,
                });
            }
        }

        // Title indices from the live-disc scan may not match the backup.
        let backup_source = DiscSource::Backup(backup_dir.clone());
        let backup_info = self.tool.scan(&backup_source).await.map_err(|e| {
            ExtractionError::BackupFailed {
                message: format!("backup re-scan failed: {e}"),
                tail: Vec::new(),
            }
        })?;

        let titles = re_resolve_titles(&job.selected_tracks, &backup_info.tracks);
        if titles.is_empty() {
            return Err(ExtractionError::BackupFailed {
                message: "backup re-scan found no matching titles".to_string(),
                tail: Vec::new(),
            });
        }

        let scale = if reused { FULL } else { BACKUP_EXTRACT };
        let (files, bytes_written) = self
            .rip_selected(
                &backup_source,
                &titles,
                out_dir,
                expected_total,
                scale,
                events,
                cancel,
                RipPhase::BackupAttempt,
            )
            .await?;

        if let Err(e) = tokio::fs::remove_dir_all(&backup_dir).await {
            warn!("failed to delete backup area {:?}: {e}", backup_dir);
        }

        Ok(ExtractionOutcome {
            output_dir: out_dir.to_path_buf(),
            files,
            bytes_written,
            phase: RipPhase::BackupAttempt,
        })
    }

    /// Extract each selected track in order.
    ///
    /// Multi-track (TV) rips continue past individual failures and only
    /// fail when nothing at all was produced. Every "successful" run is
    /// verified against the filesystem before it counts.
    #[allow(clippy::too_many_arguments)]
    async fn rip_selected(
        &self,
        source: &DiscSource,
        tracks: &[Track],
        out_dir: &Path,
        expected_total: u64,
        scale: ProgressScale,
        events: &UnboundedSender<DriverEvent>,
        cancel: &CancellationToken,
        phase: RipPhase,
    ) -> Result<(Vec<PathBuf>, u64), ExtractionError> {
        let mut produced: Vec<PathBuf> = Vec::new();
        let mut errors: Vec<String> = Vec::new();
        let mut last_tail: Vec<String> = Vec::new();
        let mut hard_failure = false;
        let mut completed_bytes: u64 = 0;
        let fallback_share = expected_total / tracks.len().max(1) as u64;

        for track in tracks {
            if cancel.is_cancelled() {
                return Err(ExtractionError::Cancelled);
            }

            let before = mkv_files(out_dir);
            let track_expected = track.size_bytes.unwrap_or(fallback_share);
            let opts = RunOptions {
                expected_bytes: track_expected,
                stall_timeout: Duration::from_secs(self.cfg.stall_timeout_secs),
                kill_grace: Duration::from_secs(self.cfg.kill_grace_secs),
                cancel: cancel.clone(),
                progress: Some(scaled_sender(
                    events.clone(),
                    expected_total,
                    scale,
                    completed_bytes,
                )),
            };

            match self.tool.rip_title(source, track.index, out_dir, opts).await {
                Ok(report) => {
                    let after = mkv_files(out_dir);
                    let new_files: Vec<(PathBuf, u64)> = after
                        .into_iter()
                        .filter(|(path, _)| !before.iter().any(|(p, _)| p == path))
                        .collect();

                    // Exit 0 with no progress and no plausible file is the
                    // silent-failure pattern.
                    let verified = if report.progress_seen {
                        !new_files.is_empty()
                    } else {
                        new_files
                            .iter()
                            .any(|(_, size)| *size >= self.cfg.min_output_bytes)
                    };

                    if verified {
                        completed_bytes += track_expected;
                        produced.extend(new_files.iter().map(|(p, _)| p.clone()));
                    } else {
                        warn!(
                            "title {} reported success but produced no meaningful output",
                            track.index
                        );
                        errors.push(format!("title {}: no meaningful output", track.index));
                        last_tail = report.tail;
                    }
                }
                Err(ToolRunError::Cancelled) => return Err(ExtractionError::Cancelled),
                Err(ToolRunError::Stalled { secs, tail }) => {
                    if tracks.len() == 1 {
                        return Err(ExtractionError::Stalled { secs, phase });
                    }
                    hard_failure = true;
                    errors.push(format!("title {}: stalled after {secs}s", track.index));
                    last_tail = tail;
                }
                Err(e) => {
                    hard_failure = true;
                    last_tail = e.tail().to_vec();
                    errors.push(format!("title {}: {e}", track.index));
                }
            }
        }

        if produced.is_empty() {
            if !hard_failure {
                return Err(ExtractionError::SilentFailure { phase });
            }
            let message = if errors.is_empty() {
                "no output produced".to_string()
            } else {
                errors.join("; ")
            };
            return Err(match phase {
                RipPhase::DirectAttempt => ExtractionError::DirectFailed {
                    message,
                    tail: last_tail,
                },
                RipPhase::BackupAttempt => ExtractionError::BackupFailed {
                    message,
                    tail: last_tail,
                },
            });
        }

        if !errors.is_empty() {
            warn!(
                "extracted {}/{} titles, failures: {}",
                produced.len(),
                tracks.len(),
                errors.join("; ")
            );
        }

        let bytes_written = produced
            .iter()
            .filter_map(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .sum();
        Ok((produced, bytes_written))
    }
}

fn combine_with_direct(
    backup_error: ExtractionError,
    direct_error: Option<ExtractionError>,
) -> ExtractionError {
    match (backup_error, direct_error) {
        (ExtractionError::BackupFailed { message, tail }, Some(direct)) => {
            ExtractionError::BackupFailed {
                message: format!("{message} (direct attempt: {direct})"),
                tail,
            }
        }
        (e, _) => e,
    }
}

fn backup_run_error(e: ToolRunError) -> ExtractionError {
    match e {
        ToolRunError::Cancelled => ExtractionError::Cancelled,
        ToolRunError::Stalled { secs, .. } => ExtractionError::Stalled {
            secs,
            phase: RipPhase::BackupAttempt,
        },
        other => ExtractionError::BackupFailed {
            tail: other.tail().to_vec(),
            message: other.to_string(),
        },
    }
}

/// A backup area is reusable when it has a disc structure and a plausible
/// size; anything smaller is a leftover from a failed copy.
fn backup_is_valid(backup_dir: &Path, min_bytes: u64) -> bool {
    let has_structure = backup_dir.join("BDMV").is_dir() || backup_dir.join("VIDEO_TS").is_dir();
    has_structure && dir_size(backup_dir) >= min_bytes
}

fn dir_size(dir: &Path) -> u64 {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// MKV files directly inside `dir`, with sizes.
pub(crate) fn mkv_files(dir: &Path) -> Vec<(PathBuf, u64)> {
    walkdir::WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("mkv"))
                .unwrap_or(false)
        })
        .map(|entry| {
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            (entry.into_path(), size)
        })
        .collect()
}

/// Forward per-run progress into the job-wide event stream, scaled by
/// phase and offset by already-completed tracks.
fn scaled_sender(
    overall: UnboundedSender<DriverEvent>,
    expected_total: u64,
    scale: ProgressScale,
    completed_bytes: u64,
) -> UnboundedSender<ProgressUpdate> {
    let (tx, mut rx) = unbounded_channel::<ProgressUpdate>();
    tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            let phase_done = completed_bytes.saturating_add(update.bytes_done);
            let bytes_done = (scale.base * expected_total as f64
                + scale.span * phase_done as f64) as u64;
            let _ = overall.send(DriverEvent::Progress(ProgressUpdate {
                bytes_done: bytes_done.min(expected_total),
                bytes_expected: expected_total,
            }));
        }
    });
    tx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(index: u32, duration_secs: u64) -> Track {
        Track {
            index,
            duration_secs,
            size_bytes: Some(1_000),
            playlist: None,
        }
    }

    #[test]
    fn test_dvd_always_plans_direct() {
        for strategy in [
            RipStrategy::Smart,
            RipStrategy::AlwaysBackup,
            RipStrategy::DirectOnly,
        ] {
            assert_eq!(
                plan_attempts(Some(DiscKind::Dvd), strategy),
                vec![RipPhase::DirectAttempt],
                "DVD must extract directly under {strategy:?}"
            );
        }
    }

    #[test]
    fn test_bluray_plans_by_strategy() {
        assert_eq!(
            plan_attempts(Some(DiscKind::Bluray), RipStrategy::DirectOnly),
            vec![RipPhase::DirectAttempt]
        );
        assert_eq!(
            plan_attempts(Some(DiscKind::Bluray), RipStrategy::AlwaysBackup),
            vec![RipPhase::BackupAttempt]
        );
        assert_eq!(
            plan_attempts(Some(DiscKind::Bluray), RipStrategy::Smart),
            vec![RipPhase::DirectAttempt, RipPhase::BackupAttempt]
        );
    }

    #[test]
    fn test_unknown_kind_follows_strategy() {
        assert_eq!(
            plan_attempts(None, RipStrategy::Smart),
            vec![RipPhase::DirectAttempt, RipPhase::BackupAttempt]
        );
    }

    #[test]
    fn test_re_resolve_titles_by_duration() {
        // Backup scan shifted all indices by one.
        let selected = vec![track(2, 7200)];
        let backup = vec![track(0, 600), track(1, 7195), track(5, 3000)];
        let resolved = re_resolve_titles(&selected, &backup);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].index, 1);
    }

    #[test]
    fn test_re_resolve_prefers_lower_playlist_for_angles() {
        let selected = vec![track(0, 7200)];
        let mut spanish = track(3, 7200);
        spanish.playlist = Some("00801.mpls".to_string());
        let mut english = track(4, 7201);
        english.playlist = Some("00800.mpls".to_string());
        let resolved = re_resolve_titles(&selected, &[spanish, english]);
        assert_eq!(resolved[0].index, 4);
    }

    #[test]
    fn test_re_resolve_deduplicates() {
        let selected = vec![track(0, 1300), track(1, 1302)];
        let backup = vec![track(7, 1301)];
        let resolved = re_resolve_titles(&selected, &backup);
        assert_eq!(resolved.len(), 1);
    }

    #[test]
    fn test_backup_is_valid_requires_structure_and_size() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(!backup_is_valid(dir.path(), 10));

        std::fs::create_dir_all(dir.path().join("BDMV")).unwrap();
        std::fs::write(dir.path().join("BDMV/index.bdmv"), vec![0u8; 64]).unwrap();
        assert!(backup_is_valid(dir.path(), 10));
        assert!(!backup_is_valid(dir.path(), 1_000_000));
    }

    #[test]
    fn test_mkv_files_lists_only_top_level_mkvs() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.mkv"), b"data").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"data").unwrap();
        std::fs::create_dir_all(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/c.mkv"), b"data").unwrap();

        let files = mkv_files(dir.path());
        assert_eq!(files.len(), 1);
        assert!(files[0].0.ends_with("a.mkv"));
    }
}
