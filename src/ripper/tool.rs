//! Seam between the rip pipeline and the external extraction tool.
//!
//! The orchestrator and driver only ever talk to [`DiscTool`], so tests can
//! substitute a scripted implementation without spawning processes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::makemkv::{DiscInfo, ScanError};

/// Where the tool reads from: a live drive or a decrypted backup area.
#[derive(Debug, Clone)]
pub enum DiscSource {
    Device(String),
    Backup(PathBuf),
}

/// Incremental progress from a running extraction.
#[derive(Debug, Clone, Copy)]
pub struct ProgressUpdate {
    pub bytes_done: u64,
    pub bytes_expected: u64,
}

/// Options for a single tool run.
#[derive(Clone)]
pub struct RunOptions {
    /// Expected output size, used to scale percentage progress into bytes.
    pub expected_bytes: u64,
    /// No progress advance for this long terminates the run as stalled.
    pub stall_timeout: Duration,
    /// How long to wait after a polite terminate before force-killing.
    pub kill_grace: Duration,
    /// Cancels the run and kills the child process.
    pub cancel: CancellationToken,
    /// Receiver side is owned by the orchestrator's progress task.
    pub progress: Option<mpsc::UnboundedSender<ProgressUpdate>>,
}

/// What a completed (exit 0) run looked like from the outside.
///
/// A successful exit with `progress_seen == false` is suspicious: the tool
/// sometimes reports success without having written anything. The driver
/// double-checks the filesystem in that case.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub progress_seen: bool,
    pub peak_ratio: f64,
    /// Last status/error messages emitted by the tool.
    pub tail: Vec<String>,
}

/// Failure of a single tool run.
#[derive(Debug, Error)]
pub enum ToolRunError {
    #[error("tool I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("tool exited with code {code}: {message}")]
    Exited {
        code: i32,
        message: String,
        tail: Vec<String>,
    },
    #[error("no progress for {secs}s, process terminated")]
    Stalled { secs: u64, tail: Vec<String> },
    #[error("run cancelled")]
    Cancelled,
}

impl ToolRunError {
    /// Diagnostic tail lines, when the failure mode captured any.
    pub fn tail(&self) -> &[String] {
        match self {
            ToolRunError::Exited { tail, .. } | ToolRunError::Stalled { tail, .. } => tail,
            _ => &[],
        }
    }
}

/// The extraction tool as the rip pipeline sees it.
#[async_trait]
pub trait DiscTool: Send + Sync {
    /// Scan a disc or backup area for track information.
    async fn scan(&self, source: &DiscSource) -> Result<DiscInfo, ScanError>;

    /// Extract a single title into `out_dir`.
    async fn rip_title(
        &self,
        source: &DiscSource,
        title: u32,
        out_dir: &Path,
        opts: RunOptions,
    ) -> Result<RunReport, ToolRunError>;

    /// Decrypt the full disc into `out_dir`.
    async fn backup_disc(
        &self,
        device: &str,
        out_dir: &Path,
        opts: RunOptions,
    ) -> Result<RunReport, ToolRunError>;

    /// Eject the disc. Best-effort.
    async fn eject(&self, device: &str);
}
