//! Process wrapper for makemkvcon.
//!
//! Spawns the tool with robot-mode output, consumes stdout incrementally so
//! cancellation stays responsive, and applies stall detection while a rip or
//! backup is running.

use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::parser::{assemble_disc_info, describe_exit_code, parse_line, ToolEvent};
use super::{DiscInfo, ScanError};
use crate::ripper::tool::{DiscSource, DiscTool, ProgressUpdate, RunOptions, RunReport, ToolRunError};

/// Number of trailing tool messages kept for diagnostics.
const TAIL_LINES: usize = 20;

/// Invokes makemkvcon and translates its output into typed results.
pub struct MakemkvClient {
    binary: String,
}

impl MakemkvClient {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// makemkvcon addresses drives as `disc:N` and backups as `file:PATH`.
    fn source_arg(source: &DiscSource) -> String {
        match source {
            DiscSource::Device(device) => {
                let index = device
                    .strip_prefix("/dev/sr")
                    .and_then(|n| n.parse::<u32>().ok())
                    .unwrap_or(0);
                format!("disc:{index}")
            }
            DiscSource::Backup(path) => format!("file:{}", path.display()),
        }
    }

    async fn run_streaming(
        &self,
        args: Vec<String>,
        opts: RunOptions,
    ) -> Result<RunReport, ToolRunError> {
        debug!("running {} {}", self.binary, args.join(" "));

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("child stdout not captured"))?;
        let mut lines = BufReader::new(stdout).lines();

        let mut report = RunReport::default();
        let mut tail: VecDeque<String> = VecDeque::with_capacity(TAIL_LINES);
        let mut last_progress = Instant::now();

        loop {
            let stall_deadline = last_progress + opts.stall_timeout;
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        match parse_line(&line) {
                            Some(ToolEvent::Progress { current, max, .. }) if max > 0 => {
                                let ratio = current as f64 / max as f64;
                                if ratio > report.peak_ratio {
                                    report.peak_ratio = ratio;
                                }
                                report.progress_seen = true;
                                last_progress = Instant::now();
                                if let Some(tx) = &opts.progress {
                                    let _ = tx.send(ProgressUpdate {
                                        bytes_done: (ratio * opts.expected_bytes as f64) as u64,
                                        bytes_expected: opts.expected_bytes,
                                    });
                                }
                            }
                            Some(ToolEvent::Message { text, .. }) => {
                                if tail.len() == TAIL_LINES {
                                    tail.pop_front();
                                }
                                tail.push_back(text);
                            }
                            _ => {}
                        }
                    }
                    Ok(None) => break,
                    Err(e) => return Err(ToolRunError::Io(e)),
                },
                _ = opts.cancel.cancelled() => {
                    terminate_child(&mut child, opts.kill_grace).await;
                    return Err(ToolRunError::Cancelled);
                }
                _ = tokio::time::sleep_until(stall_deadline) => {
                    warn!(
                        "no progress for {}s, terminating extraction process",
                        opts.stall_timeout.as_secs()
                    );
                    terminate_child(&mut child, opts.kill_grace).await;
                    return Err(ToolRunError::Stalled {
                        secs: opts.stall_timeout.as_secs(),
                        tail: tail.into(),
                    });
                }
            }
        }

        let status = child.wait().await?;
        report.tail = tail.into();

        if status.success() {
            Ok(report)
        } else {
            let code = status.code().unwrap_or(-1);
            Err(ToolRunError::Exited {
                code,
                message: describe_exit_code(code),
                tail: report.tail,
            })
        }
    }
}

/// Ask the child to terminate, give it `grace` to exit, then force-kill.
async fn terminate_child(child: &mut Child, grace: Duration) {
    if let Some(pid) = child.id() {
        // Polite SIGTERM first so the tool releases the drive cleanly.
        let _ = std::process::Command::new("kill").arg(pid.to_string()).status();
        if tokio::time::timeout(grace, child.wait()).await.is_ok() {
            return;
        }
        warn!("extraction process did not exit within grace period, force-killing");
    }
    let _ = child.kill().await;
    let _ = child.wait().await;
}

#[async_trait]
impl DiscTool for MakemkvClient {
    async fn scan(&self, source: &DiscSource) -> Result<DiscInfo, ScanError> {
        let output = Command::new(&self.binary)
            .args(["-r", "info", &Self::source_arg(source)])
            .output()
            .await
            .map_err(|source| ScanError::Spawn { source })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let events: Vec<ToolEvent> = stdout.lines().filter_map(parse_line).collect();

        if !output.status.success() {
            let detail = events
                .iter()
                .filter_map(|e| match e {
                    ToolEvent::Message { text, .. } => Some(text.as_str()),
                    _ => None,
                })
                .last()
                .unwrap_or("no diagnostic output")
                .to_string();
            return Err(ScanError::ToolFailed {
                code: output.status.code().unwrap_or(-1),
                detail,
            });
        }

        let info = assemble_disc_info(events);
        if info.label.is_empty() && info.tracks.is_empty() {
            return Err(ScanError::Unparsable);
        }
        Ok(info)
    }

    async fn rip_title(
        &self,
        source: &DiscSource,
        title: u32,
        out_dir: &Path,
        opts: RunOptions,
    ) -> Result<RunReport, ToolRunError> {
        tokio::fs::create_dir_all(out_dir).await?;
        let args = vec![
            "-r".to_string(),
            "--progress=-stdout".to_string(),
            "mkv".to_string(),
            Self::source_arg(source),
            title.to_string(),
            out_dir.display().to_string(),
        ];
        self.run_streaming(args, opts).await
    }

    async fn backup_disc(
        &self,
        device: &str,
        out_dir: &Path,
        opts: RunOptions,
    ) -> Result<RunReport, ToolRunError> {
        tokio::fs::create_dir_all(out_dir).await?;
        let args = vec![
            "-r".to_string(),
            "--progress=-stdout".to_string(),
            "backup".to_string(),
            Self::source_arg(&DiscSource::Device(device.to_string())),
            out_dir.display().to_string(),
        ];
        self.run_streaming(args, opts).await
    }

    async fn eject(&self, device: &str) {
        match Command::new("eject").arg(device).status().await {
            Ok(status) if status.success() => debug!("disc ejected from {device}"),
            Ok(status) => warn!("eject {device} exited with {status}"),
            Err(e) => warn!("failed to run eject for {device}: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_arg_device() {
        assert_eq!(
            MakemkvClient::source_arg(&DiscSource::Device("/dev/sr0".to_string())),
            "disc:0"
        );
        assert_eq!(
            MakemkvClient::source_arg(&DiscSource::Device("/dev/sr2".to_string())),
            "disc:2"
        );
        // Unrecognized device paths fall back to the first drive.
        assert_eq!(
            MakemkvClient::source_arg(&DiscSource::Device("/dev/cdrom".to_string())),
            "disc:0"
        );
    }

    #[test]
    fn test_source_arg_backup() {
        assert_eq!(
            MakemkvClient::source_arg(&DiscSource::Backup("/tmp/backup".into())),
            "file:/tmp/backup"
        );
    }
}
