//! Media probing.
//!
//! Measures the actual runtime of an extracted file, used for hands-free
//! post-rip identification and review metadata.

use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

/// Measures media file durations.
#[async_trait]
pub trait MediaProbe: Send + Sync {
    /// Duration of the file in seconds.
    async fn measure_duration(&self, path: &Path) -> Result<u64>;
}

/// ffprobe-backed probe.
pub struct FfprobeProbe {
    binary: String,
}

impl FfprobeProbe {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl MediaProbe for FfprobeProbe {
    async fn measure_duration(&self, path: &Path) -> Result<u64> {
        let output = Command::new(&self.binary)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .output()
            .await
            .with_context(|| format!("running {} on {:?}", self.binary, path))?;

        if !output.status.success() {
            bail!("ffprobe exited with {} for {:?}", output.status, path);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_duration_output(&stdout)
            .with_context(|| format!("unparsable ffprobe output for {:?}", path))
    }
}

fn parse_duration_output(stdout: &str) -> Option<u64> {
    stdout.trim().parse::<f64>().ok().map(|secs| secs as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_output() {
        assert_eq!(parse_duration_output("7205.336000\n"), Some(7205));
        assert_eq!(parse_duration_output("42"), Some(42));
        assert_eq!(parse_duration_output("N/A"), None);
        assert_eq!(parse_duration_output(""), None);
    }
}
