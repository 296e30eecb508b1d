//! Durable job snapshot storage.
//!
//! The persisted snapshot is the single source of truth for crash recovery:
//! written after every state transition, read once at startup. Writes are
//! atomic (temp file + rename) so a crash mid-write can never corrupt the
//! previous snapshot.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::warn;

use super::models::Job;

/// Write attempts before a persistence failure surfaces.
const WRITE_ATTEMPTS: u32 = 3;
/// Base backoff between attempts; doubles each retry.
const WRITE_BACKOFF: Duration = Duration::from_millis(50);

/// Durable-write failure. Fatal to the transition that triggered it.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to write job snapshot: {0}")]
    Write(#[source] std::io::Error),
    #[error("failed to read job snapshot: {0}")]
    Read(#[source] std::io::Error),
    #[error("job snapshot is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Storage for the single active job snapshot.
pub trait JobStore: Send + Sync {
    /// Persist the job, retrying transient write failures with backoff.
    fn save(&self, job: &Job) -> Result<(), PersistenceError>;

    /// Load the persisted job, if one exists.
    fn load(&self) -> Result<Option<Job>, PersistenceError>;

    /// Remove the persisted snapshot.
    fn clear(&self) -> Result<(), PersistenceError>;
}

/// JSON-file-backed job store.
pub struct FileJobStore {
    path: PathBuf,
}

impl FileJobStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn write_atomic(&self, payload: &[u8]) -> std::io::Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| std::path::Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(payload)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl JobStore for FileJobStore {
    fn save(&self, job: &Job) -> Result<(), PersistenceError> {
        let payload = serde_json::to_vec_pretty(job)?;

        let mut backoff = WRITE_BACKOFF;
        let mut last_error = None;
        for attempt in 1..=WRITE_ATTEMPTS {
            match self.write_atomic(&payload) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        "job snapshot write attempt {attempt}/{WRITE_ATTEMPTS} failed: {e}"
                    );
                    last_error = Some(e);
                    if attempt < WRITE_ATTEMPTS {
                        std::thread::sleep(backoff);
                        backoff *= 2;
                    }
                }
            }
        }
        Err(PersistenceError::Write(last_error.unwrap_or_else(|| {
            std::io::Error::other("snapshot write failed")
        })))
    }

    fn load(&self) -> Result<Option<Job>, PersistenceError> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PersistenceError::Read(e)),
        };
        let job = serde_json::from_slice(&raw)?;
        Ok(Some(job))
    }

    fn clear(&self) -> Result<(), PersistenceError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PersistenceError::Write(e)),
        }
    }
}
