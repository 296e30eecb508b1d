//! Review queue.
//!
//! Jobs whose identification confidence fell below threshold are parked
//! here for manual resolution. Entries are written only by the core; a
//! manual-resolution UI consumes and resolves them.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::identify::{MediaKind, ScoreResult};

const SCHEMA_VERSION: i32 = 1;

const SCHEMA: &str = "
CREATE TABLE review_queue (
    job_id TEXT PRIMARY KEY,
    disc_label TEXT NOT NULL,
    best_guess TEXT,
    file_path TEXT,
    media_kind TEXT NOT NULL,
    season_number INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL
);
CREATE INDEX idx_review_created ON review_queue (created_at);
";

/// A job snapshot parked for manual resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewQueueEntry {
    pub job_id: String,
    pub disc_label: String,
    /// Best (sub-threshold) identification, when there was one.
    pub best_guess: Option<ScoreResult>,
    /// Where extracted files are parked; absent for pre-rip entries.
    pub file_path: Option<PathBuf>,
    pub media_kind: MediaKind,
    pub season_number: u32,
    /// Unix timestamp.
    pub created_at: i64,
}

/// Storage for review queue entries.
pub trait ReviewQueueStore: Send + Sync {
    fn add(&self, entry: ReviewQueueEntry) -> Result<()>;
    fn get(&self, job_id: &str) -> Result<Option<ReviewQueueEntry>>;
    fn list(&self) -> Result<Vec<ReviewQueueEntry>>;
    /// Returns true if an entry was removed.
    fn remove(&self, job_id: &str) -> Result<bool>;
    /// Update the parked file path (set after a post-rip park).
    fn set_file_path(&self, job_id: &str, file_path: &Path) -> Result<()>;
}

/// SQLite-backed review queue.
pub struct SqliteReviewQueueStore {
    conn: Mutex<Connection>,
}

impl SqliteReviewQueueStore {
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("opening review queue database at {:?}", path))?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    match version {
        0 => {
            conn.execute_batch(SCHEMA)?;
            conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION}"))?;
            Ok(())
        }
        SCHEMA_VERSION => Ok(()),
        other => bail!("unsupported review queue schema version {other}"),
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<(ReviewQueueEntry, Option<String>)> {
    let best_guess_raw: Option<String> = row.get(2)?;
    let file_path: Option<String> = row.get(3)?;
    let media_kind_raw: String = row.get(4)?;
    let media_kind = match media_kind_raw.as_str() {
        "MOVIE" => MediaKind::Movie,
        "TV" => MediaKind::Tv,
        _ => MediaKind::Unknown,
    };
    Ok((
        ReviewQueueEntry {
            job_id: row.get(0)?,
            disc_label: row.get(1)?,
            best_guess: None,
            file_path: file_path.map(PathBuf::from),
            media_kind,
            season_number: row.get::<_, i64>(5)? as u32,
            created_at: row.get(6)?,
        },
        best_guess_raw,
    ))
}

impl ReviewQueueStore for SqliteReviewQueueStore {
    fn add(&self, entry: ReviewQueueEntry) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let best_guess = entry
            .best_guess
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let media_kind = match entry.media_kind {
            MediaKind::Movie => "MOVIE",
            MediaKind::Tv => "TV",
            MediaKind::Unknown => "UNKNOWN",
        };
        conn.execute(
            "INSERT OR REPLACE INTO review_queue
             (job_id, disc_label, best_guess, file_path, media_kind, season_number, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.job_id,
                entry.disc_label,
                best_guess,
                entry.file_path.as_ref().map(|p| p.display().to_string()),
                media_kind,
                entry.season_number as i64,
                entry.created_at
            ],
        )?;
        info!("added review queue entry for {}", entry.disc_label);
        Ok(())
    }

    fn get(&self, job_id: &str) -> Result<Option<ReviewQueueEntry>> {
        let conn = self.conn.lock().unwrap();
        let found = conn
            .query_row(
                "SELECT job_id, disc_label, best_guess, file_path, media_kind, season_number, created_at
                 FROM review_queue WHERE job_id = ?1",
                params![job_id],
                row_to_entry,
            )
            .optional()?;
        Ok(found.map(decode_best_guess))
    }

    fn list(&self) -> Result<Vec<ReviewQueueEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT job_id, disc_label, best_guess, file_path, media_kind, season_number, created_at
             FROM review_queue ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map([], row_to_entry)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(decode_best_guess(row?));
        }
        Ok(entries)
    }

    fn remove(&self, job_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute("DELETE FROM review_queue WHERE job_id = ?1", params![job_id])?;
        Ok(deleted > 0)
    }

    fn set_file_path(&self, job_id: &str, file_path: &Path) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE review_queue SET file_path = ?2 WHERE job_id = ?1",
            params![job_id, file_path.display().to_string()],
        )?;
        Ok(())
    }
}

fn decode_best_guess((mut entry, raw): (ReviewQueueEntry, Option<String>)) -> ReviewQueueEntry {
    entry.best_guess = raw.and_then(|s| serde_json::from_str(&s).ok());
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identify::{ConfidenceBand, IdentificationCandidate, ProviderKind};

    fn entry(job_id: &str) -> ReviewQueueEntry {
        ReviewQueueEntry {
            job_id: job_id.to_string(),
            disc_label: "MYSTERY_DISC".to_string(),
            best_guess: Some(ScoreResult {
                candidate: IdentificationCandidate {
                    title: "Maybe This".to_string(),
                    year: Some(2010),
                    external_id: "42".to_string(),
                    provider: ProviderKind::Tmdb,
                    runtime_minutes: Some(100),
                },
                score: 60,
                band: ConfidenceBand::Low,
            }),
            file_path: None,
            media_kind: MediaKind::Movie,
            season_number: 1,
            created_at: 1000,
        }
    }

    #[test]
    fn test_add_get_round_trip() {
        let store = SqliteReviewQueueStore::in_memory().unwrap();
        store.add(entry("job-1")).unwrap();

        let loaded = store.get("job-1").unwrap().unwrap();
        assert_eq!(loaded.disc_label, "MYSTERY_DISC");
        assert_eq!(loaded.media_kind, MediaKind::Movie);
        let guess = loaded.best_guess.unwrap();
        assert_eq!(guess.candidate.title, "Maybe This");
        assert_eq!(guess.band, ConfidenceBand::Low);
    }

    #[test]
    fn test_list_orders_by_creation() {
        let store = SqliteReviewQueueStore::in_memory().unwrap();
        let mut second = entry("job-2");
        second.created_at = 2000;
        store.add(second).unwrap();
        store.add(entry("job-1")).unwrap();

        let entries = store.list().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].job_id, "job-1");
    }

    #[test]
    fn test_remove() {
        let store = SqliteReviewQueueStore::in_memory().unwrap();
        store.add(entry("job-1")).unwrap();
        assert!(store.remove("job-1").unwrap());
        assert!(!store.remove("job-1").unwrap());
        assert!(store.get("job-1").unwrap().is_none());
    }

    #[test]
    fn test_set_file_path() {
        let store = SqliteReviewQueueStore::in_memory().unwrap();
        store.add(entry("job-1")).unwrap();
        store
            .set_file_path("job-1", &PathBuf::from("/mnt/media/rips/review/job-1"))
            .unwrap();
        let loaded = store.get("job-1").unwrap().unwrap();
        assert_eq!(
            loaded.file_path.unwrap(),
            PathBuf::from("/mnt/media/rips/review/job-1")
        );
    }
}
