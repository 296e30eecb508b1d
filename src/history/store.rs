//! SQLite-backed history storage.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection};
use tracing::{info, warn};

use super::{ActivityEvent, ActivityKind, HistoryStore, RipRecord};

const SCHEMA_VERSION: i32 = 1;

const SCHEMA: &str = "
CREATE TABLE activity_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at INTEGER NOT NULL,
    kind TEXT NOT NULL,
    job_id TEXT,
    message TEXT NOT NULL,
    details TEXT
);
CREATE INDEX idx_activity_created ON activity_log (created_at);
CREATE INDEX idx_activity_kind ON activity_log (kind);

CREATE TABLE rip_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL,
    title TEXT NOT NULL,
    year INTEGER,
    disc_kind TEXT,
    media_kind TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    duration_secs INTEGER NOT NULL,
    rip_phase TEXT NOT NULL,
    finished_at INTEGER NOT NULL
);
CREATE INDEX idx_rip_history_finished ON rip_history (finished_at);
";

/// History store backed by a single SQLite file.
pub struct SqliteHistoryStore {
    conn: Mutex<Connection>,
}

impl SqliteHistoryStore {
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("opening history database at {:?}", path))?;
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
            info!("initialized history database schema v{SCHEMA_VERSION}");
            Ok(())
        }
        SCHEMA_VERSION => Ok(()),
        other => bail!("unsupported history database schema version {other}"),
    }
}

impl HistoryStore for SqliteHistoryStore {
    fn log_event(&self, event: ActivityEvent) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let details = event
            .details
            .as_ref()
            .map(|d| d.to_string());
        conn.execute(
            "INSERT INTO activity_log (created_at, kind, job_id, message, details)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.created_at,
                event.kind.as_str(),
                event.job_id,
                event.message,
                details
            ],
        )?;
        Ok(())
    }

    fn recent_events(&self, limit: usize) -> Result<Vec<ActivityEvent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT created_at, kind, job_id, message, details
             FROM activity_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (created_at, kind, job_id, message, details) = row?;
            let Some(kind) = ActivityKind::from_str(&kind) else {
                warn!("skipping activity row with unknown kind {kind:?}");
                continue;
            };
            events.push(ActivityEvent {
                created_at,
                kind,
                job_id,
                message,
                details: details.and_then(|d| serde_json::from_str(&d).ok()),
            });
        }
        Ok(events)
    }

    fn record_rip(&self, record: RipRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO rip_history
             (job_id, title, year, disc_kind, media_kind, size_bytes, duration_secs, rip_phase, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.job_id,
                record.title,
                record.year,
                record.disc_kind,
                record.media_kind,
                record.size_bytes as i64,
                record.duration_secs,
                record.rip_phase,
                record.finished_at
            ],
        )?;
        Ok(())
    }

    fn rips_since(&self, since: i64) -> Result<Vec<RipRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT job_id, title, year, disc_kind, media_kind, size_bytes, duration_secs, rip_phase, finished_at
             FROM rip_history WHERE finished_at >= ?1 ORDER BY finished_at ASC",
        )?;
        let rows = stmt.query_map(params![since], |row| {
            Ok(RipRecord {
                job_id: row.get(0)?,
                title: row.get(1)?,
                year: row.get(2)?,
                disc_kind: row.get(3)?,
                media_kind: row.get(4)?,
                size_bytes: row.get::<_, i64>(5)? as u64,
                duration_secs: row.get(6)?,
                rip_phase: row.get(7)?,
                finished_at: row.get(8)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn prune_events_older_than(&self, cutoff: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM activity_log WHERE created_at < ?1",
            params![cutoff],
        )?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> SqliteHistoryStore {
        SqliteHistoryStore::in_memory().unwrap()
    }

    fn rip_record(job_id: &str, finished_at: i64) -> RipRecord {
        RipRecord {
            job_id: job_id.to_string(),
            title: "Iron Man".to_string(),
            year: Some(2008),
            disc_kind: Some("BLURAY".to_string()),
            media_kind: "MOVIE".to_string(),
            size_bytes: 30_000_000_000,
            duration_secs: 3600,
            rip_phase: "DIRECT_ATTEMPT".to_string(),
            finished_at,
        }
    }

    #[test]
    fn test_log_and_read_events() {
        let store = store();
        store
            .log_event(
                ActivityEvent::new(ActivityKind::Identified, "found it")
                    .with_job("job-1")
                    .with_details(json!({"score": 88})),
            )
            .unwrap();
        store
            .log_event(ActivityEvent::new(ActivityKind::RipCancelled, "stopped"))
            .unwrap();

        let events = store.recent_events(10).unwrap();
        assert_eq!(events.len(), 2);
        // Most recent first.
        assert_eq!(events[0].kind, ActivityKind::RipCancelled);
        assert_eq!(events[1].job_id.as_deref(), Some("job-1"));
        assert_eq!(events[1].details.as_ref().unwrap()["score"], 88);
    }

    #[test]
    fn test_recent_events_respects_limit() {
        let store = store();
        for i in 0..5 {
            store
                .log_event(ActivityEvent::new(
                    ActivityKind::StateChanged,
                    format!("step {i}"),
                ))
                .unwrap();
        }
        assert_eq!(store.recent_events(3).unwrap().len(), 3);
    }

    #[test]
    fn test_record_and_query_rips() {
        let store = store();
        store.record_rip(rip_record("old", 100)).unwrap();
        store.record_rip(rip_record("new", 200)).unwrap();

        let recent = store.rips_since(150).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].job_id, "new");
        assert_eq!(recent[0].size_bytes, 30_000_000_000);
    }

    #[test]
    fn test_prune_events() {
        let store = store();
        let mut old = ActivityEvent::new(ActivityKind::StateChanged, "old");
        old.created_at = 100;
        store.log_event(old).unwrap();
        let mut newer = ActivityEvent::new(ActivityKind::StateChanged, "new");
        newer.created_at = 300;
        store.log_event(newer).unwrap();

        let pruned = store.prune_events_older_than(200).unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(store.recent_events(10).unwrap().len(), 1);
    }
}
