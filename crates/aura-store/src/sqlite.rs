use std::time::Duration;

use aura_models::archive_schema::{ArchiveRow, FeedbackEntry, ARCHIVE_TABLE_DDL};
use aura_models::{FeedbackRating, WorkflowId, WorkflowRecord};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, ErrorCode};

use crate::error::StoreError;

/// How long a writer waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Append-only SQLite archive of completed workflow records.
///
/// Opened read-write with WAL journal so status readers are not blocked
/// while a run is being archived.
pub struct SqliteArchive {
    conn: Connection,
}

impl SqliteArchive {
    /// Open the archive file. Creates the schema if it doesn't exist. Enables WAL mode.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(ARCHIVE_TABLE_DDL)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database for testing.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(ARCHIVE_TABLE_DDL)?;
        Ok(Self { conn })
    }

    /// Insert a completed record. A second insert for the same id fails
    /// with `AlreadyArchived`; nothing is ever overwritten.
    pub fn insert(&self, record: &WorkflowRecord) -> Result<(), StoreError> {
        let completed_at = record
            .completed_at()
            .ok_or(StoreError::NotCompleted(record.workflow_id()))?;
        let synthesis = record.synthesis_result();
        let result = self.conn.execute(
            "INSERT INTO workflow_archive \
             (workflow_id, instrument, state, direction, confidence, record_json, created_at, completed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                record.workflow_id().to_string(),
                record.instrument(),
                record.state().to_string(),
                synthesis.map(|s| s.direction.to_string()),
                synthesis.map(|s| s.confidence.to_string()),
                serde_json::to_string(record)?,
                timestamp(record.created_at()),
                timestamp(completed_at),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(StoreError::AlreadyArchived(record.workflow_id()))
            }
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    /// Get a single archived record by id.
    pub fn get(&self, workflow_id: WorkflowId) -> Result<Option<ArchiveRow>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT workflow_id, instrument, state, direction, confidence, record_json, created_at, completed_at \
             FROM workflow_archive WHERE workflow_id = ?1",
        )?;

        let result = stmt.query_row(rusqlite::params![workflow_id.to_string()], read_row);

        match result {
            Ok(row) => Ok(Some(row)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    /// Most recent archived runs for an instrument, newest first.
    pub fn list_by_instrument(
        &self,
        instrument: &str,
        limit: usize,
    ) -> Result<Vec<ArchiveRow>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT workflow_id, instrument, state, direction, confidence, record_json, created_at, completed_at \
             FROM workflow_archive WHERE instrument = ?1 ORDER BY completed_at DESC LIMIT ?2",
        )?;

        let rows = stmt
            .query_map(rusqlite::params![instrument, limit as i64], read_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    pub fn append_feedback(&self, entry: &FeedbackEntry) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO feedback_log (workflow_id, instrument, rating, note, recorded_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                entry.workflow_id.to_string(),
                entry.instrument,
                entry.rating.to_string(),
                entry.note,
                timestamp(entry.recorded_at),
            ],
        )?;
        Ok(())
    }

    /// Good and bad feedback counts, optionally restricted to entries at or after `since`.
    pub fn feedback_counts(&self, since: Option<DateTime<Utc>>) -> Result<(u64, u64), StoreError> {
        let since = since.map(timestamp).unwrap_or_default();
        let mut stmt = self.conn.prepare_cached(
            "SELECT rating, COUNT(*) FROM feedback_log WHERE recorded_at >= ?1 GROUP BY rating",
        )?;

        let mut good = 0;
        let mut bad = 0;
        let counts = stmt
            .query_map(rusqlite::params![since], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (rating, count) in counts {
            match rating.parse::<FeedbackRating>() {
                Ok(FeedbackRating::GoodSignal) => good += count as u64,
                Ok(FeedbackRating::BadSignal) => bad += count as u64,
                Err(e) => tracing::warn!(rating = %rating, error = %e, "Skipping unknown feedback rating"),
            }
        }
        Ok((good, bad))
    }

    /// Count all archived records.
    pub fn count(&self) -> Result<usize, StoreError> {
        let count: usize =
            self.conn
                .query_row("SELECT COUNT(*) FROM workflow_archive", [], |row| row.get(0))?;
        Ok(count)
    }
}

/// Fixed-width UTC timestamps so text comparison orders chronologically.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ArchiveRow> {
    Ok(ArchiveRow {
        workflow_id: row.get(0)?,
        instrument: row.get(1)?,
        state: row.get(2)?,
        direction: row.get(3)?,
        confidence: row.get(4)?,
        record_json: row.get(5)?,
        created_at: row.get(6)?,
        completed_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use aura_models::{Termination, TriggerMetadata, WorkflowState};
    use chrono::Duration;

    fn completed_record(instrument: &str) -> WorkflowRecord {
        let mut record = WorkflowRecord::new(instrument, TriggerMetadata::manual());
        record.advance(WorkflowState::DataPreparation).unwrap();
        record
            .terminate(Termination::Cancelled {
                at: WorkflowState::DataPreparation,
                reason: "test".to_string(),
            })
            .unwrap();
        record
    }

    fn feedback(rating: FeedbackRating, recorded_at: DateTime<Utc>) -> FeedbackEntry {
        FeedbackEntry {
            workflow_id: WorkflowId::new(),
            instrument: "SPY".to_string(),
            rating,
            note: None,
            recorded_at,
        }
    }

    #[test]
    fn insert_and_get() {
        let archive = SqliteArchive::open_in_memory().unwrap();
        let record = completed_record("SPY");
        archive.insert(&record).unwrap();

        let row = archive.get(record.workflow_id()).unwrap().unwrap();
        assert_eq!(row.instrument, "SPY");
        assert_eq!(row.state, "COMPLETED");
        assert!(row.direction.is_none());

        let parsed: WorkflowRecord = serde_json::from_str(&row.record_json).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn get_missing_record() {
        let archive = SqliteArchive::open_in_memory().unwrap();
        assert!(archive.get(WorkflowId::new()).unwrap().is_none());
    }

    #[test]
    fn insert_is_write_once() {
        let archive = SqliteArchive::open_in_memory().unwrap();
        let record = completed_record("SPY");
        archive.insert(&record).unwrap();

        let second = archive.insert(&record);
        assert!(matches!(second, Err(StoreError::AlreadyArchived(id)) if id == record.workflow_id()));
        assert_eq!(archive.count().unwrap(), 1);
    }

    #[test]
    fn rejects_open_records() {
        let archive = SqliteArchive::open_in_memory().unwrap();
        let record = WorkflowRecord::new("SPY", TriggerMetadata::manual());
        assert!(matches!(
            archive.insert(&record),
            Err(StoreError::NotCompleted(_))
        ));
    }

    #[test]
    fn list_by_instrument_filters() {
        let archive = SqliteArchive::open_in_memory().unwrap();
        archive.insert(&completed_record("SPY")).unwrap();
        archive.insert(&completed_record("SPY")).unwrap();
        archive.insert(&completed_record("GC=F")).unwrap();

        assert_eq!(archive.list_by_instrument("SPY", 10).unwrap().len(), 2);
        assert_eq!(archive.list_by_instrument("SPY", 1).unwrap().len(), 1);
        assert_eq!(archive.list_by_instrument("ZAR=X", 10).unwrap().len(), 0);
    }

    #[test]
    fn feedback_counts_respect_window() {
        let archive = SqliteArchive::open_in_memory().unwrap();
        let now = Utc::now();
        archive
            .append_feedback(&feedback(FeedbackRating::GoodSignal, now))
            .unwrap();
        archive
            .append_feedback(&feedback(FeedbackRating::BadSignal, now))
            .unwrap();
        archive
            .append_feedback(&feedback(FeedbackRating::GoodSignal, now - Duration::days(30)))
            .unwrap();

        assert_eq!(archive.feedback_counts(None).unwrap(), (2, 1));
        assert_eq!(
            archive
                .feedback_counts(Some(now - Duration::days(7)))
                .unwrap(),
            (1, 1)
        );
    }

    #[test]
    fn wal_mode_on_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.db");
        let archive = SqliteArchive::open(path.to_str().unwrap()).unwrap();
        let mode: String = archive
            .conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }
}
