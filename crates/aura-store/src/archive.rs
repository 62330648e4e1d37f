use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use aura_models::archive_schema::{FeedbackEntry, FeedbackReport, FeedbackStats};
use aura_models::{StoreConfig, WorkflowId, WorkflowRecord};
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::memory::RecordCache;
use crate::sqlite::SqliteArchive;

/// Append-only sink for completed runs and their feedback.
#[async_trait]
pub trait WorkflowArchive: Send + Sync {
    /// Store a completed record. Write-once per workflow id.
    async fn archive(&self, record: &WorkflowRecord) -> Result<(), StoreError>;

    async fn fetch(&self, id: WorkflowId) -> Result<Option<WorkflowRecord>, StoreError>;

    /// Most recent archived runs for an instrument, newest first.
    async fn history(&self, instrument: &str, limit: usize) -> Result<Vec<WorkflowRecord>, StoreError>;

    async fn append_feedback(&self, entry: &FeedbackEntry) -> Result<(), StoreError>;

    /// Overall feedback counts plus the counts recorded at or after `since`.
    async fn feedback_stats(&self, since: DateTime<Utc>) -> Result<FeedbackReport, StoreError>;
}

/// Read-through archive: moka (hot) in front of SQLite (durable).
///
/// Writes go to SQLite first and are then promoted to moka.
/// SQLite access is synchronized via `Mutex` since `rusqlite::Connection` is not `Sync`.
pub struct ArchiveStore {
    memory: RecordCache,
    sqlite: Mutex<SqliteArchive>,
}

impl ArchiveStore {
    pub fn new(sqlite: SqliteArchive, max_capacity: u64, memory_ttl: Duration) -> Self {
        Self {
            memory: RecordCache::new(max_capacity, memory_ttl),
            sqlite: Mutex::new(sqlite),
        }
    }

    pub fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        let sqlite = SqliteArchive::open(&config.sqlite_path)?;
        Ok(Self::new(
            sqlite,
            config.memory_max_capacity,
            Duration::from_secs(config.memory_ttl_seconds),
        ))
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(
            SqliteArchive::open_in_memory()?,
            1_000,
            Duration::from_secs(300),
        ))
    }

    /// Get the number of records in the hot moka cache.
    pub fn hot_cache_size(&self) -> u64 {
        self.memory.entry_count()
    }

    fn with_sqlite<T>(
        &self,
        f: impl FnOnce(&SqliteArchive) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let sqlite = self
            .sqlite
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("SQLite mutex poisoned: {e}")))?;
        f(&sqlite)
    }
}

#[async_trait]
impl WorkflowArchive for ArchiveStore {
    async fn archive(&self, record: &WorkflowRecord) -> Result<(), StoreError> {
        self.with_sqlite(|sqlite| sqlite.insert(record))?;
        tracing::debug!(
            workflow_id = %record.workflow_id(),
            instrument = %record.instrument(),
            "Archived workflow record"
        );
        self.memory.insert(Arc::new(record.clone())).await;
        Ok(())
    }

    async fn fetch(&self, id: WorkflowId) -> Result<Option<WorkflowRecord>, StoreError> {
        if let Some(record) = self.memory.get(&id).await {
            return Ok(Some(record.as_ref().clone()));
        }

        let row = self.with_sqlite(|sqlite| sqlite.get(id))?;

        if let Some(row) = row {
            let record: WorkflowRecord = serde_json::from_str(&row.record_json)?;
            self.memory.insert(Arc::new(record.clone())).await;
            return Ok(Some(record));
        }

        Ok(None)
    }

    async fn history(&self, instrument: &str, limit: usize) -> Result<Vec<WorkflowRecord>, StoreError> {
        let rows = self.with_sqlite(|sqlite| sqlite.list_by_instrument(instrument, limit))?;
        rows.iter()
            .map(|row| serde_json::from_str(&row.record_json).map_err(StoreError::from))
            .collect()
    }

    async fn append_feedback(&self, entry: &FeedbackEntry) -> Result<(), StoreError> {
        self.with_sqlite(|sqlite| sqlite.append_feedback(entry))
    }

    async fn feedback_stats(&self, since: DateTime<Utc>) -> Result<FeedbackReport, StoreError> {
        let ((good, bad), (recent_good, recent_bad)) = self.with_sqlite(|sqlite| {
            Ok((sqlite.feedback_counts(None)?, sqlite.feedback_counts(Some(since))?))
        })?;
        Ok(FeedbackReport {
            overall: FeedbackStats::from_counts(good, bad),
            recent: FeedbackStats::from_counts(recent_good, recent_bad),
            recent_since: Some(since),
        })
    }
}
