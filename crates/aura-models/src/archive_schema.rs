use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::workflow::{FeedbackRating, WorkflowId};

/// SQLite schema for the append-only workflow archive and feedback log.
///
/// ```sql
/// CREATE TABLE IF NOT EXISTS workflow_archive (
///     workflow_id   TEXT PRIMARY KEY,
///     instrument    TEXT NOT NULL,
///     state         TEXT NOT NULL,
///     direction     TEXT,
///     confidence    TEXT,
///     record_json   TEXT NOT NULL,
///     created_at    TEXT NOT NULL,
///     completed_at  TEXT NOT NULL
/// );
///
/// CREATE TABLE IF NOT EXISTS feedback_log (
///     id            INTEGER PRIMARY KEY AUTOINCREMENT,
///     workflow_id   TEXT NOT NULL,
///     instrument    TEXT NOT NULL,
///     rating        TEXT NOT NULL,
///     note          TEXT,
///     recorded_at   TEXT NOT NULL
/// );
/// ```
///
/// Rows are never updated. The primary key on `workflow_archive` enforces
/// write-once semantics per workflow id.
pub const ARCHIVE_TABLE_DDL: &str = "\
CREATE TABLE IF NOT EXISTS workflow_archive (
    workflow_id   TEXT PRIMARY KEY,
    instrument    TEXT NOT NULL,
    state         TEXT NOT NULL,
    direction     TEXT,
    confidence    TEXT,
    record_json   TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    completed_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_archive_instrument ON workflow_archive(instrument);
CREATE INDEX IF NOT EXISTS idx_archive_completed ON workflow_archive(completed_at);
CREATE TABLE IF NOT EXISTS feedback_log (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    workflow_id   TEXT NOT NULL,
    instrument    TEXT NOT NULL,
    rating        TEXT NOT NULL,
    note          TEXT,
    recorded_at   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_feedback_recorded ON feedback_log(recorded_at);
";

/// A raw archive row as read from SQLite.
#[derive(Debug, Clone)]
pub struct ArchiveRow {
    pub workflow_id: String,
    pub instrument: String,
    pub state: String,
    pub direction: Option<String>,
    pub confidence: Option<String>,
    pub record_json: String,
    pub created_at: String,
    pub completed_at: String,
}

/// One entry of the feedback log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedbackEntry {
    pub workflow_id: WorkflowId,
    pub instrument: String,
    pub rating: FeedbackRating,
    pub note: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Aggregate counts over the feedback log.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FeedbackStats {
    pub total: u64,
    pub good: u64,
    pub bad: u64,
    /// Share of good ratings, 0 to 100. Zero when there is no feedback.
    pub good_percentage: f64,
}

impl FeedbackStats {
    pub fn from_counts(good: u64, bad: u64) -> Self {
        let total = good + bad;
        let good_percentage = if total == 0 {
            0.0
        } else {
            good as f64 / total as f64 * 100.0
        };
        Self {
            total,
            good,
            bad,
            good_percentage,
        }
    }
}

/// Overall feedback statistics plus a trailing window.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FeedbackReport {
    pub overall: FeedbackStats,
    pub recent: FeedbackStats,
    pub recent_since: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_percentage() {
        let stats = FeedbackStats::from_counts(3, 1);
        assert_eq!(stats.total, 4);
        assert!((stats.good_percentage - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_stats_are_zero() {
        let stats = FeedbackStats::from_counts(0, 0);
        assert_eq!(stats, FeedbackStats::default());
    }

    #[test]
    fn feedback_entry_wire_format() {
        let entry = FeedbackEntry {
            workflow_id: WorkflowId::new(),
            instrument: "SPY".to_string(),
            rating: FeedbackRating::BadSignal,
            note: None,
            recorded_at: Utc::now(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["rating"], "bad_signal");
        assert!(json["note"].is_null());
    }
}
