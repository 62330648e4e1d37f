//! File-backed archive tests: durability across reopen and concurrent
//! writers sharing one WAL database.

use std::sync::Arc;
use std::thread;

use aura_models::archive_schema::FeedbackEntry;
use aura_models::{
    FeedbackRating, StoreConfig, Termination, TriggerMetadata, WorkflowId, WorkflowRecord,
    WorkflowState,
};
use aura_store::{ArchiveStore, SqliteArchive, StoreError, WorkflowArchive};
use chrono::Utc;

fn completed_record(instrument: &str) -> WorkflowRecord {
    let mut record = WorkflowRecord::new(instrument, TriggerMetadata::manual());
    record.advance(WorkflowState::DataPreparation).unwrap();
    record
        .terminate(Termination::Cancelled {
            at: WorkflowState::DataPreparation,
            reason: "archive test".to_string(),
        })
        .unwrap();
    record
}

#[tokio::test]
async fn records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("archive.db");
    let config = StoreConfig {
        sqlite_path: path.to_str().unwrap().to_string(),
        ..StoreConfig::default()
    };

    let record = completed_record("SPY");
    {
        let store = ArchiveStore::from_config(&config).unwrap();
        store.archive(&record).await.unwrap();
        store
            .append_feedback(&FeedbackEntry {
                workflow_id: record.workflow_id(),
                instrument: "SPY".to_string(),
                rating: FeedbackRating::GoodSignal,
                note: None,
                recorded_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    let reopened = ArchiveStore::from_config(&config).unwrap();
    assert_eq!(reopened.hot_cache_size(), 0);
    let fetched = reopened.fetch(record.workflow_id()).await.unwrap();
    assert_eq!(fetched, Some(record.clone()));

    let again = reopened.archive(&record).await;
    assert!(matches!(again, Err(StoreError::AlreadyArchived(_))));

    let stats = reopened
        .feedback_stats(Utc::now() - chrono::Duration::days(7))
        .await
        .unwrap();
    assert_eq!(stats.overall.good, 1);
}

/// Several threads archive distinct records into the same file at once.
#[test]
fn concurrent_writers_do_not_lose_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("concurrent.db");
    let path_str = path.to_str().unwrap().to_string();

    // Create the schema and enable WAL before the writers start.
    let _init = SqliteArchive::open(&path_str).unwrap();

    let writers = 4;
    let per_writer = 25;
    let barrier = Arc::new(std::sync::Barrier::new(writers));

    let handles: Vec<_> = (0..writers)
        .map(|_| {
            let barrier = barrier.clone();
            let path = path_str.clone();
            thread::spawn(move || {
                let archive = SqliteArchive::open(&path).unwrap();
                barrier.wait();
                let mut ids = Vec::new();
                for _ in 0..per_writer {
                    let record = completed_record("SPY");
                    archive.insert(&record).unwrap();
                    ids.push(record.workflow_id());
                }
                ids
            })
        })
        .collect();

    let ids: Vec<WorkflowId> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();

    let archive = SqliteArchive::open(&path_str).unwrap();
    assert_eq!(archive.count().unwrap(), writers * per_writer);
    for id in ids {
        assert!(archive.get(id).unwrap().is_some());
    }
}
