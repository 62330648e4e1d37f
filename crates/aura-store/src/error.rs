use aura_models::WorkflowId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("workflow {0} is already archived")]
    AlreadyArchived(WorkflowId),

    #[error("workflow {0} is not completed")]
    NotCompleted(WorkflowId),

    #[error("Archive not available: {0}")]
    Unavailable(String),
}
