use aura_models::{ConfigError, TransitionError, WorkflowId, WorkflowState};
use aura_store::StoreError;
use thiserror::Error;

/// A single producer failed to deliver an opinion.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Claude CLI error: {0}")]
    Cli(String),

    #[error("Agent response parse error: {0}")]
    Parse(String),

    #[error("Agent timed out after {0} seconds")]
    Timeout(u64),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The market-data collaborator could not produce a context.
#[derive(Error, Debug)]
pub enum MarketDataError {
    #[error("no market data for {0}")]
    NotFound(String),

    #[error("market data for {instrument} has no bars")]
    Empty { instrument: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed market data: {0}")]
    Json(#[from] serde_json::Error),

    #[error("market data unavailable: {0}")]
    Unavailable(String),
}

/// Misuse of the feedback gate.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeedbackError {
    #[error("workflow {0} is not awaiting feedback")]
    UnknownWorkflow(WorkflowId),

    #[error("workflow {0} already has feedback or its feedback window closed")]
    AlreadyFinalized(WorkflowId),

    #[error("workflow {0} is already awaiting feedback")]
    AlreadyAwaiting(WorkflowId),
}

/// Errors surfaced to callers of the workflow coordinator.
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("unknown workflow {0}")]
    UnknownWorkflow(WorkflowId),

    #[error("workflow {0} is already finalized")]
    AlreadyFinalized(WorkflowId),

    #[error("workflow {id} has no synthesis result in state {state}")]
    NotReady { id: WorkflowId, state: WorkflowState },

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("archive error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid transition: {0}")]
    Transition(#[from] TransitionError),
}

impl From<FeedbackError> for WorkflowError {
    fn from(e: FeedbackError) -> Self {
        match e {
            FeedbackError::UnknownWorkflow(id) => WorkflowError::UnknownWorkflow(id),
            FeedbackError::AlreadyFinalized(id) | FeedbackError::AlreadyAwaiting(id) => {
                WorkflowError::AlreadyFinalized(id)
            }
        }
    }
}
