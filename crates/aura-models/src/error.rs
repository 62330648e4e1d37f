use thiserror::Error;

use crate::opinion::ProducerId;
use crate::workflow::{WorkflowId, WorkflowState};

/// Malformed configuration. Fatal at startup.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("weight for {producer} must be non-negative, got {weight}")]
    NegativeWeight { producer: ProducerId, weight: String },

    #[error("all enabled producers have zero weight")]
    NoPositiveWeight,

    #[error("no producers are enabled")]
    NoProducers,

    #[error("producer {0} is configured more than once")]
    DuplicateProducer(ProducerId),

    #[error("threshold {name} must be within [0, 1], got {value}")]
    ThresholdOutOfRange { name: &'static str, value: String },

    #[error("thresholds must satisfy strong >= moderate >= weak")]
    ThresholdOrder,

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// A coordinator tried to mutate a workflow record in a way its state forbids.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransitionError {
    #[error("workflow {0} is completed and immutable")]
    Finalized(WorkflowId),

    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: WorkflowState, to: WorkflowState },

    #[error("{operation} is not allowed in state {state}")]
    WrongState {
        operation: &'static str,
        state: WorkflowState,
    },

    #[error("opinion for {0} already recorded")]
    DuplicateOpinion(ProducerId),

    #[error("{0} was already set")]
    AlreadySet(&'static str),

    #[error("synthesis result has trade levels inconsistent with its direction")]
    InconsistentLevels,
}
