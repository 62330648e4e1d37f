pub mod archive_schema;
pub mod config;
pub mod error;
pub mod market_context;
pub mod opinion;
pub mod synthesis;
pub mod workflow;

pub use archive_schema::{ArchiveRow, FeedbackEntry, FeedbackReport, FeedbackStats};
pub use config::{
    AgentWeights, AgentsConfig, AuraConfig, ConfidenceThresholds, DataConfig, ProducerConfig,
    RiskBands, StoreConfig, SynthesisConfig, TradeLevelPolicy, WorkflowConfig,
};
pub use error::{ConfigError, TransitionError};
pub use market_context::{Bar, MarketContext, RiskMetrics};
pub use opinion::{Opinion, OpinionDirection, ProducerId, TIMEOUT_ERROR};
pub use synthesis::{
    ReviewHorizon, RiskAssessment, RiskLevel, SignalDirection, SignalStrength, SynthesisResult,
};
pub use workflow::{
    Feedback, FeedbackRating, Termination, TransitionEntry, TriggerKind, TriggerMetadata,
    WorkflowId, WorkflowRecord, WorkflowState,
};
