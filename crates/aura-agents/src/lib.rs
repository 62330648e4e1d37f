pub mod claude_cli;
pub mod coordinator;
pub mod error;
pub mod feedback;
pub mod market;
pub mod parser;
pub mod prompts;
pub mod producer;
pub mod synthesizer;

pub mod test_support;

pub use claude_cli::{check_cli_available, ClaudeCli, ClaudeCliConfig};
pub use coordinator::Coordinator;
pub use error::{AgentError, FeedbackError, MarketDataError, WorkflowError};
pub use feedback::FeedbackGate;
pub use market::{fetch_with_retry, MarketDataSource, MarketSnapshot, SnapshotSource};
pub use producer::{CompletionBackend, LlmProducer, OpinionProducer};
pub use synthesizer::{SignalSynthesizer, VoteTally};
