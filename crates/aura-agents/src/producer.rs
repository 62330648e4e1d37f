use std::sync::Arc;

use async_trait::async_trait;
use aura_models::{MarketContext, Opinion, ProducerId};

use crate::error::AgentError;
use crate::parser::parse_opinion;
use crate::prompts::{system_prompt, user_prompt};

/// Anything that turns a market context into one opinion. Mockable for testing.
///
/// Implementations may be slow or fail; the coordinator bounds every call
/// with a timeout and records failures as opinions carrying `error`.
#[async_trait]
pub trait OpinionProducer: Send + Sync {
    fn id(&self) -> ProducerId;

    async fn produce(&self, context: &MarketContext) -> Result<Opinion, AgentError>;
}

/// Text-completion capability injected into LLM-backed producers.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, AgentError>;
}

/// A producer that asks a language model for its opinion.
pub struct LlmProducer {
    id: ProducerId,
    system_prompt: String,
    backend: Arc<dyn CompletionBackend>,
}

impl LlmProducer {
    pub fn new(id: ProducerId, backend: Arc<dyn CompletionBackend>) -> Self {
        Self {
            id,
            system_prompt: system_prompt(id),
            backend,
        }
    }
}

#[async_trait]
impl OpinionProducer for LlmProducer {
    fn id(&self) -> ProducerId {
        self.id
    }

    async fn produce(&self, context: &MarketContext) -> Result<Opinion, AgentError> {
        let prompt = user_prompt(context)?;
        let raw = self.backend.complete(&self.system_prompt, &prompt).await?;
        parse_opinion(self.id, &raw)
    }
}
