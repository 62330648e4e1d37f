//! Scripted collaborators for exercising the coordinator without a model
//! or a data feed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use aura_models::{Bar, MarketContext, Opinion, ProducerId};
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;

use crate::error::{AgentError, MarketDataError};
use crate::market::MarketDataSource;
use crate::producer::{CompletionBackend, OpinionProducer};

/// Hourly bars whose close climbs by `step` from `start`.
pub fn synthetic_bars(start: Decimal, step: Decimal, count: usize) -> Vec<Bar> {
    let origin = Utc.with_ymd_and_hms(2025, 1, 6, 14, 0, 0).single().unwrap_or_default();
    let spread = step.abs().max(start * Decimal::new(1, 3));
    (0..count)
        .map(|i| {
            let close = start + step * Decimal::from(i as u64);
            Bar {
                timestamp: origin + chrono::Duration::hours(i as i64),
                open: close - step,
                high: close + spread,
                low: close - spread,
                close,
                volume: Decimal::from(1_000 + (i as u64 % 7) * 150),
            }
        })
        .collect()
}

/// A priced context built from [`synthetic_bars`], with a tight quote around the last close.
pub fn sample_context(instrument: &str, price: Decimal) -> MarketContext {
    let step = price * Decimal::new(1, 3);
    let start = price - step * Decimal::from(39u64);
    let half_spread = price * Decimal::new(1, 4);
    MarketContext::from_bars(
        instrument,
        synthetic_bars(start, step, 40),
        Some(price - half_spread),
        Some(price + half_spread),
    )
}

enum Script {
    Respond(Opinion),
    Fail(String),
    Panic,
}

/// Producer that replays a fixed outcome after an optional delay.
pub struct ScriptedProducer {
    id: ProducerId,
    script: Script,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedProducer {
    pub fn new(opinion: Opinion) -> Self {
        Self {
            id: opinion.producer_id,
            script: Script::Respond(opinion),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(id: ProducerId, message: impl Into<String>) -> Self {
        Self {
            id,
            script: Script::Fail(message.into()),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn panicking(id: ProducerId) -> Self {
        Self {
            id,
            script: Script::Panic,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OpinionProducer for ScriptedProducer {
    fn id(&self) -> ProducerId {
        self.id
    }

    async fn produce(&self, _context: &MarketContext) -> Result<Opinion, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.script {
            Script::Respond(opinion) => Ok(opinion.clone()),
            Script::Fail(message) => Err(AgentError::Cli(message.clone())),
            Script::Panic => panic!("scripted producer {} panicked", self.id),
        }
    }
}

/// Market source that fails a set number of times before answering.
pub struct FlakyMarketSource {
    failures: usize,
    context: Option<MarketContext>,
    last_known: Option<MarketContext>,
    attempts: AtomicUsize,
}

impl FlakyMarketSource {
    pub fn failing_then(failures: usize, context: MarketContext) -> Self {
        Self {
            failures,
            context: Some(context),
            last_known: None,
            attempts: AtomicUsize::new(0),
        }
    }

    /// Answers immediately with `context`.
    pub fn healthy(context: MarketContext) -> Self {
        Self::failing_then(0, context)
    }

    pub fn always_failing() -> Self {
        Self {
            failures: usize::MAX,
            context: None,
            last_known: None,
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn with_last_known(mut self, context: MarketContext) -> Self {
        self.last_known = Some(context);
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketDataSource for FlakyMarketSource {
    async fn fetch_market_context(&self, instrument: &str) -> Result<MarketContext, MarketDataError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(MarketDataError::Unavailable(format!(
                "scripted failure {} for {instrument}",
                attempt + 1
            )));
        }
        match &self.context {
            Some(context) => {
                let mut context = context.clone();
                context.instrument = instrument.to_string();
                Ok(context)
            }
            None => Err(MarketDataError::NotFound(instrument.to_string())),
        }
    }

    fn last_known(&self, instrument: &str) -> Option<MarketContext> {
        self.last_known.clone().map(|mut context| {
            context.instrument = instrument.to_string();
            context
        })
    }
}

/// Completion backend returning a canned reply and recording the last request.
pub struct CannedCompletion {
    reply: Result<String, String>,
    last_request: Mutex<Option<(String, String)>>,
}

impl CannedCompletion {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: Ok(reply.into()),
            last_request: Mutex::new(None),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            reply: Err(message.into()),
            last_request: Mutex::new(None),
        }
    }

    pub fn last_request(&self) -> Option<(String, String)> {
        self.last_request.lock().ok().and_then(|last| last.clone())
    }
}

#[async_trait]
impl CompletionBackend for CannedCompletion {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, AgentError> {
        if let Ok(mut last) = self.last_request.lock() {
            *last = Some((system_prompt.to_string(), user_prompt.to_string()));
        }
        self.reply.clone().map_err(AgentError::Cli)
    }
}
