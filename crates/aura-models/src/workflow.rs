use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TransitionError;
use crate::market_context::MarketContext;
use crate::opinion::{Opinion, ProducerId};
use crate::synthesis::SynthesisResult;

/// Unique identifier of one workflow run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct WorkflowId(Uuid);

impl WorkflowId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for WorkflowId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Workflow states in their only legal forward order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    Initialized,
    DataPreparation,
    AgentAnalysis,
    Synthesis,
    SignalGeneration,
    AwaitingFeedback,
    Completed,
}

impl WorkflowState {
    /// The next state on the normal path, `None` once completed.
    pub fn successor(&self) -> Option<WorkflowState> {
        match self {
            WorkflowState::Initialized => Some(WorkflowState::DataPreparation),
            WorkflowState::DataPreparation => Some(WorkflowState::AgentAnalysis),
            WorkflowState::AgentAnalysis => Some(WorkflowState::Synthesis),
            WorkflowState::Synthesis => Some(WorkflowState::SignalGeneration),
            WorkflowState::SignalGeneration => Some(WorkflowState::AwaitingFeedback),
            WorkflowState::AwaitingFeedback => Some(WorkflowState::Completed),
            WorkflowState::Completed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Completed)
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WorkflowState::Initialized => "INITIALIZED",
            WorkflowState::DataPreparation => "DATA_PREPARATION",
            WorkflowState::AgentAnalysis => "AGENT_ANALYSIS",
            WorkflowState::Synthesis => "SYNTHESIS",
            WorkflowState::SignalGeneration => "SIGNAL_GENERATION",
            WorkflowState::AwaitingFeedback => "AWAITING_FEEDBACK",
            WorkflowState::Completed => "COMPLETED",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Scheduled,
    Event,
    Manual,
}

/// What started a workflow run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerMetadata {
    pub kind: TriggerKind,
    /// Scheduler name, event id, or user, when known.
    pub source: Option<String>,
    /// Bar interval the producers should reason about (e.g. "1h").
    pub timeframe: String,
    pub requested_at: DateTime<Utc>,
}

impl TriggerMetadata {
    pub fn new(kind: TriggerKind) -> Self {
        Self {
            kind,
            source: None,
            timeframe: "1h".to_string(),
            requested_at: Utc::now(),
        }
    }

    pub fn manual() -> Self {
        Self::new(TriggerKind::Manual)
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_timeframe(mut self, timeframe: impl Into<String>) -> Self {
        self.timeframe = timeframe.into();
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackRating {
    GoodSignal,
    BadSignal,
}

impl FromStr for FeedbackRating {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "good_signal" | "good" => Ok(FeedbackRating::GoodSignal),
            "bad_signal" | "bad" => Ok(FeedbackRating::BadSignal),
            other => Err(format!("unknown rating: {other}")),
        }
    }
}

impl fmt::Display for FeedbackRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedbackRating::GoodSignal => f.write_str("good_signal"),
            FeedbackRating::BadSignal => f.write_str("bad_signal"),
        }
    }
}

/// Human rating of a completed signal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feedback {
    pub rating: FeedbackRating,
    pub timestamp: DateTime<Utc>,
    pub note: Option<String>,
}

impl Feedback {
    pub fn new(rating: FeedbackRating, note: Option<String>) -> Self {
        Self {
            rating,
            timestamp: Utc::now(),
            note,
        }
    }
}

/// Why a run jumped straight to COMPLETED.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Termination {
    Cancelled { at: WorkflowState, reason: String },
    Failed { at: WorkflowState, error: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransitionEntry {
    pub state: WorkflowState,
    pub at: DateTime<Utc>,
}

/// Orchestration state of one run.
///
/// All mutation goes through the methods below, which enforce the
/// forward-only state order and freeze the record once it is COMPLETED.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowRecord {
    workflow_id: WorkflowId,
    instrument: String,
    trigger: TriggerMetadata,
    state: WorkflowState,
    market_context: Option<MarketContext>,
    opinions: BTreeMap<ProducerId, Opinion>,
    synthesis_result: Option<SynthesisResult>,
    feedback: Option<Feedback>,
    termination: Option<Termination>,
    history: Vec<TransitionEntry>,
    messages: Vec<String>,
    created_at: DateTime<Utc>,
    signal_locked_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl WorkflowRecord {
    pub fn new(instrument: impl Into<String>, trigger: TriggerMetadata) -> Self {
        let now = Utc::now();
        let instrument = instrument.into();
        let messages = vec![format!(
            "Workflow initialized for {instrument} ({:?} trigger)",
            trigger.kind
        )];
        Self {
            workflow_id: WorkflowId::new(),
            instrument,
            trigger,
            state: WorkflowState::Initialized,
            market_context: None,
            opinions: BTreeMap::new(),
            synthesis_result: None,
            feedback: None,
            termination: None,
            history: vec![TransitionEntry {
                state: WorkflowState::Initialized,
                at: now,
            }],
            messages,
            created_at: now,
            signal_locked_at: None,
            completed_at: None,
        }
    }

    pub fn workflow_id(&self) -> WorkflowId {
        self.workflow_id
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn trigger(&self) -> &TriggerMetadata {
        &self.trigger
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn market_context(&self) -> Option<&MarketContext> {
        self.market_context.as_ref()
    }

    pub fn opinions(&self) -> &BTreeMap<ProducerId, Opinion> {
        &self.opinions
    }

    pub fn synthesis_result(&self) -> Option<&SynthesisResult> {
        self.synthesis_result.as_ref()
    }

    pub fn feedback(&self) -> Option<&Feedback> {
        self.feedback.as_ref()
    }

    pub fn termination(&self) -> Option<&Termination> {
        self.termination.as_ref()
    }

    pub fn history(&self) -> &[TransitionEntry] {
        &self.history
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn signal_locked_at(&self) -> Option<DateTime<Utc>> {
        self.signal_locked_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn is_completed(&self) -> bool {
        self.state.is_terminal()
    }

    /// True when the opinion map holds exactly one entry per producer in `expected`.
    pub fn has_opinions_for(&self, expected: &[ProducerId]) -> bool {
        let expected: BTreeSet<ProducerId> = expected.iter().copied().collect();
        expected.len() == self.opinions.len() && expected.iter().all(|p| self.opinions.contains_key(p))
    }

    /// Move to the next state on the normal path.
    pub fn advance(&mut self, next: WorkflowState) -> Result<(), TransitionError> {
        self.ensure_open()?;
        if self.state.successor() != Some(next) {
            return Err(TransitionError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        let now = Utc::now();
        self.state = next;
        self.history.push(TransitionEntry { state: next, at: now });
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    /// Shortcut to COMPLETED from any open state.
    pub fn terminate(&mut self, termination: Termination) -> Result<(), TransitionError> {
        self.ensure_open()?;
        let now = Utc::now();
        self.messages.push(match &termination {
            Termination::Cancelled { at, reason } => format!("Cancelled during {at}: {reason}"),
            Termination::Failed { at, error } => format!("Failed during {at}: {error}"),
        });
        self.termination = Some(termination);
        self.state = WorkflowState::Completed;
        self.history.push(TransitionEntry {
            state: WorkflowState::Completed,
            at: now,
        });
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn set_market_context(&mut self, context: MarketContext) -> Result<(), TransitionError> {
        self.ensure_state("set_market_context", WorkflowState::DataPreparation)?;
        if self.market_context.is_some() {
            return Err(TransitionError::AlreadySet("market_context"));
        }
        self.market_context = Some(context);
        Ok(())
    }

    pub fn record_opinion(&mut self, opinion: Opinion) -> Result<(), TransitionError> {
        self.ensure_state("record_opinion", WorkflowState::AgentAnalysis)?;
        if self.opinions.contains_key(&opinion.producer_id) {
            return Err(TransitionError::DuplicateOpinion(opinion.producer_id));
        }
        self.opinions.insert(opinion.producer_id, opinion);
        Ok(())
    }

    pub fn set_synthesis(&mut self, result: SynthesisResult) -> Result<(), TransitionError> {
        self.ensure_state("set_synthesis", WorkflowState::Synthesis)?;
        if self.synthesis_result.is_some() {
            return Err(TransitionError::AlreadySet("synthesis_result"));
        }
        self.synthesis_result = Some(result);
        Ok(())
    }

    /// Freeze the synthesis result once its trade levels are verified.
    pub fn lock_signal(&mut self) -> Result<(), TransitionError> {
        self.ensure_state("lock_signal", WorkflowState::SignalGeneration)?;
        if self.signal_locked_at.is_some() {
            return Err(TransitionError::AlreadySet("signal_locked_at"));
        }
        match &self.synthesis_result {
            Some(result) if result.levels_consistent() => {
                self.signal_locked_at = Some(Utc::now());
                Ok(())
            }
            Some(_) => Err(TransitionError::InconsistentLevels),
            None => Err(TransitionError::WrongState {
                operation: "lock_signal without synthesis",
                state: self.state,
            }),
        }
    }

    pub fn set_feedback(&mut self, feedback: Feedback) -> Result<(), TransitionError> {
        self.ensure_state("set_feedback", WorkflowState::AwaitingFeedback)?;
        if self.feedback.is_some() {
            return Err(TransitionError::AlreadySet("feedback"));
        }
        self.feedback = Some(feedback);
        Ok(())
    }

    pub fn note(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        self.ensure_open()?;
        self.messages.push(message.into());
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), TransitionError> {
        if self.is_completed() {
            return Err(TransitionError::Finalized(self.workflow_id));
        }
        Ok(())
    }

    fn ensure_state(&self, operation: &'static str, expected: WorkflowState) -> Result<(), TransitionError> {
        self.ensure_open()?;
        if self.state != expected {
            return Err(TransitionError::WrongState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }
}
