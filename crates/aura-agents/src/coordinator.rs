use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use aura_models::{
    AuraConfig, ConfigError, Feedback, FeedbackEntry, FeedbackRating, FeedbackReport,
    MarketContext, Opinion, ProducerId, SynthesisResult, Termination, TriggerMetadata,
    WorkflowId, WorkflowRecord, WorkflowState,
};
use aura_store::WorkflowArchive;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{FeedbackError, WorkflowError};
use crate::feedback::FeedbackGate;
use crate::market::{fetch_with_retry, MarketDataSource};
use crate::producer::OpinionProducer;
use crate::synthesizer::SignalSynthesizer;

/// Finished runs kept in memory when the archive rejects them.
const UNARCHIVED_CAPACITY: usize = 128;

/// Live view of one in-flight run.
struct RunHandle {
    status: watch::Receiver<WorkflowRecord>,
    cancel: CancellationToken,
    cancel_reason: Arc<Mutex<Option<String>>>,
}

enum Outcome {
    Finished,
    Cancelled,
    Failed(WorkflowError),
}

/// Producer tasks for one run. Dropping the set aborts whatever is still running.
struct ProducerTasks(Vec<(ProducerId, JoinHandle<Opinion>)>);

impl Drop for ProducerTasks {
    fn drop(&mut self) {
        for (_, handle) in &self.0 {
            handle.abort();
        }
    }
}

/// Drives workflow runs from trigger to archive.
///
/// Each run is a spawned task that exclusively owns its WorkflowRecord and
/// publishes a snapshot after every change. Callers observe runs through
/// those snapshots; once a run is archived, lookups fall back to the archive.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

struct Inner {
    config: AuraConfig,
    producers: Vec<Arc<dyn OpinionProducer>>,
    market: Arc<dyn MarketDataSource>,
    archive: Arc<dyn WorkflowArchive>,
    synthesizer: SignalSynthesizer,
    gate: FeedbackGate,
    runs: Mutex<HashMap<WorkflowId, RunHandle>>,
    /// Finished runs whose archive write failed, oldest first.
    unarchived: Mutex<VecDeque<WorkflowRecord>>,
}

impl Coordinator {
    /// Validate `config` and bind one producer to each enabled producer id.
    ///
    /// Producers for disabled ids are dropped. A missing or repeated
    /// producer for an enabled id is a configuration error.
    pub fn new(
        config: AuraConfig,
        producers: Vec<Arc<dyn OpinionProducer>>,
        market: Arc<dyn MarketDataSource>,
        archive: Arc<dyn WorkflowArchive>,
    ) -> Result<Self, WorkflowError> {
        config.validate()?;

        let enabled = config.agents.enabled_producers();
        let mut selected: Vec<Arc<dyn OpinionProducer>> = Vec::with_capacity(enabled.len());
        for producer in producers {
            let id = producer.id();
            if !enabled.contains(&id) {
                debug!(producer = %id, "Skipping disabled producer");
                continue;
            }
            if selected.iter().any(|p| p.id() == id) {
                return Err(ConfigError::DuplicateProducer(id).into());
            }
            selected.push(producer);
        }
        if let Some(missing) = enabled
            .iter()
            .find(|id| !selected.iter().any(|p| p.id() == **id))
        {
            return Err(ConfigError::Invalid {
                name: "agents.producers",
                reason: format!("no producer available for enabled id {missing}"),
            }
            .into());
        }

        info!(
            producers = ?selected.iter().map(|p| p.id()).collect::<Vec<_>>(),
            feedback_timeout_secs = config.workflow.feedback_timeout_seconds,
            "Coordinator ready"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                synthesizer: SignalSynthesizer::new(config.synthesis.clone()),
                config,
                producers: selected,
                market,
                archive,
                gate: FeedbackGate::new(),
                runs: Mutex::new(HashMap::new()),
                unarchived: Mutex::new(VecDeque::new()),
            }),
        })
    }

    pub fn config(&self) -> &AuraConfig {
        &self.inner.config
    }

    /// Ids of the producers every run invokes.
    pub fn producer_ids(&self) -> Vec<ProducerId> {
        self.inner.producers.iter().map(|p| p.id()).collect()
    }

    /// Start a run in the background and return its id immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_workflow(
        &self,
        instrument: impl Into<String>,
        trigger: TriggerMetadata,
    ) -> WorkflowId {
        let record = WorkflowRecord::new(instrument, trigger);
        let id = record.workflow_id();
        let (tx, rx) = watch::channel(record.clone());
        let cancel = CancellationToken::new();
        let cancel_reason = Arc::new(Mutex::new(None));

        self.inner.runs().insert(
            id,
            RunHandle {
                status: rx,
                cancel: cancel.clone(),
                cancel_reason: Arc::clone(&cancel_reason),
            },
        );
        info!(
            workflow_id = %id,
            instrument = %record.instrument(),
            trigger = ?record.trigger().kind,
            "Workflow started"
        );

        let inner = Arc::clone(&self.inner);
        tokio::spawn(inner.run(record, tx, cancel, cancel_reason));
        id
    }

    /// Start one independent run per instrument.
    pub fn start_batch<I, S>(&self, instruments: I, trigger: TriggerMetadata) -> Vec<WorkflowId>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        instruments
            .into_iter()
            .map(|instrument| self.start_workflow(instrument, trigger.clone()))
            .collect()
    }

    /// Latest snapshot of a run, live or archived.
    pub async fn get_workflow_status(&self, id: WorkflowId) -> Result<WorkflowRecord, WorkflowError> {
        if let Some(record) = self.inner.live(id) {
            return Ok(record);
        }
        self.inner.finished(id).await
    }

    /// The synthesized decision, available from SIGNAL_GENERATION onward.
    pub async fn synthesis_result(&self, id: WorkflowId) -> Result<SynthesisResult, WorkflowError> {
        let record = self.get_workflow_status(id).await?;
        let state = record.state();
        if state < WorkflowState::SignalGeneration {
            return Err(WorkflowError::NotReady { id, state });
        }
        record
            .synthesis_result()
            .cloned()
            .ok_or(WorkflowError::NotReady { id, state })
    }

    /// Rate a run that is awaiting feedback. Accepted at most once per run.
    pub async fn submit_feedback(
        &self,
        id: WorkflowId,
        rating: FeedbackRating,
        note: Option<String>,
    ) -> Result<Feedback, WorkflowError> {
        match self.inner.gate.submit(id, rating, note) {
            Ok(feedback) => {
                info!(workflow_id = %id, rating = %feedback.rating, "Feedback accepted");
                Ok(feedback)
            }
            Err(FeedbackError::UnknownWorkflow(_)) => {
                // The gate only knows runs that reached AWAITING_FEEDBACK and are not yet archived.
                match self.get_workflow_status(id).await {
                    Ok(record) if record.state() >= WorkflowState::AwaitingFeedback => {
                        Err(WorkflowError::AlreadyFinalized(id))
                    }
                    _ => Err(WorkflowError::UnknownWorkflow(id)),
                }
            }
            Err(e) => {
                warn!(workflow_id = %id, error = %e, "Feedback rejected");
                Err(e.into())
            }
        }
    }

    /// Stop a run wherever it is. It completes with a cancellation marker.
    ///
    /// A run whose feedback was already accepted is not cancelled; it
    /// completes with that feedback.
    pub async fn cancel_workflow(
        &self,
        id: WorkflowId,
        reason: impl Into<String>,
    ) -> Result<(), WorkflowError> {
        let live = self.inner.runs().get(&id).map(|handle| {
            (
                handle.status.borrow().state(),
                handle.cancel.clone(),
                Arc::clone(&handle.cancel_reason),
            )
        });

        match live {
            Some((state, _, _)) if state.is_terminal() => Err(WorkflowError::AlreadyFinalized(id)),
            // Accepted feedback finalizes the run.
            Some(_) if self.inner.gate.delivered(id).is_some() => {
                Err(WorkflowError::AlreadyFinalized(id))
            }
            Some((state, cancel, reason_slot)) => {
                let reason = reason.into();
                info!(workflow_id = %id, state = %state, reason = %reason, "Cancelling workflow");
                if let Ok(mut slot) = reason_slot.lock() {
                    slot.get_or_insert(reason);
                }
                cancel.cancel();
                Ok(())
            }
            None => match self.inner.finished(id).await {
                Ok(_) => Err(WorkflowError::AlreadyFinalized(id)),
                Err(e) => Err(e),
            },
        }
    }

    /// Wait until a run has reached `state` or any later state.
    pub async fn wait_for_state(
        &self,
        id: WorkflowId,
        state: WorkflowState,
    ) -> Result<WorkflowRecord, WorkflowError> {
        let Some(mut rx) = self.inner.subscribe(id) else {
            return self.inner.finished(id).await;
        };
        let reached = rx
            .wait_for(|record| record.state() >= state)
            .await
            .map(|record| record.clone());
        match reached {
            Ok(record) => Ok(record),
            // The run task ended; its last snapshot is final.
            Err(_) => Ok(rx.borrow().clone()),
        }
    }

    /// Wait until a run has finished, including its archive write.
    pub async fn wait_for_completion(&self, id: WorkflowId) -> Result<WorkflowRecord, WorkflowError> {
        let Some(mut rx) = self.inner.subscribe(id) else {
            return self.inner.finished(id).await;
        };
        while rx.changed().await.is_ok() {}
        let record = rx.borrow().clone();
        Ok(record)
    }

    /// Start a run and wait for it to finish.
    pub async fn run_to_completion(
        &self,
        instrument: impl Into<String>,
        trigger: TriggerMetadata,
    ) -> Result<WorkflowRecord, WorkflowError> {
        let id = self.start_workflow(instrument, trigger);
        self.wait_for_completion(id).await
    }

    /// Feedback counts overall and for the trailing `days`.
    pub async fn feedback_stats(&self, days: i64) -> Result<FeedbackReport, WorkflowError> {
        let since = chrono::Utc::now() - chrono::Duration::days(days);
        Ok(self.inner.archive.feedback_stats(since).await?)
    }

    /// Archived runs for an instrument, newest first.
    pub async fn history(
        &self,
        instrument: &str,
        limit: usize,
    ) -> Result<Vec<WorkflowRecord>, WorkflowError> {
        Ok(self.inner.archive.history(instrument, limit).await?)
    }

    /// Number of runs still in flight.
    pub fn active_runs(&self) -> usize {
        self.inner.runs().len()
    }
}

impl Inner {
    fn runs(&self) -> MutexGuard<'_, HashMap<WorkflowId, RunHandle>> {
        self.runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn subscribe(&self, id: WorkflowId) -> Option<watch::Receiver<WorkflowRecord>> {
        self.runs().get(&id).map(|handle| handle.status.clone())
    }

    fn live(&self, id: WorkflowId) -> Option<WorkflowRecord> {
        self.runs()
            .get(&id)
            .map(|handle| handle.status.borrow().clone())
    }

    fn keep_unarchived(&self, record: WorkflowRecord) {
        let mut kept = self.unarchived.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if kept.len() >= UNARCHIVED_CAPACITY {
            kept.pop_front();
        }
        kept.push_back(record);
    }

    /// A run that is no longer live: kept in memory after a failed archive
    /// write, or read back from the archive.
    async fn finished(&self, id: WorkflowId) -> Result<WorkflowRecord, WorkflowError> {
        let kept = self
            .unarchived
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .find(|record| record.workflow_id() == id)
            .cloned();
        if let Some(record) = kept {
            return Ok(record);
        }
        self.archive
            .fetch(id)
            .await?
            .ok_or(WorkflowError::UnknownWorkflow(id))
    }

    async fn run(
        self: Arc<Self>,
        mut record: WorkflowRecord,
        tx: watch::Sender<WorkflowRecord>,
        cancel: CancellationToken,
        cancel_reason: Arc<Mutex<Option<String>>>,
    ) {
        let id = record.workflow_id();
        let started = Instant::now();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Outcome::Cancelled,
            result = self.execute(&mut record, &tx) => match result {
                Ok(()) => Outcome::Finished,
                Err(e) => Outcome::Failed(e),
            },
        };

        match outcome {
            Outcome::Finished => {}
            Outcome::Cancelled => {
                self.gate.close(id);
                let accepted = match record.state() {
                    WorkflowState::AwaitingFeedback => self.gate.delivered(id),
                    _ => None,
                };
                if let Some(feedback) = accepted {
                    info!(workflow_id = %id, rating = %feedback.rating, "Feedback already accepted, completing run");
                    if let Err(e) = self.complete_with_feedback(&mut record, &tx, feedback).await {
                        error!(workflow_id = %id, error = %e, "Failed to complete workflow with feedback");
                        self.cancel_run(&mut record, &cancel_reason);
                    }
                } else {
                    self.cancel_run(&mut record, &cancel_reason);
                }
            }
            Outcome::Failed(cause) => {
                self.gate.close(id);
                let at = record.state();
                error!(workflow_id = %id, state = %at, error = %cause, "Workflow failed");
                if let Err(e) = record.terminate(Termination::Failed {
                    at,
                    error: cause.to_string(),
                }) {
                    error!(workflow_id = %id, error = %e, "Failed to mark workflow failed");
                }
            }
        }

        tx.send_replace(record.clone());
        info!(
            workflow_id = %id,
            instrument = %record.instrument(),
            direction = ?record.synthesis_result().map(|r| r.direction),
            feedback = record.feedback().is_some(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Workflow completed"
        );

        if let Err(e) = self.archive.archive(&record).await {
            error!(workflow_id = %id, error = %e, "Failed to archive workflow record");
            self.keep_unarchived(record);
        }
        self.gate.release(id);
        self.runs().remove(&id);
    }

    fn cancel_run(&self, record: &mut WorkflowRecord, cancel_reason: &Mutex<Option<String>>) {
        let id = record.workflow_id();
        let reason = cancel_reason
            .lock()
            .ok()
            .and_then(|slot| slot.clone())
            .unwrap_or_else(|| "cancelled".to_string());
        let at = record.state();
        warn!(workflow_id = %id, state = %at, reason = %reason, "Workflow cancelled");
        if let Err(e) = record.terminate(Termination::Cancelled { at, reason }) {
            error!(workflow_id = %id, error = %e, "Failed to mark workflow cancelled");
        }
    }

    async fn execute(
        &self,
        record: &mut WorkflowRecord,
        tx: &watch::Sender<WorkflowRecord>,
    ) -> Result<(), WorkflowError> {
        let id = record.workflow_id();
        let instrument = record.instrument().to_string();

        advance(record, tx, WorkflowState::DataPreparation)?;
        let context = fetch_with_retry(self.market.as_ref(), &instrument, &self.config.data).await;
        if context.stale {
            record.note(if context.has_usable_price() {
                "Market data unavailable, using last known context"
            } else {
                "Market data unavailable, continuing with an empty context"
            })?;
        }
        record.set_market_context(context.clone())?;
        advance(record, tx, WorkflowState::AgentAnalysis)?;

        let context = Arc::new(context);
        let mut tasks = self.spawn_producers(id, &context);
        for (producer, handle) in tasks.0.iter_mut() {
            let opinion = match handle.await {
                Ok(opinion) => opinion,
                Err(e) => {
                    error!(workflow_id = %id, producer = %producer, error = %e, "Producer task panicked");
                    Opinion::failed(*producer, "producer panicked")
                }
            };
            record.record_opinion(opinion)?;
            tx.send_replace(record.clone());
        }
        drop(tasks);

        advance(record, tx, WorkflowState::Synthesis)?;
        let result = self.synthesizer.synthesize(record.opinions(), &context);
        info!(
            workflow_id = %id,
            direction = %result.direction,
            confidence = %result.confidence,
            strength = %result.signal_strength,
            insufficient_data = result.insufficient_data,
            "Signal synthesized"
        );
        record.set_synthesis(result)?;

        advance(record, tx, WorkflowState::SignalGeneration)?;
        record.lock_signal()?;

        // Open the gate before publishing AWAITING_FEEDBACK so any observer can submit.
        let waiter = self.gate.open(id)?;
        advance(record, tx, WorkflowState::AwaitingFeedback)?;

        let window = Duration::from_secs(self.config.workflow.feedback_timeout_seconds);
        match self.gate.wait(waiter, window).await {
            Some(feedback) => self.record_feedback(record, feedback).await?,
            None => {
                debug!(workflow_id = %id, window_secs = window.as_secs(), "No feedback received");
                record.note("Feedback window closed without a rating")?;
            }
        }

        advance(record, tx, WorkflowState::Completed)?;
        Ok(())
    }

    /// Attach accepted feedback to the record and append it to the feedback log.
    async fn record_feedback(
        &self,
        record: &mut WorkflowRecord,
        feedback: Feedback,
    ) -> Result<(), WorkflowError> {
        let entry = FeedbackEntry {
            workflow_id: record.workflow_id(),
            instrument: record.instrument().to_string(),
            rating: feedback.rating,
            note: feedback.note.clone(),
            recorded_at: feedback.timestamp,
        };
        record.set_feedback(feedback)?;
        if let Err(e) = self.archive.append_feedback(&entry).await {
            warn!(workflow_id = %entry.workflow_id, error = %e, "Failed to append feedback log entry");
        }
        Ok(())
    }

    /// Complete a run whose feedback was accepted before a cancellation took effect.
    async fn complete_with_feedback(
        &self,
        record: &mut WorkflowRecord,
        tx: &watch::Sender<WorkflowRecord>,
        feedback: Feedback,
    ) -> Result<(), WorkflowError> {
        if record.feedback().is_none() {
            self.record_feedback(record, feedback).await?;
        }
        advance(record, tx, WorkflowState::Completed)
    }

    /// Invoke every producer concurrently, each under its own timeout.
    fn spawn_producers(&self, workflow_id: WorkflowId, context: &Arc<MarketContext>) -> ProducerTasks {
        let timeout = Duration::from_secs(self.config.agents.producer_timeout_seconds);
        let handles = self
            .producers
            .iter()
            .map(|producer| {
                let producer = Arc::clone(producer);
                let context = Arc::clone(context);
                let id = producer.id();
                let handle = tokio::spawn(async move {
                    let started = Instant::now();
                    let outcome = tokio::time::timeout(timeout, producer.produce(&context)).await;
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    let opinion = match outcome {
                        Ok(Ok(opinion))
                            if opinion.error.is_none()
                                && (opinion.confidence < Decimal::ZERO
                                    || opinion.confidence > Decimal::ONE) =>
                        {
                            warn!(
                                workflow_id = %workflow_id,
                                producer = %id,
                                confidence = %opinion.confidence,
                                elapsed_ms,
                                "Producer returned confidence outside [0, 1]"
                            );
                            Opinion::failed(
                                id,
                                format!("confidence {} outside [0, 1]", opinion.confidence),
                            )
                        }
                        Ok(Ok(mut opinion)) => {
                            opinion.producer_id = id;
                            info!(
                                workflow_id = %workflow_id,
                                producer = %id,
                                direction = %opinion.direction,
                                confidence = %opinion.confidence,
                                elapsed_ms,
                                "Producer succeeded"
                            );
                            opinion
                        }
                        Ok(Err(e)) => {
                            warn!(workflow_id = %workflow_id, producer = %id, error = %e, elapsed_ms, "Producer failed");
                            Opinion::failed(id, e.to_string())
                        }
                        Err(_) => {
                            warn!(
                                workflow_id = %workflow_id,
                                producer = %id,
                                timeout_secs = timeout.as_secs(),
                                "Producer timed out"
                            );
                            Opinion::timed_out(id)
                        }
                    };
                    opinion.with_elapsed_ms(elapsed_ms)
                });
                (id, handle)
            })
            .collect();
        ProducerTasks(handles)
    }
}

/// Advance the record and publish the new snapshot.
fn advance(
    record: &mut WorkflowRecord,
    tx: &watch::Sender<WorkflowRecord>,
    next: WorkflowState,
) -> Result<(), WorkflowError> {
    record.advance(next)?;
    info!(
        workflow_id = %record.workflow_id(),
        instrument = %record.instrument(),
        state = %next,
        "Workflow state changed"
    );
    tx.send_replace(record.clone());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_context, FlakyMarketSource, ScriptedProducer};
    use aura_models::OpinionDirection;
    use aura_store::ArchiveStore;
    use rust_decimal_macros::dec;

    fn coordinator_with(
        config: AuraConfig,
        producers: Vec<Arc<dyn OpinionProducer>>,
    ) -> Result<Coordinator, WorkflowError> {
        Coordinator::new(
            config,
            producers,
            Arc::new(FlakyMarketSource::healthy(sample_context("SPY", dec!(100)))),
            Arc::new(ArchiveStore::open_in_memory().unwrap()),
        )
    }

    fn all_producers() -> Vec<Arc<dyn OpinionProducer>> {
        ProducerId::ALL
            .into_iter()
            .map(|id| {
                Arc::new(ScriptedProducer::new(Opinion::new(id, OpinionDirection::Buy, dec!(0.9))))
                    as Arc<dyn OpinionProducer>
            })
            .collect()
    }

    #[tokio::test]
    async fn rejects_missing_producer() {
        let mut producers = all_producers();
        producers.pop();
        let result = coordinator_with(AuraConfig::default(), producers);
        assert!(matches!(
            result,
            Err(WorkflowError::Configuration(ConfigError::Invalid { .. }))
        ));
    }

    #[tokio::test]
    async fn rejects_duplicate_producer() {
        let mut producers = all_producers();
        producers.push(Arc::new(ScriptedProducer::failing(ProducerId::Macro, "dup")));
        let result = coordinator_with(AuraConfig::default(), producers);
        assert!(matches!(
            result,
            Err(WorkflowError::Configuration(ConfigError::DuplicateProducer(ProducerId::Macro)))
        ));
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let mut config = AuraConfig::default();
        config.synthesis.weights.technical = dec!(-0.1);
        assert!(matches!(
            coordinator_with(config, all_producers()),
            Err(WorkflowError::Configuration(ConfigError::NegativeWeight { .. }))
        ));
    }

    #[tokio::test]
    async fn disabled_producers_are_skipped() {
        let mut config = AuraConfig::default();
        for producer in config.agents.producers.iter_mut() {
            if producer.id == ProducerId::Sentiment {
                producer.enabled = false;
            }
        }
        let coordinator = coordinator_with(config, all_producers()).unwrap();
        assert_eq!(
            coordinator.producer_ids(),
            vec![ProducerId::Technical, ProducerId::Macro]
        );
    }

    #[tokio::test]
    async fn unknown_workflow_is_reported() {
        let coordinator = coordinator_with(AuraConfig::default(), all_producers()).unwrap();
        let id = WorkflowId::new();
        assert!(matches!(
            coordinator.get_workflow_status(id).await,
            Err(WorkflowError::UnknownWorkflow(_))
        ));
        assert!(matches!(
            coordinator.submit_feedback(id, FeedbackRating::GoodSignal, None).await,
            Err(WorkflowError::UnknownWorkflow(_))
        ));
        assert!(matches!(
            coordinator.cancel_workflow(id, "test").await,
            Err(WorkflowError::UnknownWorkflow(_))
        ));
    }

    #[tokio::test]
    async fn cancel_racing_accepted_feedback_keeps_the_rating() {
        let archive = Arc::new(ArchiveStore::open_in_memory().unwrap());
        let mut config = AuraConfig::default();
        config.workflow.feedback_timeout_seconds = 300;
        let coordinator = Coordinator::new(
            config,
            all_producers(),
            Arc::new(FlakyMarketSource::healthy(sample_context("SPY", dec!(100)))),
            archive.clone(),
        )
        .unwrap();

        let id = coordinator.start_workflow("SPY", TriggerMetadata::manual());
        coordinator
            .wait_for_state(id, WorkflowState::AwaitingFeedback)
            .await
            .unwrap();
        let accepted = coordinator
            .submit_feedback(id, FeedbackRating::GoodSignal, None)
            .await
            .unwrap();

        // Fire the token before the run task observes the delivery.
        let token = coordinator
            .inner
            .runs()
            .get(&id)
            .map(|handle| handle.cancel.clone())
            .unwrap();
        token.cancel();

        let record = coordinator.wait_for_completion(id).await.unwrap();
        assert_eq!(record.feedback(), Some(&accepted));
        assert!(record.termination().is_none());
        assert_eq!(record.state(), WorkflowState::Completed);

        let stats = archive
            .feedback_stats(chrono::Utc::now() - chrono::Duration::days(1))
            .await
            .unwrap();
        assert_eq!(stats.overall.good, 1);
    }
}
