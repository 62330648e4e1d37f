use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use aura_models::{Feedback, FeedbackRating, WorkflowId};
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::FeedbackError;

enum Slot {
    Waiting(oneshot::Sender<Feedback>),
    /// A submission was accepted. Kept until the workflow is archived.
    Delivered(Feedback),
    /// Window expired or workflow stopped without a rating.
    Settled,
}

/// Per-workflow feedback rendezvous.
///
/// A workflow opens a slot, then waits on it with a deadline. At most one
/// submission is ever accepted per slot; whichever of submit, timeout or
/// close settles it first wins. An accepted submission stays readable
/// through [`FeedbackGate::delivered`] even if the waiter is gone.
#[derive(Default)]
pub struct FeedbackGate {
    slots: Mutex<HashMap<WorkflowId, Slot>>,
}

/// Receiving half of an open feedback slot.
pub struct FeedbackWaiter {
    id: WorkflowId,
    rx: oneshot::Receiver<Feedback>,
}

impl FeedbackGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<WorkflowId, Slot>> {
        // A panic while holding the lock leaves the map itself intact.
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start accepting feedback for `id`.
    pub fn open(&self, id: WorkflowId) -> Result<FeedbackWaiter, FeedbackError> {
        let mut slots = self.slots();
        match slots.get(&id) {
            Some(Slot::Waiting(_)) => Err(FeedbackError::AlreadyAwaiting(id)),
            Some(Slot::Delivered(_) | Slot::Settled) => Err(FeedbackError::AlreadyFinalized(id)),
            None => {
                let (tx, rx) = oneshot::channel();
                slots.insert(id, Slot::Waiting(tx));
                Ok(FeedbackWaiter { id, rx })
            }
        }
    }

    /// Wait up to `timeout` for a submission. `None` means the window closed empty.
    pub async fn wait(&self, waiter: FeedbackWaiter, timeout: Duration) -> Option<Feedback> {
        let FeedbackWaiter { id, mut rx } = waiter;
        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(feedback)) => Some(feedback),
            // Sender dropped: the slot was closed.
            Ok(Err(_)) => None,
            Err(_) => {
                let mut slots = self.slots();
                if let Some(slot) = slots.get_mut(&id) {
                    if matches!(slot, Slot::Waiting(_)) {
                        *slot = Slot::Settled;
                    }
                }
                drop(slots);
                // A submit that raced the deadline already sent under the lock.
                let late = rx.try_recv().ok();
                debug!(workflow_id = %id, delivered = late.is_some(), "Feedback window elapsed");
                late
            }
        }
    }

    /// Open a slot and wait on it.
    pub async fn await_feedback(
        &self,
        id: WorkflowId,
        timeout: Duration,
    ) -> Result<Option<Feedback>, FeedbackError> {
        let waiter = self.open(id)?;
        Ok(self.wait(waiter, timeout).await)
    }

    /// Deliver feedback to a waiting workflow.
    pub fn submit(
        &self,
        id: WorkflowId,
        rating: FeedbackRating,
        note: Option<String>,
    ) -> Result<Feedback, FeedbackError> {
        let mut slots = self.slots();
        let slot = slots
            .get_mut(&id)
            .ok_or(FeedbackError::UnknownWorkflow(id))?;
        if !matches!(slot, Slot::Waiting(_)) {
            return Err(FeedbackError::AlreadyFinalized(id));
        }
        let feedback = Feedback::new(rating, note);
        if let Slot::Waiting(tx) = std::mem::replace(slot, Slot::Delivered(feedback.clone())) {
            // The waiter may already be gone; the slot still holds the rating.
            let _ = tx.send(feedback.clone());
        }
        Ok(feedback)
    }

    /// Feedback accepted for `id`, if any.
    pub fn delivered(&self, id: WorkflowId) -> Option<Feedback> {
        match self.slots().get(&id) {
            Some(Slot::Delivered(feedback)) => Some(feedback.clone()),
            _ => None,
        }
    }

    /// Stop accepting feedback for `id`. A pending waiter sees `None`.
    /// Feedback that was already accepted is kept.
    pub fn close(&self, id: WorkflowId) {
        let mut slots = self.slots();
        match slots.get_mut(&id) {
            Some(Slot::Delivered(_)) => {}
            Some(slot) => *slot = Slot::Settled,
            None => {
                slots.insert(id, Slot::Settled);
            }
        }
    }

    /// Forget `id` entirely once its workflow has been archived.
    pub fn release(&self, id: WorkflowId) {
        self.slots().remove(&id);
    }

    pub fn is_waiting(&self, id: WorkflowId) -> bool {
        matches!(self.slots().get(&id), Some(Slot::Waiting(_)))
    }
}
