//! Ordered operation queue for social-sync.
//!
//! This module provides the in-memory half of the offline write queue:
//! - Strict FIFO ordering (only the front operation is ever in flight)
//! - In-flight tracking (sent but not yet acknowledged)
//! - Retry/abandon decisions driven by [`RetryPolicy`]
//!
//! Durability is the client's job: after every mutation here the client
//! writes [`OperationQueue::snapshot`] to the local store.

use std::collections::VecDeque;
use std::time::Duration;

use sync_types::{OperationId, QueuedOperation, SyncError};

use crate::backoff::RetryPolicy;

/// What happens to an operation after a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Keep it at the front and retry after `delay`.
    Retry {
        /// Number of failed attempts so far.
        attempt: u32,
        /// Delay before the next attempt.
        delay: Duration,
    },
    /// Removed from the queue; must be reported to the caller.
    Abandoned(QueuedOperation),
}

/// FIFO queue of pending mutations.
///
/// Operations flow through the queue in this order:
/// 1. `enqueue()` - append to the back
/// 2. `begin()` - mark the front operation in flight
/// 3. `ack()` - remove it (remote application confirmed)
///
/// On failure `fail()` either keeps the operation at the front for a retry
/// or removes it as abandoned.
#[derive(Debug, Default, Clone)]
pub struct OperationQueue {
    queue: VecDeque<QueuedOperation>,
    in_flight: Option<OperationId>,
}

impl OperationQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a queue from a persisted snapshot (order and attempt counts
    /// retained).
    pub fn restore(ops: Vec<QueuedOperation>) -> Self {
        Self {
            queue: ops.into(),
            in_flight: None,
        }
    }

    /// Append an operation.
    pub fn enqueue(&mut self, op: QueuedOperation) {
        self.queue.push_back(op);
    }

    /// Mark the front operation in flight and return a copy of it.
    ///
    /// Returns `None` when the queue is empty or an operation is already in
    /// flight (strict FIFO: one at a time).
    pub fn begin(&mut self) -> Option<QueuedOperation> {
        if self.in_flight.is_some() {
            return None;
        }
        let front = self.queue.front()?;
        self.in_flight = Some(front.id);
        Some(front.clone())
    }

    /// Confirm remote application of the in-flight operation.
    pub fn ack(&mut self, id: &OperationId) -> Option<QueuedOperation> {
        if self.in_flight.as_ref() != Some(id) {
            return None;
        }
        self.in_flight = None;
        self.queue.pop_front()
    }

    /// Record a failed attempt of the in-flight operation.
    ///
    /// Transient errors are retried until the policy's attempt ceiling;
    /// anything else abandons immediately. Returns `None` if `id` is not the
    /// in-flight operation.
    pub fn fail(
        &mut self,
        id: &OperationId,
        error: &SyncError,
        policy: &RetryPolicy,
    ) -> Option<Disposition> {
        if self.in_flight.as_ref() != Some(id) {
            return None;
        }
        self.in_flight = None;
        let front = self.queue.front_mut()?;
        front.attempts = front.attempts.saturating_add(1);
        front.last_error = Some(error.to_string());

        if error.is_transient() && !policy.should_abandon(front.attempts) {
            let attempt = front.attempts;
            return Some(Disposition::Retry {
                attempt,
                delay: policy.delay_after(attempt, error.retry_hint()),
            });
        }
        self.queue.pop_front().map(Disposition::Abandoned)
    }

    /// Put the in-flight operation back without counting an attempt (the
    /// connection dropped before an outcome was known).
    pub fn release(&mut self) {
        self.in_flight = None;
    }

    /// Remove an operation explicitly, wherever it sits.
    pub fn abandon(&mut self, id: &OperationId) -> Option<QueuedOperation> {
        let index = self.queue.iter().position(|op| &op.id == id)?;
        if self.in_flight.as_ref() == Some(id) {
            self.in_flight = None;
        }
        self.queue.remove(index)
    }

    /// Check whether an operation is still queued.
    pub fn contains(&self, id: &OperationId) -> bool {
        self.queue.iter().any(|op| &op.id == id)
    }

    /// Check whether an operation is in flight.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Front of the queue.
    pub fn front(&self) -> Option<&QueuedOperation> {
        self.queue.front()
    }

    /// Number of queued operations (including the in-flight one).
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Ordered copy of every queued operation, for persistence.
    pub fn snapshot(&self) -> Vec<QueuedOperation> {
        self.queue.iter().cloned().collect()
    }

    /// Iterate in FIFO order.
    pub fn iter(&self) -> impl Iterator<Item = &QueuedOperation> {
        self.queue.iter()
    }

    /// Remove everything, returning what was queued.
    pub fn clear(&mut self) -> Vec<QueuedOperation> {
        self.in_flight = None;
        self.queue.drain(..).collect()
    }
}
