//! Flush state machine for the offline operation queue.
//!
//! This module provides a pure, side-effect-free state machine for the
//! queue's flush lifecycle. The state machine takes events as input and
//! produces a new state plus a list of actions to execute.
//!
//! The actual I/O (remote writes, timers) is performed by sync-client, not
//! by this module.
//!
//! ```text
//! Idle --enqueue--> Pending --reachable--> Flushing --drained--> Idle
//!                      ^                     |   ^
//!                      |                failure   timer
//!                      |                     v   |
//!                      +---connection lost-- Backoff
//! ```

use std::time::Duration;

/// Queue flush state - NO I/O, just state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueState {
    /// Nothing queued.
    #[default]
    Idle,
    /// Operations queued, waiting for reachability.
    Pending,
    /// Applying operations front to back.
    Flushing,
    /// The front operation failed; waiting for the retry timer.
    Backoff {
        /// Failed attempts of the front operation so far.
        attempt: u32,
    },
}

impl QueueState {
    /// Create a new state machine in the Idle state.
    pub fn new() -> Self {
        Self::Idle
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function. The caller (sync-client) is responsible for
    /// executing the returned actions.
    pub fn on_event(self, event: FlushEvent) -> (Self, Vec<FlushAction>) {
        match (self, event) {
            (Self::Idle, FlushEvent::Enqueued) => (Self::Pending, vec![]),
            // The running flush or retry timer reaches it; the outcome of
            // the current operation reports the new queue length.
            (state @ (Self::Flushing | Self::Backoff { .. }), FlushEvent::Enqueued) => {
                (state, vec![])
            }

            // A flush can start from Idle after a restore or from Pending.
            (Self::Idle | Self::Pending, FlushEvent::FlushRequested { reachable, queued }) => {
                if queued == 0 {
                    (Self::Idle, vec![])
                } else if reachable {
                    (Self::Flushing, vec![FlushAction::ProcessNext])
                } else {
                    (Self::Pending, vec![])
                }
            }

            // From Flushing
            (
                Self::Flushing,
                FlushEvent::OperationApplied { remaining }
                | FlushEvent::OperationAbandoned { remaining },
            ) => {
                if remaining == 0 {
                    (Self::Idle, vec![FlushAction::Drained])
                } else {
                    (Self::Flushing, vec![FlushAction::ProcessNext])
                }
            }
            (Self::Flushing, FlushEvent::OperationRetry { attempt, delay }) => (
                Self::Backoff { attempt },
                vec![FlushAction::StartRetryTimer { delay }],
            ),

            // From Backoff
            (Self::Backoff { .. }, FlushEvent::RetryTimerFired { reachable }) => {
                if reachable {
                    (Self::Flushing, vec![FlushAction::ProcessNext])
                } else {
                    (Self::Pending, vec![])
                }
            }

            // Losing connectivity parks the queue.
            (Self::Flushing, FlushEvent::ConnectionLost { queued }) => {
                if queued == 0 {
                    (Self::Idle, vec![])
                } else {
                    (Self::Pending, vec![])
                }
            }
            (Self::Backoff { .. }, FlushEvent::ConnectionLost { .. }) => {
                (Self::Pending, vec![FlushAction::CancelRetryTimer])
            }

            // Outcomes of a write that was in flight when connectivity dropped.
            (
                Self::Pending,
                FlushEvent::OperationApplied { remaining }
                | FlushEvent::OperationAbandoned { remaining },
            ) => {
                if remaining == 0 {
                    (Self::Idle, vec![FlushAction::Drained])
                } else {
                    (Self::Pending, vec![])
                }
            }

            (Self::Backoff { .. }, FlushEvent::Cleared) => {
                (Self::Idle, vec![FlushAction::CancelRetryTimer])
            }
            (_, FlushEvent::Cleared) => (Self::Idle, vec![]),

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check whether work is queued (in any non-idle state).
    pub fn has_work(&self) -> bool {
        !matches!(self, Self::Idle)
    }

    /// Check whether a flush or its retry timer is active.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Flushing | Self::Backoff { .. })
    }
}

/// Events that can occur in the flush lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushEvent {
    /// An operation was durably enqueued.
    Enqueued,
    /// `flush()` was called or connectivity came back.
    FlushRequested {
        /// Whether the remote store is reachable.
        reachable: bool,
        /// Operations currently queued.
        queued: usize,
    },
    /// The front operation was confirmed by the remote store.
    OperationApplied {
        /// Operations left after removing it.
        remaining: usize,
    },
    /// The front operation failed transiently and stays queued.
    OperationRetry {
        /// Failed attempts so far.
        attempt: u32,
        /// Delay chosen by the retry policy.
        delay: Duration,
    },
    /// The front operation was abandoned and removed.
    OperationAbandoned {
        /// Operations left after removing it.
        remaining: usize,
    },
    /// The backoff timer elapsed.
    RetryTimerFired {
        /// Whether the remote store is reachable now.
        reachable: bool,
    },
    /// Reachability went false.
    ConnectionLost {
        /// Operations currently queued.
        queued: usize,
    },
    /// The queue was emptied (sign-out, dispose).
    Cleared,
}

/// Actions to be executed by the sync-client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushAction {
    /// Send the front operation to the remote store.
    ProcessNext,
    /// Start the backoff timer.
    StartRetryTimer {
        /// Delay before firing.
        delay: Duration,
    },
    /// Cancel a running backoff timer.
    CancelRetryTimer,
    /// The queue became empty.
    Drained,
}
